use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// Short-form object identifier claim emitted by Azure AD.
pub const OBJECT_ID_CLAIM: &str = "oid";

/// Long-form object identifier claim type (mapped identities).
pub const OBJECT_ID_CLAIM_URI: &str = "http://schemas.microsoft.com/identity/claims/objectidentifier";

/// Claim types consulted, in order, for the display name.
pub const NAME_CLAIMS: [&str; 4] = ["name", "unique_name", "preferred_username", "upn"];

/// Directory object identifier of the signed-in user (`oid` claim).
///
/// Stable per user and tenant; used as the token cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct ObjectId(pub String);

/// Single `(type, value)` assertion about the signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "t")]
    pub claim_type: String,
    #[serde(rename = "v")]
    pub value: String,
}

impl Claim {
    #[must_use]
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// Authenticated state of one browser, persisted in the session cookie.
///
/// Claims keep the order in which the ID token listed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "c")]
    pub claims: Vec<Claim>,
    #[serde(rename = "o")]
    pub object_id: ObjectId,
}

impl Session {
    /// Build a session from validated ID token claims.
    ///
    /// Returns `None` if no object identifier claim is present.
    #[must_use]
    pub fn from_claims(claims: Vec<Claim>) -> Option<Self> {
        let object_id = find_claim(&claims, OBJECT_ID_CLAIM)
            .or_else(|| find_claim(&claims, OBJECT_ID_CLAIM_URI))
            .map(|v| ObjectId(v.to_owned()))?;
        let name = NAME_CLAIMS
            .iter()
            .find_map(|t| find_claim(&claims, t))
            .map(str::to_owned);

        Some(Self {
            name,
            claims,
            object_id,
        })
    }
}

fn find_claim<'a>(claims: &'a [Claim], claim_type: &str) -> Option<&'a str> {
    claims
        .iter()
        .find(|c| c.claim_type == claim_type)
        .map(|c| c.value.as_str())
}

/// Confidential client credential presented to the token endpoint.
#[derive(Clone)]
pub struct ClientCredential {
    client_id: String,
    client_secret: String,
}

impl ClientCredential {
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl std::fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredential")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .finish()
    }
}
