use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::protocol;
use crate::token::IdTokenValidator;
use crate::types::{Claim, Session};
use crate::well_known::ProviderMetadata;

/// Response type of the hybrid flow: code for the back channel, ID token for sign-in.
pub const RESPONSE_TYPE: &str = "code id_token";

/// OpenID Connect client for the authorization-code (hybrid) flow.
///
/// ```rust,ignore
/// use aad_oidc_demo::{JwksValidator, OidcClient, ProviderMetadata};
///
/// let metadata = ProviderMetadata::discover(&http, &authority).await?;
/// let validator = JwksValidator::new(metadata.jwks_uri.clone(), "my-client-id", Some(metadata.issuer.clone()));
/// let client = OidcClient::new("my-client-id", metadata, validator)
///     .with_resource("https://graph.windows.net");
/// ```
pub struct OidcClient<V> {
    client_id: String,
    metadata: ProviderMetadata,
    scopes: Vec<String>,
    resource: Option<String>,
    validator: V,
}

/// Authorization URL plus the values the callback must be checked against.
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: String,
    pub correlation: Correlation,
}

/// Per-browser values created at challenge time and checked at callback time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    pub state: String,
    pub nonce: String,
    /// Local path to land on after sign-in.
    pub return_uri: String,
}

/// Parameters the provider posts to the callback path (`response_mode=form_post`).
#[derive(Debug, Default, Deserialize)]
pub struct AuthorizationResponse {
    pub code: Option<String>,
    pub id_token: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Validated callback outcome. Lives only while the callback is handled.
#[derive(Debug)]
pub struct AuthorizationResult {
    code: String,
    return_uri: String,
    claims: Vec<Claim>,
    code_redeemed: bool,
}

impl AuthorizationResult {
    /// The authorization code, to be redeemed at the token endpoint.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn return_uri(&self) -> &str {
        &self.return_uri
    }

    /// Claims of the validated ID token, in token order.
    #[must_use]
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Record that the code was redeemed by the code-received handler.
    pub fn handle_code_redemption(&mut self) {
        self.code_redeemed = true;
    }

    #[must_use]
    pub fn is_code_redeemed(&self) -> bool {
        self.code_redeemed
    }
}

impl<V: IdTokenValidator> OidcClient<V> {
    #[must_use]
    pub fn new(client_id: impl Into<String>, metadata: ProviderMetadata, validator: V) -> Self {
        Self {
            client_id: client_id.into(),
            metadata,
            scopes: vec!["openid".into(), "profile".into()],
            resource: None,
            validator,
        }
    }

    /// Override the requested scopes (default: `["openid", "profile"]`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Resource the authorization code will be redeemed for (Azure AD v1).
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Build the authorization redirect with a fresh state and nonce.
    ///
    /// `redirect_uri` is the absolute callback URL; `return_uri` is where the
    /// browser goes once signed in (non-local values fall back to `/`).
    #[must_use]
    pub fn challenge(&self, redirect_uri: &Url, return_uri: &str) -> AuthorizationRequest {
        let state = protocol::generate_state();
        let nonce = protocol::generate_nonce();
        let scope = self.scopes.join(" ");

        let mut url = self.metadata.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("response_type", RESPONSE_TYPE)
                .append_pair("response_mode", "form_post")
                .append_pair("redirect_uri", redirect_uri.as_str())
                .append_pair("scope", &scope)
                .append_pair("state", &state)
                .append_pair("nonce", &nonce);
            if let Some(resource) = &self.resource {
                query.append_pair("resource", resource);
            }
        }

        AuthorizationRequest {
            url: url.into(),
            correlation: Correlation {
                state,
                nonce,
                return_uri: local_path_or_root(return_uri).to_owned(),
            },
        }
    }

    /// Validate the provider's callback against the stored correlation.
    ///
    /// Checks, in order: provider error, state, presence of code and ID token,
    /// the ID token itself (signature, issuer, audience, lifetime, nonce) and
    /// the `c_hash` binding between ID token and code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OAuth`] if the provider reported an error,
    /// [`Error::Protocol`] for a forged or incomplete response, or
    /// [`Error::Token`] if the ID token is rejected.
    pub async fn handle_callback(
        &self,
        response: AuthorizationResponse,
        correlation: &Correlation,
    ) -> Result<AuthorizationResult, Error> {
        if let Some(error) = response.error {
            let description = response.error_description.unwrap_or_default();
            return Err(Error::OAuth {
                operation: "authorization",
                status: None,
                detail: format!("{error}: {description}"),
            });
        }

        if response.state.as_deref() != Some(correlation.state.as_str()) {
            tracing::warn!("OIDC state mismatch");
            return Err(Error::Protocol("state mismatch".into()));
        }

        let code = response
            .code
            .ok_or_else(|| Error::Protocol("missing authorization code".into()))?;
        let id_token = response
            .id_token
            .ok_or_else(|| Error::Protocol("missing id_token".into()))?;

        let claims = self
            .validator
            .validate(&id_token, &correlation.nonce)
            .await?;

        if let Some(c_hash) = claims.iter().find(|c| c.claim_type == "c_hash") {
            if c_hash.value != protocol::code_hash(&code) {
                return Err(Error::Protocol("c_hash does not match the authorization code".into()));
            }
        }

        Ok(AuthorizationResult {
            code,
            return_uri: local_path_or_root(&correlation.return_uri).to_owned(),
            claims,
            code_redeemed: false,
        })
    }

    /// Turn a redeemed authorization result into the session to persist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the code was never redeemed, or
    /// [`Error::Token`] if the claims carry no object identifier.
    pub fn sign_in(&self, result: AuthorizationResult) -> Result<Session, Error> {
        if !result.code_redeemed {
            return Err(Error::Protocol("authorization code was not redeemed".into()));
        }
        Session::from_claims(result.claims)
            .ok_or_else(|| Error::Token("ID token has no object identifier claim".into()))
    }

    /// Provider end-session URL returning the browser to `post_logout_redirect_uri`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the provider publishes no end-session endpoint.
    pub fn end_session_url(&self, post_logout_redirect_uri: &Url) -> Result<Url, Error> {
        let mut url = self
            .metadata
            .end_session_endpoint
            .clone()
            .ok_or_else(|| Error::Config("provider has no end_session_endpoint".into()))?;
        url.query_pairs_mut()
            .append_pair("post_logout_redirect_uri", post_logout_redirect_uri.as_str());
        Ok(url)
    }
}

/// Only same-origin absolute paths are accepted as return targets.
fn local_path_or_root(uri: &str) -> &str {
    if uri.starts_with('/') && !uri.starts_with("//") && !uri.starts_with("/\\") {
        uri
    } else {
        "/"
    }
}
