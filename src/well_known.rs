use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// Subset of the OpenID provider metadata document used by this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    #[serde(default)]
    pub end_session_endpoint: Option<Url>,
    pub jwks_uri: Url,
}

impl ProviderMetadata {
    /// Azure AD v1 endpoint layout under an authority such as
    /// `https://login.microsoftonline.com/contoso.onmicrosoft.com`.
    ///
    /// Used when discovery is skipped; the issuer is the authority itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the authority cannot serve as a base URL.
    pub fn from_authority(authority: &Url) -> Result<Self, Error> {
        let base = authority.as_str().trim_end_matches('/');
        let endpoint = |path: &str| -> Result<Url, Error> {
            Url::parse(&format!("{base}/{path}"))
                .map_err(|e| Error::Config(format!("authority {base}: {e}")))
        };
        Ok(Self {
            issuer: base.to_owned(),
            authorization_endpoint: endpoint("oauth2/authorize")?,
            token_endpoint: endpoint("oauth2/token")?,
            end_session_endpoint: Some(endpoint("oauth2/logout")?),
            jwks_uri: endpoint("discovery/keys")?,
        })
    }

    /// Location of the discovery document for an authority.
    #[must_use]
    pub fn discovery_url(authority: &Url) -> String {
        format!(
            "{}/.well-known/openid-configuration",
            authority.as_str().trim_end_matches('/')
        )
    }

    /// Fetch `{authority}/.well-known/openid-configuration`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network or decoding failure, or
    /// [`Error::OAuth`] if the provider answers with a non-success status.
    pub async fn discover(http: &reqwest::Client, authority: &Url) -> Result<Self, Error> {
        let url = Self::discovery_url(authority);
        tracing::info!(url = %url, "Fetching OpenID provider metadata");

        let response = http.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::OAuth {
                operation: "discovery",
                status: Some(status),
                detail: body,
            });
        }
        response.json::<Self>().await.map_err(Into::into)
    }
}
