use axum::extract::{FromRef, FromRequestParts, OriginalUri};
use axum::http::header::HOST;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use url::Url;

use super::error::AppError;
use crate::error::Error;

/// Absolute URL of the inbound request: scheme, host and path, no query.
///
/// The scheme comes from the request target when absolute, else from
/// `X-Forwarded-Proto`, else `http` (this server does not terminate TLS).
/// The host comes from `X-Forwarded-Host`, else `Host`. Forwarded headers
/// count only when the state says a trusted proxy sets them
/// ([`TrustForwarded`]).
///
/// The authorization redirect URI and the code-redemption redirect URI are
/// both derived from this, so they always agree.
#[derive(Debug, Clone)]
pub struct RequestUrl(pub Url);

impl RequestUrl {
    /// Same scheme and host, different path.
    #[must_use]
    pub fn with_path(&self, path: &str) -> Url {
        let mut url = self.0.clone();
        url.set_path(path);
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}

/// Whether `X-Forwarded-Proto` and `X-Forwarded-Host` are honoured.
///
/// Only a reverse proxy that overwrites these headers makes them
/// trustworthy; otherwise any client can pick the host of its own redirect URI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrustForwarded(pub bool);

impl<S> FromRequestParts<S> for RequestUrl
where
    S: Send + Sync,
    TrustForwarded: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TrustForwarded(trusted) = TrustForwarded::from_ref(state);
        let forwarded = |name| {
            if trusted {
                first_header_value(&parts.headers, name)
            } else {
                None
            }
        };

        let uri = parts
            .extensions
            .get::<OriginalUri>()
            .map_or(&parts.uri, |original| &original.0);

        let scheme = uri
            .scheme_str()
            .or_else(|| forwarded("x-forwarded-proto"))
            .unwrap_or("http");

        let host = uri
            .authority()
            .map(|a| a.as_str())
            .or_else(|| forwarded("x-forwarded-host"))
            .or_else(|| parts.headers.get(HOST).and_then(|v| v.to_str().ok()))
            .ok_or_else(|| Error::Protocol("request has no Host header".into()))?;

        let url = Url::parse(&format!("{scheme}://{host}{}", uri.path()))
            .map_err(|e| Error::Protocol(format!("cannot rebuild request URL: {e}")))?;

        Ok(Self(url))
    }
}

fn first_header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
