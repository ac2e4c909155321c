use std::future::Future;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::{Map, Value as JsonValue};
use tokio::sync::RwLock;
use url::Url;

use crate::error::Error;
use crate::types::Claim;

type Payload = Map<String, JsonValue>;

/// Minimum age of the cached JWKS before an unknown `kid` triggers a refetch.
const MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(60);

/// Validation of the ID token delivered on the authorization callback.
///
/// Implementations check signature, issuer, audience, lifetime and that the
/// token echoes `expected_nonce`, then return its claims in token order.
pub trait IdTokenValidator: Send + Sync + 'static {
    fn validate(
        &self,
        id_token: &str,
        expected_nonce: &str,
    ) -> impl Future<Output = Result<Vec<Claim>, Error>> + Send;
}

struct CachedJwks {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// RS256 ID token validator backed by the provider's JWKS endpoint.
pub struct JwksValidator {
    jwks_uri: Url,
    audience: String,
    issuer: Option<String>,
    http: reqwest::Client,
    cache: RwLock<Option<CachedJwks>>,
    cache_ttl: Duration,
    leeway_secs: u64,
}

impl JwksValidator {
    /// Validator for tokens issued to `audience` (the client id).
    ///
    /// `issuer: None` skips the issuer check, which multi-tenant
    /// authorities need since every tenant signs with its own issuer.
    #[must_use]
    pub fn new(jwks_uri: Url, audience: impl Into<String>, issuer: Option<String>) -> Self {
        Self {
            jwks_uri,
            audience: audience.into(),
            issuer,
            http: reqwest::Client::new(),
            cache: RwLock::new(None),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            leeway_secs: 300,
        }
    }

    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, Error> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                let age = cached.fetched_at.elapsed();
                if age < self.cache_ttl {
                    if let Some(jwk) = cached.jwks.find(kid) {
                        return DecodingKey::from_jwk(jwk)
                            .map_err(|e| Error::Token(format!("invalid JWK {kid}: {e}")));
                    }
                    if age < MIN_REFETCH_INTERVAL {
                        tracing::debug!(kid, "Unknown signing key; JWKS fetched too recently to refetch");
                        return Err(Error::Token(format!("signing key {kid} not found in JWKS")));
                    }
                }
            }
        }

        // Expired cache or unknown kid (key rollover): fetch once.
        let jwks = self.fetch_jwks().await?;
        let key = jwks
            .find(kid)
            .ok_or_else(|| Error::Token(format!("signing key {kid} not found in JWKS")))
            .and_then(|jwk| {
                DecodingKey::from_jwk(jwk)
                    .map_err(|e| Error::Token(format!("invalid JWK {kid}: {e}")))
            });

        *self.cache.write().await = Some(CachedJwks {
            jwks,
            fetched_at: Instant::now(),
        });
        key
    }

    async fn fetch_jwks(&self) -> Result<JwkSet, Error> {
        tracing::debug!(jwks_uri = %self.jwks_uri, "Fetching JWKS");
        let response = self.http.get(self.jwks_uri.clone()).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::OAuth {
                operation: "JWKS request",
                status: Some(status),
                detail: body,
            });
        }
        response.json::<JwkSet>().await.map_err(Into::into)
    }
}

impl IdTokenValidator for JwksValidator {
    async fn validate(&self, id_token: &str, expected_nonce: &str) -> Result<Vec<Claim>, Error> {
        let header =
            decode_header(id_token).map_err(|e| Error::Token(format!("invalid JWT: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(Error::Token(format!("algorithm {:?} not allowed", header.alg)));
        }
        let kid = header
            .kid
            .ok_or_else(|| Error::Token("missing kid in JWT header".into()))?;

        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.audience]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation.leeway = self.leeway_secs;

        let payload = decode::<Payload>(id_token, &key, &validation)
            .map_err(|e| {
                tracing::warn!(error = %e, audience = %self.audience, "ID token rejected");
                Error::Token(e.to_string())
            })?
            .claims;

        let nonce = payload.get("nonce").and_then(JsonValue::as_str);
        if nonce != Some(expected_nonce) {
            return Err(Error::Token("nonce mismatch".into()));
        }

        Ok(flatten_claims(&payload))
    }
}

/// Flattens a JWT payload into `(type, value)` pairs, keeping member order.
///
/// Arrays yield one claim per element; numbers, booleans and objects keep
/// their JSON text; `null` members are dropped.
#[must_use]
pub fn flatten_claims(payload: &Payload) -> Vec<Claim> {
    let mut claims = Vec::with_capacity(payload.len());
    for (claim_type, value) in payload {
        match value {
            JsonValue::Array(items) => claims.extend(
                items
                    .iter()
                    .filter_map(claim_value)
                    .map(|v| Claim::new(claim_type.clone(), v)),
            ),
            other => {
                if let Some(v) = claim_value(other) {
                    claims.push(Claim::new(claim_type.clone(), v));
                }
            }
        }
    }
    claims
}

fn claim_value(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Reads a JWT payload WITHOUT checking its signature.
///
/// Only for tokens received directly from the token endpoint over TLS.
///
/// # Errors
///
/// Returns [`Error::Token`] if the token is not a three-part JWT with a JSON payload.
pub fn decode_unverified_payload(token: &str) -> Result<Payload, Error> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::Token("invalid token format".into()));
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|_| Error::Token("invalid payload encoding".into()))?;
    serde_json::from_slice(&bytes).map_err(|_| Error::Token("invalid payload".into()))
}
