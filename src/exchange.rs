use std::future::Future;

use serde::{Deserialize, Deserializer};
use time::{Duration, OffsetDateTime};
use url::Url;

use crate::error::Error;
use crate::token::decode_unverified_payload;
use crate::token_cache::{CachedAccessToken, TokenCache};
use crate::types::{ClientCredential, OBJECT_ID_CLAIM, ObjectId};

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Tokens returned for one resource.
///
/// The refresh token never leaves the exchange client's cache.
#[derive(Clone)]
#[non_exhaustive]
pub struct TokenSet {
    pub access_token: String,
    pub expires_on: OffsetDateTime,
    pub resource: String,
    /// Cache key the tokens were stored under, if the answer identified a user.
    pub user: Option<ObjectId>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[redacted]")
            .field("expires_on", &self.expires_on)
            .field("resource", &self.resource)
            .field("user", &self.user)
            .finish()
    }
}

/// Token acquisition for the signed-in user.
pub trait TokenExchange: Send + Sync + 'static {
    /// Redeem an authorization code. `redirect_uri` must equal the one sent
    /// with the authorization request or the provider rejects the code.
    fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &Url,
        credential: &ClientCredential,
        resource: &str,
    ) -> impl Future<Output = Result<TokenSet, Error>> + Send;

    /// Token for `resource` from cache, or via the user's refresh token.
    fn acquire_silently(
        &self,
        resource: &str,
        credential: &ClientCredential,
        user: &ObjectId,
    ) -> impl Future<Output = Result<TokenSet, Error>> + Send;

    /// Forget everything held for `user` (sign-out).
    fn forget_user(&self, _user: &ObjectId) -> impl Future<Output = ()> + Send {
        async {}
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default, deserialize_with = "number_or_string")]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    resource: Option<String>,
}

// Azure AD v1 sends numeric fields as JSON strings.
fn number_or_string<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Azure AD v1 token endpoint client with a per-user cache.
pub struct AadTokenClient {
    token_url: Url,
    http: reqwest::Client,
    cache: TokenCache,
}

impl AadTokenClient {
    #[must_use]
    pub fn new(token_url: Url) -> Self {
        Self {
            token_url,
            http: reqwest::Client::new(),
            cache: TokenCache::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Drop users whose tokens went unused for `idle_timeout` (default 14 days).
    ///
    /// Set this to the session lifetime: a user whose session cookie expired
    /// can no longer reach their cached tokens.
    #[must_use]
    pub fn with_cache_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.cache = TokenCache::new().with_idle_timeout(idle_timeout);
        self
    }

    async fn request_token(
        &self,
        params: &[(&str, &str)],
        operation: &'static str,
    ) -> Result<TokenResponse, Error> {
        let response = self
            .http
            .post(self.token_url.clone())
            .form(params)
            .send()
            .await?;

        let response = Self::ensure_success(response, operation).await?;
        response.json::<TokenResponse>().await.map_err(Into::into)
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::OAuth {
            operation,
            status: Some(status),
            detail: body,
        })
    }

    async fn remember(
        &self,
        response: TokenResponse,
        requested_resource: &str,
        user: Option<ObjectId>,
    ) -> TokenSet {
        let user = user.or_else(|| {
            response
                .id_token
                .as_deref()
                .and_then(|t| decode_unverified_payload(t).ok())
                .and_then(|p| p.get(OBJECT_ID_CLAIM)?.as_str().map(str::to_owned))
                .map(ObjectId)
        });
        let resource = response
            .resource
            .unwrap_or_else(|| requested_resource.to_owned());
        let now = OffsetDateTime::now_utc();
        let expires_on = now + Duration::seconds(response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN));

        match &user {
            Some(user) => {
                self.cache
                    .store(
                        user,
                        &resource,
                        CachedAccessToken {
                            access_token: response.access_token.clone(),
                            expires_on,
                        },
                        response.refresh_token,
                        now,
                    )
                    .await;
            }
            None => tracing::warn!(
                resource = %resource,
                "Token response did not identify a user; tokens not cached"
            ),
        }

        TokenSet {
            access_token: response.access_token,
            expires_on,
            resource,
            user,
        }
    }
}

impl TokenExchange for AadTokenClient {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &Url,
        credential: &ClientCredential,
        resource: &str,
    ) -> Result<TokenSet, Error> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", credential.client_id()),
            ("client_secret", credential.client_secret()),
            ("resource", resource),
        ];
        let response = self.request_token(&params, "code redemption").await?;
        let tokens = self.remember(response, resource, None).await;

        tracing::info!(user = ?tokens.user, resource = %tokens.resource, "Authorization code redeemed");
        Ok(tokens)
    }

    async fn acquire_silently(
        &self,
        resource: &str,
        credential: &ClientCredential,
        user: &ObjectId,
    ) -> Result<TokenSet, Error> {
        if let Some(cached) = self
            .cache
            .access_token(user, resource, OffsetDateTime::now_utc())
            .await
        {
            tracing::debug!(user = %user, resource = %resource, "Access token served from cache");
            return Ok(TokenSet {
                access_token: cached.access_token,
                expires_on: cached.expires_on,
                resource: resource.to_owned(),
                user: Some(user.clone()),
            });
        }

        let refresh_token = self.cache.refresh_token(user).await.ok_or_else(|| {
            Error::InteractionRequired(format!(
                "no cached token for user {user}; sign in again"
            ))
        })?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", credential.client_id()),
            ("client_secret", credential.client_secret()),
            ("resource", resource),
        ];
        let response = self.request_token(&params, "token refresh").await?;

        tracing::debug!(user = %user, resource = %resource, "Access token refreshed");
        Ok(self.remember(response, resource, Some(user.clone())).await)
    }

    async fn forget_user(&self, user: &ObjectId) {
        self.cache.remove(user).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GRAPH: &str = "https://graph.windows.net";

    fn credential() -> ClientCredential {
        ClientCredential::new("cid", "secret")
    }

    fn unsigned_id_token(oid: &str) -> String {
        let payload = URL_SAFE_NO_PAD.encode(json!({ "oid": oid }).to_string());
        format!("e30.{payload}.sig")
    }

    fn client(server: &MockServer) -> AadTokenClient {
        AadTokenClient::new(format!("{}/oauth2/token", server.uri()).parse().unwrap())
    }

    fn user() -> ObjectId {
        ObjectId::from("user-1".to_string())
    }

    async fn mount_code_redemption(server: &MockServer, expires_in: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "access_token": "at-1",
                "expires_in": expires_in,
                "refresh_token": "rt-1",
                "resource": GRAPH,
                "id_token": unsigned_id_token("user-1"),
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn exchange_code_posts_redirect_uri_and_resource() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("code=abc"))
            .and(body_string_contains(
                "redirect_uri=https%3A%2F%2Fapp.example%2Fsignin-oidc",
            ))
            .and(body_string_contains("resource=https%3A%2F%2Fgraph.windows.net"))
            .and(body_string_contains("client_secret=secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1",
                "expires_in": "3599",
                "id_token": unsigned_id_token("user-1"),
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client(&server)
            .exchange_code(
                "abc",
                &"https://app.example/signin-oidc".parse().unwrap(),
                &credential(),
                GRAPH,
            )
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(tokens.resource, GRAPH);
        assert_eq!(tokens.user, Some(user()));
    }

    #[tokio::test]
    async fn silent_acquisition_uses_cache_after_exchange() {
        let server = MockServer::start().await;
        mount_code_redemption(&server, json!(3600)).await;
        let client = client(&server);

        client
            .exchange_code("abc", &"https://app.example/signin-oidc".parse().unwrap(), &credential(), GRAPH)
            .await
            .unwrap();
        let tokens = client
            .acquire_silently(GRAPH, &credential(), &user())
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "at-1");
        // `.expect(1)` on the mock verifies no second request was made
    }

    #[tokio::test]
    async fn silent_acquisition_refreshes_for_other_resource() {
        let server = MockServer::start().await;
        mount_code_redemption(&server, json!("3600")).await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .and(body_string_contains("resource=https%3A%2F%2Fother.example"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-other",
                "expires_in": "3600",
                "refresh_token": "rt-2",
                "resource": "https://other.example",
            })))
            .expect(1)
            .mount(&server)
            .await;
        let client = client(&server);

        client
            .exchange_code("abc", &"https://app.example/signin-oidc".parse().unwrap(), &credential(), GRAPH)
            .await
            .unwrap();
        let tokens = client
            .acquire_silently("https://other.example", &credential(), &user())
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "at-other");
        assert_eq!(client.cache.refresh_token(&user()).await.as_deref(), Some("rt-2"));
    }

    #[tokio::test]
    async fn silent_acquisition_without_cache_requires_interaction() {
        let server = MockServer::start().await;
        let err = client(&server)
            .acquire_silently(GRAPH, &credential(), &user())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InteractionRequired(_)));
    }

    #[tokio::test]
    async fn forget_user_drops_cached_tokens() {
        let server = MockServer::start().await;
        mount_code_redemption(&server, json!(3600)).await;
        let client = client(&server);

        client
            .exchange_code("abc", &"https://app.example/signin-oidc".parse().unwrap(), &credential(), GRAPH)
            .await
            .unwrap();
        client.forget_user(&user()).await;

        let err = client
            .acquire_silently(GRAPH, &credential(), &user())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InteractionRequired(_)));
    }

    #[tokio::test]
    async fn sign_ins_without_sign_out_do_not_accumulate() {
        let server = MockServer::start().await;
        for user in ["u-1", "u-2", "u-3"] {
            Mock::given(method("POST"))
                .and(body_string_contains(format!("code={user}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "access_token": "at",
                    "expires_in": 1,
                    "refresh_token": "rt",
                    "id_token": unsigned_id_token(user),
                })))
                .mount(&server)
                .await;
        }
        let client = client(&server).with_cache_idle_timeout(Duration::ZERO);

        for user in ["u-1", "u-2", "u-3"] {
            client
                .exchange_code(user, &"https://app.example/signin-oidc".parse().unwrap(), &credential(), GRAPH)
                .await
                .unwrap();
        }

        assert_eq!(client.cache.user_count().await, 1);
    }

    #[tokio::test]
    async fn provider_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "AADSTS50011: The reply URL does not match",
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .exchange_code("abc", &"https://app.example/wrong".parse().unwrap(), &credential(), GRAPH)
            .await
            .unwrap_err();

        match err {
            Error::OAuth { operation, status, detail } => {
                assert_eq!(operation, "code redemption");
                assert_eq!(status, Some(400));
                assert!(detail.contains("AADSTS50011"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn expires_in_accepts_string_and_number() {
        let a: TokenResponse =
            serde_json::from_value(json!({ "access_token": "x", "expires_in": "10" })).unwrap();
        let b: TokenResponse =
            serde_json::from_value(json!({ "access_token": "x", "expires_in": 10 })).unwrap();
        let c: TokenResponse = serde_json::from_value(json!({ "access_token": "x" })).unwrap();

        assert_eq!(a.expires_in, Some(10));
        assert_eq!(b.expires_in, Some(10));
        assert_eq!(c.expires_in, None);
    }

    #[test]
    fn token_set_debug_redacts_access_token() {
        let tokens = TokenSet {
            access_token: "very-secret".into(),
            expires_on: OffsetDateTime::UNIX_EPOCH,
            resource: GRAPH.into(),
            user: None,
        };
        assert!(!format!("{tokens:?}").contains("very-secret"));
    }
}
