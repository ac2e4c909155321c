use axum_extra::extract::cookie::Key;
use url::Url;

use crate::error::Error;
use crate::types::ClientCredential;

/// Resource the sample calls on behalf of the user (Azure AD Graph).
pub const DEFAULT_RESOURCE: &str = "https://graph.windows.net";

/// Cookie and routing settings shared by the handlers.
#[derive(Clone)]
pub(crate) struct AppSettings {
    pub(crate) cookie_key: Key,
    pub(crate) session_cookie_name: String,
    pub(crate) session_ttl_days: i64,
    pub(crate) secure_cookies: bool,
    pub(crate) callback_path: String,
    pub(crate) trust_forwarded_headers: bool,
}

impl AppSettings {
    fn defaults() -> Self {
        Self {
            cookie_key: Key::generate(),
            session_cookie_name: "__aad_session".into(),
            session_ttl_days: 14,
            secure_cookies: true,
            callback_path: "/signin-oidc".into(),
            trust_forwarded_headers: false,
        }
    }
}

/// Application configuration, built once at startup and never mutated.
///
/// Required fields (client id, client secret, authority) are constructor
/// parameters. Use [`from_env()`](AppConfig::from_env) for convention-based
/// setup, or [`new()`](AppConfig::new) with `with_*` methods for full control.
pub struct AppConfig {
    pub(super) credential: ClientCredential,
    pub(super) authority: Url,
    pub(super) resource: String,
    pub(super) scopes: Vec<String>,
    pub(super) validate_issuer: bool,
    pub(super) settings: AppSettings,
}

impl AppConfig {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        authority: Url,
    ) -> Self {
        Self {
            credential: ClientCredential::new(client_id, client_secret),
            authority,
            resource: DEFAULT_RESOURCE.into(),
            scopes: vec!["openid".into(), "profile".into()],
            validate_issuer: true,
            settings: AppSettings::defaults(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `OIDC_CLIENT_ID`: application (client) id
    /// - `OIDC_CLIENT_SECRET`: client secret used to redeem codes
    /// - `OIDC_AUTHORITY`: issuer base URL, e.g. `https://login.microsoftonline.com/contoso.onmicrosoft.com`
    ///
    /// # Optional env vars
    /// - `OIDC_RESOURCE`: resource to acquire tokens for (default: Azure AD Graph)
    /// - `OIDC_SCOPES`: comma-separated scopes
    /// - `OIDC_VALIDATE_ISSUER`: `"0"` or `"false"` to accept any issuer (multi-tenant authorities)
    /// - `COOKIE_KEY`: cookie encryption key bytes (at least 64)
    /// - `DEV_COOKIES`: `"1"` or `"true"` to drop the `Secure` flag for plain-HTTP development
    /// - `SESSION_TTL_DAYS`: lifetime of the session cookie and cached tokens (default 14)
    /// - `TRUST_FORWARDED_HEADERS`: `"1"` or `"true"` when a reverse proxy sets `X-Forwarded-Proto`/`X-Forwarded-Host`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required env vars are missing or values are invalid.
    pub fn from_env() -> Result<Self, Error> {
        let client_id = required("OIDC_CLIENT_ID")?;
        let client_secret = required("OIDC_CLIENT_SECRET")?;
        let authority: Url = required("OIDC_AUTHORITY")?
            .parse()
            .map_err(|e| Error::Config(format!("OIDC_AUTHORITY: {e}")))?;

        let mut config = Self::new(client_id, client_secret, authority);

        if let Ok(resource) = std::env::var("OIDC_RESOURCE") {
            config = config.with_resource(resource);
        }
        if let Ok(scopes) = std::env::var("OIDC_SCOPES") {
            config = config.with_scopes(scopes.split(',').map(|s| s.trim().to_string()).collect());
        }
        if matches!(
            std::env::var("OIDC_VALIDATE_ISSUER").as_deref(),
            Ok("0") | Ok("false"),
        ) {
            config = config.with_validate_issuer(false);
        }

        if let Ok(days) = std::env::var("SESSION_TTL_DAYS") {
            let days: i64 = days
                .parse()
                .map_err(|e| Error::Config(format!("SESSION_TTL_DAYS: {e}")))?;
            config = config.with_session_ttl_days(days);
        }

        if matches!(
            std::env::var("TRUST_FORWARDED_HEADERS").as_deref(),
            Ok("1") | Ok("true"),
        ) {
            config = config.with_trust_forwarded_headers(true);
        }

        let dev_cookies = matches!(
            std::env::var("DEV_COOKIES").as_deref(),
            Ok("1") | Ok("true"),
        );

        let cookie_key = match std::env::var("COOKIE_KEY") {
            Ok(k) => Key::try_from(k.as_bytes()).map_err(|_| {
                Error::Config(
                    "COOKIE_KEY is set but invalid (must be at least 64 bytes). \
                     Remove the env var to use an ephemeral key, or provide a valid key."
                        .into(),
                )
            })?,
            Err(_) => {
                tracing::warn!("COOKIE_KEY not set; sessions will not survive a restart");
                Key::generate()
            }
        };

        Ok(config
            .with_cookie_key(cookie_key)
            .with_secure_cookies(!dev_cookies))
    }

    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_validate_issuer(mut self, validate: bool) -> Self {
        self.validate_issuer = validate;
        self
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.session_cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_session_ttl_days(mut self, days: i64) -> Self {
        self.settings.session_ttl_days = days;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    /// Honour `X-Forwarded-Proto` and `X-Forwarded-Host` (default off).
    ///
    /// Enable only behind a proxy that overwrites both headers.
    #[must_use]
    pub fn with_trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.settings.trust_forwarded_headers = trust;
        self
    }

    /// Path the provider posts the authorization response to (default `/signin-oidc`).
    #[must_use]
    pub fn with_callback_path(mut self, path: impl Into<String>) -> Self {
        self.settings.callback_path = path.into();
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.credential.client_id()
    }

    #[must_use]
    pub fn credential(&self) -> &ClientCredential {
        &self.credential
    }

    #[must_use]
    pub fn authority(&self) -> &Url {
        &self.authority
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    #[must_use]
    pub fn validate_issuer(&self) -> bool {
        self.validate_issuer
    }

    #[must_use]
    pub fn callback_path(&self) -> &str {
        &self.settings.callback_path
    }

    /// How long a session lives; also how long an idle user's tokens stay cached.
    #[must_use]
    pub fn session_ttl_days(&self) -> i64 {
        self.settings.session_ttl_days
    }
}

fn required(name: &str) -> Result<String, Error> {
    std::env::var(name).map_err(|_| Error::Config(format!("{name} is required")))
}
