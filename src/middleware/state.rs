use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use super::config::AppConfig;
use super::cookies::SessionCookies;
use super::extractor::TrustForwarded;
use super::pages::Pages;
use crate::exchange::TokenExchange;
use crate::oidc::OidcClient;
use crate::token::IdTokenValidator;

/// Shared state for the demo's handlers.
pub(super) struct AppState<T, V> {
    pub(super) oidc: Arc<OidcClient<V>>,
    pub(super) tokens: Arc<T>,
    pub(super) config: Arc<AppConfig>,
    pub(super) pages: Arc<Pages>,
}

impl<T, V> AppState<T, V> {
    pub(super) fn sessions(&self) -> SessionCookies<'_> {
        SessionCookies::new(&self.config.settings)
    }
}

// Manual Clone: avoid derive adding `T: Clone, V: Clone` bounds.
impl<T, V> Clone for AppState<T, V> {
    fn clone(&self) -> Self {
        Self {
            oidc: self.oidc.clone(),
            tokens: self.tokens.clone(),
            config: self.config.clone(),
            pages: self.pages.clone(),
        }
    }
}

// PrivateCookieJar requires Key to be extractable from state
impl<T: TokenExchange, V: IdTokenValidator> FromRef<AppState<T, V>> for Key {
    fn from_ref(state: &AppState<T, V>) -> Self {
        state.config.settings.cookie_key.clone()
    }
}

impl<T: TokenExchange, V: IdTokenValidator> FromRef<AppState<T, V>> for TrustForwarded {
    fn from_ref(state: &AppState<T, V>) -> Self {
        TrustForwarded(state.config.settings.trust_forwarded_headers)
    }
}
