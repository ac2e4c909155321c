use std::collections::HashMap;

use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;

use crate::types::ObjectId;

/// Access tokens this close to expiry are not handed out.
const EXPIRY_SKEW: Duration = Duration::minutes(5);

/// Users not seen for this long are dropped (the default session lifetime).
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::days(14);

#[derive(Debug, Clone)]
pub(crate) struct CachedAccessToken {
    pub(crate) access_token: String,
    pub(crate) expires_on: OffsetDateTime,
}

struct UserTokens {
    access: HashMap<String, CachedAccessToken>,
    // Azure AD v1 refresh tokens are valid for any resource of the tenant.
    refresh_token: Option<String>,
    last_used: OffsetDateTime,
}

/// In-process token cache keyed by user object id.
///
/// Users whose session ended without a sign-out are never told apart from
/// returning ones, so entries idle past the timeout are evicted on write.
pub struct TokenCache {
    users: RwLock<HashMap<ObjectId, UserTokens>>,
    idle_timeout: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self {
            users: RwLock::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl TokenCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Records a token endpoint answer. A missing refresh token keeps the previous one.
    ///
    /// Also evicts every user idle for longer than the idle timeout.
    pub(crate) async fn store(
        &self,
        user: &ObjectId,
        resource: &str,
        token: CachedAccessToken,
        refresh_token: Option<String>,
        now: OffsetDateTime,
    ) {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|_, tokens| now - tokens.last_used < self.idle_timeout);
        if users.len() < before {
            tracing::debug!(evicted = before - users.len(), "Evicted idle users from token cache");
        }

        let entry = users.entry(user.clone()).or_insert_with(|| UserTokens {
            access: HashMap::new(),
            refresh_token: None,
            last_used: now,
        });
        entry.access.insert(resource.to_owned(), token);
        if refresh_token.is_some() {
            entry.refresh_token = refresh_token;
        }
        entry.last_used = now;
    }

    /// Cached access token for `resource` that is still valid at `now`.
    pub(crate) async fn access_token(
        &self,
        user: &ObjectId,
        resource: &str,
        now: OffsetDateTime,
    ) -> Option<CachedAccessToken> {
        let mut users = self.users.write().await;
        let entry = users.get_mut(user)?;
        entry.last_used = now;
        entry
            .access
            .get(resource)
            .filter(|t| t.expires_on - EXPIRY_SKEW > now)
            .cloned()
    }

    #[cfg(test)]
    pub(crate) async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    pub(crate) async fn refresh_token(&self, user: &ObjectId) -> Option<String> {
        let users = self.users.read().await;
        users.get(user)?.refresh_token.clone()
    }

    /// Drops everything cached for `user`.
    pub async fn remove(&self, user: &ObjectId) {
        self.users.write().await.remove(user);
    }
}
