use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use super::config::AppSettings;
use crate::error::Error;
use crate::oidc::Correlation;
use crate::types::Session;

const CORRELATION_COOKIE_NAME: &str = "__aad_oidc_correlation";

/// Create the correlation cookie (state, nonce, return URI) for an authorization request.
///
/// The provider posts the callback cross-site, so the cookie must be
/// `SameSite=None` to be sent back; that in turn requires `Secure`.
pub(super) fn correlation_cookie(
    correlation: &Correlation,
    secure: bool,
    callback_path: &str,
) -> Result<Cookie<'static>, Error> {
    let value = serde_json::to_string(correlation)
        .map_err(|e| Error::Session(format!("correlation cookie: {e}")))?;
    let same_site = if secure { SameSite::None } else { SameSite::Lax };

    Ok(Cookie::build((CORRELATION_COOKIE_NAME, value))
        .http_only(true)
        .secure(secure)
        .same_site(same_site)
        .path(callback_path.to_string())
        .max_age(Duration::minutes(15))
        .build())
}

/// Create removal cookie for the correlation cookie.
pub(super) fn clear_correlation_cookie(callback_path: &str) -> Cookie<'static> {
    Cookie::build((CORRELATION_COOKIE_NAME, ""))
        .path(callback_path.to_string())
        .max_age(Duration::ZERO)
        .build()
}

/// Get the correlation stored at challenge time.
pub(super) fn get_correlation(jar: &PrivateCookieJar) -> Option<Correlation> {
    jar.get(CORRELATION_COOKIE_NAME)
        .and_then(|c| serde_json::from_str(c.value()).ok())
}

/// Plaintext bytes per session cookie. Encryption and base64 grow this to
/// about 3.8 KB, which leaves room for the name and attributes under the
/// 4096-byte per-cookie limit browsers enforce.
const SESSION_CHUNK_SIZE: usize = 2800;

/// Upper bound on session cookies; a larger session is refused.
const MAX_SESSION_CHUNKS: usize = 8;

/// Session store over the encrypted session cookie.
///
/// A session too large for one cookie is split across `<name>.0`,
/// `<name>.1`, ... and reassembled on read.
pub(super) struct SessionCookies<'a> {
    settings: &'a AppSettings,
}

impl<'a> SessionCookies<'a> {
    pub(super) fn new(settings: &'a AppSettings) -> Self {
        Self { settings }
    }

    fn chunk_name(&self, index: usize) -> String {
        format!("{}.{index}", self.settings.session_cookie_name)
    }

    /// Persist `session`, replacing any previous one.
    pub(super) fn establish(
        &self,
        jar: PrivateCookieJar,
        session: &Session,
    ) -> Result<PrivateCookieJar, Error> {
        let value = serde_json::to_string(session)
            .map_err(|e| Error::Session(format!("session cookie: {e}")))?;
        let chunks = split_at_char_boundaries(&value, SESSION_CHUNK_SIZE);
        if chunks.len() > MAX_SESSION_CHUNKS {
            return Err(Error::Session(format!(
                "session of {} bytes needs more than {MAX_SESSION_CHUNKS} cookies",
                value.len()
            )));
        }

        let count = chunks.len();
        let mut jar = jar;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let cookie = Cookie::build((self.chunk_name(index), chunk.to_owned()))
                .http_only(true)
                .secure(self.settings.secure_cookies)
                .same_site(SameSite::Lax)
                .path("/".to_string())
                .max_age(Duration::days(self.settings.session_ttl_days))
                .build();
            jar = jar.add(cookie);
        }
        // Leftover chunks of a larger previous session would corrupt the next read.
        Ok(self.remove_chunks_from(jar, count))
    }

    /// Drop the session. Clearing an absent session is a no-op.
    pub(super) fn clear(&self, jar: PrivateCookieJar) -> PrivateCookieJar {
        self.remove_chunks_from(jar, 0)
    }

    /// Current session, if every chunk is present, authentic and well-formed.
    pub(super) fn current(&self, jar: &PrivateCookieJar) -> Option<Session> {
        let mut value = String::new();
        for index in 0..MAX_SESSION_CHUNKS {
            match jar.get(&self.chunk_name(index)) {
                Some(cookie) => value.push_str(cookie.value()),
                None => break,
            }
        }
        if value.is_empty() {
            return None;
        }
        match serde_json::from_str(&value) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed session cookie");
                None
            }
        }
    }

    fn remove_chunks_from(&self, mut jar: PrivateCookieJar, first: usize) -> PrivateCookieJar {
        for index in first..MAX_SESSION_CHUNKS {
            let name = self.chunk_name(index);
            if jar.get(&name).is_none() {
                break;
            }
            jar = jar.remove(Cookie::build((name, "")).path("/".to_string()).build());
        }
        jar
    }
}

fn split_at_char_boundaries(value: &str, max_len: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = value;
    while !rest.is_empty() {
        let mut end = rest.len().min(max_len);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::{COOKIE, SET_COOKIE};
    use axum::http::{HeaderMap, HeaderValue};
    use axum::response::IntoResponse;
    use axum_extra::extract::cookie::Key;

    use crate::types::Claim;

    fn settings() -> AppSettings {
        AppSettings {
            cookie_key: Key::generate(),
            session_cookie_name: "sid".into(),
            session_ttl_days: 1,
            secure_cookies: true,
            callback_path: "/signin-oidc".into(),
            trust_forwarded_headers: false,
        }
    }

    fn alice() -> Session {
        Session::from_claims(vec![Claim::new("name", "Alice"), Claim::new("oid", "123")]).unwrap()
    }

    #[test]
    fn establish_then_current_returns_session() {
        let settings = settings();
        let store = SessionCookies::new(&settings);
        let jar = PrivateCookieJar::new(settings.cookie_key.clone());

        let jar = store.establish(jar, &alice()).unwrap();
        assert_eq!(store.current(&jar), Some(alice()));
    }

    #[test]
    fn clear_is_idempotent() {
        let settings = settings();
        let store = SessionCookies::new(&settings);
        let jar = PrivateCookieJar::new(settings.cookie_key.clone());

        let jar = store.establish(jar, &alice()).unwrap();
        let jar = store.clear(jar);
        assert_eq!(store.current(&jar), None);

        let jar = store.clear(jar);
        assert_eq!(store.current(&jar), None);
    }

    #[test]
    fn malformed_session_is_ignored() {
        let settings = settings();
        let store = SessionCookies::new(&settings);
        let jar = PrivateCookieJar::new(settings.cookie_key.clone()).add(Cookie::new("sid.0", "{not json"));

        assert_eq!(store.current(&jar), None);
    }

    fn with_groups(count: usize) -> Session {
        let mut claims = vec![Claim::new("name", "Alice"), Claim::new("oid", "123")];
        claims.extend(
            (0..count).map(|i| Claim::new("groups", format!("{i:08}-1c2d-4e5f-8a9b-0c1d2e3f4a5b"))),
        );
        Session::from_claims(claims).unwrap()
    }

    /// Jar as the browser would send it back after receiving `jar`'s cookies.
    fn roundtrip(jar: PrivateCookieJar, key: &Key) -> (Vec<String>, PrivateCookieJar) {
        let response = jar.into_response();
        let set_cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_owned())
            .collect();
        let sent = set_cookies
            .iter()
            .filter_map(|c| c.split(';').next())
            .filter(|pair| pair.split_once('=').is_some_and(|(_, v)| !v.is_empty()))
            .collect::<Vec<_>>()
            .join("; ");

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(&sent).unwrap());
        (set_cookies, PrivateCookieJar::from_headers(&headers, key.clone()))
    }

    #[test]
    fn large_session_is_split_under_browser_limit() {
        let settings = settings();
        let store = SessionCookies::new(&settings);
        let session = with_groups(200);

        let jar = store
            .establish(PrivateCookieJar::new(settings.cookie_key.clone()), &session)
            .unwrap();
        let (set_cookies, jar) = roundtrip(jar, &settings.cookie_key);

        assert!(set_cookies.len() > 1);
        for cookie in &set_cookies {
            assert!(cookie.len() < 4096, "Set-Cookie of {} bytes", cookie.len());
        }
        assert_eq!(store.current(&jar), Some(session));
    }

    #[test]
    fn smaller_session_drops_stale_chunks() {
        let settings = settings();
        let store = SessionCookies::new(&settings);

        let jar = store
            .establish(PrivateCookieJar::new(settings.cookie_key.clone()), &with_groups(200))
            .unwrap();
        let (_, jar) = roundtrip(jar, &settings.cookie_key);

        let jar = store.establish(jar, &alice()).unwrap();
        let (set_cookies, jar) = roundtrip(jar, &settings.cookie_key);

        assert!(set_cookies.iter().any(|c| c.starts_with("sid.1=;")));
        assert_eq!(store.current(&jar), Some(alice()));

        let (_, jar) = roundtrip(store.clear(jar), &settings.cookie_key);
        assert_eq!(store.current(&jar), None);
    }

    #[test]
    fn oversized_session_is_refused() {
        let settings = settings();
        let store = SessionCookies::new(&settings);

        let err = store
            .establish(PrivateCookieJar::new(settings.cookie_key.clone()), &with_groups(2000))
            .unwrap_err();
        assert!(matches!(err, Error::Session(_)));
    }

    #[test]
    fn split_respects_char_boundaries() {
        let chunks = split_at_char_boundaries("aé€b", 2);
        assert_eq!(chunks, ["a", "é", "€", "b"]);
        assert!(split_at_char_boundaries("", 4).is_empty());
    }

    #[test]
    fn correlation_cookie_roundtrip() {
        let settings = settings();
        let correlation = Correlation {
            state: "s".into(),
            nonce: "n".into(),
            return_uri: "/".into(),
        };
        let cookie = correlation_cookie(&correlation, true, "/signin-oidc").unwrap();
        assert_eq!(cookie.same_site(), Some(SameSite::None));
        assert_eq!(cookie.path(), Some("/signin-oidc"));

        let jar = PrivateCookieJar::new(settings.cookie_key.clone()).add(cookie);
        assert_eq!(get_correlation(&jar), Some(correlation));
    }

    #[test]
    fn insecure_correlation_cookie_is_lax() {
        let correlation = Correlation {
            state: "s".into(),
            nonce: "n".into(),
            return_uri: "/".into(),
        };
        let cookie = correlation_cookie(&correlation, false, "/signin-oidc").unwrap();
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.secure(), Some(false));
    }
}
