#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The identity provider answered with an error or a non-success status.
    #[error("{operation} failed{}: {detail}", http_status(.status))]
    OAuth {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ID token validation error: {0}")]
    Token(String),
    /// Malformed or forged authorization response (state, nonce, c_hash, missing fields).
    #[error("OpenID Connect protocol error: {0}")]
    Protocol(String),
    /// Silent acquisition needs a cached token or refresh token and has neither.
    #[error("Interaction required: {0}")]
    InteractionRequired(String),
    #[error("Session error: {0}")]
    Session(String),
    #[error("Render error: {0}")]
    Render(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn http_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}
