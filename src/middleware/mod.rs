//! Axum front end of the demo: one router that signs visitors in with Azure AD
//! and shows what the sign-in produced.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use aad_oidc_demo::middleware::{AppConfig, app_routes};
//!
//! // 1. Configure from environment
//! let config = AppConfig::from_env()?;
//!
//! // 2. Build the collaborators (OIDC client, token exchange client)
//! let oidc = OidcClient::new(config.client_id(), metadata, validator);
//! let tokens = AadTokenClient::new(metadata.token_endpoint.clone());
//!
//! // 3. Serve
//! let app = app_routes(config, oidc, tokens)?;
//! axum::serve(listener, app).await?;
//! ```
//!
//! Requests pass through, outermost first: panic capture (500), request
//! tracing, the encrypted cookie jar, then the orchestrating handlers.

mod config;
mod cookies;
mod error;
mod extractor;
mod pages;
mod routes;
mod state;

pub use config::{AppConfig, DEFAULT_RESOURCE};
pub use error::AppError;
pub use extractor::{RequestUrl, TrustForwarded};
pub use routes::{REMOTE_SIGN_OUT_PATH, SIGN_OUT_PATH, SIGNED_OUT_PATH, app_routes};

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
