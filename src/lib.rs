//! OpenID Connect sign-in against Azure AD for an axum web application.
//!
//! An anonymous visitor is challenged with the hybrid authorization-code flow.
//! The callback validates the ID token, redeems the code for an access token
//! to a downstream resource and keeps the identity in an encrypted cookie.
//! Signed-in visitors see their claims and a silently acquired access token.
//!
//! The web layer lives in [`middleware`]; the protocol pieces it coordinates
//! ([`OidcClient`], [`TokenExchange`], [`IdTokenValidator`]) are usable on their own.

pub mod error;
pub mod exchange;
pub mod middleware;
pub mod oidc;
pub mod protocol;
pub mod token;
mod token_cache;
pub mod types;
pub mod well_known;

// Re-exports for convenient access
pub use error::Error;
pub use exchange::{AadTokenClient, TokenExchange, TokenSet};
pub use oidc::{
    AuthorizationRequest, AuthorizationResponse, AuthorizationResult, Correlation, OidcClient,
};
pub use protocol::{code_hash, generate_nonce, generate_state};
pub use token::{IdTokenValidator, JwksValidator};
pub use types::{Claim, ClientCredential, ObjectId, Session};
pub use well_known::ProviderMetadata;
