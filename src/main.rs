use aad_oidc_demo::middleware::{AppConfig, app_routes};
use aad_oidc_demo::{AadTokenClient, Error, JwksValidator, OidcClient, ProviderMetadata};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Error> {
    let config = AppConfig::from_env()?;

    // Token and discovery endpoints answer directly; a redirect means misconfiguration.
    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    let metadata = ProviderMetadata::discover(&http, config.authority()).await?;
    let issuer = config.validate_issuer().then(|| metadata.issuer.clone());
    let validator = JwksValidator::new(metadata.jwks_uri.clone(), config.client_id(), issuer)
        .with_http_client(http.clone());
    let tokens = AadTokenClient::new(metadata.token_endpoint.clone())
        .with_http_client(http)
        .with_cache_idle_timeout(time::Duration::days(config.session_ttl_days()));
    let oidc = OidcClient::new(config.client_id(), metadata, validator)
        .with_scopes(config.scopes().to_vec())
        .with_resource(config.resource());

    let app = app_routes(config, oidc, tokens)?;

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
