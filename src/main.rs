use std::sync::Arc;

use axum::http::Method;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use saml_sp::config::ServiceProviderConfig;
use saml_sp::saml::handlers::saml_routes;
use saml_sp::saml::idp_metadata::IdpMetadataSource;
use saml_sp::ServiceProvider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceProviderConfig::from_env()?;

    let idp_metadata_source = match std::env::var("SAML_IDP_METADATA_URL") {
        Ok(url) => IdpMetadataSource::Url(url),
        Err(_) => match std::env::var("SAML_IDP_METADATA_XML") {
            Ok(xml) => IdpMetadataSource::Xml(xml),
            Err(_) => anyhow::bail!("one of SAML_IDP_METADATA_URL or SAML_IDP_METADATA_XML must be set"),
        },
    };

    let service_provider = Arc::new(ServiceProvider::new(config, idp_metadata_source)?);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", axum::routing::get(|| async { "ok" }))
        .nest("/saml", saml_routes())
        .layer(ServiceBuilder::new().layer(cors).layer(TraceLayer::new_for_http()))
        .with_state(service_provider);

    let server_addr = std::env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8443".to_string());
    let listener = tokio::net::TcpListener::bind(&server_addr).await?;
    tracing::info!("SAML service provider listening on {}", server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
