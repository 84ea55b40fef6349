use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use upnp_scoutd::api::{self, routes::AppState};
use upnp_scoutd::config::Config;
use upnp_scoutd::fetch::HttpFetcher;
use upnp_scoutd::survey::{Survey, SurveyRequest};

const DEFAULT_CONFIG_PATH: &str = "/etc/upnp-scout/scoutd.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("upnp_scoutd=info")),
        )
        .init();

    // upnp-scoutd [config] [scan [host] [st]]
    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    // Load config
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Using config {}", config_path);

    let survey = Survey::new(HttpFetcher::new(), config.survey_settings());

    // One-shot mode
    if args.next().as_deref() == Some("scan") {
        let request = SurveyRequest {
            host: args.next(),
            search_target: args.next(),
        };
        return scan_once(&survey, &request).await;
    }

    serve(survey, config).await
}

/// Run a single discovery and print the snapshot as JSON
async fn scan_once(survey: &Survey, request: &SurveyRequest) -> Result<()> {
    let discovery = survey.discover(request).await?;
    if let Some(err) = &discovery.socket_error {
        tracing::error!("Scan failed: {}", err);
    }

    let snapshot = api::routes::snapshot_of(discovery)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn serve(survey: Survey, config: Config) -> Result<()> {
    tracing::info!("Starting upnp-scoutd");

    // Build API router
    let listen = config.api.listen.clone();
    let app = api::routes::router(AppState::new(survey, config));

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind to {}", listen))?;

    tracing::info!("API listening on {}", listen);

    // Run server with graceful shutdown
    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");
    cancel.cancel();

    // Wait for the server to drain

    if let Err(e) = server_handle.await {
        tracing::error!("Server task failed: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
