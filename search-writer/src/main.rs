//! Search Writer Main Entry Point
//!
//! Consumes index mutations from an AMQP broker and applies them to an
//! Elasticsearch-compatible cluster.

use dotenv::dotenv;
use search_writer::{Dependencies, Settings, WriterError};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("search_writer=info,search_writer_repository=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), WriterError> {
    // Load environment variables from .env file
    dotenv().ok();

    init_tracing();

    info!(
        service_version = env!("CARGO_PKG_VERSION"),
        "starting search writer"
    );

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return Err(e);
        }
    };

    if settings.debug {
        warn!("debug logging enabled; credentials may appear in logs");
    }

    let mut deps = match Dependencies::new(settings).await {
        Ok(deps) => deps,
        Err(e) => {
            error!(error = %e, "failed to initialize dependencies");
            return Err(e);
        }
    };

    match deps.supervisor.run().await {
        Ok(()) => {
            info!("search writer stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "search writer failed");
            Err(e)
        }
    }
}
