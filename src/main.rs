mod api;
mod app_state;
mod artifacts;
mod config;
mod engine;
mod error;
mod types;

use std::sync::Arc;

use rocket::fs::{FileServer, Options};
use rocket::{catchers, routes, Build, Rocket};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use api::{default_catcher, health, list_predictions, segment_automatic, segment_predictor};
use app_state::AppState;
use config::AppConfig;
use engine::{CommandEngine, SegmentationEngine, UnconfiguredEngine};

/// Routes, catchers and the artifact file server around `state`.
pub fn build_rocket(state: AppState) -> Rocket<Build> {
    // artifact URLs point at /files/<project_id>/<filename>
    let files = FileServer::new(state.artifacts.root(), Options::Missing);

    rocket::build()
        .manage(state)
        .mount(
            "/",
            routes![
                health,
                list_predictions,
                segment_automatic,
                segment_predictor,
            ],
        )
        .mount("/files", files)
        .register("/", catchers![default_catcher])
}

/// `RUST_LOG` directives when given and valid (e.g. `segment_server=debug`), else `info`.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
        .init();

    let config = AppConfig::from_env()?;
    info!(
        base_url = %config.base_url,
        public_dir = %config.public_dir.display(),
        workers = config.max_concurrent_segmentations,
        timeout = ?config.segment_timeout,
        "starting segment-server"
    );

    let engine: Arc<dyn SegmentationEngine> = match &config.segment_command {
        Some(parts) => CommandEngine::from_parts(parts)? as Arc<dyn SegmentationEngine>,
        None => {
            warn!("SEGMENT_COMMAND not set; segmentation requests will get an error payload");
            UnconfiguredEngine::new() as Arc<dyn SegmentationEngine>
        }
    };
    info!(engine = engine.name(), "segmentation engine ready");

    let state = AppState::new(&config, engine);
    build_rocket(state)
        .launch()
        .await
        .map_err(|e| anyhow::anyhow!("server failed: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn log_filter_defaults_to_info() {
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(Some("  ".into())).max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn log_filter_honours_rust_log() {
        let filter = log_filter(Some("segment_server=debug".into()));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
