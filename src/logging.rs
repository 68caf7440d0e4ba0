use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install the global subscriber. `RUST_LOG` wins over `level`; output goes
/// to `file` when given, stderr otherwise.
pub fn init_logging(level: &str, file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true);

    match file {
        Some(path) => {
            let log_file = Arc::new(
                std::fs::File::create(path)
                    .with_context(|| format!("create log file {}", path.display()))?,
            );
            tracing::subscriber::set_global_default(builder.with_writer(log_file).finish())?;
        }
        None => {
            tracing::subscriber::set_global_default(
                builder.with_writer(std::io::stderr).finish(),
            )?;
        }
    }
    info!("logging initialized");
    Ok(())
}
