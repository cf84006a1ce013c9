use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE: &str = "garnet.log";

/// Install the global subscriber: stderr plus an append-only file in `data_dir`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(data_dir: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("garnet_core=info"));

    let file = std::fs::create_dir_all(data_dir).and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(Path::new(data_dir).join(LOG_FILE))
    });
    let file_layer = match file {
        Ok(file) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file)),
        ),
        Err(e) => {
            eprintln!("[garnet] log file unavailable in {data_dir}: {e}");
            None
        }
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
}
