use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "STONER_LOG";
const DEFAULT_FILTER: &str = "stoner_backup=info,sqlx=warn,tower_http=info";

/// Initialize JSON logging to stderr, keeping stdout for command output.
///
/// The filter is read from `STONER_LOG` and falls back to
/// `stoner_backup=info,sqlx=warn`. `log` records from dependencies are
/// bridged into tracing by the subscriber. Repeated calls are no-ops.
pub fn init() {
    let filter = std::env::var(LOG_ENV).unwrap_or_else(|_| DEFAULT_FILTER.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .json()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .try_init();
}
