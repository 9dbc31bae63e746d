use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Installs a global fmt subscriber. `RUST_LOG` directives are added on top of
/// `default_directive` (for example `"taskforge=info"`).
pub fn init_tracing(default_directive: &str) -> Result<()> {
    let directive = default_directive
        .parse()
        .map_err(|e| Error::Config(format!("invalid log directive '{default_directive}': {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install tracing subscriber: {e}")))
}
