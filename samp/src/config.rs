//! Configuration loading

use samp_router::RouterConfig;
use std::path::Path;

/// Load the router configuration
///
/// Sources, later ones winning: `samp.toml` in the working directory (or
/// the file given explicitly), then `SAMP_*` environment variables with
/// `__` between nested keys, e.g. `SAMP_IPC__RESPONSE_TIMEOUT_SECS=60`.
pub fn load(path: Option<&Path>) -> anyhow::Result<RouterConfig> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name("samp").required(false),
    };

    let config = config::Config::builder()
        .add_source(file)
        .add_source(
            config::Environment::with_prefix("SAMP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    Ok(config.try_deserialize::<RouterConfig>()?)
}
