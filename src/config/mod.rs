pub mod settings;

pub use settings::{Config, Endpoints};

use crate::error::AggregationError;
use std::sync::Arc;

/// Loads the configuration from the environment (and `.env` if present) and
/// validates the required secrets. Call `Config::validate_and_log` once logging is up.
pub fn load_config() -> Result<Arc<Config>, AggregationError> {
    dotenv::dotenv().ok();

    let config = Config::from_env();
    config.validate()?;

    Ok(Arc::new(config))
}
