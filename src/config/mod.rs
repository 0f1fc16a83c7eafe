pub mod display;
pub mod lexer;
pub mod parser;
pub mod tokens;
pub mod types;
pub mod validate;

pub use display::display_config;
pub use parser::{parse, ConfigError, ConfigParser, ParseResult};
pub use types::{AppConfig, LocationConfig, ServerConfig};
pub use validate::{check_structural_invariants, validate_configs};

use crate::error::Result;

/// Loads, parses and validates a configuration file end to end. Startup
/// aborts (`CleanError`) on a malformed file or a missing structural
/// invariant; duplicate-vhost and bind conflicts are dropped with a warning
/// instead, per `validate_configs`.
pub fn load(path: &str) -> Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| crate::error::CleanError::from(format!("reading config file '{path}': {e}")))?;

    let mut config = parse(&text)?;
    check_structural_invariants(&config.servers)?;
    config.servers = validate_configs(config.servers);
    check_structural_invariants(&config.servers)?;

    display_config(&config.servers);
    Ok(config)
}
