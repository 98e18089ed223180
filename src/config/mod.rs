// src/config/mod.rs

pub mod endpoint;
pub mod loader;
pub mod model;
pub mod validate;

pub use endpoint::ResolvedEndpoint;
pub use loader::{default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{ConfigFile, ConfigSection, EndpointConfig, EndpointKind, RawConfigFile, TemplateConfig};
