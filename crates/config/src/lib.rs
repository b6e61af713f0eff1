//! Configuration for service repositories: locator endpoints and the
//! authentication mode used to sign outgoing calls.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, clear_config_dir, config_dir, discover_and_load, find_config_file,
        load_config, set_config_dir,
    },
    schema::{
        AuthConfig, AuthMode, ConfigIssue, DEFAULT_LOCATOR_PORT, Endpoint, EndpointParseError,
        IssueSeverity, TollgateConfig, default_endpoints,
    },
};
