//! Engine configuration: serde schema plus multi-format file discovery
//! (`orac.{toml,yaml,yml,json}`) with `${ENV_VAR}` substitution.

// Tests mutate process env vars, which is `unsafe` on edition 2024.
#![cfg_attr(test, allow(unsafe_code))]

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, load_config, set_config_dir},
    schema::OracConfig,
};
