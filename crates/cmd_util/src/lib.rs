pub mod backoff;
pub mod env;

pub use backoff::Backoff;
pub use env::{
    config_service,
    config_test,
    env_config,
};
