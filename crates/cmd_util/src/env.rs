use std::{
    env,
    fmt::Debug,
    str::FromStr,
};

/// Read `name` from the environment, falling back to `default` when unset or
/// unparseable. Lets every tunable in `vc_status_model::config` be overridden
/// locally without a redeploy.
pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let var_s = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(..)) => {
            tracing::warn!("Invalid value for {name}, falling back to {default:?}.");
            return default;
        },
    };
    match T::from_str(&var_s) {
        Ok(v) => {
            tracing::info!("Overriding {name} to {v:?} from environment");
            v
        },
        Err(e) => {
            tracing::warn!("Invalid value {var_s} for {name}, falling back to {default:?}: {e:?}");
            default
        },
    }
}

/// Call once from a service's `main`. Respects `RUST_LOG`; defaults to `info`.
pub fn config_service() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| tracing_subscriber::EnvFilter::new(tracing::Level::INFO.as_str()),
        ))
        .compact()
        .try_init();
}

/// Call from test setup. Ok to call more than once — later calls just fail
/// to take effect, which is fine since the first call already initialized
/// a subscriber.
pub fn config_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .compact()
        .try_init();
}
