//! Configuration value helpers
//! Resolve single settings that may be overridden from the environment

use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, warn};

/// Get configuration value with priority: explicit > ENV > default
///
/// # Arguments
/// * `explicit` - Value given on the command line or by the caller
/// * `env_var` - Environment variable name to check
/// * `default` - Default value to use as fallback
pub fn get_config_value<T>(explicit: Option<T>, env_var: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(val) = explicit {
        debug!("Using explicit value for {}", env_var);
        return val;
    }

    if let Ok(env_str) = std::env::var(env_var) {
        match env_str.parse::<T>() {
            Ok(val) => {
                debug!("Using {} from environment: {}", env_var, env_str);
                return val;
            },
            Err(e) => {
                warn!("Failed to parse {} from environment: {}", env_var, e);
            },
        }
    }

    default
}

/// String variant of [`get_config_value`]; empty strings count as unset
pub fn get_string_config(explicit: Option<String>, env_var: &str, default: &str) -> String {
    if let Some(val) = explicit.filter(|v| !v.is_empty()) {
        return val;
    }

    match std::env::var(env_var) {
        Ok(env_val) if !env_val.is_empty() => env_val,
        _ => default.to_string(),
    }
}
