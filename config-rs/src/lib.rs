//! config-rs/lib.rs
//! Shared configuration utilities for consistent service configuration
//! Provides standardized functions for port/address management and
//! environment variable access with defaults

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// Port for a service, from `{NAME}_SERVICE_PORT` or the given default.
///
/// Unset and unparsable values both fall back to `default_port`; the
/// unparsable case is logged since it usually means a deployment typo.
pub fn get_service_port(service_name: &str, default_port: u16) -> u16 {
    let var_name = format!("{}_SERVICE_PORT", service_name.to_uppercase());
    match env::var(&var_name) {
        Ok(raw) => raw.trim().parse::<u16>().unwrap_or_else(|_| {
            log::warn!("Invalid port in {}, using default {}", var_name, default_port);
            default_port
        }),
        Err(_) => default_port,
    }
}

/// Bind address for a service.
///
/// A full `{NAME}_SERVICE_ADDR` override wins, given either as a bare
/// `host:port` or with a URL scheme prefix. Without an override the
/// service binds all interfaces on the resolved port.
pub fn get_bind_address(service_name: &str, default_port: u16) -> SocketAddr {
    let var_name = format!("{}_SERVICE_ADDR", service_name.to_uppercase());

    if let Ok(raw) = env::var(&var_name) {
        // Strip any scheme so http://host:port overrides parse too.
        let candidate = raw.trim().split("://").last().unwrap_or("");
        match candidate.parse::<SocketAddr>() {
            Ok(addr) => return addr,
            Err(_) => {
                log::warn!("Invalid address format in {}, using default", var_name);
            }
        }
    }

    let port = get_service_port(service_name, default_port);
    SocketAddr::from(([0, 0, 0, 0], port))
}

/// Read an environment variable, falling back to `default` when unset.
pub fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Read and parse an environment variable, falling back to `default`
/// when unset or unparsable.
pub fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Read an environment variable, treating unset and empty as absent.
pub fn optional_env(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_service_port() {
        // Test with environment variable
        std::env::set_var("TEST_SERVICE_PORT", "9000");
        assert_eq!(get_service_port("TEST", 8000), 9000);

        // Test with default
        std::env::remove_var("UNKNOWN_SERVICE_PORT");
        assert_eq!(get_service_port("UNKNOWN", 8000), 8000);

        // Invalid values fall back to the default
        std::env::set_var("BROKEN_SERVICE_PORT", "not-a-port");
        assert_eq!(get_service_port("BROKEN", 8000), 8000);
    }

    #[test]
    fn test_get_bind_address() {
        // Test with full address override
        std::env::set_var("BIND_TEST_SERVICE_ADDR", "127.0.0.1:9100");
        assert_eq!(
            get_bind_address("BIND_TEST", 8000),
            "127.0.0.1:9100".parse().unwrap()
        );

        // http:// prefixed override
        std::env::set_var("BIND_TEST_SERVICE_ADDR", "http://127.0.0.1:9200");
        assert_eq!(
            get_bind_address("BIND_TEST", 8000),
            "127.0.0.1:9200".parse().unwrap()
        );

        // Default binds all interfaces on the default port
        std::env::remove_var("BIND_DEFAULT_SERVICE_ADDR");
        std::env::remove_var("BIND_DEFAULT_SERVICE_PORT");
        assert_eq!(
            get_bind_address("BIND_DEFAULT", 8000),
            "0.0.0.0:8000".parse().unwrap()
        );
    }

    #[test]
    fn test_env_or() {
        std::env::set_var("ENV_OR_TEST", "value");
        assert_eq!(env_or("ENV_OR_TEST", "default"), "value");

        std::env::remove_var("ENV_OR_MISSING");
        assert_eq!(env_or("ENV_OR_MISSING", "default"), "default");
    }

    #[test]
    fn test_env_parse() {
        std::env::set_var("ENV_PARSE_TEST", "42");
        assert_eq!(env_parse("ENV_PARSE_TEST", 7u32), 42);

        std::env::set_var("ENV_PARSE_BAD", "forty-two");
        assert_eq!(env_parse("ENV_PARSE_BAD", 7u32), 7);

        std::env::remove_var("ENV_PARSE_MISSING");
        assert_eq!(env_parse("ENV_PARSE_MISSING", 7u32), 7);
    }

    #[test]
    fn test_optional_env() {
        std::env::set_var("OPT_ENV_TEST", "set");
        assert_eq!(optional_env("OPT_ENV_TEST"), Some("set".to_string()));

        std::env::set_var("OPT_ENV_EMPTY", "  ");
        assert_eq!(optional_env("OPT_ENV_EMPTY"), None);

        std::env::remove_var("OPT_ENV_MISSING");
        assert_eq!(optional_env("OPT_ENV_MISSING"), None);
    }
}
