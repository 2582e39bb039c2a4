//! # Environment Configuration
//!
//! Every runtime knob the server reads, pulled from `EPA_*` variables once
//! at startup. Absence of an integration's variables selects its fallback
//! (mock gateway, in-memory store, no metrics exporter) rather than
//! failing, so a bare `epa serve` always comes up.

use std::fmt;
use std::net::SocketAddr;

use anyhow::{anyhow, Context};
use zeroize::Zeroizing;

/// Default API listen address when `EPA_BIND_ADDR` is unset.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Credential wrapper. `Debug` never prints the value and the backing
/// memory is wiped on drop.
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

/// Endpoint and credential for one upstream integration.
#[derive(Debug)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: Secret,
}

/// Everything `epa serve` reads from the environment.
#[derive(Debug)]
pub struct ServeConfig {
    pub bind_addr: SocketAddr,
    /// Payer endpoint; `None` selects the mock insurance adapter.
    pub insurance: Option<UpstreamConfig>,
    /// Pharmacy switch endpoint; `None` selects the mock pharmacy adapter.
    pub pharmacy: Option<UpstreamConfig>,
    /// AES-256 key for protected SCRIPT fields. Without it the live
    /// pharmacy gateway fails closed on the first send.
    pub field_key_hex: Option<Secret>,
    /// Postgres store; `None` selects the in-memory store.
    pub database_url: Option<Secret>,
    /// Prometheus exporter listen address; `None` disables the exporter.
    pub metrics_addr: Option<SocketAddr>,
}

impl ServeConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through a lookup function. Tests pass a map
    /// here instead of mutating the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr = lookup("EPA_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("EPA_BIND_ADDR is not a valid socket address")?;

        let insurance = upstream_from(&lookup, "EPA_INSURANCE_BASE_URL", "EPA_INSURANCE_API_KEY")?;
        let pharmacy = upstream_from(&lookup, "EPA_PHARMACY_BASE_URL", "EPA_PHARMACY_API_KEY")?;

        let field_key_hex = lookup("EPA_FIELD_KEY_HEX").map(Secret::new);
        let database_url = lookup("EPA_DATABASE_URL").map(Secret::new);

        let metrics_addr = lookup("EPA_METRICS_ADDR")
            .map(|raw| {
                raw.parse::<SocketAddr>()
                    .context("EPA_METRICS_ADDR is not a valid socket address")
            })
            .transpose()?;

        Ok(Self {
            bind_addr,
            insurance,
            pharmacy,
            field_key_hex,
            database_url,
            metrics_addr,
        })
    }

    /// Convenience for tests: lookup backed by a map.
    #[cfg(test)]
    pub fn from_map(vars: &std::collections::HashMap<&str, &str>) -> anyhow::Result<Self> {
        Self::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
    }
}

/// Read one upstream's pair of variables. Setting only one of the two is
/// a configuration mistake, not a fallback.
fn upstream_from(
    lookup: &impl Fn(&str) -> Option<String>,
    url_var: &str,
    key_var: &str,
) -> anyhow::Result<Option<UpstreamConfig>> {
    match (lookup(url_var), lookup(key_var)) {
        (Some(base_url), Some(key)) => Ok(Some(UpstreamConfig {
            base_url,
            api_key: Secret::new(key),
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(anyhow!("{url_var} is set but {key_var} is missing")),
        (None, Some(_)) => Err(anyhow!("{key_var} is set but {url_var} is missing")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_environment_selects_all_fallbacks() {
        let config = ServeConfig::from_map(&HashMap::new()).unwrap();
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert!(config.insurance.is_none());
        assert!(config.pharmacy.is_none());
        assert!(config.database_url.is_none());
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    fn full_environment_parses() {
        let vars = HashMap::from([
            ("EPA_BIND_ADDR", "0.0.0.0:9000"),
            ("EPA_INSURANCE_BASE_URL", "https://payer.example/v1/"),
            ("EPA_INSURANCE_API_KEY", "ins-key"),
            ("EPA_PHARMACY_BASE_URL", "https://switch.example/v1/"),
            ("EPA_PHARMACY_API_KEY", "rx-key"),
            ("EPA_FIELD_KEY_HEX", "00ff"),
            ("EPA_DATABASE_URL", "postgres://epa@localhost/epa"),
            ("EPA_METRICS_ADDR", "127.0.0.1:9400"),
        ]);
        let config = ServeConfig::from_map(&vars).unwrap();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:9000");
        let insurance = config.insurance.unwrap();
        assert_eq!(insurance.base_url, "https://payer.example/v1/");
        assert_eq!(insurance.api_key.expose(), "ins-key");
        assert!(config.metrics_addr.is_some());
    }

    #[test]
    fn half_configured_upstream_is_an_error() {
        let vars = HashMap::from([("EPA_INSURANCE_BASE_URL", "https://payer.example/")]);
        let err = ServeConfig::from_map(&vars).unwrap_err();
        assert!(err.to_string().contains("EPA_INSURANCE_API_KEY"));
    }

    #[test]
    fn bad_bind_address_is_an_error() {
        let vars = HashMap::from([("EPA_BIND_ADDR", "not-an-address")]);
        assert!(ServeConfig::from_map(&vars).is_err());
    }

    #[test]
    fn secrets_never_appear_in_debug_output() {
        let vars = HashMap::from([
            ("EPA_INSURANCE_BASE_URL", "https://payer.example/"),
            ("EPA_INSURANCE_API_KEY", "super-secret-key"),
            ("EPA_DATABASE_URL", "postgres://user:hunter2@db/epa"),
        ]);
        let config = ServeConfig::from_map(&vars).unwrap();
        let printed = format!("{config:?}");
        assert!(!printed.contains("super-secret-key"));
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("redacted"));
    }
}
