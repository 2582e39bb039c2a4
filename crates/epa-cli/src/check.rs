//! # The `epa check-config` Command
//!
//! Resolves the environment configuration exactly the way `epa serve` would
//! and prints what each integration will do, without opening any sockets.
//! Run it on a new host before the first `serve` to catch half-configured
//! upstreams and malformed keys while the fix is still cheap.

use anyhow::Result;

use epa_crypto::AesGcmFieldEncryptor;

use crate::config::{ServeConfig, UpstreamConfig};

/// Execute the check-config subcommand.
///
/// Returns an error only when the environment fails to parse at all; a
/// configuration that resolves to fallbacks is reported, not rejected.
pub fn run_check_config() -> Result<()> {
    let config = ServeConfig::from_env()?;

    println!("bind address    {}", config.bind_addr);
    println!("insurance       {}", describe_upstream(&config.insurance));
    println!("pharmacy        {}", describe_upstream(&config.pharmacy));
    println!("field key       {}", describe_field_key(&config));
    println!(
        "store           {}",
        if config.database_url.is_some() {
            "Postgres (EPA_DATABASE_URL set, credential redacted)"
        } else {
            "in-memory (EPA_DATABASE_URL unset; records are lost on restart)"
        }
    );
    match config.metrics_addr {
        Some(addr) => println!("metrics         Prometheus exporter on {addr}"),
        None => println!("metrics         disabled (EPA_METRICS_ADDR unset)"),
    }

    Ok(())
}

fn describe_upstream(upstream: &Option<UpstreamConfig>) -> String {
    match upstream {
        Some(u) => format!("live HTTP adapter, endpoint {} (api key redacted)", u.base_url),
        None => "mock adapter (endpoint variables unset)".to_string(),
    }
}

/// The key is parsed here with the same routine the live pharmacy gateway
/// uses, so a malformed value surfaces now instead of on the first PA send.
fn describe_field_key(config: &ServeConfig) -> String {
    match &config.field_key_hex {
        None => {
            "not set; the live pharmacy gateway will refuse PA submissions".to_string()
        }
        Some(key) => match AesGcmFieldEncryptor::from_hex_key(key.expose()) {
            Ok(_) => "set, parses as an AES-256 key (value redacted)".to_string(),
            Err(e) => format!("SET BUT INVALID: {e}"),
        },
    }
}
