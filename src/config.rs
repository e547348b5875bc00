use std::num::NonZeroUsize;
use std::sync::OnceLock;

use crate::{AggError, AggResult};

#[derive(serde::Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
struct Config {
    ec_k: usize,
    ec_p: usize,
    ec_l: usize,
    #[serde(default = "default_record_size")]
    record_size: bytesize::ByteSize,
    #[serde(default = "default_credits_max")]
    credits_max: usize,
    #[serde(default)]
    checksums_enabled: bool,
}

const fn default_credits_max() -> usize {
    256
}

fn default_record_size() -> bytesize::ByteSize {
    bytesize::ByteSize::b(4096)
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Parse and install the process-wide configuration from a TOML file.
///
/// # Panics
/// Panics if called more than once in the same process.
pub fn init_config_toml(config_file: &std::path::Path) -> AggResult<()> {
    let text = std::fs::read_to_string(config_file)?;
    let config: Config = toml::from_str(&text).map_err(|e| AggError::other(e.to_string()))?;
    CONFIG
        .set(config)
        .expect("initialize config more than once");
    Ok(())
}

/// Install a configuration directly, bypassing the TOML file. Mainly used by
/// the in-process demo/test harness.
pub fn init_config(
    ec_k: NonZeroUsize,
    ec_p: NonZeroUsize,
    ec_l: NonZeroUsize,
    record_size: NonZeroUsize,
) {
    let _ = CONFIG.set(Config {
        ec_k: ec_k.get(),
        ec_p: ec_p.get(),
        ec_l: ec_l.get(),
        record_size: bytesize::ByteSize::b(record_size.get() as u64),
        credits_max: default_credits_max(),
        checksums_enabled: false,
    });
}

fn get_config() -> &'static Config {
    CONFIG.get().expect("configuration not initialized")
}

pub fn ec_k() -> usize {
    get_config().ec_k
}

pub fn ec_p() -> usize {
    get_config().ec_p
}

pub fn ec_l() -> usize {
    get_config().ec_l
}

pub fn record_size() -> usize {
    get_config().record_size.as_u64() as usize
}

/// Iteration calls between cooperative yields, cf. spec.md §6.
pub fn credits_max() -> usize {
    get_config().credits_max
}

pub fn checksums_enabled() -> bool {
    get_config().checksums_enabled
}
