use std::{path::PathBuf, time::Duration};

use clap::Args;

pub const DEFAULT_SERVICES: &[&str] = &["cis", "esm-apps", "esm-infra", "fips", "livepatch"];

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Read host files (os-release, machine-id) under this root (test-only).
    #[arg(long, global = true, hide = true, default_value = "/")]
    pub root: PathBuf,

    #[arg(
        long,
        global = true,
        env = "CONTRACT_SYNC_DATA_DIR",
        value_name = "PATH",
        default_value = "/var/lib/contract-sync"
    )]
    pub data_dir: PathBuf,

    #[arg(
        long,
        global = true,
        env = "CONTRACT_SYNC_CONTRACT_URL",
        value_name = "URL",
        default_value = "https://contracts.canonical.com"
    )]
    pub contract_url: String,

    #[arg(
        long = "timeout-secs",
        global = true,
        env = "CONTRACT_SYNC_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..=600)
    )]
    pub timeout_secs: u64,

    /// Entitlement types to apply; others are reported as unsupported.
    #[arg(
        long = "service",
        global = true,
        env = "CONTRACT_SYNC_SERVICES",
        value_name = "TYPE",
        value_delimiter = ',',
        default_values_t = DEFAULT_SERVICES.iter().map(|s| s.to_string()).collect::<Vec<_>>()
    )]
    pub services: Vec<String>,
}

impl Config {
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
