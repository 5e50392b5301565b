use alloy_primitives::Address;
use megapool_utils::{MegapoolError, DEFAULT_CONFIG_FILE, DEFAULT_ROOT_DIR, ROOT_VERSION};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Stores the core configuration for the megapool service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub network: String,
    pub rpc_url: String,
    pub fallback_rpc_url: Option<String>,
    pub storage_contract: String,
    pub deposit_contract: String,
    pub chain_id: u64,
    /// Base url of a service that serves prebuilt withdrawal proofs.
    pub withdrawal_proof_api: Option<String>,
    /// Safe gas limit as a percentage of the estimate.
    pub gas_limit_multiplier: u64,
    pub max_concurrent_reads: usize,
    /// How far back to look for a finalized block carrying an execution payload.
    pub finalized_block_attempts: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network: "mainnet".to_string(),
            rpc_url: "http://127.0.0.1:8545".to_string(),
            fallback_rpc_url: None,
            storage_contract: "0x1d8f8f00cfa6758d7bE78336684788Fb0ee0Fa46".to_string(),
            deposit_contract: "0x00000000219ab540356cBB839Cbe05303d7705Fa".to_string(),
            chain_id: 1,
            withdrawal_proof_api: Some("https://api.rocketpool.net".to_string()),
            gas_limit_multiplier: 150,
            max_concurrent_reads: 8,
            finalized_block_attempts: 10,
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_ROOT_DIR)
            .join(format!("v{}", ROOT_VERSION))
            .join(DEFAULT_CONFIG_FILE)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let file = File::options()
            .read(true)
            .open(path)
            .map_err(|e| format!("failed to open file {:?}", e))?;
        serde_yaml::from_reader(file).map_err(|e| format!("failed to deserialize file {:?}", e))
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| format!("failed to open file {:?}", e))?;
        serde_yaml::to_writer(file, self)
            .map_err(|e| format!("failed to serialize to file {:?}", e))
    }

    pub fn storage_address(&self) -> Result<Address, MegapoolError> {
        parse_address("storage_contract", &self.storage_contract)
    }

    pub fn deposit_contract_address(&self) -> Result<Address, MegapoolError> {
        parse_address("deposit_contract", &self.deposit_contract)
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address, MegapoolError> {
    value
        .parse::<Address>()
        .map_err(|e| MegapoolError::Config(format!("{}: {}", field, e)))
}
