use alloy_primitives::{Address, B256, U256};
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum MegapoolError {
    /// The validator has not appeared in beacon state yet.
    IndexNotFound(String),
    /// A witness has the wrong length or does not verify. Never submitted.
    ProofConstructionFailed(String),
    /// Proofs may only reference finalized beacon state.
    SlotNotFinalized {
        requested: u64,
        finalized: u64,
    },
    /// The validator record changed between proof construction and use.
    StaleProof {
        proof_slot: u64,
        current_slot: u64,
    },
    /// Execution and consensus clients disagree on the network. Fatal.
    ChainMismatch(String),
    /// Error propagated unchanged from an execution or consensus client
    Transport(String),
    /// Estimating gas for a prepared call failed (usually a revert)
    GasEstimation(String),
    /// Signing or broadcasting failed
    Submission(String),
    /// Contract returned contradictory status flags for a validator.
    InconsistentValidatorState {
        validator_id: u32,
    },
    /// Withdrawal history for the requested range is unavailable
    HistoryMissing(String),
    Config(String),
}

impl MegapoolError {
    /// Errors after which the process must not keep submitting anything.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MegapoolError::ChainMismatch(_))
    }
}

impl fmt::Display for MegapoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MegapoolError::IndexNotFound(pubkey) => {
                write!(f, "validator {} not found on the beacon chain", pubkey)
            }
            MegapoolError::ProofConstructionFailed(e) => {
                write!(f, "proof construction failed: {}", e)
            }
            MegapoolError::SlotNotFinalized {
                requested,
                finalized,
            } => write!(
                f,
                "slot {} is not finalized (finalized slot is {})",
                requested, finalized
            ),
            MegapoolError::StaleProof {
                proof_slot,
                current_slot,
            } => write!(
                f,
                "proof built at slot {} is stale at finalized slot {}",
                proof_slot, current_slot
            ),
            MegapoolError::ChainMismatch(e) => write!(f, "chain mismatch: {}", e),
            MegapoolError::Transport(e) => write!(f, "client error: {}", e),
            MegapoolError::GasEstimation(e) => write!(f, "gas estimation failed: {}", e),
            MegapoolError::Submission(e) => write!(f, "transaction submission failed: {}", e),
            MegapoolError::InconsistentValidatorState { validator_id } => write!(
                f,
                "validator {} has contradictory status flags",
                validator_id
            ),
            MegapoolError::HistoryMissing(e) => write!(f, "beacon history missing: {}", e),
            MegapoolError::Config(e) => write!(f, "invalid config: {}", e),
        }
    }
}

impl std::error::Error for MegapoolError {}

/// !NOTE: The default config directory is derived from this value.
pub const ROOT_VERSION: u64 = 1;

pub static DEFAULT_ROOT_DIR: &str = ".megapool";
pub static DEFAULT_CONFIG_FILE: &str = "config.yml";

pub const FAR_FUTURE_EPOCH: u64 = u64::MAX;
pub const SLOTS_PER_HISTORICAL_ROOT: u64 = 8192;
/// Furthest a withdrawal is searched for past the requested slot.
pub const MAX_WITHDRAWAL_SLOT_DISTANCE: u64 = 144_000;
/// Consecutive empty slots tolerated while scanning blocks.
pub const MAX_MISSING_SLOTS: u64 = 64;
pub const QUEUE_PAGE_SIZE: u64 = 100;

pub static EXPRESS_QUEUE_NAMESPACE: &str = "deposit.queue.express";
pub static STANDARD_QUEUE_NAMESPACE: &str = "deposit.queue.standard";
pub static QUEUE_INDEX_KEY: &str = "megapool.queue.index";

pub const GWEI: u64 = 1_000_000_000;

pub fn gwei_to_wei(gwei: u64) -> U256 {
    U256::from(gwei) * U256::from(GWEI)
}

pub fn ether(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18))
}

/// 0x01 prefix, eleven zero bytes, then the megapool address.
pub fn megapool_withdrawal_credentials(megapool: Address) -> B256 {
    let mut credentials = [0u8; 32];
    credentials[0] = 0x01;
    credentials[12..].copy_from_slice(megapool.as_slice());
    B256::from(credentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn credentials_layout() {
        let megapool: Address = "0x1111111111111111111111111111111111111111"
            .parse()
            .unwrap();
        let credentials = megapool_withdrawal_credentials(megapool);
        assert_eq!(credentials[0], 0x01);
        assert!(credentials[1..12].iter().all(|b| *b == 0));
        assert_eq!(&credentials[12..], megapool.as_slice());
    }

    #[test]
    fn only_chain_mismatch_is_fatal() {
        assert!(MegapoolError::ChainMismatch("x".into()).is_fatal());
        assert!(!MegapoolError::IndexNotFound("x".into()).is_fatal());
        assert!(!MegapoolError::Transport("x".into()).is_fatal());
    }

    #[quickcheck]
    fn gwei_conversion_matches_multiplication(gwei: u64) -> bool {
        gwei_to_wei(gwei) / U256::from(GWEI) == U256::from(gwei)
    }
}
