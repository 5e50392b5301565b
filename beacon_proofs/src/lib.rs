pub mod containers;
pub mod merkle;
pub mod proofs;
pub mod state;
pub mod test_utils;

pub use containers::{
    BeaconBlockHeader, BlsPublicKey, HistoricalSummary, ValidatorRecord, Withdrawal,
};
pub use proofs::{
    build_historical_withdrawal_proof, build_recent_withdrawal_proof, build_slot_proof,
    build_validator_proof, needs_historical_proof, SlotProof, ValidatorProof, WithdrawalProof,
};
pub use state::{BeaconBlockView, BeaconStateView, ExecutionPayloadView};
