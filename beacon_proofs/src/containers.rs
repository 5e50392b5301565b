use crate::merkle::{bool_leaf, container_root, hash_pair, uint_leaf};
use alloy_primitives::{Address, FixedBytes, B256};
use megapool_utils::FAR_FUTURE_EPOCH;
use serde::{Deserialize, Serialize};

pub type BlsPublicKey = FixedBytes<48>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorRecord {
    pub pubkey: BlsPublicKey,
    pub withdrawal_credentials: B256,
    pub effective_balance: u64,
    pub slashed: bool,
    pub activation_eligibility_epoch: u64,
    pub activation_epoch: u64,
    pub exit_epoch: u64,
    pub withdrawable_epoch: u64,
}

impl ValidatorRecord {
    pub fn hash_tree_root(&self) -> B256 {
        container_root(&[
            pubkey_root(&self.pubkey),
            self.withdrawal_credentials,
            uint_leaf(self.effective_balance),
            bool_leaf(self.slashed),
            uint_leaf(self.activation_eligibility_epoch),
            uint_leaf(self.activation_epoch),
            uint_leaf(self.exit_epoch),
            uint_leaf(self.withdrawable_epoch),
        ])
    }

    pub fn is_active_at(&self, epoch: u64) -> bool {
        self.activation_epoch <= epoch && epoch < self.exit_epoch
    }

    /// An exit has been initiated, whether or not it has taken effect yet.
    pub fn exit_initiated(&self) -> bool {
        self.exit_epoch != FAR_FUTURE_EPOCH
    }
}

fn pubkey_root(pubkey: &BlsPublicKey) -> B256 {
    let mut low = [0u8; 32];
    let mut high = [0u8; 32];
    low.copy_from_slice(&pubkey[..32]);
    high[..16].copy_from_slice(&pubkey[32..]);
    hash_pair(&B256::from(low), &B256::from(high))
}

/// Withdrawal entry of an execution payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub index: u64,
    pub validator_index: u64,
    /// Execution address the withdrawal was paid to.
    pub withdrawal_credentials: Address,
    pub amount_in_gwei: u64,
}

impl Withdrawal {
    pub fn hash_tree_root(&self) -> B256 {
        let mut address = [0u8; 32];
        address[..20].copy_from_slice(self.withdrawal_credentials.as_slice());
        container_root(&[
            uint_leaf(self.index),
            uint_leaf(self.validator_index),
            B256::from(address),
            uint_leaf(self.amount_in_gwei),
        ])
    }
}

pub const HEADER_STATE_ROOT_INDEX: usize = 3;
pub const HEADER_BODY_ROOT_INDEX: usize = 4;
pub const HEADER_TREE_DEPTH: usize = 3;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconBlockHeader {
    pub slot: u64,
    pub proposer_index: u64,
    pub parent_root: B256,
    pub state_root: B256,
    pub body_root: B256,
}

impl BeaconBlockHeader {
    pub fn field_leaves(&self) -> Vec<B256> {
        vec![
            uint_leaf(self.slot),
            uint_leaf(self.proposer_index),
            self.parent_root,
            self.state_root,
            self.body_root,
        ]
    }

    pub fn hash_tree_root(&self) -> B256 {
        container_root(&self.field_leaves())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalSummary {
    pub block_summary_root: B256,
    pub state_summary_root: B256,
}

impl HistoricalSummary {
    pub fn hash_tree_root(&self) -> B256 {
        hash_pair(&self.block_summary_root, &self.state_summary_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> ValidatorRecord {
        ValidatorRecord {
            pubkey: BlsPublicKey::repeat_byte(0xaa),
            withdrawal_credentials: B256::repeat_byte(0x01),
            effective_balance: 32_000_000_000,
            slashed: false,
            activation_eligibility_epoch: 10,
            activation_epoch: 12,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
        }
    }

    #[test]
    fn validator_root_commits_to_every_field() {
        let base = validator();
        let mut slashed = base.clone();
        slashed.slashed = true;
        let mut exited = base.clone();
        exited.exit_epoch = 100;
        let mut other_key = base.clone();
        other_key.pubkey[47] = 0xab;
        let root = base.hash_tree_root();
        assert_ne!(root, slashed.hash_tree_root());
        assert_ne!(root, exited.hash_tree_root());
        assert_ne!(root, other_key.hash_tree_root());
    }

    #[test]
    fn activity_window() {
        let mut v = validator();
        assert!(!v.is_active_at(11));
        assert!(v.is_active_at(12));
        assert!(!v.exit_initiated());
        v.exit_epoch = 20;
        assert!(v.exit_initiated());
        assert!(v.is_active_at(19));
        assert!(!v.is_active_at(20));
    }

    #[test]
    fn header_root_changes_with_state_root() {
        let header = BeaconBlockHeader {
            slot: 5,
            ..Default::default()
        };
        let mut with_state = header.clone();
        with_state.state_root = B256::repeat_byte(3);
        assert_ne!(header.hash_tree_root(), with_state.hash_tree_root());
    }
}
