//! Views over the parts of beacon state and blocks that proofs need.
//!
//! A view carries the raw data for the fields we prove through and the precomputed roots of
//! every other field, which is enough to rebuild the state or block root exactly.

use crate::containers::{BeaconBlockHeader, HistoricalSummary, ValidatorRecord, Withdrawal};
use crate::containers::{BlsPublicKey, HEADER_STATE_ROOT_INDEX, HEADER_TREE_DEPTH};
use crate::merkle::{mix_in_length, tree_depth, uint_leaf, MerkleTree};
use alloy_primitives::B256;
use megapool_utils::SLOTS_PER_HISTORICAL_ROOT;
use serde::{Deserialize, Serialize};

pub const STATE_TREE_DEPTH: usize = 6;
pub const STATE_SLOT_INDEX: usize = 2;
pub const STATE_LATEST_BLOCK_HEADER_INDEX: usize = 4;
pub const STATE_BLOCK_ROOTS_INDEX: usize = 5;
pub const STATE_VALIDATORS_INDEX: usize = 11;
pub const STATE_HISTORICAL_SUMMARIES_INDEX: usize = 27;

pub const BLOCK_ROOTS_DEPTH: usize = 13;
pub const VALIDATOR_REGISTRY_DEPTH: usize = 40;
pub const HISTORICAL_SUMMARIES_DEPTH: usize = 24;

pub const BODY_EXECUTION_PAYLOAD_INDEX: usize = 9;
pub const PAYLOAD_BLOCK_NUMBER_INDEX: usize = 6;
pub const PAYLOAD_TIMESTAMP_INDEX: usize = 9;
pub const PAYLOAD_WITHDRAWALS_INDEX: usize = 14;
pub const WITHDRAWALS_DEPTH: usize = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconStateView {
    pub slot: u64,
    /// Roots of all top-level fields in container order. Entries for the fields carried
    /// explicitly below are ignored and recomputed.
    pub field_roots: Vec<B256>,
    pub latest_block_header: BeaconBlockHeader,
    pub block_roots: Vec<B256>,
    pub validators: Vec<ValidatorRecord>,
    pub historical_summaries: Vec<HistoricalSummary>,
}

impl BeaconStateView {
    pub fn validator_index(&self, pubkey: &BlsPublicKey) -> Option<u64> {
        self.validators
            .iter()
            .position(|v| &v.pubkey == pubkey)
            .map(|i| i as u64)
    }

    pub fn validator(&self, index: u64) -> Option<&ValidatorRecord> {
        self.validators.get(index as usize)
    }

    /// Root of the block at `slot`, valid only for the last `SLOTS_PER_HISTORICAL_ROOT` slots.
    pub fn block_root_at(&self, slot: u64) -> Option<B256> {
        if slot >= self.slot || slot + SLOTS_PER_HISTORICAL_ROOT < self.slot {
            return None;
        }
        self.block_roots
            .get((slot % SLOTS_PER_HISTORICAL_ROOT) as usize)
            .copied()
    }

    pub fn validators_tree(&self) -> Result<MerkleTree, String> {
        let leaves = self
            .validators
            .iter()
            .map(ValidatorRecord::hash_tree_root)
            .collect();
        MerkleTree::new(leaves, VALIDATOR_REGISTRY_DEPTH)
    }

    pub fn block_roots_tree(&self) -> Result<MerkleTree, String> {
        if self.block_roots.len() != SLOTS_PER_HISTORICAL_ROOT as usize {
            return Err(format!(
                "block_roots has {} entries, expected {}",
                self.block_roots.len(),
                SLOTS_PER_HISTORICAL_ROOT
            ));
        }
        MerkleTree::new(self.block_roots.clone(), BLOCK_ROOTS_DEPTH)
    }

    pub fn historical_summaries_tree(&self) -> Result<MerkleTree, String> {
        let leaves = self
            .historical_summaries
            .iter()
            .map(HistoricalSummary::hash_tree_root)
            .collect();
        MerkleTree::new(leaves, HISTORICAL_SUMMARIES_DEPTH)
    }

    /// Top-level tree, reusing an already computed validators root.
    pub fn top_level_tree_with(&self, validators_root: B256) -> Result<MerkleTree, String> {
        if self.field_roots.len() <= STATE_HISTORICAL_SUMMARIES_INDEX
            || self.field_roots.len() > 1 << STATE_TREE_DEPTH
        {
            return Err(format!(
                "unsupported beacon state layout with {} fields",
                self.field_roots.len()
            ));
        }
        let mut leaves = self.field_roots.clone();
        leaves[STATE_SLOT_INDEX] = uint_leaf(self.slot);
        leaves[STATE_LATEST_BLOCK_HEADER_INDEX] = self.latest_block_header.hash_tree_root();
        leaves[STATE_BLOCK_ROOTS_INDEX] = self.block_roots_tree()?.root();
        leaves[STATE_VALIDATORS_INDEX] = validators_root;
        leaves[STATE_HISTORICAL_SUMMARIES_INDEX] = mix_in_length(
            &self.historical_summaries_tree()?.root(),
            self.historical_summaries.len(),
        );
        MerkleTree::new(leaves, STATE_TREE_DEPTH)
    }

    pub fn top_level_tree(&self) -> Result<MerkleTree, String> {
        let validators_root = mix_in_length(&self.validators_tree()?.root(), self.validators.len());
        self.top_level_tree_with(validators_root)
    }

    pub fn state_root(&self) -> Result<B256, String> {
        Ok(self.top_level_tree()?.root())
    }

    /// Header of the block at `self.slot`. The state's own copy carries a zero state root
    /// until the next slot is processed.
    pub fn block_header_with_state_root(&self, state_root: B256) -> BeaconBlockHeader {
        let mut header = self.latest_block_header.clone();
        if header.state_root == B256::ZERO {
            header.state_root = state_root;
        }
        header
    }

    pub fn block_root(&self) -> Result<B256, String> {
        let state_root = self.state_root()?;
        Ok(self.block_header_with_state_root(state_root).hash_tree_root())
    }

    /// Branch from the state root up to the block root.
    pub fn header_branch(&self, state_root: B256) -> Result<Vec<B256>, String> {
        let header = self.block_header_with_state_root(state_root);
        MerkleTree::new(header.field_leaves(), HEADER_TREE_DEPTH)?.proof(HEADER_STATE_ROOT_INDEX)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayloadView {
    pub block_number: u64,
    pub timestamp: u64,
    /// Roots of all payload fields in container order.
    pub field_roots: Vec<B256>,
    pub withdrawals: Vec<Withdrawal>,
}

impl ExecutionPayloadView {
    pub fn withdrawals_tree(&self) -> Result<MerkleTree, String> {
        let leaves = self
            .withdrawals
            .iter()
            .map(Withdrawal::hash_tree_root)
            .collect();
        MerkleTree::new(leaves, WITHDRAWALS_DEPTH)
    }

    pub fn tree(&self) -> Result<MerkleTree, String> {
        if self.field_roots.len() <= PAYLOAD_WITHDRAWALS_INDEX {
            return Err("execution payload predates withdrawals".to_string());
        }
        let mut leaves = self.field_roots.clone();
        leaves[PAYLOAD_BLOCK_NUMBER_INDEX] = uint_leaf(self.block_number);
        leaves[PAYLOAD_TIMESTAMP_INDEX] = uint_leaf(self.timestamp);
        leaves[PAYLOAD_WITHDRAWALS_INDEX] =
            mix_in_length(&self.withdrawals_tree()?.root(), self.withdrawals.len());
        let depth = tree_depth(leaves.len());
        MerkleTree::new(leaves, depth)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconBlockView {
    pub slot: u64,
    pub proposer_index: u64,
    pub parent_root: B256,
    pub state_root: B256,
    /// Roots of all body fields in container order.
    pub body_field_roots: Vec<B256>,
    pub execution_payload: Option<ExecutionPayloadView>,
}

impl BeaconBlockView {
    pub fn has_execution_payload(&self) -> bool {
        self.execution_payload.is_some()
    }

    pub fn body_tree(&self) -> Result<MerkleTree, String> {
        let mut leaves = self.body_field_roots.clone();
        if let Some(payload) = &self.execution_payload {
            let slot = leaves
                .get_mut(BODY_EXECUTION_PAYLOAD_INDEX)
                .ok_or_else(|| "block body predates execution payloads".to_string())?;
            *slot = payload.tree()?.root();
        }
        let depth = tree_depth(leaves.len());
        MerkleTree::new(leaves, depth)
    }

    pub fn header(&self) -> Result<BeaconBlockHeader, String> {
        Ok(BeaconBlockHeader {
            slot: self.slot,
            proposer_index: self.proposer_index,
            parent_root: self.parent_root,
            state_root: self.state_root,
            body_root: self.body_tree()?.root(),
        })
    }

    pub fn block_root(&self) -> Result<B256, String> {
        Ok(self.header()?.hash_tree_root())
    }

    /// Position of the first withdrawal paid out for `validator_index` in this block.
    pub fn withdrawal_position(&self, validator_index: u64) -> Option<usize> {
        self.execution_payload
            .as_ref()?
            .withdrawals
            .iter()
            .position(|w| w.validator_index == validator_index)
    }
}
