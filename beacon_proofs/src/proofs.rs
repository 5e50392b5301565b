use crate::containers::{
    BeaconBlockHeader, BlsPublicKey, ValidatorRecord, Withdrawal, HEADER_BODY_ROOT_INDEX,
    HEADER_STATE_ROOT_INDEX, HEADER_TREE_DEPTH,
};
use crate::merkle::{
    concat_gindices, gindex_depth, leaf_gindex, mix_in_length, uint_leaf, verify_branch,
    MerkleTree,
};
use crate::state::*;
use alloy_primitives::B256;
use megapool_utils::SLOTS_PER_HISTORICAL_ROOT;
use serde::{Deserialize, Serialize};

pub const BODY_TREE_DEPTH: usize = 4;
pub const PAYLOAD_TREE_DEPTH: usize = 5;

/// Evidence that a validator record is part of the state behind the block root of `slot`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorProof {
    pub slot: u64,
    pub validator_index: u64,
    pub validator: ValidatorRecord,
    pub witnesses: Vec<B256>,
}

impl ValidatorProof {
    pub fn pubkey(&self) -> &BlsPublicKey {
        &self.validator.pubkey
    }

    pub fn withdrawal_credentials(&self) -> B256 {
        self.validator.withdrawal_credentials
    }

    pub fn verify(&self, block_root: &B256) -> bool {
        verify_branch(
            &self.validator.hash_tree_root(),
            &self.witnesses,
            validator_gindex(self.validator_index),
            block_root,
        )
    }
}

/// Evidence of the `slot` field of the state behind a block root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotProof {
    pub slot: u64,
    pub witnesses: Vec<B256>,
}

impl SlotProof {
    pub fn verify(&self, block_root: &B256) -> bool {
        verify_branch(
            &uint_leaf(self.slot),
            &self.witnesses,
            state_field_gindex(STATE_SLOT_INDEX),
            block_root,
        )
    }
}

/// Evidence that `withdrawal` was paid in the block at `withdrawal_slot`, anchored at the block
/// root of `slot`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalProof {
    pub slot: u64,
    pub withdrawal_slot: u64,
    pub withdrawal_num: u16,
    pub withdrawal: Withdrawal,
    pub witnesses: Vec<B256>,
}

impl WithdrawalProof {
    /// `summary_index` is the historical summary the proof passes through, if any.
    pub fn verify(&self, block_root: &B256, summary_index: Option<u64>) -> bool {
        verify_branch(
            &self.withdrawal.hash_tree_root(),
            &self.witnesses,
            withdrawal_gindex(self.withdrawal_slot, self.withdrawal_num as u64, summary_index),
            block_root,
        )
    }
}

/// Withdrawals older than one `block_roots` period must be proven through historical summaries.
pub fn needs_historical_proof(withdrawal_slot: u64, proof_slot: u64) -> bool {
    withdrawal_slot + SLOTS_PER_HISTORICAL_ROOT <= proof_slot
}

fn state_field_gindex(field: usize) -> u128 {
    concat_gindices(
        leaf_gindex(HEADER_TREE_DEPTH, HEADER_STATE_ROOT_INDEX as u64),
        leaf_gindex(STATE_TREE_DEPTH, field as u64),
    )
}

pub fn validator_gindex(validator_index: u64) -> u128 {
    let in_list = concat_gindices(2, leaf_gindex(VALIDATOR_REGISTRY_DEPTH, validator_index));
    concat_gindices(state_field_gindex(STATE_VALIDATORS_INDEX), in_list)
}

fn block_withdrawal_gindex(withdrawal_num: u64) -> u128 {
    let mut gindex = leaf_gindex(HEADER_TREE_DEPTH, HEADER_BODY_ROOT_INDEX as u64);
    gindex = concat_gindices(
        gindex,
        leaf_gindex(BODY_TREE_DEPTH, BODY_EXECUTION_PAYLOAD_INDEX as u64),
    );
    gindex = concat_gindices(
        gindex,
        leaf_gindex(PAYLOAD_TREE_DEPTH, PAYLOAD_WITHDRAWALS_INDEX as u64),
    );
    concat_gindices(gindex, concat_gindices(2, leaf_gindex(WITHDRAWALS_DEPTH, withdrawal_num)))
}

pub fn withdrawal_gindex(
    withdrawal_slot: u64,
    withdrawal_num: u64,
    summary_index: Option<u64>,
) -> u128 {
    let root_position = leaf_gindex(BLOCK_ROOTS_DEPTH, withdrawal_slot % SLOTS_PER_HISTORICAL_ROOT);
    let to_block_root = match summary_index {
        None => concat_gindices(state_field_gindex(STATE_BLOCK_ROOTS_INDEX), root_position),
        Some(index) => {
            let mut gindex = concat_gindices(
                state_field_gindex(STATE_HISTORICAL_SUMMARIES_INDEX),
                concat_gindices(2, leaf_gindex(HISTORICAL_SUMMARIES_DEPTH, index)),
            );
            // block_summary_root is the first of the two summary fields
            gindex = concat_gindices(gindex, leaf_gindex(1, 0));
            concat_gindices(gindex, root_position)
        }
    };
    concat_gindices(to_block_root, block_withdrawal_gindex(withdrawal_num))
}

fn check_length(witnesses: &[B256], gindex: u128) -> Result<(), String> {
    let expected = gindex_depth(gindex);
    if witnesses.len() != expected {
        return Err(format!(
            "malformed witness: expected {} entries, got {}",
            expected,
            witnesses.len()
        ));
    }
    Ok(())
}

pub fn build_validator_proof(
    state: &BeaconStateView,
    validator_index: u64,
) -> Result<ValidatorProof, String> {
    let validator = state
        .validator(validator_index)
        .cloned()
        .ok_or_else(|| format!("validator {} not in state", validator_index))?;
    let validators = state.validators_tree()?;
    let validators_root = mix_in_length(&validators.root(), state.validators.len());
    let top = state.top_level_tree_with(validators_root)?;

    let mut witnesses = validators.proof(validator_index as usize)?;
    witnesses.push(uint_leaf(state.validators.len() as u64));
    witnesses.extend(top.proof(STATE_VALIDATORS_INDEX)?);
    witnesses.extend(state.header_branch(top.root())?);
    check_length(&witnesses, validator_gindex(validator_index))?;

    Ok(ValidatorProof {
        slot: state.slot,
        validator_index,
        validator,
        witnesses,
    })
}

pub fn build_slot_proof(state: &BeaconStateView) -> Result<SlotProof, String> {
    let top = state.top_level_tree()?;
    let mut witnesses = top.proof(STATE_SLOT_INDEX)?;
    witnesses.extend(state.header_branch(top.root())?);
    check_length(&witnesses, state_field_gindex(STATE_SLOT_INDEX))?;
    Ok(SlotProof {
        slot: state.slot,
        witnesses,
    })
}

/// Branch from a withdrawal entry up to the root of the block that paid it.
fn block_withdrawal_branch(
    block: &BeaconBlockView,
    withdrawal_num: usize,
) -> Result<Vec<B256>, String> {
    let payload = block
        .execution_payload
        .as_ref()
        .ok_or_else(|| format!("block at slot {} has no execution payload", block.slot))?;
    let mut branch = payload.withdrawals_tree()?.proof(withdrawal_num)?;
    branch.push(uint_leaf(payload.withdrawals.len() as u64));

    let payload_tree = payload.tree()?;
    let body_tree = block.body_tree()?;
    if payload_tree.depth() != PAYLOAD_TREE_DEPTH || body_tree.depth() != BODY_TREE_DEPTH {
        return Err(format!("unsupported block layout at slot {}", block.slot));
    }
    branch.extend(payload_tree.proof(PAYLOAD_WITHDRAWALS_INDEX)?);
    branch.extend(body_tree.proof(BODY_EXECUTION_PAYLOAD_INDEX)?);

    let header = BeaconBlockHeader {
        slot: block.slot,
        proposer_index: block.proposer_index,
        parent_root: block.parent_root,
        state_root: block.state_root,
        body_root: body_tree.root(),
    };
    let header_tree = MerkleTree::new(header.field_leaves(), HEADER_TREE_DEPTH)?;
    branch.extend(header_tree.proof(HEADER_BODY_ROOT_INDEX)?);
    Ok(branch)
}

fn withdrawal_at(block: &BeaconBlockView, withdrawal_num: usize) -> Result<Withdrawal, String> {
    block
        .execution_payload
        .as_ref()
        .and_then(|p| p.withdrawals.get(withdrawal_num))
        .cloned()
        .ok_or_else(|| format!("no withdrawal {} in block at slot {}", withdrawal_num, block.slot))
}

/// Proof through `state.block_roots`, for withdrawals within the last period.
pub fn build_recent_withdrawal_proof(
    state: &BeaconStateView,
    block: &BeaconBlockView,
    withdrawal_num: usize,
) -> Result<WithdrawalProof, String> {
    let withdrawal = withdrawal_at(block, withdrawal_num)?;
    if state.block_root_at(block.slot) != Some(block.block_root()?) {
        return Err(format!(
            "block at slot {} is not in block_roots of state {}",
            block.slot, state.slot
        ));
    }
    let mut witnesses = block_withdrawal_branch(block, withdrawal_num)?;
    witnesses.extend(
        state
            .block_roots_tree()?
            .proof((block.slot % SLOTS_PER_HISTORICAL_ROOT) as usize)?,
    );
    let top = state.top_level_tree()?;
    witnesses.extend(top.proof(STATE_BLOCK_ROOTS_INDEX)?);
    witnesses.extend(state.header_branch(top.root())?);
    check_length(
        &witnesses,
        withdrawal_gindex(block.slot, withdrawal_num as u64, None),
    )?;

    Ok(WithdrawalProof {
        slot: state.slot,
        withdrawal_slot: block.slot,
        withdrawal_num: withdrawal_num as u16,
        withdrawal,
        witnesses,
    })
}

/// Proof through `state.historical_summaries[summary_index]`, whose block roots are those of
/// `roots_state`.
pub fn build_historical_withdrawal_proof(
    state: &BeaconStateView,
    roots_state: &BeaconStateView,
    block: &BeaconBlockView,
    withdrawal_num: usize,
    summary_index: u64,
) -> Result<WithdrawalProof, String> {
    let withdrawal = withdrawal_at(block, withdrawal_num)?;
    let summary = state
        .historical_summaries
        .get(summary_index as usize)
        .ok_or_else(|| {
            format!("historical summary {} not in state {}", summary_index, state.slot)
        })?;
    let roots_tree = roots_state.block_roots_tree()?;
    if roots_tree.root() != summary.block_summary_root {
        return Err(format!(
            "block roots of state {} do not match historical summary {}",
            roots_state.slot, summary_index
        ));
    }
    let position = (block.slot % SLOTS_PER_HISTORICAL_ROOT) as usize;
    if roots_state.block_roots[position] != block.block_root()? {
        return Err(format!(
            "block at slot {} is not in historical summary {}",
            block.slot, summary_index
        ));
    }

    let mut witnesses = block_withdrawal_branch(block, withdrawal_num)?;
    witnesses.extend(roots_tree.proof(position)?);
    witnesses.push(summary.state_summary_root);
    witnesses.extend(state.historical_summaries_tree()?.proof(summary_index as usize)?);
    witnesses.push(uint_leaf(state.historical_summaries.len() as u64));
    let top = state.top_level_tree()?;
    witnesses.extend(top.proof(STATE_HISTORICAL_SUMMARIES_INDEX)?);
    witnesses.extend(state.header_branch(top.root())?);
    check_length(
        &witnesses,
        withdrawal_gindex(block.slot, withdrawal_num as u64, Some(summary_index)),
    )?;

    Ok(WithdrawalProof {
        slot: state.slot,
        withdrawal_slot: block.slot,
        withdrawal_num: withdrawal_num as u16,
        withdrawal,
        witnesses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::container_root;
    use crate::test_utils::*;
    use crate::containers::HistoricalSummary;

    #[test]
    fn validator_proof_verifies_against_block_root() {
        let state = state_with_validators(100, (0..5).map(validator).collect());
        let proof = build_validator_proof(&state, 3).unwrap();
        assert_eq!(proof.witnesses.len(), 50);
        assert_eq!(proof.validator, state.validators[3]);
        let block_root = state.block_root().unwrap();
        assert!(proof.verify(&block_root));
    }

    #[test]
    fn validator_proof_rejects_changed_record() {
        let state = state_with_validators(100, (0..5).map(validator).collect());
        let mut proof = build_validator_proof(&state, 1).unwrap();
        proof.validator.exit_epoch = 77;
        assert!(!proof.verify(&state.block_root().unwrap()));
    }

    #[test]
    fn validator_proof_does_not_verify_at_other_slot() {
        let state = state_with_validators(100, (0..5).map(validator).collect());
        let proof = build_validator_proof(&state, 1).unwrap();
        let mut later = state.clone();
        later.slot = 164;
        later.latest_block_header.slot = 164;
        later.validators[1].exit_epoch = 9;
        assert!(!proof.verify(&later.block_root().unwrap()));
    }

    #[test]
    fn unknown_validator_index() {
        let state = state_with_validators(100, vec![validator(0)]);
        assert!(build_validator_proof(&state, 1).is_err());
    }

    #[test]
    fn slot_proof_verifies() {
        let state = state_with_validators(4242, vec![validator(0)]);
        let proof = build_slot_proof(&state).unwrap();
        assert_eq!(proof.witnesses.len(), 9);
        assert!(proof.verify(&state.block_root().unwrap()));
        let forged = SlotProof {
            slot: 4243,
            ..proof
        };
        assert!(!forged.verify(&state.block_root().unwrap()));
    }

    #[test]
    fn recent_withdrawal_proof_verifies() {
        let block = block_with_withdrawals(
            90,
            vec![withdrawal(1, 4, 100), withdrawal(2, 7, 32_000_000_000)],
        );
        let mut state = state_with_validators(100, (0..8).map(validator).collect());
        record_block_root(&mut state, &block);

        let proof = build_recent_withdrawal_proof(&state, &block, 1).unwrap();
        assert_eq!(proof.withdrawal.validator_index, 7);
        assert_eq!(proof.withdrawal_num, 1);
        assert_eq!(proof.witnesses.len(), 39);
        assert!(!needs_historical_proof(90, 100));
        assert!(proof.verify(&state.block_root().unwrap(), None));
        assert!(!proof.verify(&state.block_root().unwrap(), Some(0)));
    }

    #[test]
    fn recent_withdrawal_proof_requires_known_block() {
        let block = block_with_withdrawals(90, vec![withdrawal(1, 4, 100)]);
        let state = state_with_validators(100, vec![validator(0)]);
        assert!(build_recent_withdrawal_proof(&state, &block, 0).is_err());
    }

    #[test]
    fn historical_withdrawal_proof_verifies() {
        let block = block_with_withdrawals(8200, vec![withdrawal(9, 3, 31_000_000_000)]);
        let mut roots_state = state_with_validators(16384, vec![validator(0)]);
        record_block_root(&mut roots_state, &block);

        let mut state = state_with_validators(20000, (0..4).map(validator).collect());
        state.historical_summaries = vec![
            HistoricalSummary {
                block_summary_root: B256::repeat_byte(0x31),
                state_summary_root: B256::repeat_byte(0x32),
            },
            HistoricalSummary {
                block_summary_root: container_root(&roots_state.block_roots),
                state_summary_root: B256::repeat_byte(0x42),
            },
        ];
        assert!(needs_historical_proof(8200, 20000));

        let proof = build_historical_withdrawal_proof(&state, &roots_state, &block, 0, 1).unwrap();
        assert_eq!(proof.witnesses.len(), 65);
        let root = state.block_root().unwrap();
        assert!(proof.verify(&root, Some(1)));
        assert!(!proof.verify(&root, Some(0)));
        assert!(!proof.verify(&root, None));

        assert!(build_historical_withdrawal_proof(&state, &roots_state, &block, 0, 0).is_err());
    }

    #[test]
    fn proofs_use_camel_case_json() {
        let state = state_with_validators(64, (0..2).map(validator).collect());
        let proof = build_validator_proof(&state, 1).unwrap();
        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(json["validatorIndex"], 1);
        assert_eq!(json["validator"]["effectiveBalance"], 32_000_000_000u64);
        assert_eq!(json["witnesses"].as_array().map(Vec::len), Some(50));
        let decoded: ValidatorProof = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, proof);
    }
}
