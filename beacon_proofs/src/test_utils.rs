//! Synthetic beacon data for tests.

use crate::containers::{BeaconBlockHeader, BlsPublicKey, ValidatorRecord, Withdrawal};
use crate::state::{BeaconBlockView, BeaconStateView, ExecutionPayloadView};
use alloy_primitives::{Address, B256};
use megapool_utils::{FAR_FUTURE_EPOCH, SLOTS_PER_HISTORICAL_ROOT};

pub const ELECTRA_STATE_FIELDS: usize = 37;
pub const ELECTRA_BODY_FIELDS: usize = 13;
pub const DENEB_PAYLOAD_FIELDS: usize = 17;

pub fn pubkey(seed: u64) -> BlsPublicKey {
    let mut key = [0u8; 48];
    key[..8].copy_from_slice(&seed.to_be_bytes());
    key[47] = 0xb1;
    BlsPublicKey::from(key)
}

pub fn validator(seed: u64) -> ValidatorRecord {
    ValidatorRecord {
        pubkey: pubkey(seed),
        withdrawal_credentials: B256::with_last_byte(seed as u8),
        effective_balance: 32_000_000_000,
        slashed: false,
        activation_eligibility_epoch: 0,
        activation_epoch: 1,
        exit_epoch: FAR_FUTURE_EPOCH,
        withdrawable_epoch: FAR_FUTURE_EPOCH,
    }
}

fn filler_roots(count: usize, salt: u8) -> Vec<B256> {
    (0..count)
        .map(|i| {
            let mut root = [salt; 32];
            root[0] = i as u8;
            B256::from(root)
        })
        .collect()
}

pub fn state_with_validators(slot: u64, validators: Vec<ValidatorRecord>) -> BeaconStateView {
    BeaconStateView {
        slot,
        field_roots: filler_roots(ELECTRA_STATE_FIELDS, 0x5a),
        latest_block_header: BeaconBlockHeader {
            slot,
            proposer_index: 1,
            parent_root: B256::repeat_byte(0x0a),
            state_root: B256::ZERO,
            body_root: B256::repeat_byte(0x0b),
        },
        block_roots: filler_roots(SLOTS_PER_HISTORICAL_ROOT as usize, 0x77),
        validators,
        historical_summaries: vec![],
    }
}

pub fn withdrawal(index: u64, validator_index: u64, amount_in_gwei: u64) -> Withdrawal {
    Withdrawal {
        index,
        validator_index,
        withdrawal_credentials: Address::repeat_byte(0x42),
        amount_in_gwei,
    }
}

pub fn block_with_withdrawals(slot: u64, withdrawals: Vec<Withdrawal>) -> BeaconBlockView {
    BeaconBlockView {
        slot,
        proposer_index: 3,
        parent_root: B256::repeat_byte(0x1a),
        state_root: B256::repeat_byte(0x1b),
        body_field_roots: filler_roots(ELECTRA_BODY_FIELDS, 0x2c),
        execution_payload: Some(ExecutionPayloadView {
            block_number: 1_000 + slot,
            timestamp: 1_606_824_023 + slot * 12,
            field_roots: filler_roots(DENEB_PAYLOAD_FIELDS, 0x3d),
            withdrawals,
        }),
    }
}

pub fn empty_block(slot: u64) -> BeaconBlockView {
    block_with_withdrawals(slot, vec![])
}

/// Make `state.block_roots` remember `block`.
pub fn record_block_root(state: &mut BeaconStateView, block: &BeaconBlockView) {
    let position = (block.slot % SLOTS_PER_HISTORICAL_ROOT) as usize;
    state.block_roots[position] = block
        .block_root()
        .unwrap_or_else(|e| panic!("synthetic block has no root: {}", e));
}
