//! Builds beacon chain evidence for the megapool manager, always from finalized state.

use crate::clients::{BlockId, ConsensusClient, Eth2Config};
use crate::proof_api::WithdrawalProofApi;
use alloy_primitives::{Address, B256};
use beacon_proofs::{
    build_historical_withdrawal_proof, build_recent_withdrawal_proof, build_slot_proof,
    build_validator_proof, needs_historical_proof, BeaconBlockView, BeaconStateView, BlsPublicKey,
    SlotProof, ValidatorProof, WithdrawalProof,
};
use megapool_utils::{
    MegapoolError, MAX_MISSING_SLOTS, MAX_WITHDRAWAL_SLOT_DISTANCE, SLOTS_PER_HISTORICAL_ROOT,
};
use slog::{debug, info, warn, Logger};
use std::sync::Arc;

/// Fail if the consensus client serves a different network than the execution side.
pub fn ensure_same_chain(
    execution_chain_id: u64,
    deposit_contract: Address,
    eth2: &Eth2Config,
) -> Result<(), MegapoolError> {
    if execution_chain_id != eth2.deposit_chain_id {
        return Err(MegapoolError::ChainMismatch(format!(
            "execution chain {} but consensus deposit chain {}",
            execution_chain_id, eth2.deposit_chain_id
        )));
    }
    if deposit_contract != eth2.deposit_contract {
        return Err(MegapoolError::ChainMismatch(format!(
            "deposit contract {} but consensus client uses {}",
            deposit_contract, eth2.deposit_contract
        )));
    }
    Ok(())
}

/// A withdrawal located in a finalized block.
#[derive(Clone, Debug, PartialEq)]
pub struct FoundWithdrawal {
    pub block: BeaconBlockView,
    pub withdrawal_num: usize,
}

pub struct ProofService {
    consensus: Arc<dyn ConsensusClient>,
    api: Option<WithdrawalProofApi>,
    finalized_block_attempts: u64,
    log: Logger,
}

fn transport<T>(result: Result<T, String>) -> Result<T, MegapoolError> {
    result.map_err(MegapoolError::Transport)
}

impl ProofService {
    pub fn new(
        consensus: Arc<dyn ConsensusClient>,
        api: Option<WithdrawalProofApi>,
        finalized_block_attempts: u64,
        log: Logger,
    ) -> Self {
        Self {
            consensus,
            api,
            finalized_block_attempts: finalized_block_attempts.max(1),
            log,
        }
    }

    pub async fn eth2_config(&self) -> Result<Eth2Config, MegapoolError> {
        transport(self.consensus.eth2_config().await)
    }

    /// The latest finalized block that carries an execution payload, walking back over
    /// empty slots.
    pub async fn finalized_block(&self) -> Result<BeaconBlockView, MegapoolError> {
        let mut id = BlockId::Finalized;
        for _ in 0..self.finalized_block_attempts {
            let block = transport(self.consensus.beacon_block(id).await)?;
            match block {
                Some(block) if block.has_execution_payload() => return Ok(block),
                Some(block) => id = BlockId::Slot(block.slot.saturating_sub(1)),
                None => match id {
                    BlockId::Slot(slot) => id = BlockId::Slot(slot.saturating_sub(1)),
                    _ => break,
                },
            }
        }
        Err(MegapoolError::HistoryMissing(format!(
            "no finalized block with an execution payload after {} attempts",
            self.finalized_block_attempts
        )))
    }

    pub async fn finalized_slot(&self) -> Result<u64, MegapoolError> {
        Ok(self.finalized_block().await?.slot)
    }

    fn ensure_finalized(slot: u64, finalized: u64) -> Result<(), MegapoolError> {
        if slot > finalized {
            return Err(MegapoolError::SlotNotFinalized {
                requested: slot,
                finalized,
            });
        }
        Ok(())
    }

    /// Resolve `slot` (default: the finalized slot) and load its state.
    async fn finalized_state(&self, slot: Option<u64>) -> Result<BeaconStateView, MegapoolError> {
        let finalized = self.finalized_slot().await?;
        let slot = slot.unwrap_or(finalized);
        Self::ensure_finalized(slot, finalized)?;
        transport(self.consensus.beacon_state(slot).await)
    }

    pub async fn validator_proof(
        &self,
        pubkey: &BlsPublicKey,
        slot: Option<u64>,
    ) -> Result<ValidatorProof, MegapoolError> {
        // The consensus client may know the validator from head state before it is finalized.
        let state = self.finalized_state(slot).await?;
        let validator_index = state
            .validator_index(pubkey)
            .ok_or_else(|| MegapoolError::IndexNotFound(pubkey.to_string()))?;
        let proof = build_validator_proof(&state, validator_index)
            .map_err(MegapoolError::ProofConstructionFailed)?;
        if proof.pubkey() != pubkey {
            return Err(MegapoolError::ProofConstructionFailed(format!(
                "validator {} in state {} has pubkey {}",
                validator_index,
                state.slot,
                proof.pubkey()
            )));
        }
        let block_root = state
            .block_root()
            .map_err(MegapoolError::ProofConstructionFailed)?;
        if !proof.verify(&block_root) {
            return Err(MegapoolError::ProofConstructionFailed(format!(
                "validator proof for {} does not verify at slot {}",
                validator_index, state.slot
            )));
        }
        debug!(
            self.log,
            "Built validator proof";
            "validator_index" => validator_index,
            "slot" => state.slot,
            "witnesses" => proof.witnesses.len(),
        );
        Ok(proof)
    }

    pub async fn slot_proof(&self, slot: Option<u64>) -> Result<SlotProof, MegapoolError> {
        let state = self.finalized_state(slot).await?;
        let proof = build_slot_proof(&state).map_err(MegapoolError::ProofConstructionFailed)?;
        let block_root = state
            .block_root()
            .map_err(MegapoolError::ProofConstructionFailed)?;
        if !proof.verify(&block_root) {
            return Err(MegapoolError::ProofConstructionFailed(format!(
                "slot proof does not verify at slot {}",
                state.slot
            )));
        }
        Ok(proof)
    }

    /// Timestamp of the first block after `slot`. The beacon roots contract stores a block root
    /// under the timestamp of its child, so this is the key the execution side verifies against.
    pub async fn slot_timestamp(&self, slot: u64) -> Result<u64, MegapoolError> {
        let first = slot.saturating_add(1);
        for child in first..=slot.saturating_add(MAX_MISSING_SLOTS) {
            let block = transport(self.consensus.beacon_block(BlockId::Slot(child)).await)?;
            if let Some(payload) = block.and_then(|block| block.execution_payload) {
                return Ok(payload.timestamp);
            }
        }
        Err(MegapoolError::HistoryMissing(format!(
            "no block within {} slots after {}",
            MAX_MISSING_SLOTS, slot
        )))
    }

    /// Fail with `StaleProof` if the validator record behind `proof` changed by the current
    /// finalized slot.
    pub async fn check_fresh(&self, proof: &ValidatorProof) -> Result<(), MegapoolError> {
        let current_slot = self.finalized_slot().await?;
        if current_slot == proof.slot {
            return Ok(());
        }
        let state = transport(self.consensus.beacon_state(current_slot).await)?;
        if state.validator(proof.validator_index) != Some(&proof.validator) {
            warn!(
                self.log,
                "Validator record changed since proof was built";
                "validator_index" => proof.validator_index,
                "proof_slot" => proof.slot,
                "current_slot" => current_slot,
            );
            return Err(MegapoolError::StaleProof {
                proof_slot: proof.slot,
                current_slot,
            });
        }
        Ok(())
    }

    /// Scan forward from `from_slot` for the first block that paid `validator_index`.
    pub async fn find_withdrawal(
        &self,
        validator_index: u64,
        from_slot: u64,
        finalized_slot: u64,
    ) -> Result<FoundWithdrawal, MegapoolError> {
        Self::ensure_finalized(from_slot, finalized_slot)?;
        let last = finalized_slot.min(from_slot.saturating_add(MAX_WITHDRAWAL_SLOT_DISTANCE));
        let mut missing = 0;
        for slot in from_slot..=last {
            let block = match transport(self.consensus.beacon_block(BlockId::Slot(slot)).await)? {
                Some(block) => block,
                None => {
                    missing += 1;
                    if missing >= MAX_MISSING_SLOTS {
                        return Err(MegapoolError::HistoryMissing(format!(
                            "{} consecutive slots missing before {}",
                            MAX_MISSING_SLOTS, slot
                        )));
                    }
                    continue;
                }
            };
            missing = 0;
            if let Some(withdrawal_num) = block.withdrawal_position(validator_index) {
                return Ok(FoundWithdrawal {
                    block,
                    withdrawal_num,
                });
            }
        }
        Err(MegapoolError::HistoryMissing(format!(
            "no withdrawal for validator {} between slots {} and {}",
            validator_index, from_slot, last
        )))
    }

    async fn build_withdrawal_locally(
        &self,
        eth2: &Eth2Config,
        state: &BeaconStateView,
        found: &FoundWithdrawal,
    ) -> Result<WithdrawalProof, MegapoolError> {
        let withdrawal_slot = found.block.slot;
        if !needs_historical_proof(withdrawal_slot, state.slot) {
            return build_recent_withdrawal_proof(state, &found.block, found.withdrawal_num)
                .map_err(MegapoolError::ProofConstructionFailed);
        }
        let summary_index = eth2.historical_summary_index(withdrawal_slot).ok_or_else(|| {
            MegapoolError::ProofConstructionFailed(format!(
                "slot {} predates historical summaries",
                withdrawal_slot
            ))
        })?;
        let roots_slot =
            SLOTS_PER_HISTORICAL_ROOT * (withdrawal_slot / SLOTS_PER_HISTORICAL_ROOT + 1);
        let roots_state = transport(self.consensus.beacon_state(roots_slot).await)?;
        build_historical_withdrawal_proof(
            state,
            &roots_state,
            &found.block,
            found.withdrawal_num,
            summary_index,
        )
        .map_err(MegapoolError::ProofConstructionFailed)
    }

    /// Proof of the first withdrawal for `validator_index` at or after `from_slot`, anchored at
    /// the current finalized block.
    pub async fn withdrawal_proof(
        &self,
        validator_index: u64,
        from_slot: u64,
    ) -> Result<WithdrawalProof, MegapoolError> {
        let eth2 = self.eth2_config().await?;
        let finalized_slot = self.finalized_slot().await?;
        let found = self
            .find_withdrawal(validator_index, from_slot, finalized_slot)
            .await?;
        let withdrawal_slot = found.block.slot;
        let state = transport(self.consensus.beacon_state(finalized_slot).await)?;
        let block_root = state
            .block_root()
            .map_err(MegapoolError::ProofConstructionFailed)?;
        let summary_index = if needs_historical_proof(withdrawal_slot, finalized_slot) {
            eth2.historical_summary_index(withdrawal_slot)
        } else {
            None
        };

        let proof = match self.build_withdrawal_locally(&eth2, &state, &found).await {
            Ok(proof) => proof,
            Err(e) => match &self.api {
                Some(api) => {
                    warn!(
                        self.log,
                        "Local withdrawal proof failed, asking proof api";
                        "error" => %e,
                        "withdrawal_slot" => withdrawal_slot,
                    );
                    api.fetch(finalized_slot, withdrawal_slot, validator_index).await?
                }
                None => return Err(e),
            },
        };

        if proof.slot != finalized_slot
            || proof.withdrawal_slot != withdrawal_slot
            || proof.withdrawal.validator_index != validator_index
            || !proof.verify(&block_root, summary_index)
        {
            return Err(MegapoolError::ProofConstructionFailed(format!(
                "withdrawal proof for validator {} at slot {} does not verify",
                validator_index, withdrawal_slot
            )));
        }
        info!(
            self.log,
            "Built withdrawal proof";
            "validator_index" => validator_index,
            "withdrawal_slot" => withdrawal_slot,
            "proof_slot" => finalized_slot,
            "amount_gwei" => proof.withdrawal.amount_in_gwei,
        );
        Ok(proof)
    }

    /// Block root that anchors proofs built at `slot`.
    pub async fn block_root(&self, slot: u64) -> Result<B256, MegapoolError> {
        let state = transport(self.consensus.beacon_state(slot).await)?;
        state
            .block_root()
            .map_err(MegapoolError::ProofConstructionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth2() -> Eth2Config {
        Eth2Config {
            genesis_time: 1_606_824_023,
            seconds_per_slot: 12,
            slots_per_epoch: 32,
            capella_fork_epoch: 194_048,
            deposit_contract: Address::repeat_byte(0xdc),
            deposit_chain_id: 1,
        }
    }

    #[test]
    fn same_chain_passes() {
        assert_eq!(ensure_same_chain(1, Address::repeat_byte(0xdc), &eth2()), Ok(()));
    }

    #[test]
    fn chain_id_mismatch_is_fatal() {
        let err = ensure_same_chain(17000, Address::repeat_byte(0xdc), &eth2()).unwrap_err();
        assert!(matches!(err, MegapoolError::ChainMismatch(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn deposit_contract_mismatch_is_fatal() {
        let err = ensure_same_chain(1, Address::repeat_byte(0x01), &eth2()).unwrap_err();
        assert!(matches!(err, MegapoolError::ChainMismatch(_)));
    }

    #[test]
    fn unfinalized_slot_is_rejected() {
        assert_eq!(
            ProofService::ensure_finalized(101, 100),
            Err(MegapoolError::SlotNotFinalized {
                requested: 101,
                finalized: 100
            })
        );
        assert_eq!(ProofService::ensure_finalized(100, 100), Ok(()));
    }
}
