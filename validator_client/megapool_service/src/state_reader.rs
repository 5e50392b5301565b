//! Read side of the megapool contract. Every read goes to the chain; nothing is cached.

use crate::contract_service::MegapoolContracts;
use alloy_primitives::{Address, B256, U256};
use beacon_proofs::BlsPublicKey;
use futures::stream::{self, StreamExt, TryStreamExt};
use megapool_utils::MegapoolError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-slot validator record as stored by the megapool contract.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorInfo {
    pub validator_id: u32,
    pub pubkey: BlsPublicKey,
    pub last_assignment_time: u32,
    pub last_requested_value: u32,
    pub last_requested_bond: u32,
    pub deposit_value: u32,
    pub staked: bool,
    pub exited: bool,
    pub in_queue: bool,
    pub in_prestake: bool,
    pub express_used: bool,
    pub dissolved: bool,
    pub exiting: bool,
    pub locked: bool,
    pub exit_balance: u64,
    pub locked_time: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidatorState {
    Queued,
    InPrestake,
    Staking,
    Exiting,
    Withdrawable,
    Dissolved,
    Dequeued,
}

impl ValidatorInfo {
    /// Collapse the contract's flags into a single lifecycle state. `staked` stays set while a
    /// validator exits, so it only counts when nothing later applies.
    pub fn state(&self) -> Result<ValidatorState, MegapoolError> {
        let stages = [
            self.in_queue,
            self.in_prestake,
            self.staked || self.exiting || self.exited,
            self.dissolved,
        ];
        if stages.iter().filter(|set| **set).count() > 1 {
            return Err(MegapoolError::InconsistentValidatorState {
                validator_id: self.validator_id,
            });
        }
        Ok(if self.dissolved {
            ValidatorState::Dissolved
        } else if self.in_queue {
            ValidatorState::Queued
        } else if self.in_prestake {
            ValidatorState::InPrestake
        } else if self.exited {
            ValidatorState::Withdrawable
        } else if self.exiting {
            ValidatorState::Exiting
        } else if self.staked {
            ValidatorState::Staking
        } else {
            ValidatorState::Dequeued
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardSplit {
    pub node_rewards: U256,
    pub voter_rewards: U256,
    pub protocol_dao_rewards: U256,
    pub reth_rewards: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateInfo {
    pub delegate: Address,
    pub effective_delegate: Address,
    pub latest_delegate: Address,
    pub delegate_expired: bool,
    pub use_latest_delegate: bool,
}

/// Contract-level aggregates. Fields past `deployed` are zero when not deployed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MegapoolSnapshot {
    pub node: Address,
    pub address: Address,
    pub node_registered: bool,
    pub deployed: bool,
    pub validator_count: u32,
    pub active_validator_count: u32,
    pub node_bond: U256,
    pub bond_requirement: U256,
    pub user_capital: U256,
    pub debt: U256,
    pub refund_value: U256,
    pub last_distribution_block: u64,
}

fn transport<T>(result: Result<T, String>) -> Result<T, MegapoolError> {
    result.map_err(MegapoolError::Transport)
}

pub struct StateReader {
    contracts: Arc<dyn MegapoolContracts>,
    max_concurrent_reads: usize,
}

impl StateReader {
    pub fn new(contracts: Arc<dyn MegapoolContracts>, max_concurrent_reads: usize) -> Self {
        Self {
            contracts,
            max_concurrent_reads: max_concurrent_reads.max(1),
        }
    }

    pub fn contracts(&self) -> &Arc<dyn MegapoolContracts> {
        &self.contracts
    }

    pub fn max_concurrent_reads(&self) -> usize {
        self.max_concurrent_reads
    }

    pub async fn megapool(&self, node: Address) -> Result<MegapoolSnapshot, MegapoolError> {
        let c = &self.contracts;
        let (address, deployed, node_registered) = futures::try_join!(
            async { transport(c.megapool_address(node).await) },
            async { transport(c.megapool_deployed(node).await) },
            async { transport(c.node_exists(node).await) },
        )?;
        let mut snapshot = MegapoolSnapshot {
            node,
            address,
            node_registered,
            deployed,
            ..Default::default()
        };
        if !deployed {
            return Ok(snapshot);
        }

        let (
            validator_count,
            active_validator_count,
            node_bond,
            user_capital,
            debt,
            refund_value,
            last_distribution_block,
            schedule,
        ) = futures::try_join!(
            async { transport(c.validator_count(address).await) },
            async { transport(c.active_validator_count(address).await) },
            async { transport(c.node_bond(address).await) },
            async { transport(c.user_capital(address).await) },
            async { transport(c.debt(address).await) },
            async { transport(c.refund_value(address).await) },
            async { transport(c.last_distribution_block(address).await) },
            async { transport(c.bond_schedule().await) },
        )?;
        snapshot.validator_count = validator_count;
        snapshot.active_validator_count = active_validator_count;
        snapshot.node_bond = node_bond;
        snapshot.bond_requirement = schedule.requirement(active_validator_count);
        snapshot.user_capital = user_capital;
        snapshot.debt = debt;
        snapshot.refund_value = refund_value;
        snapshot.last_distribution_block = last_distribution_block;
        Ok(snapshot)
    }

    /// The node's megapool address, if it has been deployed.
    pub async fn deployed_megapool(&self, node: Address) -> Result<Option<Address>, MegapoolError> {
        let c = &self.contracts;
        let (address, deployed) = futures::try_join!(
            async { transport(c.megapool_address(node).await) },
            async { transport(c.megapool_deployed(node).await) },
        )?;
        Ok(deployed.then_some(address))
    }

    pub async fn validator_count(&self, megapool: Address) -> Result<u32, MegapoolError> {
        transport(self.contracts.validator_count(megapool).await)
    }

    pub async fn validator(
        &self,
        megapool: Address,
        validator_id: u32,
    ) -> Result<ValidatorInfo, MegapoolError> {
        transport(self.contracts.validator_info(megapool, validator_id).await)
    }

    /// All validators of the megapool, read with bounded concurrency. The first failure wins.
    pub async fn validators(
        &self,
        megapool: Address,
        count: u32,
    ) -> Result<Vec<ValidatorInfo>, MegapoolError> {
        let mut validators = stream::iter(0..count)
            .map(|id| self.validator(megapool, id))
            .buffer_unordered(self.max_concurrent_reads)
            .try_collect::<Vec<_>>()
            .await?;
        validators.sort_by_key(|v| v.validator_id);
        Ok(validators)
    }

    pub async fn expected_withdrawal_credentials(
        &self,
        megapool: Address,
    ) -> Result<B256, MegapoolError> {
        transport(self.contracts.withdrawal_credentials(megapool).await)
    }

    pub async fn delegate_info(&self, megapool: Address) -> Result<DelegateInfo, MegapoolError> {
        transport(self.contracts.delegate_info(megapool).await)
    }

    pub async fn rewards(&self, megapool: Address) -> Result<(U256, RewardSplit), MegapoolError> {
        let c = &self.contracts;
        futures::try_join!(
            async { transport(c.pending_rewards(megapool).await) },
            async { transport(c.reward_split(megapool).await) },
        )
    }

    pub async fn calculate_rewards(
        &self,
        megapool: Address,
        amount: U256,
    ) -> Result<RewardSplit, MegapoolError> {
        transport(self.contracts.calculate_rewards(megapool, amount).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_follows_flags() {
        let mut info = ValidatorInfo {
            in_queue: true,
            ..Default::default()
        };
        assert_eq!(info.state(), Ok(ValidatorState::Queued));
        info.in_queue = false;
        assert_eq!(info.state(), Ok(ValidatorState::Dequeued));
        info.in_prestake = true;
        assert_eq!(info.state(), Ok(ValidatorState::InPrestake));
        info.in_prestake = false;
        info.staked = true;
        assert_eq!(info.state(), Ok(ValidatorState::Staking));
        info.exiting = true;
        assert_eq!(info.state(), Ok(ValidatorState::Exiting));
        info.exiting = false;
        info.exited = true;
        assert_eq!(info.state(), Ok(ValidatorState::Withdrawable));
    }

    #[test]
    fn contradictory_flags_are_rejected() {
        let info = ValidatorInfo {
            validator_id: 3,
            in_prestake: true,
            staked: true,
            ..Default::default()
        };
        assert_eq!(
            info.state(),
            Err(MegapoolError::InconsistentValidatorState { validator_id: 3 })
        );
        let dissolved_in_queue = ValidatorInfo {
            in_queue: true,
            dissolved: true,
            ..Default::default()
        };
        assert!(dissolved_in_queue.state().is_err());
    }
}
