//! Read-only views of a node's megapool for status displays.

use crate::bond::collateral_ratio;
use crate::clients::{ConsensusClient, ValidatorStatus};
use crate::queue::{QueueCoordinator, QueueDetails};
use crate::state_reader::{
    DelegateInfo, MegapoolSnapshot, RewardSplit, StateReader, ValidatorInfo, ValidatorState,
};
use alloy_primitives::{Address, U256};
use futures::stream::{self, StreamExt, TryStreamExt};
use megapool_utils::{gwei_to_wei, MegapoolError};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorDetails {
    #[serde(flatten)]
    pub info: ValidatorInfo,
    pub state: ValidatorState,
    /// `None` until the beacon chain has seen the deposit.
    pub beacon: Option<ValidatorStatus>,
    /// 1-based, only while queued.
    pub queue_position: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MegapoolDetails {
    #[serde(flatten)]
    pub megapool: MegapoolSnapshot,
    pub express_ticket_count: u32,
    pub delegate: DelegateInfo,
    pub pending_rewards: U256,
    pub reward_split: RewardSplit,
    pub assigned_value: U256,
    pub exiting_validator_count: u32,
    pub collateral_ratio: f64,
    pub queue: QueueDetails,
    pub validators: Vec<ValidatorDetails>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MegapoolBalances {
    pub beacon_balance: U256,
    pub effective_balance: U256,
}

async fn validator_details(
    queue: &QueueCoordinator,
    consensus: &dyn ConsensusClient,
    megapool: Address,
    info: ValidatorInfo,
    queue_details: &QueueDetails,
) -> Result<ValidatorDetails, MegapoolError> {
    let state = info.state()?;
    let beacon = match state {
        ValidatorState::Queued | ValidatorState::Dequeued => None,
        _ => consensus
            .validator_status(&info.pubkey)
            .await
            .map_err(MegapoolError::Transport)?,
    };
    let queue_position = queue.position(megapool, &info, queue_details).await?;
    Ok(ValidatorDetails {
        info,
        state,
        beacon,
        queue_position,
    })
}

/// Everything known about the node's megapool. All reads form one fail-fast group.
pub async fn megapool_details(
    reader: &StateReader,
    queue: &QueueCoordinator,
    consensus: &dyn ConsensusClient,
    node: Address,
) -> Result<MegapoolDetails, MegapoolError> {
    let contracts = reader.contracts();
    let (megapool, express_ticket_count) = futures::try_join!(
        reader.megapool(node),
        async {
            contracts
                .express_ticket_count(node)
                .await
                .map_err(MegapoolError::Transport)
        },
    )?;
    if !megapool.deployed {
        return Ok(MegapoolDetails {
            megapool,
            express_ticket_count,
            ..Default::default()
        });
    }

    let address = megapool.address;
    let (delegate, (pending_rewards, reward_split), assigned_value, queue_details, infos) =
        futures::try_join!(
            reader.delegate_info(address),
            reader.rewards(address),
            async {
                contracts
                    .assigned_value(address)
                    .await
                    .map_err(MegapoolError::Transport)
            },
            queue.details(),
            reader.validators(address, megapool.validator_count),
        )?;

    let validators = stream::iter(infos)
        .map(|info| validator_details(queue, consensus, address, info, &queue_details))
        .buffered(reader.max_concurrent_reads())
        .try_collect::<Vec<_>>()
        .await?;
    let exiting_validator_count = validators
        .iter()
        .filter(|v| v.state == ValidatorState::Exiting)
        .count() as u32;

    Ok(MegapoolDetails {
        collateral_ratio: collateral_ratio(megapool.node_bond, megapool.user_capital),
        megapool,
        express_ticket_count,
        delegate,
        pending_rewards,
        reward_split,
        assigned_value,
        exiting_validator_count,
        queue: queue_details,
        validators,
    })
}

/// How `amount` would be split if distributed now. All zero while the megapool is not deployed
/// or its delegate has expired.
pub async fn calculate_rewards(
    reader: &StateReader,
    node: Address,
    amount: U256,
) -> Result<RewardSplit, MegapoolError> {
    let megapool = match reader.deployed_megapool(node).await? {
        Some(megapool) => megapool,
        None => return Ok(RewardSplit::default()),
    };
    if reader.delegate_info(megapool).await?.delegate_expired {
        return Ok(RewardSplit::default());
    }
    reader.calculate_rewards(megapool, amount).await
}

pub fn validator_map(validators: &[ValidatorDetails]) -> BTreeMap<ValidatorState, Vec<u32>> {
    let mut map: BTreeMap<ValidatorState, Vec<u32>> = BTreeMap::new();
    for validator in validators {
        map.entry(validator.state)
            .or_default()
            .push(validator.info.validator_id);
    }
    map
}

/// Beacon balances of validators that are still on the beacon chain, in wei.
pub fn balances(validators: &[ValidatorDetails]) -> MegapoolBalances {
    validators
        .iter()
        .filter(|v| matches!(v.state, ValidatorState::Staking | ValidatorState::Exiting))
        .filter_map(|v| v.beacon.as_ref())
        .fold(MegapoolBalances::default(), |mut total, status| {
            total.beacon_balance += gwei_to_wei(status.balance);
            total.effective_balance += gwei_to_wei(status.validator.effective_balance);
            total
        })
}
