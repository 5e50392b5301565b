//! Boundaries to the execution client, the consensus client and the node wallet.

use crate::transaction::{PreparedCall, UnsignedTransaction};
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use beacon_proofs::{BeaconBlockView, BeaconStateView, BlsPublicKey, ValidatorRecord};
use megapool_utils::SLOTS_PER_HISTORICAL_ROOT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconHead {
    pub epoch: u64,
    pub finalized_epoch: u64,
    pub justified_epoch: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eth2Config {
    pub genesis_time: u64,
    pub seconds_per_slot: u64,
    pub slots_per_epoch: u64,
    pub capella_fork_epoch: u64,
    pub deposit_contract: Address,
    pub deposit_chain_id: u64,
}

impl Eth2Config {
    pub fn epoch_start_slot(&self, epoch: u64) -> u64 {
        epoch.saturating_mul(self.slots_per_epoch)
    }

    pub fn slot_timestamp(&self, slot: u64) -> u64 {
        self.genesis_time.saturating_add(slot.saturating_mul(self.seconds_per_slot))
    }

    /// Index into `historical_summaries` of the period containing `slot`.
    pub fn historical_summary_index(&self, slot: u64) -> Option<u64> {
        let capella_period =
            self.epoch_start_slot(self.capella_fork_epoch) / SLOTS_PER_HISTORICAL_ROOT;
        (slot / SLOTS_PER_HISTORICAL_ROOT).checked_sub(capella_period)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockId {
    Head,
    Finalized,
    Slot(u64),
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Head => write!(f, "head"),
            BlockId::Finalized => write!(f, "finalized"),
            BlockId::Slot(slot) => write!(f, "{}", slot),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeaconValidatorStatus {
    PendingInitialized,
    PendingQueued,
    ActiveOngoing,
    ActiveExiting,
    ActiveSlashed,
    ExitedUnslashed,
    ExitedSlashed,
    WithdrawalPossible,
    WithdrawalDone,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorStatus {
    pub index: u64,
    pub status: BeaconValidatorStatus,
    pub balance: u64,
    pub validator: ValidatorRecord,
}

#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, String>;
    async fn balance_at(&self, address: Address) -> Result<U256, String>;
    async fn estimate_gas(&self, from: Address, call: &PreparedCall) -> Result<u64, String>;
    /// Pending nonce, so queued transactions are not replaced by accident.
    async fn nonce_at(&self, address: Address) -> Result<u64, String>;
    async fn latest_block_timestamp(&self) -> Result<u64, String>;
    async fn send_transaction(&self, signed: &Bytes) -> Result<B256, String>;
}

#[async_trait]
pub trait ConsensusClient: Send + Sync {
    async fn beacon_head(&self) -> Result<BeaconHead, String>;
    /// `None` when no block was proposed at the slot.
    async fn beacon_block(&self, id: BlockId) -> Result<Option<BeaconBlockView>, String>;
    async fn beacon_state(&self, slot: u64) -> Result<BeaconStateView, String>;
    async fn validator_status(
        &self,
        pubkey: &BlsPublicKey,
    ) -> Result<Option<ValidatorStatus>, String>;
    async fn eth2_config(&self) -> Result<Eth2Config, String>;
    async fn exit_validator(
        &self,
        validator_index: u64,
        epoch: u64,
        signature: Bytes,
    ) -> Result<(), String>;
}

#[async_trait]
pub trait NodeWallet: Send + Sync {
    fn node_account(&self) -> Result<Address, String>;
    async fn sign_transaction(&self, tx: &UnsignedTransaction) -> Result<Bytes, String>;
    async fn sign_exit_message(
        &self,
        pubkey: &BlsPublicKey,
        validator_index: u64,
        epoch: u64,
    ) -> Result<Bytes, String>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Primary,
    Fallback,
}

/// Which backends answered the last probe. Taken once per request and never mutated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientHealth {
    pub primary_ready: bool,
    pub fallback_ready: bool,
}

impl ClientHealth {
    pub fn all_ready() -> Self {
        ClientHealth {
            primary_ready: true,
            fallback_ready: true,
        }
    }

    pub fn order(&self, has_fallback: bool) -> Vec<Backend> {
        let mut order = Vec::with_capacity(2);
        if self.primary_ready {
            order.push(Backend::Primary);
        }
        if has_fallback && self.fallback_ready {
            order.push(Backend::Fallback);
        }
        order
    }
}

pub fn is_disconnect(error: &str) -> bool {
    let error = error.to_lowercase();
    [
        "connection refused",
        "connection reset",
        "connection closed",
        "broken pipe",
        "timed out",
        "dns error",
        "unexpected eof",
    ]
    .iter()
    .any(|pattern| error.contains(pattern))
}

/// Run `call` on the first ready backend, retrying once on the other one if the first
/// failed by disconnecting. Other failures are returned as is.
pub async fn with_fallback<'a, C, T, F, Fut>(
    health: ClientHealth,
    primary: &'a C,
    fallback: Option<&'a C>,
    call: F,
) -> Result<T, String>
where
    C: ?Sized,
    F: Fn(&'a C) -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut last_error = None;
    for backend in health.order(fallback.is_some()) {
        let client = match (backend, fallback) {
            (Backend::Primary, _) => primary,
            (Backend::Fallback, Some(client)) => client,
            (Backend::Fallback, None) => continue,
        };
        match call(client).await {
            Ok(value) => return Ok(value),
            Err(e) if is_disconnect(&e) => {
                last_error = Some(format!("{:?} client disconnected: {}", backend, e));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or_else(|| "no execution client is ready".to_string()))
}

/// An execution client that fails over from a primary to an optional fallback backend.
pub struct DualExecutionClient<C> {
    primary: C,
    fallback: Option<C>,
    health: ClientHealth,
}

impl<C: ExecutionClient> DualExecutionClient<C> {
    pub fn new(primary: C, fallback: Option<C>, health: ClientHealth) -> Self {
        Self {
            primary,
            fallback,
            health,
        }
    }

    /// Probe both backends once and pin the result for the lifetime of the client.
    pub async fn connect(primary: C, fallback: Option<C>) -> Self {
        let primary_ready = primary.chain_id().await.is_ok();
        let fallback_ready = match &fallback {
            Some(client) => client.chain_id().await.is_ok(),
            None => false,
        };
        Self::new(
            primary,
            fallback,
            ClientHealth {
                primary_ready,
                fallback_ready,
            },
        )
    }

    pub fn health(&self) -> ClientHealth {
        self.health
    }
}

#[async_trait]
impl<C: ExecutionClient> ExecutionClient for DualExecutionClient<C> {
    async fn chain_id(&self) -> Result<u64, String> {
        with_fallback(self.health, &self.primary, self.fallback.as_ref(), |c| c.chain_id()).await
    }

    async fn balance_at(&self, address: Address) -> Result<U256, String> {
        with_fallback(self.health, &self.primary, self.fallback.as_ref(), |c| {
            c.balance_at(address)
        })
        .await
    }

    async fn estimate_gas(&self, from: Address, call: &PreparedCall) -> Result<u64, String> {
        with_fallback(self.health, &self.primary, self.fallback.as_ref(), |c| {
            c.estimate_gas(from, call)
        })
        .await
    }

    async fn nonce_at(&self, address: Address) -> Result<u64, String> {
        with_fallback(self.health, &self.primary, self.fallback.as_ref(), |c| {
            c.nonce_at(address)
        })
        .await
    }

    async fn latest_block_timestamp(&self) -> Result<u64, String> {
        with_fallback(self.health, &self.primary, self.fallback.as_ref(), |c| {
            c.latest_block_timestamp()
        })
        .await
    }

    async fn send_transaction(&self, signed: &Bytes) -> Result<B256, String> {
        with_fallback(self.health, &self.primary, self.fallback.as_ref(), |c| {
            c.send_transaction(signed)
        })
        .await
    }
}
