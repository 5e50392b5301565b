//! In-memory chain that serves both layers and applies submitted calls.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolInterface;
use async_trait::async_trait;
use beacon_proofs::test_utils::{empty_block, pubkey, state_with_validators, validator};
use beacon_proofs::{BeaconBlockView, BeaconStateView, BlsPublicKey, ValidatorRecord};
use megapool_service::bond::BondSchedule;
use megapool_service::clients::{
    BeaconHead, BeaconValidatorStatus, BlockId, ConsensusClient, Eth2Config, ExecutionClient,
    NodeWallet, ValidatorStatus,
};
use megapool_service::config::Config;
use megapool_service::contract_service::{
    MegapoolContracts, ProtocolAddresses, RocketMegapoolDelegate::RocketMegapoolDelegateCalls,
    RocketMegapoolFactory::RocketMegapoolFactoryCalls,
    RocketMegapoolManager::RocketMegapoolManagerCalls,
};
use megapool_service::queue::{QueueEntry, QueueKind, QueuePage};
use megapool_service::state_reader::{DelegateInfo, RewardSplit, ValidatorInfo};
use megapool_service::transaction::{PreparedCall, UnsignedTransaction};
use megapool_service::MegapoolService;
use megapool_utils::{ether, megapool_withdrawal_credentials};
use parking_lot::Mutex;
use slog::{o, Drain, Logger};
use std::collections::HashMap;
use std::sync::Arc;

pub const FINALIZED_SLOT: u64 = 320;
pub const ESTIMATED_GAS: u64 = 100_000;

pub fn node() -> Address {
    Address::repeat_byte(0x11)
}

pub fn megapool() -> Address {
    Address::repeat_byte(0x22)
}

pub fn credentials() -> B256 {
    megapool_withdrawal_credentials(megapool())
}

pub fn test_logger() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

/// Megapool validator record in the given lifecycle position.
pub fn queued(id: u32) -> ValidatorInfo {
    ValidatorInfo {
        validator_id: id,
        pubkey: pubkey(id as u64),
        last_requested_value: 32_000,
        last_requested_bond: 4_000,
        in_queue: true,
        ..Default::default()
    }
}

pub fn prestaked(id: u32) -> ValidatorInfo {
    ValidatorInfo {
        in_queue: false,
        in_prestake: true,
        deposit_value: 1_000,
        ..queued(id)
    }
}

pub fn staking(id: u32) -> ValidatorInfo {
    ValidatorInfo {
        in_prestake: false,
        staked: true,
        ..prestaked(id)
    }
}

pub fn exiting(id: u32) -> ValidatorInfo {
    ValidatorInfo {
        exiting: true,
        ..staking(id)
    }
}

/// Beacon record for megapool validator `id` with the given withdrawal credentials.
pub fn beacon_record(id: u32, withdrawal_credentials: B256) -> ValidatorRecord {
    ValidatorRecord {
        withdrawal_credentials,
        ..validator(id as u64)
    }
}

/// A validator that belongs to someone else, so megapool validators never sit at index 0.
pub fn stranger() -> ValidatorRecord {
    validator(1_000)
}

fn decode<C: SolInterface>(data: &[u8]) -> Result<C, String> {
    C::abi_decode(data, true).map_err(|e| e.to_string())
}

pub struct ChainState {
    pub node_registered: bool,
    pub deployed: bool,
    pub validators: Vec<ValidatorInfo>,
    pub node_bond: U256,
    pub user_capital: U256,
    pub debt: U256,
    pub refund_value: U256,
    pub assigned_value: U256,
    pub last_distribution_block: u64,
    pub schedule: BondSchedule,
    pub express_tickets: u32,
    pub express_queue: Vec<QueueEntry>,
    pub standard_queue: Vec<QueueEntry>,
    pub queue_index: u64,
    pub express_queue_rate: u64,
    pub delegate: DelegateInfo,
    pub withdrawal_credentials: B256,
    pub node_balance: U256,
    pub execution_chain_id: u64,
    pub estimate_error: Option<String>,
    pub block_timestamp: u64,
    pub dissolve_period: u64,
    pub eth2: Eth2Config,
    pub finalized_slot: u64,
    /// Slot of the state the beacon node answers validator lookups from.
    pub head_slot: u64,
    pub states: HashMap<u64, BeaconStateView>,
    pub blocks: HashMap<u64, BeaconBlockView>,
    pub sent: Vec<UnsignedTransaction>,
    pub exits: Vec<(u64, u64)>,
    pub block_number: u64,
}

impl ChainState {
    fn active_validator_count(&self) -> u32 {
        self.validators
            .iter()
            .filter(|v| !v.dissolved && !v.exited && (v.in_queue || v.in_prestake || v.staked))
            .count() as u32
    }

    fn head_state(&self) -> Result<&BeaconStateView, String> {
        self.states
            .get(&self.head_slot)
            .ok_or_else(|| format!("no state at {}", self.head_slot))
    }

    fn validator_mut(&mut self, id: u32) -> Result<&mut ValidatorInfo, String> {
        self.validators
            .get_mut(id as usize)
            .ok_or_else(|| format!("execution reverted: no validator {}", id))
    }

    fn apply(
        &mut self,
        tx: &UnsignedTransaction,
        addresses: &ProtocolAddresses,
    ) -> Result<(), String> {
        self.block_number += 1;
        if tx.to == addresses.megapool_factory {
            match decode::<RocketMegapoolFactoryCalls>(&tx.data)? {
                RocketMegapoolFactoryCalls::deployContract(_) if !self.deployed => {
                    self.deployed = true
                }
                _ => return Err("execution reverted: factory".to_string()),
            }
        } else if tx.to == addresses.megapool_manager {
            match decode::<RocketMegapoolManagerCalls>(&tx.data)? {
                RocketMegapoolManagerCalls::stake(call) => {
                    let v = self.validator_mut(call.validatorId)?;
                    v.in_prestake = false;
                    v.staked = true;
                    if self.last_distribution_block == 0 {
                        self.last_distribution_block = self.block_number;
                    }
                }
                RocketMegapoolManagerCalls::dissolve(call) => {
                    let v = self.validator_mut(call.validatorId)?;
                    v.in_prestake = false;
                    v.dissolved = true;
                }
                RocketMegapoolManagerCalls::notifyExit(call) => {
                    self.validator_mut(call.validatorId)?.exiting = true;
                }
                RocketMegapoolManagerCalls::notifyFinalBalance(call) => {
                    let v = self.validator_mut(call.validatorId)?;
                    v.exiting = false;
                    v.exited = true;
                    v.exit_balance = call.withdrawal.amountInGwei;
                }
            }
        } else if tx.to == megapool() {
            match decode::<RocketMegapoolDelegateCalls>(&tx.data)? {
                RocketMegapoolDelegateCalls::dissolveValidator(call) => {
                    let v = self.validator_mut(call.validatorId)?;
                    v.in_prestake = false;
                    v.dissolved = true;
                }
                RocketMegapoolDelegateCalls::dequeue(call) => {
                    self.validator_mut(call.validatorId)?.in_queue = false;
                    self.standard_queue.retain(|e| e.validator_id != call.validatorId);
                    self.express_queue.retain(|e| e.validator_id != call.validatorId);
                }
                RocketMegapoolDelegateCalls::repayDebt(_) => {
                    self.debt = self.debt.checked_sub(tx.value).ok_or("execution reverted: debt")?;
                }
                RocketMegapoolDelegateCalls::reduceBond(call) => {
                    self.node_bond = self
                        .node_bond
                        .checked_sub(call.amount)
                        .ok_or("execution reverted: bond")?;
                }
                RocketMegapoolDelegateCalls::claim(_) => self.refund_value = U256::ZERO,
                RocketMegapoolDelegateCalls::distribute(_) => {
                    self.last_distribution_block = self.block_number
                }
                RocketMegapoolDelegateCalls::setUseLatestDelegate(call) => {
                    self.delegate.use_latest_delegate = call.state
                }
                RocketMegapoolDelegateCalls::delegateUpgrade(_) => {
                    self.delegate.delegate = self.delegate.latest_delegate
                }
                _ => return Err("execution reverted: view call".to_string()),
            }
        } else {
            return Err(format!("execution reverted: unknown target {}", tx.to));
        }
        Ok(())
    }
}

pub struct MockChain {
    state: Mutex<ChainState>,
    addresses: ProtocolAddresses,
}

impl MockChain {
    /// A registered node without a megapool and a finalized beacon state holding only a
    /// stranger's validator.
    pub fn new() -> Arc<Self> {
        let config = Config::default();
        let deposit_contract = config.deposit_contract_address().unwrap();
        let latest_delegate = Address::repeat_byte(0xd2);
        let chain = MockChain {
            state: Mutex::new(ChainState {
                node_registered: true,
                deployed: false,
                validators: vec![],
                node_bond: U256::ZERO,
                user_capital: U256::ZERO,
                debt: U256::ZERO,
                refund_value: U256::ZERO,
                assigned_value: U256::ZERO,
                last_distribution_block: 0,
                schedule: BondSchedule::default(),
                express_tickets: 0,
                express_queue: vec![],
                standard_queue: vec![],
                queue_index: 0,
                express_queue_rate: 2,
                delegate: DelegateInfo {
                    delegate: Address::repeat_byte(0xd1),
                    effective_delegate: Address::repeat_byte(0xd1),
                    latest_delegate,
                    delegate_expired: false,
                    use_latest_delegate: false,
                },
                withdrawal_credentials: credentials(),
                node_balance: ether(10),
                execution_chain_id: config.chain_id,
                estimate_error: None,
                block_timestamp: 1_700_000_000,
                dissolve_period: 86_400,
                eth2: Eth2Config {
                    genesis_time: 1_606_824_023,
                    seconds_per_slot: 12,
                    slots_per_epoch: 32,
                    capella_fork_epoch: 0,
                    deposit_contract,
                    deposit_chain_id: config.chain_id,
                },
                finalized_slot: 0,
                head_slot: 0,
                states: HashMap::new(),
                blocks: HashMap::new(),
                sent: vec![],
                exits: vec![],
                block_number: 1_000,
            }),
            addresses: ProtocolAddresses {
                storage: Address::repeat_byte(0x01),
                node_manager: Address::repeat_byte(0x02),
                megapool_factory: Address::repeat_byte(0x03),
                megapool_manager: Address::repeat_byte(0x04),
                latest_delegate,
                settings_node: Address::repeat_byte(0x05),
                settings_deposit: Address::repeat_byte(0x06),
                settings_trusted_minipool: Address::repeat_byte(0x08),
                linked_list_storage: Address::repeat_byte(0x07),
            },
        };
        chain.finalize(FINALIZED_SLOT, vec![stranger()]);
        Arc::new(chain)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ChainState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn deployed(self: Arc<Self>) -> Arc<Self> {
        self.with(|s| s.deployed = true);
        self
    }

    pub fn add_validator(&self, info: ValidatorInfo) {
        self.with(|s| {
            assert_eq!(info.validator_id as usize, s.validators.len());
            s.validators.push(info)
        });
    }

    pub fn validator(&self, id: u32) -> ValidatorInfo {
        self.with(|s| s.validators[id as usize].clone())
    }

    /// Finalize a fresh state at `slot` whose registry is `validators`.
    pub fn finalize(&self, slot: u64, validators: Vec<ValidatorRecord>) {
        self.finalize_state(state_with_validators(slot, validators));
    }

    pub fn finalize_state(&self, state: BeaconStateView) {
        self.with(|s| {
            let slot = state.slot;
            s.blocks.insert(slot, empty_block(slot));
            s.states.insert(slot, state);
            s.finalized_slot = slot;
            s.head_slot = slot;
        });
    }

    /// Move head ahead of finality to a state whose registry is `validators`.
    pub fn advance_head(&self, slot: u64, validators: Vec<ValidatorRecord>) {
        self.with(|s| {
            s.states.insert(slot, state_with_validators(slot, validators));
            s.head_slot = slot;
        });
    }

    pub fn sent(&self) -> Vec<UnsignedTransaction> {
        self.with(|s| s.sent.clone())
    }

    /// Every megapool validator must be in exactly one lifecycle state.
    pub fn assert_consistent(&self) {
        for v in self.with(|s| s.validators.clone()) {
            assert!(v.state().is_ok(), "validator {} has contradictory flags", v.validator_id);
        }
    }

    pub fn service(self: &Arc<Self>) -> MegapoolService {
        let config = Config {
            withdrawal_proof_api: None,
            ..Config::default()
        };
        MegapoolService::new(
            &config,
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
            test_logger(),
        )
        .unwrap()
    }
}

#[async_trait]
impl MegapoolContracts for MockChain {
    fn addresses(&self) -> &ProtocolAddresses {
        &self.addresses
    }

    async fn node_exists(&self, _: Address) -> Result<bool, String> {
        Ok(self.with(|s| s.node_registered))
    }

    async fn express_ticket_count(&self, _: Address) -> Result<u32, String> {
        Ok(self.with(|s| s.express_tickets))
    }

    async fn megapool_address(&self, _: Address) -> Result<Address, String> {
        Ok(megapool())
    }

    async fn megapool_deployed(&self, _: Address) -> Result<bool, String> {
        Ok(self.with(|s| s.deployed))
    }

    async fn validator_count(&self, _: Address) -> Result<u32, String> {
        Ok(self.with(|s| s.validators.len() as u32))
    }

    async fn active_validator_count(&self, _: Address) -> Result<u32, String> {
        Ok(self.with(|s| s.active_validator_count()))
    }

    async fn validator_info(&self, _: Address, validator_id: u32) -> Result<ValidatorInfo, String> {
        self.with(|s| s.validators.get(validator_id as usize).cloned())
            .ok_or_else(|| format!("execution reverted: no validator {}", validator_id))
    }

    async fn node_bond(&self, _: Address) -> Result<U256, String> {
        Ok(self.with(|s| s.node_bond))
    }

    async fn user_capital(&self, _: Address) -> Result<U256, String> {
        Ok(self.with(|s| s.user_capital))
    }

    async fn debt(&self, _: Address) -> Result<U256, String> {
        Ok(self.with(|s| s.debt))
    }

    async fn refund_value(&self, _: Address) -> Result<U256, String> {
        Ok(self.with(|s| s.refund_value))
    }

    async fn assigned_value(&self, _: Address) -> Result<U256, String> {
        Ok(self.with(|s| s.assigned_value))
    }

    async fn last_distribution_block(&self, _: Address) -> Result<u64, String> {
        Ok(self.with(|s| s.last_distribution_block))
    }

    async fn pending_rewards(&self, _: Address) -> Result<U256, String> {
        Ok(ether(1))
    }

    async fn reward_split(&self, _: Address) -> Result<RewardSplit, String> {
        Ok(RewardSplit {
            node_rewards: ether(1),
            ..Default::default()
        })
    }

    /// Half to the node, a tenth each to voters and the protocol, the rest to rETH.
    async fn calculate_rewards(&self, _: Address, amount: U256) -> Result<RewardSplit, String> {
        let node_rewards = amount / U256::from(2);
        let voter_rewards = amount / U256::from(10);
        let protocol_dao_rewards = amount / U256::from(10);
        Ok(RewardSplit {
            node_rewards,
            voter_rewards,
            protocol_dao_rewards,
            reth_rewards: amount - node_rewards - voter_rewards - protocol_dao_rewards,
        })
    }

    async fn withdrawal_credentials(&self, _: Address) -> Result<B256, String> {
        Ok(self.with(|s| s.withdrawal_credentials))
    }

    async fn delegate_info(&self, _: Address) -> Result<DelegateInfo, String> {
        Ok(self.with(|s| s.delegate.clone()))
    }

    async fn bond_schedule(&self) -> Result<BondSchedule, String> {
        Ok(self.with(|s| s.schedule.clone()))
    }

    async fn express_queue_rate(&self) -> Result<u64, String> {
        Ok(self.with(|s| s.express_queue_rate))
    }

    async fn dissolve_period(&self) -> Result<u64, String> {
        Ok(self.with(|s| s.dissolve_period))
    }

    async fn queue_index(&self) -> Result<u64, String> {
        Ok(self.with(|s| s.queue_index))
    }

    async fn queue_length(&self, kind: QueueKind) -> Result<u64, String> {
        Ok(self.with(|s| match kind {
            QueueKind::Express => s.express_queue.len(),
            QueueKind::Standard => s.standard_queue.len(),
        }) as u64)
    }

    async fn scan_queue(
        &self,
        kind: QueueKind,
        start: u64,
        count: u64,
    ) -> Result<QueuePage, String> {
        Ok(self.with(|s| {
            let queue = match kind {
                QueueKind::Express => &s.express_queue,
                QueueKind::Standard => &s.standard_queue,
            };
            let start = (start as usize).min(queue.len());
            let end = (start + count as usize).min(queue.len());
            QueuePage {
                entries: queue[start..end].to_vec(),
                next_index: if end < queue.len() { end as u64 } else { 0 },
            }
        }))
    }
}

#[async_trait]
impl ExecutionClient for MockChain {
    async fn chain_id(&self) -> Result<u64, String> {
        Ok(self.with(|s| s.execution_chain_id))
    }

    async fn balance_at(&self, _: Address) -> Result<U256, String> {
        Ok(self.with(|s| s.node_balance))
    }

    async fn estimate_gas(&self, _: Address, _: &PreparedCall) -> Result<u64, String> {
        match self.with(|s| s.estimate_error.clone()) {
            Some(error) => Err(error),
            None => Ok(ESTIMATED_GAS),
        }
    }

    async fn nonce_at(&self, _: Address) -> Result<u64, String> {
        Ok(self.with(|s| s.sent.len() as u64))
    }

    async fn latest_block_timestamp(&self) -> Result<u64, String> {
        Ok(self.with(|s| s.block_timestamp))
    }

    async fn send_transaction(&self, signed: &Bytes) -> Result<B256, String> {
        let tx: UnsignedTransaction = serde_json::from_slice(signed).map_err(|e| e.to_string())?;
        self.with(|s| {
            s.apply(&tx, &self.addresses)?;
            s.sent.push(tx);
            Ok(keccak256(signed))
        })
    }
}

#[async_trait]
impl ConsensusClient for MockChain {
    async fn beacon_head(&self) -> Result<BeaconHead, String> {
        let finalized_epoch = self.with(|s| s.finalized_slot / s.eth2.slots_per_epoch);
        Ok(BeaconHead {
            epoch: finalized_epoch + 2,
            finalized_epoch,
            justified_epoch: finalized_epoch + 1,
        })
    }

    async fn beacon_block(&self, id: BlockId) -> Result<Option<BeaconBlockView>, String> {
        Ok(self.with(|s| {
            let slot = match id {
                BlockId::Head => s.head_slot,
                BlockId::Finalized => s.finalized_slot,
                BlockId::Slot(slot) => slot,
            };
            s.blocks.get(&slot).cloned()
        }))
    }

    async fn beacon_state(&self, slot: u64) -> Result<BeaconStateView, String> {
        self.with(|s| s.states.get(&slot).cloned())
            .ok_or_else(|| format!("state {} not available", slot))
    }

    async fn validator_status(
        &self,
        pubkey: &BlsPublicKey,
    ) -> Result<Option<ValidatorStatus>, String> {
        self.with(|s| {
            let state = s.head_state()?;
            Ok(state.validator_index(pubkey).and_then(|index| {
                state.validator(index).map(|record| ValidatorStatus {
                    index,
                    status: BeaconValidatorStatus::ActiveOngoing,
                    balance: record.effective_balance,
                    validator: record.clone(),
                })
            }))
        })
    }

    async fn eth2_config(&self) -> Result<Eth2Config, String> {
        Ok(self.with(|s| s.eth2.clone()))
    }

    async fn exit_validator(
        &self,
        validator_index: u64,
        epoch: u64,
        _: Bytes,
    ) -> Result<(), String> {
        self.with(|s| s.exits.push((validator_index, epoch)));
        Ok(())
    }
}

#[async_trait]
impl NodeWallet for MockChain {
    fn node_account(&self) -> Result<Address, String> {
        Ok(node())
    }

    /// The "signature" is the transaction itself, so the execution side can decode it.
    async fn sign_transaction(&self, tx: &UnsignedTransaction) -> Result<Bytes, String> {
        serde_json::to_vec(tx)
            .map(Bytes::from)
            .map_err(|e| e.to_string())
    }

    async fn sign_exit_message(
        &self,
        pubkey: &BlsPublicKey,
        _: u64,
        _: u64,
    ) -> Result<Bytes, String> {
        Ok(Bytes::copy_from_slice(pubkey.as_slice()))
    }
}
