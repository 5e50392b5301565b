//! The validator lifecycle. Every mutating operation comes as a pair: `can_*` evaluates the
//! preconditions against fresh chain state and prices the call, the plain method evaluates them
//! again and submits.

use crate::admission::*;
use crate::bond::{reduce_bond_denial, repay_debt_denial};
use crate::clients::{ConsensusClient, ExecutionClient, NodeWallet};
use crate::config::Config;
use crate::contract_service::*;
use crate::proof_api::WithdrawalProofApi;
use crate::proof_service::{ensure_same_chain, ProofService};
use crate::queue::{entry_queue, QueueCoordinator, QueueKind};
use crate::state_reader::{RewardSplit, StateReader, ValidatorInfo, ValidatorState};
use crate::status::{calculate_rewards, megapool_details, MegapoolDetails};
use crate::transaction::TransactionPreparer;
use alloy_primitives::{Address, B256, U256};
use beacon_proofs::{BlsPublicKey, ValidatorProof};
use megapool_utils::{megapool_withdrawal_credentials, MegapoolError, FAR_FUTURE_EPOCH};
use serde::Serialize;
use slog::{crit, info, o, warn, Logger};
use std::sync::Arc;

/// What it takes to add one more validator to the megapool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewValidatorDetails {
    pub megapool_deployed: bool,
    pub active_validator_count: u32,
    pub node_bond: U256,
    /// Total bond required once the new validator is added.
    pub bond_requirement: U256,
    /// Bond the node still has to send.
    pub bond_top_up: U256,
    pub express_ticket_count: u32,
    pub queue: QueueKind,
}

type ValidatorContext = (Address, ValidatorInfo, ValidatorState);

struct VoluntaryExit {
    pubkey: BlsPublicKey,
    validator_index: u64,
    epoch: u64,
}

/// `IndexNotFound` is an expected outcome while the deposit is still pending, so dry runs
/// report it as a denial.
fn index_not_found_as<D>(
    plan: Result<Plan<D>, MegapoolError>,
    denial: D,
) -> Result<Plan<D>, MegapoolError> {
    match plan {
        Err(MegapoolError::IndexNotFound(_)) => Ok(Plan::Denied(denial)),
        other => other,
    }
}

pub struct MegapoolService {
    reader: StateReader,
    queue: QueueCoordinator,
    proofs: ProofService,
    transactions: TransactionPreparer,
    execution: Arc<dyn ExecutionClient>,
    consensus: Arc<dyn ConsensusClient>,
    wallet: Arc<dyn NodeWallet>,
    chain_id: u64,
    deposit_contract: Address,
    log: Logger,
}

impl MegapoolService {
    pub fn new(
        config: &Config,
        contracts: Arc<dyn MegapoolContracts>,
        execution: Arc<dyn ExecutionClient>,
        consensus: Arc<dyn ConsensusClient>,
        wallet: Arc<dyn NodeWallet>,
        log: Logger,
    ) -> Result<Self, MegapoolError> {
        let api = config
            .withdrawal_proof_api
            .as_deref()
            .map(|url| WithdrawalProofApi::new(url, &config.network))
            .transpose()?;
        Ok(Self {
            reader: StateReader::new(contracts.clone(), config.max_concurrent_reads),
            queue: QueueCoordinator::new(contracts),
            proofs: ProofService::new(
                consensus.clone(),
                api,
                config.finalized_block_attempts,
                log.new(o!("service" => "proofs")),
            ),
            transactions: TransactionPreparer::new(
                execution.clone(),
                wallet.clone(),
                config.chain_id,
                config.gas_limit_multiplier,
                log.new(o!("service" => "transactions")),
            ),
            execution,
            consensus,
            wallet,
            chain_id: config.chain_id,
            deposit_contract: config.deposit_contract_address()?,
            log,
        })
    }

    pub fn reader(&self) -> &StateReader {
        &self.reader
    }

    pub fn queue(&self) -> &QueueCoordinator {
        &self.queue
    }

    pub fn proofs(&self) -> &ProofService {
        &self.proofs
    }

    fn addresses(&self) -> &ProtocolAddresses {
        self.reader.contracts().addresses()
    }

    pub fn node_account(&self) -> Result<Address, MegapoolError> {
        self.wallet.node_account().map_err(MegapoolError::Config)
    }

    /// Both clients must serve the configured network before any proof is built.
    pub async fn check_chain(&self) -> Result<(), MegapoolError> {
        let (chain_id, eth2) = futures::try_join!(
            async {
                self.execution
                    .chain_id()
                    .await
                    .map_err(MegapoolError::Transport)
            },
            self.proofs.eth2_config(),
        )?;
        let result = if chain_id != self.chain_id {
            Err(MegapoolError::ChainMismatch(format!(
                "configured chain {} but execution client is on {}",
                self.chain_id, chain_id
            )))
        } else {
            ensure_same_chain(chain_id, self.deposit_contract, &eth2)
        };
        if let Err(e) = &result {
            crit!(self.log, "Execution and consensus clients disagree"; "error" => %e);
        }
        result
    }

    pub async fn details(&self, node: Address) -> Result<MegapoolDetails, MegapoolError> {
        megapool_details(&self.reader, &self.queue, self.consensus.as_ref(), node).await
    }

    pub async fn calculate_rewards(
        &self,
        node: Address,
        amount: U256,
    ) -> Result<RewardSplit, MegapoolError> {
        calculate_rewards(&self.reader, node, amount).await
    }

    async fn check<D: PartialEq>(&self, plan: Plan<D>) -> Result<CanResponse<D>, MegapoolError> {
        let call = match plan {
            Plan::Ready(call) | Plan::Proven(call, _) => call,
            Plan::Denied(reason) => return Ok(CanResponse::denied(reason)),
        };
        let gas_info = self.transactions.estimate(self.node_account()?, &call).await?;
        Ok(CanResponse {
            verdict: Verdict::Admissible,
            gas_info: Some(gas_info),
        })
    }

    async fn execute<D>(
        &self,
        plan: Plan<D>,
        nonce_override: Option<u64>,
    ) -> Result<Execution<D>, MegapoolError> {
        let call = match plan {
            Plan::Ready(call) => call,
            Plan::Proven(call, proof) => {
                self.proofs.check_fresh(&proof).await?;
                call
            }
            Plan::Denied(reason) => return Ok(Execution::Denied(reason)),
        };
        let gas_info = self.transactions.estimate(self.node_account()?, &call).await?;
        let tx_hash = self
            .transactions
            .submit(&call, gas_info, nonce_override)
            .await?;
        Ok(Execution::Submitted(tx_hash))
    }

    /// The megapool address plus the validator's record. Denied when nothing is deployed or
    /// `validator_id` is past the megapool's validator count.
    async fn validator_context<D: ValidatorLookupDenial>(
        &self,
        node: Address,
        validator_id: u32,
    ) -> Result<Result<ValidatorContext, D>, MegapoolError> {
        let megapool = match self.reader.deployed_megapool(node).await? {
            Some(megapool) => megapool,
            None => return Ok(Err(D::not_deployed())),
        };
        if validator_id >= self.reader.validator_count(megapool).await? {
            return Ok(Err(D::unknown_validator()));
        }
        let info = self.reader.validator(megapool, validator_id).await?;
        let state = info.state()?;
        Ok(Ok((megapool, info, state)))
    }

    async fn expected_credentials(&self, megapool: Address) -> Result<B256, MegapoolError> {
        let expected = self.reader.expected_withdrawal_credentials(megapool).await?;
        let derived = megapool_withdrawal_credentials(megapool);
        if expected != derived {
            warn!(
                self.log,
                "Megapool reports unexpected withdrawal credentials";
                "megapool" => %megapool,
                "reported" => %expected,
                "derived" => %derived,
            );
        }
        Ok(expected)
    }

    /// A finalized proof for a validator that has left the queue. Caller supplied proofs are
    /// checked against the block root of their slot.
    async fn finalized_validator_proof(
        &self,
        info: &ValidatorInfo,
        proof: Option<ValidatorProof>,
    ) -> Result<ValidatorProof, MegapoolError> {
        self.check_chain().await?;
        let proof = match proof {
            None => return self.proofs.validator_proof(&info.pubkey, None).await,
            Some(proof) => proof,
        };
        if proof.pubkey() != &info.pubkey {
            return Err(MegapoolError::ProofConstructionFailed(format!(
                "proof is for {} but validator {} is {}",
                proof.pubkey(),
                info.validator_id,
                info.pubkey
            )));
        }
        let finalized = self.proofs.finalized_slot().await?;
        if proof.slot > finalized {
            return Err(MegapoolError::SlotNotFinalized {
                requested: proof.slot,
                finalized,
            });
        }
        let block_root = self.proofs.block_root(proof.slot).await?;
        if !proof.verify(&block_root) {
            return Err(MegapoolError::ProofConstructionFailed(format!(
                "proof for validator {} does not verify at slot {}",
                info.validator_id, proof.slot
            )));
        }
        Ok(proof)
    }

    // deploy

    async fn deploy_plan(&self, node: Address) -> Result<Plan<DeployDenial>, MegapoolError> {
        let snapshot = self.reader.megapool(node).await?;
        if !snapshot.node_registered {
            return Ok(Plan::Denied(DeployDenial::NotRegistered));
        }
        if snapshot.deployed {
            return Ok(Plan::Denied(DeployDenial::AlreadyDeployed));
        }
        Ok(Plan::Ready(deploy_call(self.addresses(), node)))
    }

    pub async fn can_deploy(
        &self,
        node: Address,
    ) -> Result<CanResponse<DeployDenial>, MegapoolError> {
        self.check(self.deploy_plan(node).await?).await
    }

    pub async fn deploy(
        &self,
        node: Address,
        nonce_override: Option<u64>,
    ) -> Result<Execution<DeployDenial>, MegapoolError> {
        let result = self.execute(self.deploy_plan(node).await?, nonce_override).await?;
        if let Execution::Denied(DeployDenial::AlreadyDeployed) = result {
            info!(self.log, "Megapool already deployed"; "node" => %node);
        }
        Ok(result)
    }

    // stake

    async fn stake_plan(
        &self,
        node: Address,
        validator_id: u32,
        proof: Option<ValidatorProof>,
    ) -> Result<Plan<StakeDenial>, MegapoolError> {
        let (megapool, info, state) = match self.validator_context(node, validator_id).await? {
            Ok(context) => context,
            Err(denial) => return Ok(Plan::Denied(denial)),
        };
        match state {
            ValidatorState::InPrestake => {}
            ValidatorState::Dissolved => return Ok(Plan::Denied(StakeDenial::Dissolved)),
            _ => return Ok(Plan::Denied(StakeDenial::NotInPrestake)),
        }
        let proof = self.finalized_validator_proof(&info, proof).await?;
        if proof.withdrawal_credentials() != self.expected_credentials(megapool).await? {
            return Ok(Plan::Denied(StakeDenial::InvalidCredentials));
        }
        let call = stake_call(self.addresses(), megapool, validator_id, &proof);
        Ok(Plan::Proven(call, proof))
    }

    pub async fn can_stake(
        &self,
        node: Address,
        validator_id: u32,
    ) -> Result<CanResponse<StakeDenial>, MegapoolError> {
        let plan = self.stake_plan(node, validator_id, None).await;
        self.check(index_not_found_as(plan, StakeDenial::IndexNotFound)?)
            .await
    }

    pub async fn stake(
        &self,
        node: Address,
        validator_id: u32,
        nonce_override: Option<u64>,
    ) -> Result<Execution<StakeDenial>, MegapoolError> {
        let plan = self.stake_plan(node, validator_id, None).await?;
        self.execute(plan, nonce_override).await
    }

    /// Stake with a proof built earlier. Rejected with `StaleProof` if the validator record
    /// changed since.
    pub async fn stake_with_proof(
        &self,
        node: Address,
        validator_id: u32,
        proof: ValidatorProof,
        nonce_override: Option<u64>,
    ) -> Result<Execution<StakeDenial>, MegapoolError> {
        let plan = self.stake_plan(node, validator_id, Some(proof)).await?;
        self.execute(plan, nonce_override).await
    }

    // dissolve

    async fn dissolve_plan(
        &self,
        node: Address,
        validator_id: u32,
    ) -> Result<Plan<DissolveDenial>, MegapoolError> {
        let (megapool, info, state) = match self.validator_context(node, validator_id).await? {
            Ok(context) => context,
            Err(denial) => return Ok(Plan::Denied(denial)),
        };
        match state {
            ValidatorState::InPrestake => {}
            ValidatorState::Dissolved => return Ok(Plan::Denied(DissolveDenial::Dissolved)),
            _ => return Ok(Plan::Denied(DissolveDenial::NotInPrestake)),
        }
        let proof = self.finalized_validator_proof(&info, None).await?;
        if proof.withdrawal_credentials() == self.expected_credentials(megapool).await? {
            return Ok(Plan::Denied(DissolveDenial::ValidCredentials));
        }
        let call = dissolve_call(self.addresses(), megapool, validator_id, &proof);
        Ok(Plan::Proven(call, proof))
    }

    pub async fn can_dissolve_with_proof(
        &self,
        node: Address,
        validator_id: u32,
    ) -> Result<CanResponse<DissolveDenial>, MegapoolError> {
        let plan = self.dissolve_plan(node, validator_id).await;
        self.check(index_not_found_as(plan, DissolveDenial::IndexNotFound)?)
            .await
    }

    pub async fn dissolve_with_proof(
        &self,
        node: Address,
        validator_id: u32,
        nonce_override: Option<u64>,
    ) -> Result<Execution<DissolveDenial>, MegapoolError> {
        let plan = self.dissolve_plan(node, validator_id).await?;
        self.execute(plan, nonce_override).await
    }

    // dissolve after the dissolve period

    async fn dissolve_validator_plan(
        &self,
        node: Address,
        validator_id: u32,
    ) -> Result<Plan<DissolveValidatorDenial>, MegapoolError> {
        let (megapool, info, state) = match self.validator_context(node, validator_id).await? {
            Ok(context) => context,
            Err(denial) => return Ok(Plan::Denied(denial)),
        };
        match state {
            ValidatorState::InPrestake => {}
            ValidatorState::Dissolved => {
                return Ok(Plan::Denied(DissolveValidatorDenial::Dissolved));
            }
            _ => return Ok(Plan::Denied(DissolveValidatorDenial::NotInPrestake)),
        }
        let (period, now) = futures::try_join!(
            async {
                self.reader
                    .contracts()
                    .dissolve_period()
                    .await
                    .map_err(MegapoolError::Transport)
            },
            async {
                self.execution
                    .latest_block_timestamp()
                    .await
                    .map_err(MegapoolError::Transport)
            },
        )?;
        let dissolvable_at = u64::from(info.last_assignment_time).saturating_add(period);
        if now < dissolvable_at {
            return Ok(Plan::Denied(DissolveValidatorDenial::TooEarly));
        }
        Ok(Plan::Ready(dissolve_validator_call(megapool, validator_id)))
    }

    pub async fn can_dissolve_validator(
        &self,
        node: Address,
        validator_id: u32,
    ) -> Result<CanResponse<DissolveValidatorDenial>, MegapoolError> {
        self.check(self.dissolve_validator_plan(node, validator_id).await?)
            .await
    }

    pub async fn dissolve_validator(
        &self,
        node: Address,
        validator_id: u32,
        nonce_override: Option<u64>,
    ) -> Result<Execution<DissolveValidatorDenial>, MegapoolError> {
        let plan = self.dissolve_validator_plan(node, validator_id).await?;
        let result = self.execute(plan, nonce_override).await?;
        if let Execution::Submitted(tx_hash) = &result {
            info!(
                self.log,
                "Dissolved validator after the dissolve period";
                "validator_id" => validator_id,
                "tx_hash" => %tx_hash,
            );
        }
        Ok(result)
    }

    // dequeue

    async fn dequeue_plan(
        &self,
        node: Address,
        validator_id: u32,
    ) -> Result<Plan<DequeueDenial>, MegapoolError> {
        let (megapool, info, _) = match self.validator_context(node, validator_id).await? {
            Ok(context) => context,
            Err(denial) => return Ok(Plan::Denied(denial)),
        };
        if !crate::queue::can_dequeue(&info) {
            return Ok(Plan::Denied(DequeueDenial::NotInQueue));
        }
        Ok(Plan::Ready(dequeue_call(megapool, validator_id)))
    }

    pub async fn can_dequeue(
        &self,
        node: Address,
        validator_id: u32,
    ) -> Result<CanResponse<DequeueDenial>, MegapoolError> {
        self.check(self.dequeue_plan(node, validator_id).await?).await
    }

    pub async fn dequeue(
        &self,
        node: Address,
        validator_id: u32,
        nonce_override: Option<u64>,
    ) -> Result<Execution<DequeueDenial>, MegapoolError> {
        let plan = self.dequeue_plan(node, validator_id).await?;
        self.execute(plan, nonce_override).await
    }

    // notify exit

    async fn notify_exit_plan(
        &self,
        node: Address,
        validator_id: u32,
    ) -> Result<Plan<NotifyExitDenial>, MegapoolError> {
        let (megapool, info, state) = match self.validator_context(node, validator_id).await? {
            Ok(context) => context,
            Err(denial) => return Ok(Plan::Denied(denial)),
        };
        match state {
            ValidatorState::Staking => {}
            ValidatorState::Dissolved => return Ok(Plan::Denied(NotifyExitDenial::Dissolved)),
            _ => return Ok(Plan::Denied(NotifyExitDenial::NotStaking)),
        }
        let proof = self.finalized_validator_proof(&info, None).await?;
        if !proof.validator.exit_initiated() {
            return Ok(Plan::Denied(NotifyExitDenial::ExitNotInitiated));
        }
        let call = notify_exit_call(self.addresses(), megapool, validator_id, &proof);
        Ok(Plan::Proven(call, proof))
    }

    pub async fn can_notify_validator_exit(
        &self,
        node: Address,
        validator_id: u32,
    ) -> Result<CanResponse<NotifyExitDenial>, MegapoolError> {
        let plan = self.notify_exit_plan(node, validator_id).await;
        self.check(index_not_found_as(plan, NotifyExitDenial::IndexNotFound)?)
            .await
    }

    pub async fn notify_validator_exit(
        &self,
        node: Address,
        validator_id: u32,
        nonce_override: Option<u64>,
    ) -> Result<Execution<NotifyExitDenial>, MegapoolError> {
        let plan = self.notify_exit_plan(node, validator_id).await?;
        self.execute(plan, nonce_override).await
    }

    // notify final balance

    async fn final_balance_plan(
        &self,
        node: Address,
        validator_id: u32,
        slot: Option<u64>,
    ) -> Result<Plan<FinalBalanceDenial>, MegapoolError> {
        let (megapool, info, state) = match self.validator_context(node, validator_id).await? {
            Ok(context) => context,
            Err(denial) => return Ok(Plan::Denied(denial)),
        };
        match state {
            ValidatorState::Exiting => {}
            ValidatorState::Dissolved => return Ok(Plan::Denied(FinalBalanceDenial::Dissolved)),
            _ => return Ok(Plan::Denied(FinalBalanceDenial::NotExiting)),
        }
        let record = self.finalized_validator_proof(&info, None).await?;
        let withdrawable_epoch = record.validator.withdrawable_epoch;
        if withdrawable_epoch == FAR_FUTURE_EPOCH {
            return Ok(Plan::Denied(FinalBalanceDenial::NotYetWithdrawable));
        }
        let withdrawable_slot = self
            .proofs
            .eth2_config()
            .await?
            .epoch_start_slot(withdrawable_epoch);
        let target = slot.unwrap_or(withdrawable_slot);
        if target < withdrawable_slot {
            return Ok(Plan::Denied(FinalBalanceDenial::SlotTooEarly));
        }
        // record.slot is the finalized slot the record was read at
        if withdrawable_slot > record.slot {
            return Ok(Plan::Denied(FinalBalanceDenial::NotYetWithdrawable));
        }
        let proof = self
            .proofs
            .withdrawal_proof(record.validator_index, target)
            .await?;
        Ok(Plan::Ready(notify_final_balance_call(
            self.addresses(),
            megapool,
            validator_id,
            &proof,
        )))
    }

    pub async fn can_notify_final_balance(
        &self,
        node: Address,
        validator_id: u32,
        slot: Option<u64>,
    ) -> Result<CanResponse<FinalBalanceDenial>, MegapoolError> {
        let plan = self.final_balance_plan(node, validator_id, slot).await;
        self.check(index_not_found_as(plan, FinalBalanceDenial::IndexNotFound)?)
            .await
    }

    pub async fn notify_final_balance(
        &self,
        node: Address,
        validator_id: u32,
        slot: Option<u64>,
        nonce_override: Option<u64>,
    ) -> Result<Execution<FinalBalanceDenial>, MegapoolError> {
        let plan = self.final_balance_plan(node, validator_id, slot).await?;
        self.execute(plan, nonce_override).await
    }

    // distribute

    async fn distribute_plan(
        &self,
        node: Address,
    ) -> Result<Plan<DistributeDenial>, MegapoolError> {
        let snapshot = self.reader.megapool(node).await?;
        if !snapshot.deployed {
            return Ok(Plan::Denied(DistributeDenial::NotDeployed));
        }
        if snapshot.last_distribution_block == 0 {
            return Ok(Plan::Denied(DistributeDenial::NeverStaked));
        }
        Ok(Plan::Ready(distribute_call(snapshot.address)))
    }

    pub async fn can_distribute(
        &self,
        node: Address,
    ) -> Result<CanResponse<DistributeDenial>, MegapoolError> {
        self.check(self.distribute_plan(node).await?).await
    }

    pub async fn distribute(
        &self,
        node: Address,
        nonce_override: Option<u64>,
    ) -> Result<Execution<DistributeDenial>, MegapoolError> {
        self.execute(self.distribute_plan(node).await?, nonce_override)
            .await
    }

    // claim refund

    async fn claim_refund_plan(
        &self,
        node: Address,
    ) -> Result<Plan<ClaimRefundDenial>, MegapoolError> {
        let snapshot = self.reader.megapool(node).await?;
        if !snapshot.deployed {
            return Ok(Plan::Denied(ClaimRefundDenial::NotDeployed));
        }
        if snapshot.refund_value.is_zero() {
            return Ok(Plan::Denied(ClaimRefundDenial::NoRefund));
        }
        Ok(Plan::Ready(claim_refund_call(snapshot.address)))
    }

    pub async fn can_claim_refund(
        &self,
        node: Address,
    ) -> Result<CanResponse<ClaimRefundDenial>, MegapoolError> {
        self.check(self.claim_refund_plan(node).await?).await
    }

    pub async fn claim_refund(
        &self,
        node: Address,
        nonce_override: Option<u64>,
    ) -> Result<Execution<ClaimRefundDenial>, MegapoolError> {
        self.execute(self.claim_refund_plan(node).await?, nonce_override)
            .await
    }

    // reduce bond

    async fn reduce_bond_plan(
        &self,
        node: Address,
        amount: U256,
    ) -> Result<Plan<ReduceBondDenial>, MegapoolError> {
        let snapshot = self.reader.megapool(node).await?;
        if !snapshot.deployed {
            return Ok(Plan::Denied(ReduceBondDenial::NotDeployed));
        }
        let requirement = snapshot.bond_requirement;
        if let Some(denial) = reduce_bond_denial(snapshot.node_bond, requirement, amount) {
            return Ok(Plan::Denied(denial));
        }
        Ok(Plan::Ready(reduce_bond_call(snapshot.address, amount)))
    }

    pub async fn can_reduce_bond(
        &self,
        node: Address,
        amount: U256,
    ) -> Result<CanResponse<ReduceBondDenial>, MegapoolError> {
        self.check(self.reduce_bond_plan(node, amount).await?).await
    }

    pub async fn reduce_bond(
        &self,
        node: Address,
        amount: U256,
        nonce_override: Option<u64>,
    ) -> Result<Execution<ReduceBondDenial>, MegapoolError> {
        self.execute(self.reduce_bond_plan(node, amount).await?, nonce_override)
            .await
    }

    // repay debt

    async fn repay_debt_plan(
        &self,
        node: Address,
        amount: U256,
    ) -> Result<Plan<RepayDebtDenial>, MegapoolError> {
        let (snapshot, balance) = futures::try_join!(self.reader.megapool(node), async {
            self.execution
                .balance_at(node)
                .await
                .map_err(MegapoolError::Transport)
        })?;
        if !snapshot.deployed {
            return Ok(Plan::Denied(RepayDebtDenial::NotDeployed));
        }
        if let Some(denial) = repay_debt_denial(snapshot.debt, amount, balance) {
            return Ok(Plan::Denied(denial));
        }
        Ok(Plan::Ready(repay_debt_call(snapshot.address, amount)))
    }

    pub async fn can_repay_debt(
        &self,
        node: Address,
        amount: U256,
    ) -> Result<CanResponse<RepayDebtDenial>, MegapoolError> {
        self.check(self.repay_debt_plan(node, amount).await?).await
    }

    pub async fn repay_debt(
        &self,
        node: Address,
        amount: U256,
        nonce_override: Option<u64>,
    ) -> Result<Execution<RepayDebtDenial>, MegapoolError> {
        self.execute(self.repay_debt_plan(node, amount).await?, nonce_override)
            .await
    }

    // delegate

    async fn use_latest_delegate_plan(
        &self,
        node: Address,
        use_latest: bool,
    ) -> Result<Plan<DelegateDenial>, MegapoolError> {
        let megapool = match self.reader.deployed_megapool(node).await? {
            Some(megapool) => megapool,
            None => return Ok(Plan::Denied(DelegateDenial::NotDeployed)),
        };
        if self.reader.delegate_info(megapool).await?.use_latest_delegate == use_latest {
            return Ok(Plan::Denied(DelegateDenial::Unchanged));
        }
        Ok(Plan::Ready(set_use_latest_delegate_call(megapool, use_latest)))
    }

    pub async fn can_set_use_latest_delegate(
        &self,
        node: Address,
        use_latest: bool,
    ) -> Result<CanResponse<DelegateDenial>, MegapoolError> {
        self.check(self.use_latest_delegate_plan(node, use_latest).await?)
            .await
    }

    pub async fn set_use_latest_delegate(
        &self,
        node: Address,
        use_latest: bool,
        nonce_override: Option<u64>,
    ) -> Result<Execution<DelegateDenial>, MegapoolError> {
        let plan = self.use_latest_delegate_plan(node, use_latest).await?;
        self.execute(plan, nonce_override).await
    }

    async fn delegate_upgrade_plan(
        &self,
        node: Address,
    ) -> Result<Plan<DelegateDenial>, MegapoolError> {
        let megapool = match self.reader.deployed_megapool(node).await? {
            Some(megapool) => megapool,
            None => return Ok(Plan::Denied(DelegateDenial::NotDeployed)),
        };
        let delegate = self.reader.delegate_info(megapool).await?;
        if delegate.delegate == delegate.latest_delegate {
            return Ok(Plan::Denied(DelegateDenial::Unchanged));
        }
        Ok(Plan::Ready(delegate_upgrade_call(megapool)))
    }

    pub async fn can_delegate_upgrade(
        &self,
        node: Address,
    ) -> Result<CanResponse<DelegateDenial>, MegapoolError> {
        self.check(self.delegate_upgrade_plan(node).await?).await
    }

    pub async fn delegate_upgrade(
        &self,
        node: Address,
        nonce_override: Option<u64>,
    ) -> Result<Execution<DelegateDenial>, MegapoolError> {
        self.execute(self.delegate_upgrade_plan(node).await?, nonce_override)
            .await
    }

    // voluntary exit

    async fn exit_plan(
        &self,
        node: Address,
        validator_id: u32,
    ) -> Result<Result<VoluntaryExit, ExitValidatorDenial>, MegapoolError> {
        let (_, info, state) = match self.validator_context(node, validator_id).await? {
            Ok(context) => context,
            Err(denial) => return Ok(Err(denial)),
        };
        if state != ValidatorState::Staking {
            return Ok(Err(ExitValidatorDenial::NotStaking));
        }
        let (status, head) = futures::try_join!(
            async {
                self.consensus
                    .validator_status(&info.pubkey)
                    .await
                    .map_err(MegapoolError::Transport)
            },
            async {
                self.consensus
                    .beacon_head()
                    .await
                    .map_err(MegapoolError::Transport)
            },
        )?;
        let status = match status {
            Some(status) => status,
            None => return Ok(Err(ExitValidatorDenial::IndexNotFound)),
        };
        if status.validator.exit_initiated() {
            return Ok(Err(ExitValidatorDenial::AlreadyExiting));
        }
        if !status.validator.is_active_at(head.epoch) {
            return Ok(Err(ExitValidatorDenial::NotActive));
        }
        Ok(Ok(VoluntaryExit {
            pubkey: info.pubkey,
            validator_index: status.index,
            epoch: head.epoch,
        }))
    }

    /// Voluntary exits go to the consensus client, so there is no gas to report.
    pub async fn can_exit_validator(
        &self,
        node: Address,
        validator_id: u32,
    ) -> Result<CanResponse<ExitValidatorDenial>, MegapoolError> {
        Ok(match self.exit_plan(node, validator_id).await? {
            Ok(_) => CanResponse {
                verdict: Verdict::Admissible,
                gas_info: None,
            },
            Err(denial) => CanResponse::denied(denial),
        })
    }

    pub async fn exit_validator(
        &self,
        node: Address,
        validator_id: u32,
    ) -> Result<Execution<ExitValidatorDenial, ()>, MegapoolError> {
        let exit = match self.exit_plan(node, validator_id).await? {
            Ok(exit) => exit,
            Err(denial) => return Ok(Execution::Denied(denial)),
        };
        let signature = self
            .wallet
            .sign_exit_message(&exit.pubkey, exit.validator_index, exit.epoch)
            .await
            .map_err(MegapoolError::Submission)?;
        self.consensus
            .exit_validator(exit.validator_index, exit.epoch, signature)
            .await
            .map_err(MegapoolError::Submission)?;
        info!(
            self.log,
            "Submitted voluntary exit";
            "validator_id" => validator_id,
            "validator_index" => exit.validator_index,
            "epoch" => exit.epoch,
        );
        Ok(Execution::Submitted(()))
    }

    // new validator (dry run only)

    pub async fn can_new_validator(
        &self,
        node: Address,
        use_express: bool,
    ) -> Result<NewValidatorDetails, MegapoolError> {
        let contracts = self.reader.contracts();
        let (snapshot, schedule, express_ticket_count) = futures::try_join!(
            self.reader.megapool(node),
            async { contracts.bond_schedule().await.map_err(MegapoolError::Transport) },
            async {
                contracts
                    .express_ticket_count(node)
                    .await
                    .map_err(MegapoolError::Transport)
            },
        )?;
        let active = snapshot.active_validator_count;
        Ok(NewValidatorDetails {
            megapool_deployed: snapshot.deployed,
            active_validator_count: active,
            node_bond: snapshot.node_bond,
            bond_requirement: schedule.requirement(active.saturating_add(1)),
            bond_top_up: schedule.new_validator_bond(active, snapshot.node_bond),
            express_ticket_count,
            queue: entry_queue(express_ticket_count, use_express),
        })
    }
}
