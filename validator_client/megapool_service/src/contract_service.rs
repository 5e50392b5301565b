use crate::bond::BondSchedule;
use crate::clients::{DualExecutionClient, ExecutionClient};
use crate::config::Config;
use crate::queue::{QueueEntry, QueueKind, QueuePage};
use crate::state_reader::{DelegateInfo, RewardSplit, ValidatorInfo};
use crate::transaction::PreparedCall;
use alloy_primitives::{keccak256, Address, Bytes, TxKind, B256, U256};
use alloy_provider::{Provider, ProviderBuilder, RootProvider};
use alloy_rpc_types::{BlockNumberOrTag, TransactionInput, TransactionRequest};
use alloy_sol_macro::sol;
use alloy_sol_types::SolCall;
use alloy_transport_http::{Client, Http};
use async_trait::async_trait;
use beacon_proofs::{BlsPublicKey, ValidatorProof, Withdrawal, WithdrawalProof};

sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract RocketStorage {
        function getAddress(bytes32 key) external view returns (address);
        function getUint(bytes32 key) external view returns (uint256);
    }
);

sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract RocketNodeManager {
        function getNodeExists(address node) external view returns (bool);
        function getExpressTicketCount(address node) external view returns (uint256);
    }
);

sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract RocketMegapoolFactory {
        function getExpectedAddress(address node) external view returns (address);
        function getMegapoolDeployed(address node) external view returns (bool);
        function deployContract(address node) external returns (address);
    }
);

sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract RocketDAOProtocolSettingsNode {
        function getBaseBondArray() external view returns (uint256[]);
        function getReducedBond() external view returns (uint256);
    }
);

sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract RocketDAONodeTrustedSettingsMinipool {
        function getDissolvePeriod() external view returns (uint256);
    }
);

sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract RocketDAOProtocolSettingsDeposit {
        function getExpressQueueRate() external view returns (uint256);
    }
);

sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract LinkedListStorage {
        struct DepositQueueValue {
            address receiver;
            uint32 validatorId;
            uint32 suppliedValue;
            uint32 requestedValue;
        }
        function getLength(bytes32 namespace) external view returns (uint256);
        function scan(bytes32 namespace, uint256 startIndex, uint256 count) external view returns (DepositQueueValue[] entries, uint256 nextIndex);
    }
);

sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract RocketMegapoolDelegate {
        struct ValidatorInfo {
            uint32 lastAssignmentTime;
            uint32 lastRequestedValue;
            uint32 lastRequestedBond;
            uint32 depositValue;
            bool staked;
            bool exited;
            bool inQueue;
            bool inPrestake;
            bool expressUsed;
            bool dissolved;
            bool exiting;
            bool locked;
            uint64 exitBalance;
            uint64 lockedTime;
        }
        struct RewardSplit {
            uint256 nodeRewards;
            uint256 voterRewards;
            uint256 protocolDAORewards;
            uint256 rethRewards;
        }
        function getValidatorCount() external view returns (uint32);
        function getActiveValidatorCount() external view returns (uint32);
        function getValidatorInfoAndPubkey(uint32 validatorId) external view returns (ValidatorInfo info, bytes pubkey);
        function getNodeBond() external view returns (uint256);
        function getUserCapital() external view returns (uint256);
        function getDebt() external view returns (uint256);
        function getRefundValue() external view returns (uint256);
        function getAssignedValue() external view returns (uint256);
        function getLastDistributionBlock() external view returns (uint256);
        function getPendingRewards() external view returns (uint256);
        function calculatePendingRewards() external view returns (RewardSplit);
        function calculateRewards(uint256 amount) external view returns (RewardSplit);
        function getWithdrawalCredentials() external view returns (bytes32);
        function getDelegate() external view returns (address);
        function getEffectiveDelegate() external view returns (address);
        function getDelegateExpired() external view returns (bool);
        function getUseLatestDelegate() external view returns (bool);
        function dequeue(uint32 validatorId) external;
        function dissolveValidator(uint32 validatorId) external;
        function repayDebt() external payable;
        function reduceBond(uint256 amount) external;
        function claim() external;
        function distribute() external;
        function setUseLatestDelegate(bool state) external;
        function delegateUpgrade() external;
    }
);

sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract RocketMegapoolManager {
        struct ProvedValidator {
            bytes pubkey;
            bytes32 withdrawalCredentials;
            uint64 effectiveBalance;
            bool slashed;
            uint64 activationEligibilityEpoch;
            uint64 activationEpoch;
            uint64 exitEpoch;
            uint64 withdrawableEpoch;
        }
        struct ValidatorProof {
            uint256 validatorIndex;
            ProvedValidator validator;
            bytes32[] witnesses;
        }
        struct Withdrawal {
            uint64 index;
            uint64 validatorIndex;
            bytes20 withdrawalCredentials;
            uint64 amountInGwei;
        }
        function stake(address megapool, uint32 validatorId, ValidatorProof validatorProof) external;
        function dissolve(address megapool, uint32 validatorId, ValidatorProof validatorProof) external;
        function notifyExit(address megapool, uint32 validatorId, uint64 withdrawalEpoch, uint64 slot, bytes32[] exitProof) external;
        function notifyFinalBalance(address megapool, uint32 validatorId, uint64 withdrawalSlot, uint256 withdrawalNum, Withdrawal withdrawal, uint64 slot, bytes32[] withdrawalProof) external;
    }
);

type T = Http<Client>;
type P = RootProvider<T>;
type RocketStorageContract = RocketStorage::RocketStorageInstance<T, P>;
type MegapoolContract = RocketMegapoolDelegate::RocketMegapoolDelegateInstance<T, P>;

/// Protocol contracts, resolved once through RocketStorage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProtocolAddresses {
    pub storage: Address,
    pub node_manager: Address,
    pub megapool_factory: Address,
    pub megapool_manager: Address,
    pub latest_delegate: Address,
    pub settings_node: Address,
    pub settings_deposit: Address,
    pub settings_trusted_minipool: Address,
    pub linked_list_storage: Address,
}

/// Read accessors for everything the lifecycle needs from chain.
#[async_trait]
pub trait MegapoolContracts: Send + Sync {
    fn addresses(&self) -> &ProtocolAddresses;
    async fn node_exists(&self, node: Address) -> Result<bool, String>;
    async fn express_ticket_count(&self, node: Address) -> Result<u32, String>;
    async fn megapool_address(&self, node: Address) -> Result<Address, String>;
    async fn megapool_deployed(&self, node: Address) -> Result<bool, String>;
    async fn validator_count(&self, megapool: Address) -> Result<u32, String>;
    async fn active_validator_count(&self, megapool: Address) -> Result<u32, String>;
    async fn validator_info(
        &self,
        megapool: Address,
        validator_id: u32,
    ) -> Result<ValidatorInfo, String>;
    async fn node_bond(&self, megapool: Address) -> Result<U256, String>;
    async fn user_capital(&self, megapool: Address) -> Result<U256, String>;
    async fn debt(&self, megapool: Address) -> Result<U256, String>;
    async fn refund_value(&self, megapool: Address) -> Result<U256, String>;
    async fn assigned_value(&self, megapool: Address) -> Result<U256, String>;
    async fn last_distribution_block(&self, megapool: Address) -> Result<u64, String>;
    async fn pending_rewards(&self, megapool: Address) -> Result<U256, String>;
    async fn reward_split(&self, megapool: Address) -> Result<RewardSplit, String>;
    /// How `amount` of rewards would be split between node, voters, protocol and rETH.
    async fn calculate_rewards(
        &self,
        megapool: Address,
        amount: U256,
    ) -> Result<RewardSplit, String>;
    async fn withdrawal_credentials(&self, megapool: Address) -> Result<B256, String>;
    async fn delegate_info(&self, megapool: Address) -> Result<DelegateInfo, String>;
    async fn bond_schedule(&self) -> Result<BondSchedule, String>;
    async fn express_queue_rate(&self) -> Result<u64, String>;
    /// Seconds after assignment before an unstaked validator may be dissolved.
    async fn dissolve_period(&self) -> Result<u64, String>;
    async fn queue_index(&self) -> Result<u64, String>;
    async fn queue_length(&self, kind: QueueKind) -> Result<u64, String>;
    async fn scan_queue(
        &self,
        kind: QueueKind,
        start: u64,
        count: u64,
    ) -> Result<QueuePage, String>;
}

fn prepared(to: Address, data: Vec<u8>, description: &'static str) -> PreparedCall {
    PreparedCall {
        to,
        data: Bytes::from(data),
        value: U256::ZERO,
        description,
    }
}

impl From<&ValidatorProof> for RocketMegapoolManager::ValidatorProof {
    fn from(proof: &ValidatorProof) -> Self {
        let v = &proof.validator;
        RocketMegapoolManager::ValidatorProof {
            validatorIndex: U256::from(proof.validator_index),
            validator: RocketMegapoolManager::ProvedValidator {
                pubkey: Bytes::copy_from_slice(v.pubkey.as_slice()),
                withdrawalCredentials: v.withdrawal_credentials,
                effectiveBalance: v.effective_balance,
                slashed: v.slashed,
                activationEligibilityEpoch: v.activation_eligibility_epoch,
                activationEpoch: v.activation_epoch,
                exitEpoch: v.exit_epoch,
                withdrawableEpoch: v.withdrawable_epoch,
            },
            witnesses: proof.witnesses.clone(),
        }
    }
}

impl From<RocketMegapoolDelegate::RewardSplit> for RewardSplit {
    fn from(split: RocketMegapoolDelegate::RewardSplit) -> Self {
        RewardSplit {
            node_rewards: split.nodeRewards,
            voter_rewards: split.voterRewards,
            protocol_dao_rewards: split.protocolDAORewards,
            reth_rewards: split.rethRewards,
        }
    }
}

impl From<&Withdrawal> for RocketMegapoolManager::Withdrawal {
    fn from(w: &Withdrawal) -> Self {
        RocketMegapoolManager::Withdrawal {
            index: w.index,
            validatorIndex: w.validator_index,
            withdrawalCredentials: w.withdrawal_credentials.0,
            amountInGwei: w.amount_in_gwei,
        }
    }
}

pub fn deploy_call(addresses: &ProtocolAddresses, node: Address) -> PreparedCall {
    let data = RocketMegapoolFactory::deployContractCall { node }.abi_encode();
    prepared(addresses.megapool_factory, data, "deployContract")
}

pub fn stake_call(
    addresses: &ProtocolAddresses,
    megapool: Address,
    validator_id: u32,
    proof: &ValidatorProof,
) -> PreparedCall {
    let data = RocketMegapoolManager::stakeCall {
        megapool,
        validatorId: validator_id,
        validatorProof: proof.into(),
    }
    .abi_encode();
    prepared(addresses.megapool_manager, data, "stake")
}

pub fn dissolve_call(
    addresses: &ProtocolAddresses,
    megapool: Address,
    validator_id: u32,
    proof: &ValidatorProof,
) -> PreparedCall {
    let data = RocketMegapoolManager::dissolveCall {
        megapool,
        validatorId: validator_id,
        validatorProof: proof.into(),
    }
    .abi_encode();
    prepared(addresses.megapool_manager, data, "dissolve")
}

/// The exit proof is the validator proof's witness list; the contract checks the withdrawable
/// epoch against it.
pub fn notify_exit_call(
    addresses: &ProtocolAddresses,
    megapool: Address,
    validator_id: u32,
    proof: &ValidatorProof,
) -> PreparedCall {
    let data = RocketMegapoolManager::notifyExitCall {
        megapool,
        validatorId: validator_id,
        withdrawalEpoch: proof.validator.withdrawable_epoch,
        slot: proof.slot,
        exitProof: proof.witnesses.clone(),
    }
    .abi_encode();
    prepared(addresses.megapool_manager, data, "notifyExit")
}

pub fn notify_final_balance_call(
    addresses: &ProtocolAddresses,
    megapool: Address,
    validator_id: u32,
    proof: &WithdrawalProof,
) -> PreparedCall {
    let data = RocketMegapoolManager::notifyFinalBalanceCall {
        megapool,
        validatorId: validator_id,
        withdrawalSlot: proof.withdrawal_slot,
        withdrawalNum: U256::from(proof.withdrawal_num),
        withdrawal: (&proof.withdrawal).into(),
        slot: proof.slot,
        withdrawalProof: proof.witnesses.clone(),
    }
    .abi_encode();
    prepared(addresses.megapool_manager, data, "notifyFinalBalance")
}

pub fn dequeue_call(megapool: Address, validator_id: u32) -> PreparedCall {
    let data = RocketMegapoolDelegate::dequeueCall {
        validatorId: validator_id,
    }
    .abi_encode();
    prepared(megapool, data, "dequeue")
}

pub fn dissolve_validator_call(megapool: Address, validator_id: u32) -> PreparedCall {
    let data = RocketMegapoolDelegate::dissolveValidatorCall {
        validatorId: validator_id,
    }
    .abi_encode();
    prepared(megapool, data, "dissolveValidator")
}

pub fn distribute_call(megapool: Address) -> PreparedCall {
    prepared(megapool, RocketMegapoolDelegate::distributeCall {}.abi_encode(), "distribute")
}

pub fn claim_refund_call(megapool: Address) -> PreparedCall {
    prepared(megapool, RocketMegapoolDelegate::claimCall {}.abi_encode(), "claim")
}

pub fn reduce_bond_call(megapool: Address, amount: U256) -> PreparedCall {
    let data = RocketMegapoolDelegate::reduceBondCall { amount }.abi_encode();
    prepared(megapool, data, "reduceBond")
}

pub fn repay_debt_call(megapool: Address, amount: U256) -> PreparedCall {
    PreparedCall {
        value: amount,
        ..prepared(megapool, RocketMegapoolDelegate::repayDebtCall {}.abi_encode(), "repayDebt")
    }
}

pub fn set_use_latest_delegate_call(megapool: Address, state: bool) -> PreparedCall {
    let data = RocketMegapoolDelegate::setUseLatestDelegateCall { state }.abi_encode();
    prepared(megapool, data, "setUseLatestDelegate")
}

pub fn delegate_upgrade_call(megapool: Address) -> PreparedCall {
    let data = RocketMegapoolDelegate::delegateUpgradeCall {}.abi_encode();
    prepared(megapool, data, "delegateUpgrade")
}

fn contract_error(e: alloy_contract::Error) -> String {
    e.to_string()
}

fn to_u64(value: U256) -> Result<u64, String> {
    u64::try_from(value).map_err(|e| e.to_string())
}

fn to_u32(value: U256) -> Result<u32, String> {
    u32::try_from(value).map_err(|e| e.to_string())
}

impl RocketStorageContract {
    async fn resolve(&self, name: &str) -> Result<Address, String> {
        let key = keccak256(format!("contract.address{}", name));
        let RocketStorage::getAddressReturn { _0 } = self
            .getAddress(key)
            .call()
            .await
            .map_err(contract_error)?;
        if _0 == Address::ZERO {
            return Err(format!("contract {} is not registered in storage", name));
        }
        Ok(_0)
    }
}

impl MegapoolContract {
    async fn query_validator(&self, validator_id: u32) -> Result<ValidatorInfo, String> {
        let RocketMegapoolDelegate::getValidatorInfoAndPubkeyReturn { info, pubkey } = self
            .getValidatorInfoAndPubkey(validator_id)
            .call()
            .await
            .map_err(contract_error)?;
        let pubkey = BlsPublicKey::try_from(pubkey.as_ref())
            .map_err(|_| format!("validator {} has a malformed pubkey", validator_id))?;
        Ok(ValidatorInfo {
            validator_id,
            pubkey,
            last_assignment_time: info.lastAssignmentTime,
            last_requested_value: info.lastRequestedValue,
            last_requested_bond: info.lastRequestedBond,
            deposit_value: info.depositValue,
            staked: info.staked,
            exited: info.exited,
            in_queue: info.inQueue,
            in_prestake: info.inPrestake,
            express_used: info.expressUsed,
            dissolved: info.dissolved,
            exiting: info.exiting,
            locked: info.locked,
            exit_balance: info.exitBalance,
            locked_time: info.lockedTime,
        })
    }
}

/// Contract reader over an HTTP JSON-RPC endpoint.
pub struct AlloyMegapoolContracts {
    provider: P,
    addresses: ProtocolAddresses,
}

impl AlloyMegapoolContracts {
    pub async fn connect(config: &Config) -> Result<Self, String> {
        let provider: P = ProviderBuilder::new().on_http(
            config
                .rpc_url
                .parse::<reqwest::Url>()
                .map_err(|e| e.to_string())?,
        );
        let storage_address = config.storage_address().map_err(|e| e.to_string())?;
        let storage = RocketStorageContract::new(storage_address, provider.clone());
        let addresses = ProtocolAddresses {
            storage: storage_address,
            node_manager: storage.resolve("rocketNodeManager").await?,
            megapool_factory: storage.resolve("rocketMegapoolFactory").await?,
            megapool_manager: storage.resolve("rocketMegapoolManager").await?,
            latest_delegate: storage.resolve("rocketMegapoolDelegate").await?,
            settings_node: storage.resolve("rocketDAOProtocolSettingsNode").await?,
            settings_deposit: storage.resolve("rocketDAOProtocolSettingsDeposit").await?,
            settings_trusted_minipool: storage
                .resolve("rocketDAONodeTrustedSettingsMinipool")
                .await?,
            linked_list_storage: storage.resolve("linkedListStorage").await?,
        };
        Ok(Self {
            provider,
            addresses,
        })
    }

    fn megapool(&self, address: Address) -> MegapoolContract {
        MegapoolContract::new(address, self.provider.clone())
    }

    fn factory(&self) -> RocketMegapoolFactory::RocketMegapoolFactoryInstance<T, P> {
        RocketMegapoolFactory::new(self.addresses.megapool_factory, self.provider.clone())
    }

    fn node_manager(&self) -> RocketNodeManager::RocketNodeManagerInstance<T, P> {
        RocketNodeManager::new(self.addresses.node_manager, self.provider.clone())
    }

    fn linked_list(&self) -> LinkedListStorage::LinkedListStorageInstance<T, P> {
        LinkedListStorage::new(self.addresses.linked_list_storage, self.provider.clone())
    }
}

#[async_trait]
impl MegapoolContracts for AlloyMegapoolContracts {
    fn addresses(&self) -> &ProtocolAddresses {
        &self.addresses
    }

    async fn node_exists(&self, node: Address) -> Result<bool, String> {
        let RocketNodeManager::getNodeExistsReturn { _0 } = self
            .node_manager()
            .getNodeExists(node)
            .call()
            .await
            .map_err(contract_error)?;
        Ok(_0)
    }

    async fn express_ticket_count(&self, node: Address) -> Result<u32, String> {
        let RocketNodeManager::getExpressTicketCountReturn { _0 } = self
            .node_manager()
            .getExpressTicketCount(node)
            .call()
            .await
            .map_err(contract_error)?;
        to_u32(_0)
    }

    async fn megapool_address(&self, node: Address) -> Result<Address, String> {
        let RocketMegapoolFactory::getExpectedAddressReturn { _0 } = self
            .factory()
            .getExpectedAddress(node)
            .call()
            .await
            .map_err(contract_error)?;
        Ok(_0)
    }

    async fn megapool_deployed(&self, node: Address) -> Result<bool, String> {
        let RocketMegapoolFactory::getMegapoolDeployedReturn { _0 } = self
            .factory()
            .getMegapoolDeployed(node)
            .call()
            .await
            .map_err(contract_error)?;
        Ok(_0)
    }

    async fn validator_count(&self, megapool: Address) -> Result<u32, String> {
        let RocketMegapoolDelegate::getValidatorCountReturn { _0 } = self
            .megapool(megapool)
            .getValidatorCount()
            .call()
            .await
            .map_err(contract_error)?;
        Ok(_0)
    }

    async fn active_validator_count(&self, megapool: Address) -> Result<u32, String> {
        let RocketMegapoolDelegate::getActiveValidatorCountReturn { _0 } = self
            .megapool(megapool)
            .getActiveValidatorCount()
            .call()
            .await
            .map_err(contract_error)?;
        Ok(_0)
    }

    async fn validator_info(
        &self,
        megapool: Address,
        validator_id: u32,
    ) -> Result<ValidatorInfo, String> {
        self.megapool(megapool).query_validator(validator_id).await
    }

    async fn node_bond(&self, megapool: Address) -> Result<U256, String> {
        let RocketMegapoolDelegate::getNodeBondReturn { _0 } = self
            .megapool(megapool)
            .getNodeBond()
            .call()
            .await
            .map_err(contract_error)?;
        Ok(_0)
    }

    async fn user_capital(&self, megapool: Address) -> Result<U256, String> {
        let RocketMegapoolDelegate::getUserCapitalReturn { _0 } = self
            .megapool(megapool)
            .getUserCapital()
            .call()
            .await
            .map_err(contract_error)?;
        Ok(_0)
    }

    async fn debt(&self, megapool: Address) -> Result<U256, String> {
        let RocketMegapoolDelegate::getDebtReturn { _0 } = self
            .megapool(megapool)
            .getDebt()
            .call()
            .await
            .map_err(contract_error)?;
        Ok(_0)
    }

    async fn refund_value(&self, megapool: Address) -> Result<U256, String> {
        let RocketMegapoolDelegate::getRefundValueReturn { _0 } = self
            .megapool(megapool)
            .getRefundValue()
            .call()
            .await
            .map_err(contract_error)?;
        Ok(_0)
    }

    async fn assigned_value(&self, megapool: Address) -> Result<U256, String> {
        let RocketMegapoolDelegate::getAssignedValueReturn { _0 } = self
            .megapool(megapool)
            .getAssignedValue()
            .call()
            .await
            .map_err(contract_error)?;
        Ok(_0)
    }

    async fn last_distribution_block(&self, megapool: Address) -> Result<u64, String> {
        let RocketMegapoolDelegate::getLastDistributionBlockReturn { _0 } = self
            .megapool(megapool)
            .getLastDistributionBlock()
            .call()
            .await
            .map_err(contract_error)?;
        to_u64(_0)
    }

    async fn pending_rewards(&self, megapool: Address) -> Result<U256, String> {
        let RocketMegapoolDelegate::getPendingRewardsReturn { _0 } = self
            .megapool(megapool)
            .getPendingRewards()
            .call()
            .await
            .map_err(contract_error)?;
        Ok(_0)
    }

    async fn reward_split(&self, megapool: Address) -> Result<RewardSplit, String> {
        let RocketMegapoolDelegate::calculatePendingRewardsReturn { _0 } = self
            .megapool(megapool)
            .calculatePendingRewards()
            .call()
            .await
            .map_err(contract_error)?;
        Ok(_0.into())
    }

    async fn calculate_rewards(
        &self,
        megapool: Address,
        amount: U256,
    ) -> Result<RewardSplit, String> {
        let RocketMegapoolDelegate::calculateRewardsReturn { _0 } = self
            .megapool(megapool)
            .calculateRewards(amount)
            .call()
            .await
            .map_err(contract_error)?;
        Ok(_0.into())
    }

    async fn withdrawal_credentials(&self, megapool: Address) -> Result<B256, String> {
        let RocketMegapoolDelegate::getWithdrawalCredentialsReturn { _0 } = self
            .megapool(megapool)
            .getWithdrawalCredentials()
            .call()
            .await
            .map_err(contract_error)?;
        Ok(_0)
    }

    async fn delegate_info(&self, megapool: Address) -> Result<DelegateInfo, String> {
        let contract = self.megapool(megapool);
        let (delegate, effective, expired, use_latest) = futures::try_join!(
            async { contract.getDelegate().call().await.map_err(contract_error) },
            async { contract.getEffectiveDelegate().call().await.map_err(contract_error) },
            async { contract.getDelegateExpired().call().await.map_err(contract_error) },
            async { contract.getUseLatestDelegate().call().await.map_err(contract_error) },
        )?;
        Ok(DelegateInfo {
            delegate: delegate._0,
            effective_delegate: effective._0,
            latest_delegate: self.addresses.latest_delegate,
            delegate_expired: expired._0,
            use_latest_delegate: use_latest._0,
        })
    }

    async fn bond_schedule(&self) -> Result<BondSchedule, String> {
        let settings =
            RocketDAOProtocolSettingsNode::new(self.addresses.settings_node, self.provider.clone());
        let (base, reduced) = futures::try_join!(
            async { settings.getBaseBondArray().call().await.map_err(contract_error) },
            async { settings.getReducedBond().call().await.map_err(contract_error) },
        )?;
        Ok(BondSchedule {
            base_bond_array: base._0,
            reduced_bond: reduced._0,
        })
    }

    async fn express_queue_rate(&self) -> Result<u64, String> {
        let settings = RocketDAOProtocolSettingsDeposit::new(
            self.addresses.settings_deposit,
            self.provider.clone(),
        );
        let RocketDAOProtocolSettingsDeposit::getExpressQueueRateReturn { _0 } = settings
            .getExpressQueueRate()
            .call()
            .await
            .map_err(contract_error)?;
        to_u64(_0)
    }

    async fn dissolve_period(&self) -> Result<u64, String> {
        let settings = RocketDAONodeTrustedSettingsMinipool::new(
            self.addresses.settings_trusted_minipool,
            self.provider.clone(),
        );
        let RocketDAONodeTrustedSettingsMinipool::getDissolvePeriodReturn { _0 } = settings
            .getDissolvePeriod()
            .call()
            .await
            .map_err(contract_error)?;
        to_u64(_0)
    }

    async fn queue_index(&self) -> Result<u64, String> {
        let storage = RocketStorageContract::new(self.addresses.storage, self.provider.clone());
        let RocketStorage::getUintReturn { _0 } = storage
            .getUint(keccak256(megapool_utils::QUEUE_INDEX_KEY))
            .call()
            .await
            .map_err(contract_error)?;
        to_u64(_0)
    }

    async fn queue_length(&self, kind: QueueKind) -> Result<u64, String> {
        let LinkedListStorage::getLengthReturn { _0 } = self
            .linked_list()
            .getLength(kind.namespace())
            .call()
            .await
            .map_err(contract_error)?;
        to_u64(_0)
    }

    async fn scan_queue(
        &self,
        kind: QueueKind,
        start: u64,
        count: u64,
    ) -> Result<QueuePage, String> {
        let LinkedListStorage::scanReturn { entries, nextIndex } = self
            .linked_list()
            .scan(kind.namespace(), U256::from(start), U256::from(count))
            .call()
            .await
            .map_err(contract_error)?;
        Ok(QueuePage {
            entries: entries
                .into_iter()
                .map(|e| QueueEntry {
                    receiver: e.receiver,
                    validator_id: e.validatorId,
                })
                .collect(),
            next_index: to_u64(nextIndex)?,
        })
    }
}

/// Execution client over an HTTP JSON-RPC endpoint.
pub struct AlloyExecutionClient {
    provider: P,
}

impl AlloyExecutionClient {
    pub fn new(rpc_url: &str) -> Result<Self, String> {
        let url = rpc_url.parse::<reqwest::Url>().map_err(|e| e.to_string())?;
        let provider: P = ProviderBuilder::new().on_http(url);
        Ok(Self { provider })
    }

    /// The configured primary endpoint plus the fallback, if any, probed once.
    pub async fn connect(config: &Config) -> Result<DualExecutionClient<Self>, String> {
        let primary = Self::new(&config.rpc_url)?;
        let fallback = config
            .fallback_rpc_url
            .as_deref()
            .map(Self::new)
            .transpose()?;
        Ok(DualExecutionClient::connect(primary, fallback).await)
    }
}

#[async_trait]
impl ExecutionClient for AlloyExecutionClient {
    async fn chain_id(&self) -> Result<u64, String> {
        self.provider.get_chain_id().await.map_err(|e| e.to_string())
    }

    async fn balance_at(&self, address: Address) -> Result<U256, String> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|e| e.to_string())
    }

    async fn estimate_gas(&self, from: Address, call: &PreparedCall) -> Result<u64, String> {
        let request = TransactionRequest {
            from: Some(from),
            to: Some(TxKind::Call(call.to)),
            value: Some(call.value),
            input: TransactionInput::new(call.data.clone()),
            ..Default::default()
        };
        let gas = self
            .provider
            .estimate_gas(&request)
            .await
            .map_err(|e| e.to_string())?;
        u64::try_from(gas).map_err(|e| e.to_string())
    }

    async fn nonce_at(&self, address: Address) -> Result<u64, String> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(|e| e.to_string())
    }

    async fn latest_block_timestamp(&self) -> Result<u64, String> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest, false)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "latest block not available".to_string())?;
        Ok(block.header.timestamp)
    }

    async fn send_transaction(&self, signed: &Bytes) -> Result<B256, String> {
        let pending = self
            .provider
            .send_raw_transaction(signed)
            .await
            .map_err(|e| e.to_string())?;
        Ok(*pending.tx_hash())
    }
}
