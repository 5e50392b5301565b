use crate::clients::{ExecutionClient, NodeWallet};
use alloy_primitives::{Address, Bytes, B256, U256};
use megapool_utils::MegapoolError;
use serde::{Deserialize, Serialize};
use slog::{info, Logger};
use std::sync::Arc;

/// A contract call ready to be estimated or submitted.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub description: &'static str,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasInfo {
    pub estimated_gas_limit: u64,
    pub safe_gas_limit: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub gas_limit: u64,
    pub value: U256,
    pub data: Bytes,
}

/// Estimates and submits prepared calls. Nothing else in the crate signs or broadcasts.
pub struct TransactionPreparer {
    execution: Arc<dyn ExecutionClient>,
    wallet: Arc<dyn NodeWallet>,
    chain_id: u64,
    gas_limit_multiplier: u64,
    log: Logger,
}

impl TransactionPreparer {
    pub fn new(
        execution: Arc<dyn ExecutionClient>,
        wallet: Arc<dyn NodeWallet>,
        chain_id: u64,
        gas_limit_multiplier: u64,
        log: Logger,
    ) -> Self {
        Self {
            execution,
            wallet,
            chain_id,
            gas_limit_multiplier,
            log,
        }
    }

    pub async fn estimate(
        &self,
        from: Address,
        call: &PreparedCall,
    ) -> Result<GasInfo, MegapoolError> {
        let estimated = self
            .execution
            .estimate_gas(from, call)
            .await
            .map_err(MegapoolError::GasEstimation)?;
        Ok(GasInfo {
            estimated_gas_limit: estimated,
            safe_gas_limit: estimated.saturating_mul(self.gas_limit_multiplier) / 100,
        })
    }

    /// Sign and broadcast `call`. With `nonce_override` the transaction replaces whatever is
    /// pending at that nonce instead of queueing behind it.
    pub async fn submit(
        &self,
        call: &PreparedCall,
        gas: GasInfo,
        nonce_override: Option<u64>,
    ) -> Result<B256, MegapoolError> {
        let from = self.wallet.node_account().map_err(MegapoolError::Submission)?;
        let nonce = match nonce_override {
            Some(nonce) => nonce,
            None => self
                .execution
                .nonce_at(from)
                .await
                .map_err(MegapoolError::Transport)?,
        };
        let tx = UnsignedTransaction {
            chain_id: self.chain_id,
            from,
            to: call.to,
            nonce,
            gas_limit: gas.safe_gas_limit,
            value: call.value,
            data: call.data.clone(),
        };
        let signed = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(MegapoolError::Submission)?;
        let tx_hash = self
            .execution
            .send_transaction(&signed)
            .await
            .map_err(MegapoolError::Submission)?;
        info!(
            self.log,
            "Submitted transaction";
            "call" => call.description,
            "to" => %call.to,
            "nonce" => nonce,
            "gas_limit" => gas.safe_gas_limit,
            "tx_hash" => %tx_hash,
        );
        Ok(tx_hash)
    }
}
