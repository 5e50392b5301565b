//! Fallback source for withdrawal proofs whose history the local beacon node has pruned.

use beacon_proofs::WithdrawalProof;
use megapool_utils::MegapoolError;
use reqwest::Client;
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct WithdrawalProofApi {
    client: Client,
    base: Url,
    network: String,
}

impl WithdrawalProofApi {
    pub fn new(base_url: &str, network: &str) -> Result<Self, MegapoolError> {
        let base = Url::parse(base_url).map_err(|e| {
            MegapoolError::Config(format!("withdrawal proof api {}: {}", base_url, e))
        })?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MegapoolError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base,
            network: network.to_string(),
        })
    }

    pub fn proof_url(
        &self,
        finalized_slot: u64,
        withdrawal_slot: u64,
        validator_index: u64,
    ) -> Result<Url, MegapoolError> {
        let url = format!(
            "{}/{}/withdrawals/proofs/{}/{}/{}",
            self.base.as_str().trim_end_matches('/'),
            self.network,
            finalized_slot,
            withdrawal_slot,
            validator_index
        );
        Url::parse(&url).map_err(|e| MegapoolError::Config(format!("{}: {}", url, e)))
    }

    /// The response is untrusted; callers must verify it before use.
    pub async fn fetch(
        &self,
        finalized_slot: u64,
        withdrawal_slot: u64,
        validator_index: u64,
    ) -> Result<WithdrawalProof, MegapoolError> {
        let url = self.proof_url(finalized_slot, withdrawal_slot, validator_index)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MegapoolError::Transport(format!("{}: {}", url, e)))?;
        response
            .json::<WithdrawalProof>()
            .await
            .map_err(|e| MegapoolError::Transport(format!("malformed proof from {}: {}", url, e)))
    }
}
