//! Two-phase results: every transition is first checked (and priced), then executed.

use crate::transaction::{GasInfo, PreparedCall};
use alloy_primitives::B256;
use beacon_proofs::ValidatorProof;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "camelCase")]
pub enum Verdict<D> {
    Admissible,
    Denied(D),
}

/// Result of a `can_*` dry run.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanResponse<D> {
    pub verdict: Verdict<D>,
    /// Present only when the transition is admissible.
    pub gas_info: Option<GasInfo>,
}

impl<D: PartialEq> CanResponse<D> {
    pub fn admissible(&self) -> bool {
        self.verdict == Verdict::Admissible
    }

    pub fn denied_because(&self, reason: &D) -> bool {
        matches!(&self.verdict, Verdict::Denied(d) if d == reason)
    }

    pub fn denied(reason: D) -> Self {
        CanResponse {
            verdict: Verdict::Denied(reason),
            gas_info: None,
        }
    }
}

/// Result of executing a transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "camelCase")]
pub enum Execution<D, T = B256> {
    Submitted(T),
    Denied(D),
}

impl<D, T> Execution<D, T> {
    pub fn submitted(&self) -> Option<&T> {
        match self {
            Execution::Submitted(value) => Some(value),
            Execution::Denied(_) => None,
        }
    }

    pub fn denial(&self) -> Option<&D> {
        match self {
            Execution::Submitted(_) => None,
            Execution::Denied(reason) => Some(reason),
        }
    }
}

/// Outcome of precondition evaluation, shared by both phases.
pub(crate) enum Plan<D> {
    Ready(PreparedCall),
    /// Admissible only while the validator record behind the proof is unchanged at submission.
    Proven(PreparedCall, ValidatorProof),
    Denied(D),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeployDenial {
    NotRegistered,
    AlreadyDeployed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StakeDenial {
    NotDeployed,
    /// The megapool has no validator with this id.
    UnknownValidator,
    Dissolved,
    NotInPrestake,
    /// The beacon chain does not know the validator yet.
    IndexNotFound,
    /// Deposited with credentials other than the megapool's. Dissolve instead.
    InvalidCredentials,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DissolveDenial {
    NotDeployed,
    UnknownValidator,
    Dissolved,
    NotInPrestake,
    IndexNotFound,
    ValidCredentials,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DissolveValidatorDenial {
    NotDeployed,
    UnknownValidator,
    Dissolved,
    NotInPrestake,
    /// The dissolve period since assignment has not passed yet.
    TooEarly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DequeueDenial {
    NotDeployed,
    UnknownValidator,
    NotInQueue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NotifyExitDenial {
    NotDeployed,
    UnknownValidator,
    Dissolved,
    NotStaking,
    IndexNotFound,
    /// No exit visible in finalized beacon state.
    ExitNotInitiated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FinalBalanceDenial {
    NotDeployed,
    UnknownValidator,
    Dissolved,
    NotExiting,
    IndexNotFound,
    /// Target slot is before the withdrawable epoch.
    SlotTooEarly,
    /// The withdrawable epoch is not finalized yet.
    NotYetWithdrawable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DistributeDenial {
    NotDeployed,
    NeverStaked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClaimRefundDenial {
    NotDeployed,
    NoRefund,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReduceBondDenial {
    NotDeployed,
    ZeroAmount,
    NotEnoughBond,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RepayDebtDenial {
    NotDeployed,
    NotEnoughDebt,
    InsufficientBalance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DelegateDenial {
    NotDeployed,
    /// The requested setting or delegate is already in effect.
    Unchanged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExitValidatorDenial {
    NotDeployed,
    UnknownValidator,
    NotStaking,
    IndexNotFound,
    NotActive,
    AlreadyExiting,
}

/// Denials shared by every transition that addresses a single validator.
pub(crate) trait ValidatorLookupDenial {
    fn not_deployed() -> Self;
    fn unknown_validator() -> Self;
}

macro_rules! validator_lookup_denial {
    ($($denial:ty),*) => {
        $(
            impl ValidatorLookupDenial for $denial {
                fn not_deployed() -> Self {
                    Self::NotDeployed
                }

                fn unknown_validator() -> Self {
                    Self::UnknownValidator
                }
            }
        )*
    };
}

validator_lookup_denial!(
    StakeDenial,
    DissolveDenial,
    DissolveValidatorDenial,
    DequeueDenial,
    NotifyExitDenial,
    FinalBalanceDenial,
    ExitValidatorDenial
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_serializes_as_reason_flag() {
        let response = CanResponse::<StakeDenial>::denied(StakeDenial::NotInPrestake);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["verdict"]["status"], "denied");
        assert_eq!(json["verdict"]["reason"], "notInPrestake");
        assert!(json["gasInfo"].is_null());
        assert!(response.denied_because(&StakeDenial::NotInPrestake));
        assert!(!response.admissible());
    }

    #[test]
    fn admissible_carries_gas() {
        let response = CanResponse::<DeployDenial> {
            verdict: Verdict::Admissible,
            gas_info: Some(GasInfo {
                estimated_gas_limit: 100,
                safe_gas_limit: 150,
            }),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["verdict"]["status"], "admissible");
        assert_eq!(json["gasInfo"]["safeGasLimit"], 150);
    }
}
