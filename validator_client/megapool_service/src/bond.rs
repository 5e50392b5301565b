//! Bond and debt arithmetic. Everything here is pure integer math over values that were
//! already read from chain.

use crate::admission::{ReduceBondDenial, RepayDebtDenial};
use alloy_primitives::U256;
use megapool_utils::{ether, GWEI};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BondSchedule {
    /// Bond for the first, second, ... validator.
    pub base_bond_array: Vec<U256>,
    /// Added for each validator past the base array.
    pub reduced_bond: U256,
}

impl Default for BondSchedule {
    fn default() -> Self {
        BondSchedule {
            base_bond_array: vec![ether(4), ether(8)],
            reduced_bond: ether(4),
        }
    }
}

impl BondSchedule {
    pub fn requirement(&self, validator_count: u32) -> U256 {
        let count = validator_count as usize;
        if count == 0 {
            return U256::ZERO;
        }
        match self.base_bond_array.last() {
            None => self.reduced_bond * U256::from(count),
            Some(_) if count <= self.base_bond_array.len() => self.base_bond_array[count - 1],
            Some(last) => {
                *last + self.reduced_bond * U256::from(count - self.base_bond_array.len())
            }
        }
    }

    /// ETH the node must add before it can host one more validator.
    pub fn new_validator_bond(&self, validator_count: u32, node_bond: U256) -> U256 {
        self.requirement(validator_count.saturating_add(1))
            .saturating_sub(node_bond)
    }
}

pub fn bond_requirement(validator_count: u32, schedule: &BondSchedule) -> U256 {
    schedule.requirement(validator_count)
}

pub fn reduce_bond_denial(
    node_bond: U256,
    requirement: U256,
    reduction: U256,
) -> Option<ReduceBondDenial> {
    if reduction.is_zero() {
        return Some(ReduceBondDenial::ZeroAmount);
    }
    match node_bond.checked_sub(reduction) {
        Some(remaining) if remaining >= requirement => None,
        _ => Some(ReduceBondDenial::NotEnoughBond),
    }
}

pub fn can_reduce_bond(node_bond: U256, requirement: U256, reduction: U256) -> bool {
    reduce_bond_denial(node_bond, requirement, reduction).is_none()
}

pub fn repay_debt_denial(
    debt: U256,
    amount: U256,
    liquid_balance: U256,
) -> Option<RepayDebtDenial> {
    if debt.is_zero() || amount.is_zero() || amount > debt {
        return Some(RepayDebtDenial::NotEnoughDebt);
    }
    if liquid_balance < amount {
        return Some(RepayDebtDenial::InsufficientBalance);
    }
    None
}

pub fn can_repay_debt(debt: U256, amount: U256, liquid_balance: U256) -> bool {
    repay_debt_denial(debt, amount, liquid_balance).is_none()
}

fn as_gwei_f64(wei: U256) -> f64 {
    u128::try_from(wei / U256::from(GWEI)).unwrap_or(u128::MAX) as f64
}

/// Share of the megapool's capital that is the node's own bond. Display only.
pub fn collateral_ratio(node_bond: U256, user_capital: U256) -> f64 {
    let total = node_bond.saturating_add(user_capital);
    if total.is_zero() {
        return 0.0;
    }
    as_gwei_f64(node_bond) / as_gwei_f64(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn default_schedule() {
        let schedule = BondSchedule::default();
        assert_eq!(bond_requirement(0, &schedule), U256::ZERO);
        assert_eq!(bond_requirement(1, &schedule), ether(4));
        assert_eq!(bond_requirement(2, &schedule), ether(8));
        assert_eq!(bond_requirement(3, &schedule), ether(12));
        assert_eq!(bond_requirement(10, &schedule), ether(40));
    }

    #[test]
    fn reduced_bond_past_base_array() {
        let schedule = BondSchedule {
            base_bond_array: vec![ether(4), ether(8)],
            reduced_bond: U256::from(1_500_000_000_000_000_000u128),
        };
        assert_eq!(
            schedule.requirement(4),
            ether(8) + U256::from(3_000_000_000_000_000_000u128)
        );
    }

    #[test]
    fn new_validator_top_up() {
        let schedule = BondSchedule::default();
        assert_eq!(schedule.new_validator_bond(0, U256::ZERO), ether(4));
        assert_eq!(schedule.new_validator_bond(1, ether(4)), ether(4));
        assert_eq!(schedule.new_validator_bond(1, ether(9)), U256::ZERO);
    }

    #[test]
    fn bond_below_requirement_cannot_reduce() {
        // 4 ETH bonded against an 8 ETH requirement
        assert_eq!(
            reduce_bond_denial(ether(4), ether(8), U256::from(1)),
            Some(ReduceBondDenial::NotEnoughBond)
        );
        assert!(!can_reduce_bond(ether(4), ether(8), ether(1)));
    }

    #[test]
    fn reduce_down_to_requirement() {
        assert!(can_reduce_bond(ether(12), ether(8), ether(4)));
        assert!(!can_reduce_bond(ether(12), ether(8), ether(4) + U256::from(1)));
        assert_eq!(
            reduce_bond_denial(ether(12), ether(8), U256::ZERO),
            Some(ReduceBondDenial::ZeroAmount)
        );
    }

    #[test]
    fn no_debt_to_repay() {
        assert_eq!(
            repay_debt_denial(U256::ZERO, U256::from(1), ether(10)),
            Some(RepayDebtDenial::NotEnoughDebt)
        );
    }

    #[test]
    fn repay_checks_balance() {
        assert_eq!(
            repay_debt_denial(ether(2), ether(1), ether(1) - U256::from(1)),
            Some(RepayDebtDenial::InsufficientBalance)
        );
        assert!(can_repay_debt(ether(2), ether(2), ether(2)));
        assert!(!can_repay_debt(ether(2), ether(3), ether(5)));
    }

    #[test]
    fn ratio_is_informational() {
        assert_eq!(collateral_ratio(U256::ZERO, U256::ZERO), 0.0);
        assert!((collateral_ratio(ether(4), ether(28)) - 0.125).abs() < 1e-9);
    }

    #[quickcheck]
    fn reduce_admissible_iff_remaining_covers_requirement(
        bond: u64,
        requirement: u64,
        amount: u64,
    ) -> bool {
        let (bond, requirement, amount) =
            (U256::from(bond), U256::from(requirement), U256::from(amount));
        let expected = !amount.is_zero() && bond >= amount && bond - amount >= requirement;
        can_reduce_bond(bond, requirement, amount) == expected
    }

    #[quickcheck]
    fn repay_admissible_iff_within_debt_and_balance(debt: u64, amount: u64, balance: u64) -> bool {
        let (debt, amount, balance) = (U256::from(debt), U256::from(amount), U256::from(balance));
        let expected = !amount.is_zero() && amount <= debt && amount <= balance;
        can_repay_debt(debt, amount, balance) == expected
    }
}
