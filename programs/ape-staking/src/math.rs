//! Checked fixed-point helpers shared by every pool.
//!
//! Amounts are `u128`; anything multiplied by a 1e18-scaled index is carried
//! in `U256` so that 18-decimal balances cannot overflow the product.

use std::io::{Read, Write};

use borsh::{BorshDeserialize, BorshSerialize};
use ruint::aliases::U256;

use crate::error::{StakingError, StakingResult};

/// Precision multiplier for reward-per-share and reward-per-nft indices (1e18).
pub const PRECISION: u128 = 1_000_000_000_000_000_000;

pub const BPS_DENOMINATOR: u128 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Down,
    Up,
}

pub fn precision() -> U256 {
    U256::from(PRECISION)
}

pub fn to_u128(value: U256) -> StakingResult<u128> {
    u128::try_from(value).map_err(|_| StakingError::Overflow)
}

/// `a * b / denominator` with a 256-bit intermediate.
pub fn mul_div(a: u128, b: u128, denominator: u128, rounding: Rounding) -> StakingResult<u128> {
    if denominator == 0 {
        return Err(StakingError::Overflow);
    }
    let product = U256::from(a)
        .checked_mul(U256::from(b))
        .ok_or(StakingError::Overflow)?;
    let denominator = U256::from(denominator);
    let mut quotient = product / denominator;
    if rounding == Rounding::Up && !(product % denominator).is_zero() {
        quotient = quotient
            .checked_add(U256::from(1u8))
            .ok_or(StakingError::Overflow)?;
    }
    to_u128(quotient)
}

/// Protocol fee on a realized reward, rounded down.
pub fn calculate_fee(amount: u128, fee_bps: u16) -> StakingResult<u128> {
    mul_div(amount, fee_bps as u128, BPS_DENOMINATOR, Rounding::Down)
}

pub fn percent_mul(amount: u128, bps: u16) -> StakingResult<u128> {
    mul_div(amount, bps as u128, BPS_DENOMINATOR, Rounding::Down)
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// Monotonic 1e18-scaled accumulator value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Index(pub U256);

impl Index {
    pub const ZERO: Index = Index(U256::ZERO);

    pub fn value(&self) -> U256 {
        self.0
    }

    /// `self + amount * PRECISION / divisor`, rounded down.
    pub fn accrue(&self, amount: u128, divisor: u128) -> StakingResult<Index> {
        if divisor == 0 {
            return Err(StakingError::NothingStaked);
        }
        let delta = U256::from(amount)
            .checked_mul(precision())
            .ok_or(StakingError::Overflow)?
            / U256::from(divisor);
        self.0
            .checked_add(delta)
            .map(Index)
            .ok_or(StakingError::Overflow)
    }

    /// Whole units accrued since `snapshot`: `(self - snapshot) / PRECISION`.
    pub fn units_since(&self, snapshot: &Index) -> StakingResult<u128> {
        let delta = self
            .0
            .checked_sub(snapshot.0)
            .ok_or(StakingError::RewardsDebtUnderflow)?;
        to_u128(delta / precision())
    }
}

impl BorshSerialize for Index {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.0.to_le_bytes::<32>())
    }
}

impl BorshDeserialize for Index {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let bytes = <[u8; 32]>::deserialize_reader(reader)?;
        Ok(Index(U256::from_le_bytes(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_mul_div_rounding() {
        assert_eq!(mul_div(10, 1, 3, Rounding::Down).unwrap(), 3);
        assert_eq!(mul_div(10, 1, 3, Rounding::Up).unwrap(), 4);
        assert_eq!(mul_div(9, 1, 3, Rounding::Up).unwrap(), 3);
        assert!(mul_div(1, 1, 0, Rounding::Down).is_err());
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // 10_094 APE at 18 decimals times 1e18 overflows u128 on its own.
        let amount = 10_094 * PRECISION;
        assert_eq!(mul_div(amount, PRECISION, PRECISION, Rounding::Down).unwrap(), amount);
    }

    #[test]
    fn test_fee_calculation() {
        // 500 bps = 5% of 1000
        assert_eq!(calculate_fee(1_000, 500).unwrap(), 50);
        assert_eq!(calculate_fee(1_000, 0).unwrap(), 0);
        // rounds down in favour of the payer of the reward split
        assert_eq!(calculate_fee(19, 500).unwrap(), 0);
        assert_eq!(calculate_fee(1_000_000, 1_000).unwrap(), 100_000);
    }

    #[test]
    fn test_index_accrue_and_units() {
        let index = Index::ZERO.accrue(100, 6).unwrap();
        assert_eq!(index.value(), U256::from(100 * PRECISION / 6));
        assert_eq!(index.units_since(&Index::ZERO).unwrap(), 16);
        assert_eq!(Index::ZERO.accrue(1, 0), Err(StakingError::NothingStaked));
    }

    #[test]
    fn test_index_units_since_rejects_future_snapshot() {
        let later = Index::ZERO.accrue(5, 1).unwrap();
        assert_eq!(
            Index::ZERO.units_since(&later),
            Err(StakingError::RewardsDebtUnderflow)
        );
    }

    #[test]
    fn test_index_borsh_size() {
        let index = Index::ZERO.accrue(7, 3).unwrap();
        let bytes = borsh::to_vec(&index).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(Index::try_from_slice(&bytes).unwrap(), index);
    }

    proptest! {
        #[test]
        fn test_accrue_never_decreases(
            start in any::<u128>(),
            steps in prop::collection::vec((0u128..u64::MAX as u128, 1u128..u64::MAX as u128), 1..32),
        ) {
            let mut index = Index(U256::from(start));
            for (amount, divisor) in steps {
                let next = index.accrue(amount, divisor).unwrap();
                prop_assert!(next >= index);
                prop_assert!(next.units_since(&index).is_ok());
                index = next;
            }
        }
    }
}
