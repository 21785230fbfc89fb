//! Reward-per-share position accounting with signed reward debt.
//!
//! `rewards_debt` tracks `Σ amount * index` at entry. A partial unstake removes
//! `amount * current_index`, which can leave the debt negative while the
//! remaining stake still owes out the rewards accrued by the removed part.

use std::io::{Read, Write};

use borsh::{BorshDeserialize, BorshSerialize};
use ruint::aliases::U256;

use crate::error::{StakingError, StakingResult};
use crate::math::{precision, to_u128, Index};

/// Two's-complement signed value over `U256`, scaled like `amount * index`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignedDebt(U256);

impl SignedDebt {
    pub const ZERO: SignedDebt = SignedDebt(U256::ZERO);

    pub fn is_negative(&self) -> bool {
        self.0.bit(255)
    }

    pub fn magnitude(&self) -> U256 {
        if self.is_negative() {
            self.0.wrapping_neg()
        } else {
            self.0
        }
    }

    pub fn add(&self, value: U256) -> StakingResult<SignedDebt> {
        if value.bit(255) {
            return Err(StakingError::Overflow);
        }
        let sum = self.0.wrapping_add(value);
        // positive + positive must stay positive
        if !self.is_negative() && sum.bit(255) {
            return Err(StakingError::Overflow);
        }
        Ok(SignedDebt(sum))
    }

    pub fn sub(&self, value: U256) -> StakingResult<SignedDebt> {
        if value.bit(255) {
            return Err(StakingError::Overflow);
        }
        let diff = self.0.wrapping_sub(value);
        // negative - positive must stay negative
        if self.is_negative() && !diff.bit(255) {
            return Err(StakingError::Overflow);
        }
        Ok(SignedDebt(diff))
    }

    pub fn from_unsigned(value: U256) -> StakingResult<SignedDebt> {
        SignedDebt::ZERO.add(value)
    }

    /// `accrued - self`, failing when the debt exceeds what was accrued.
    pub fn subtract_from(&self, accrued: U256) -> StakingResult<U256> {
        if self.is_negative() {
            accrued
                .checked_add(self.magnitude())
                .ok_or(StakingError::Overflow)
        } else {
            accrued
                .checked_sub(self.0)
                .ok_or(StakingError::RewardsDebtUnderflow)
        }
    }

    /// Lossy view for logs and small-value tests.
    pub fn to_i128(&self) -> Option<i128> {
        let magnitude = i128::try_from(self.magnitude()).ok()?;
        Some(if self.is_negative() { -magnitude } else { magnitude })
    }
}

impl BorshSerialize for SignedDebt {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.0.to_le_bytes::<32>())
    }
}

impl BorshDeserialize for SignedDebt {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let bytes = <[u8; 32]>::deserialize_reader(reader)?;
        Ok(SignedDebt(U256::from_le_bytes(bytes)))
    }
}

fn scaled(amount: u128, index: &Index) -> StakingResult<U256> {
    U256::from(amount)
        .checked_mul(index.value())
        .ok_or(StakingError::Overflow)
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub staked_amount: u128,
    pub rewards_debt: SignedDebt,
}

impl Position {
    // 16 + 32 = 48
    pub const SIZE: usize = 48;

    pub fn stake(&mut self, amount: u128, index: &Index) -> StakingResult<()> {
        self.staked_amount = self
            .staked_amount
            .checked_add(amount)
            .ok_or(StakingError::Overflow)?;
        self.rewards_debt = self.rewards_debt.add(scaled(amount, index)?)?;
        Ok(())
    }

    /// Removes `amount` of principal; rewards accrued so far stay claimable.
    pub fn unstake(&mut self, amount: u128, index: &Index) -> StakingResult<()> {
        self.staked_amount = self
            .staked_amount
            .checked_sub(amount)
            .ok_or(StakingError::InsufficientStake)?;
        self.rewards_debt = self.rewards_debt.sub(scaled(amount, index)?)?;
        Ok(())
    }

    /// Pending rewards still in index scale (`staked * index - debt`).
    pub fn pending_scaled(&self, index: &Index) -> StakingResult<U256> {
        self.rewards_debt
            .subtract_from(scaled(self.staked_amount, index)?)
    }

    pub fn pending(&self, index: &Index) -> StakingResult<u128> {
        to_u128(self.pending_scaled(index)? / precision())
    }

    /// Pays out the pending rewards and resets the debt to `staked * index`.
    pub fn claim(&mut self, index: &Index) -> StakingResult<u128> {
        let rewards = self.pending(index)?;
        self.rewards_debt = SignedDebt::from_unsigned(scaled(self.staked_amount, index)?)?;
        Ok(rewards)
    }

    /// Folds a claim made on one member of an aggregate position.
    pub fn settle(&mut self, claimed_scaled: U256) -> StakingResult<()> {
        self.rewards_debt = self.rewards_debt.add(claimed_scaled)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::math::PRECISION;

    fn index(units: u128) -> Index {
        Index(U256::from(units) * precision())
    }

    #[test]
    fn test_signed_debt_goes_negative() {
        let debt = SignedDebt::ZERO.sub(U256::from(5u8)).unwrap();
        assert!(debt.is_negative());
        assert_eq!(debt.to_i128(), Some(-5));
        let back = debt.add(U256::from(8u8)).unwrap();
        assert!(!back.is_negative());
        assert_eq!(back.to_i128(), Some(3));
    }

    #[test]
    fn test_stake_then_claim() {
        let mut position = Position::default();
        position.stake(100, &index(1)).unwrap();
        assert_eq!(position.pending(&index(1)).unwrap(), 0);
        assert_eq!(position.pending(&index(3)).unwrap(), 200);
        assert_eq!(position.claim(&index(3)).unwrap(), 200);
        assert_eq!(position.pending(&index(3)).unwrap(), 0);
    }

    #[test]
    fn test_partial_unstake_keeps_rewards_and_turns_debt_negative() {
        let mut position = Position::default();
        // staked at index 0, debt 0
        position.stake(100, &Index::ZERO).unwrap();
        // index moves to 2: 200 pending
        position.unstake(60, &index(2)).unwrap();
        assert_eq!(position.staked_amount, 40);
        assert!(position.rewards_debt.is_negative());
        assert_eq!(position.rewards_debt.to_i128(), Some(-(120 * PRECISION as i128)));
        // the unstaked part's rewards are still owed
        assert_eq!(position.pending(&index(2)).unwrap(), 200);
        // and the remaining stake keeps accruing
        assert_eq!(position.pending(&index(3)).unwrap(), 240);
        assert_eq!(position.claim(&index(3)).unwrap(), 240);
        assert!(!position.rewards_debt.is_negative());
    }

    #[test]
    fn test_aggregate_matches_members_across_signs() {
        // Two members of one aggregate at different entry indices.
        let mut aggregate = Position::default();
        let mut a = Position::default();
        let mut b = Position::default();
        a.stake(30, &index(1)).unwrap();
        aggregate.stake(30, &index(1)).unwrap();
        b.stake(70, &index(4)).unwrap();
        aggregate.stake(70, &index(4)).unwrap();

        let at = index(9);
        let member_sum = a.pending_scaled(&at).unwrap() + b.pending_scaled(&at).unwrap();
        assert_eq!(aggregate.pending_scaled(&at).unwrap(), member_sum);

        // member `a` claims and leaves fully
        let claimed = a.pending_scaled(&at).unwrap();
        aggregate.settle(claimed).unwrap();
        aggregate.unstake(30, &at).unwrap();
        assert_eq!(aggregate.staked_amount, 70);
        assert_eq!(aggregate.pending_scaled(&at).unwrap(), b.pending_scaled(&at).unwrap());
    }

    #[test]
    fn test_unstake_more_than_staked() {
        let mut position = Position::default();
        position.stake(10, &Index::ZERO).unwrap();
        assert_eq!(position.unstake(11, &Index::ZERO), Err(StakingError::InsufficientStake));
    }

    #[test]
    fn test_position_size() {
        let bytes = borsh::to_vec(&Position::default()).unwrap();
        assert_eq!(bytes.len(), Position::SIZE);
    }

    const MEMBERS: usize = 3;

    #[derive(Debug, Clone)]
    enum Action {
        Accrue { amount: u64, divisor: u64 },
        Stake { member: usize, amount: u64 },
        Unstake { member: usize, amount: u64 },
        Claim { member: usize },
    }

    prop_compose! {
        fn action_strategy()(
            tag in 0u8..4,
            member in 0usize..MEMBERS,
            amount in 1u64..10_000,
            divisor in 1u64..1_000,
        ) -> Action {
            match tag {
                0 => Action::Accrue { amount, divisor },
                1 => Action::Stake { member, amount },
                2 => Action::Unstake { member, amount },
                _ => Action::Claim { member },
            }
        }
    }

    proptest! {
        #[test]
        fn test_aggregate_tracks_member_sum(actions in prop::collection::vec(action_strategy(), 1..64)) {
            let mut at = Index::ZERO;
            let mut aggregate = Position::default();
            let mut members = [Position::default(); MEMBERS];

            for action in actions {
                match action {
                    Action::Accrue { amount, divisor } => {
                        at = at.accrue(amount as u128, divisor as u128).unwrap();
                    }
                    Action::Stake { member, amount } => {
                        members[member].stake(amount as u128, &at).unwrap();
                        aggregate.stake(amount as u128, &at).unwrap();
                    }
                    Action::Unstake { member, amount } => {
                        // clamp to the member's stake so full exits are exercised too
                        let amount = (amount as u128).min(members[member].staked_amount);
                        members[member].unstake(amount, &at).unwrap();
                        aggregate.unstake(amount, &at).unwrap();
                    }
                    Action::Claim { member } => {
                        let claimed = members[member].pending_scaled(&at).unwrap();
                        members[member].claim(&at).unwrap();
                        aggregate.settle(claimed).unwrap();
                    }
                }

                let staked: u128 = members.iter().map(|m| m.staked_amount).sum();
                prop_assert_eq!(aggregate.staked_amount, staked);
                let mut pending = U256::ZERO;
                for member in &members {
                    pending += member.pending_scaled(&at).unwrap();
                }
                prop_assert_eq!(aggregate.pending_scaled(&at).unwrap(), pending);
            }
        }
    }
}
