//! Pluggable reward-split and withdrawal-planning strategies.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::{StakingError, StakingResult};
use crate::math::{percent_mul, BPS_DENOMINATOR};

// ---------------------------------------------------------------------------
// Rewards strategy
// ---------------------------------------------------------------------------

/// How a collection's net rewards are split between the NFT pool and the
/// coin pool.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardsStrategy {
    Fixed { nft_share_bps: u16 },
    CoinPoolOnly,
}

impl RewardsStrategy {
    pub fn nft_rewards_share(&self) -> u16 {
        match self {
            RewardsStrategy::Fixed { nft_share_bps } => *nft_share_bps,
            RewardsStrategy::CoinPoolOnly => 0,
        }
    }

    pub fn validate(&self) -> StakingResult<()> {
        if self.nft_rewards_share() as u128 > BPS_DENOMINATOR {
            return Err(StakingError::InvalidRewardsShare);
        }
        Ok(())
    }

    /// Returns `(nft_pool_share, coin_pool_share)`; the coin pool keeps the
    /// rounding remainder.
    pub fn split(&self, net_rewards: u128) -> StakingResult<(u128, u128)> {
        let nft_share = percent_mul(net_rewards, self.nft_rewards_share())?;
        let coin_share = net_rewards
            .checked_sub(nft_share)
            .ok_or(StakingError::Overflow)?;
        Ok((nft_share, coin_share))
    }
}

// ---------------------------------------------------------------------------
// Withdraw strategy
// ---------------------------------------------------------------------------

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawStrategy {
    /// Refund, pool 0 rewards, pool 0 principal, then NFT positions.
    Waterfall,
    /// Stops after pool 0 principal.
    ApeCoinPoolOnly,
}

/// Coin-pool-attributable amounts available to a withdrawal, all net of fee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WithdrawBalances {
    pub refund: u128,
    pub ape_coin_rewards: u128,
    pub ape_coin_staked: u128,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WithdrawPlan {
    pub withdraw_refund: bool,
    pub claim_ape_coin: bool,
    pub unstake_ape_coin: u128,
    /// Still uncovered after pool 0; served from NFT positions if non-zero.
    pub nft_shortfall: u128,
}

impl WithdrawStrategy {
    pub fn plan(&self, required: u128, balances: &WithdrawBalances) -> WithdrawPlan {
        let mut plan = WithdrawPlan::default();
        let mut remaining = required;

        // outstanding refunds are drained whole, even when they overshoot
        if balances.refund > 0 {
            plan.withdraw_refund = true;
            remaining = remaining.saturating_sub(balances.refund);
        }
        if remaining > 0 && balances.ape_coin_rewards > 0 {
            plan.claim_ape_coin = true;
            remaining = remaining.saturating_sub(balances.ape_coin_rewards);
        }
        if remaining > 0 {
            plan.unstake_ape_coin = remaining.min(balances.ape_coin_staked);
            remaining -= plan.unstake_ape_coin;
        }
        if *self == WithdrawStrategy::Waterfall {
            plan.nft_shortfall = remaining;
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewards_split() {
        let strategy = RewardsStrategy::Fixed { nft_share_bps: 3_333 };
        let (nft, coin) = strategy.split(950).unwrap();
        assert_eq!(nft, 316);
        assert_eq!(coin, 634);
        assert_eq!(RewardsStrategy::CoinPoolOnly.split(950).unwrap(), (0, 950));
    }

    #[test]
    fn test_rewards_share_validation() {
        assert!(RewardsStrategy::Fixed { nft_share_bps: 10_000 }.validate().is_ok());
        assert_eq!(
            RewardsStrategy::Fixed { nft_share_bps: 10_001 }.validate(),
            Err(StakingError::InvalidRewardsShare)
        );
    }

    #[test]
    fn test_plan_refund_first_then_rewards_then_principal() {
        let balances = WithdrawBalances {
            refund: 100,
            ape_coin_rewards: 50,
            ape_coin_staked: 1_000,
        };
        let plan = WithdrawStrategy::Waterfall.plan(80, &balances);
        assert_eq!(
            plan,
            WithdrawPlan { withdraw_refund: true, ..WithdrawPlan::default() }
        );

        let plan = WithdrawStrategy::Waterfall.plan(140, &balances);
        assert!(plan.withdraw_refund && plan.claim_ape_coin);
        assert_eq!(plan.unstake_ape_coin, 0);

        let plan = WithdrawStrategy::Waterfall.plan(400, &balances);
        assert_eq!(plan.unstake_ape_coin, 250);
        assert_eq!(plan.nft_shortfall, 0);
    }

    #[test]
    fn test_plan_shortfall_depends_on_strategy() {
        let balances = WithdrawBalances {
            refund: 0,
            ape_coin_rewards: 0,
            ape_coin_staked: 100,
        };
        let waterfall = WithdrawStrategy::Waterfall.plan(300, &balances);
        assert!(!waterfall.withdraw_refund);
        assert!(!waterfall.claim_ape_coin);
        assert_eq!(waterfall.unstake_ape_coin, 100);
        assert_eq!(waterfall.nft_shortfall, 200);

        let pool_only = WithdrawStrategy::ApeCoinPoolOnly.plan(300, &balances);
        assert_eq!(pool_only.unstake_ape_coin, 100);
        assert_eq!(pool_only.nft_shortfall, 0);
    }
}
