//! Upstream ApeCoin staking primitive.
//!
//! Four pools share one reward-per-share accumulator each: pool 0 is keyed by
//! staker address, pools 1-3 are keyed by token id (pool 3 by the BAKC id of a
//! pair). A full withdrawal of a position also pays its pending rewards.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{msg, pubkey::Pubkey};

use crate::accumulator::Position;
use crate::error::{StakingError, StakingResult};
use crate::math::Index;
use crate::token::ApeCoin;
use crate::{APE_COIN_POOL_ID, BAKC_POOL_ID, BAYC_POOL_ID, MAYC_POOL_ID};

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleNft {
    pub token_id: u64,
    pub amount: u128,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairNft {
    pub main_token_id: u64,
    pub bakc_token_id: u64,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairNftWithAmount {
    pub main_token_id: u64,
    pub bakc_token_id: u64,
    pub amount: u128,
}

/// Proceeds of an upstream withdrawal.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Withdrawal {
    pub principal: u128,
    pub rewards: u128,
}

/// Staking backend consumed by the vault and the stake manager.
///
/// Implementations move ApeCoin through the supplied ledger: stakes are pulled
/// from `from`, withdrawals and claims are paid to `recipient`.
pub trait ApeCoinStaking {
    fn accumulated_rewards_per_share(&self, pool_id: u8) -> Index;

    /// Maximum principal per position; zero means uncapped.
    fn cap_per_position(&self, pool_id: u8) -> u128;

    fn address_position(&self, staker: &Pubkey) -> Position;

    fn nft_position(&self, pool_id: u8, token_id: u64) -> Position;

    /// For pool 0 `staker` selects the position, otherwise `token_id` does.
    fn pending_rewards(&self, pool_id: u8, staker: &Pubkey, token_id: u64) -> StakingResult<u128>;

    fn main_to_bakc(&self, main_pool_id: u8, main_token_id: u64) -> Option<u64>;

    fn bakc_to_main(&self, bakc_token_id: u64) -> Option<(u8, u64)>;

    fn stake_ape_coin(&mut self, ape_coin: &mut ApeCoin, staker: &Pubkey, amount: u128) -> StakingResult<()>;

    fn unstake_ape_coin(
        &mut self,
        ape_coin: &mut ApeCoin,
        staker: &Pubkey,
        amount: u128,
        recipient: &Pubkey,
    ) -> StakingResult<Withdrawal>;

    fn claim_ape_coin(&mut self, ape_coin: &mut ApeCoin, staker: &Pubkey, recipient: &Pubkey) -> StakingResult<u128>;

    fn stake(&mut self, ape_coin: &mut ApeCoin, from: &Pubkey, pool_id: u8, nfts: &[SingleNft]) -> StakingResult<()>;

    fn stake_pairs(
        &mut self,
        ape_coin: &mut ApeCoin,
        from: &Pubkey,
        main_pool_id: u8,
        pairs: &[PairNftWithAmount],
    ) -> StakingResult<()>;

    fn unstake(
        &mut self,
        ape_coin: &mut ApeCoin,
        pool_id: u8,
        nfts: &[SingleNft],
        recipient: &Pubkey,
    ) -> StakingResult<Withdrawal>;

    fn claim(&mut self, ape_coin: &mut ApeCoin, pool_id: u8, token_ids: &[u64], recipient: &Pubkey) -> StakingResult<u128>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StakingPool {
    pub accumulated_rewards_per_share: Index,
    pub staked_amount: u128,
    pub cap_per_position: u128,
}

/// Reward distribution is driven explicitly through
/// [`InMemoryApeCoinStaking::distribute_rewards`] instead of time ranges.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct InMemoryApeCoinStaking {
    address: Pubkey,
    pools: [StakingPool; 4],
    address_positions: BTreeMap<Pubkey, Position>,
    nft_positions: BTreeMap<(u8, u64), Position>,
    bakc_pairs: BTreeMap<u64, (u8, u64)>,
    main_pairs: BTreeMap<(u8, u64), u64>,
}

impl InMemoryApeCoinStaking {
    pub fn new(address: Pubkey, caps: [u128; 4]) -> Self {
        let mut pools = [StakingPool::default(); 4];
        for (pool, cap) in pools.iter_mut().zip(caps) {
            pool.cap_per_position = cap;
        }
        Self {
            address,
            pools,
            address_positions: BTreeMap::new(),
            nft_positions: BTreeMap::new(),
            bakc_pairs: BTreeMap::new(),
            main_pairs: BTreeMap::new(),
        }
    }

    pub fn pool(&self, pool_id: u8) -> StakingResult<&StakingPool> {
        self.pools.get(pool_id as usize).ok_or(StakingError::InvalidPoolId)
    }

    fn pool_mut(&mut self, pool_id: u8) -> StakingResult<&mut StakingPool> {
        self.pools
            .get_mut(pool_id as usize)
            .ok_or(StakingError::InvalidPoolId)
    }

    /// Mints `amount` of rewards into the backend and spreads it over the
    /// pool's current stake.
    pub fn distribute_rewards(&mut self, ape_coin: &mut ApeCoin, pool_id: u8, amount: u128) -> StakingResult<()> {
        let pool = self.pool_mut(pool_id)?;
        if pool.staked_amount == 0 {
            return Err(StakingError::NothingStaked);
        }
        pool.accumulated_rewards_per_share = pool
            .accumulated_rewards_per_share
            .accrue(amount, pool.staked_amount)?;
        let index = pool.accumulated_rewards_per_share;
        ape_coin.mint(&self.address, amount)?;

        msg!(
            "EVENT:UpstreamRewardsDistributed:{{\"pool_id\":{},\"amount\":{},\"index\":\"{}\"}}",
            pool_id,
            amount,
            index.value(),
        );
        Ok(())
    }

    fn check_cap(&self, pool_id: u8, staked: u128) -> StakingResult<()> {
        let cap = self.pool(pool_id)?.cap_per_position;
        if cap > 0 && staked > cap {
            return Err(StakingError::ExceedsCap);
        }
        Ok(())
    }

    fn add_stake(&mut self, pool_id: u8, amount: u128) -> StakingResult<()> {
        let pool = self.pool_mut(pool_id)?;
        pool.staked_amount = pool
            .staked_amount
            .checked_add(amount)
            .ok_or(StakingError::Overflow)?;
        Ok(())
    }

    fn remove_stake(&mut self, pool_id: u8, amount: u128) -> StakingResult<()> {
        let pool = self.pool_mut(pool_id)?;
        pool.staked_amount = pool
            .staked_amount
            .checked_sub(amount)
            .ok_or(StakingError::InsufficientStake)?;
        Ok(())
    }

    /// Applies a withdrawal to one position; full exits also claim.
    fn withdraw_position(position: &mut Position, amount: u128, index: &Index) -> StakingResult<Withdrawal> {
        if amount == 0 || amount > position.staked_amount {
            return Err(StakingError::InsufficientStake);
        }
        let rewards = if amount == position.staked_amount {
            position.claim(index)?
        } else {
            0
        };
        position.unstake(amount, index)?;
        Ok(Withdrawal { principal: amount, rewards })
    }
}

fn validate_nft_pool(pool_id: u8) -> StakingResult<()> {
    match pool_id {
        BAYC_POOL_ID | MAYC_POOL_ID | BAKC_POOL_ID => Ok(()),
        _ => Err(StakingError::InvalidPoolId),
    }
}

impl ApeCoinStaking for InMemoryApeCoinStaking {
    fn accumulated_rewards_per_share(&self, pool_id: u8) -> Index {
        self.pool(pool_id)
            .map(|pool| pool.accumulated_rewards_per_share)
            .unwrap_or_default()
    }

    fn cap_per_position(&self, pool_id: u8) -> u128 {
        self.pool(pool_id).map(|pool| pool.cap_per_position).unwrap_or(0)
    }

    fn address_position(&self, staker: &Pubkey) -> Position {
        self.address_positions.get(staker).copied().unwrap_or_default()
    }

    fn nft_position(&self, pool_id: u8, token_id: u64) -> Position {
        self.nft_positions
            .get(&(pool_id, token_id))
            .copied()
            .unwrap_or_default()
    }

    fn pending_rewards(&self, pool_id: u8, staker: &Pubkey, token_id: u64) -> StakingResult<u128> {
        let index = self.accumulated_rewards_per_share(pool_id);
        let position = if pool_id == APE_COIN_POOL_ID {
            self.address_position(staker)
        } else {
            self.nft_position(pool_id, token_id)
        };
        position.pending(&index)
    }

    fn main_to_bakc(&self, main_pool_id: u8, main_token_id: u64) -> Option<u64> {
        self.main_pairs.get(&(main_pool_id, main_token_id)).copied()
    }

    fn bakc_to_main(&self, bakc_token_id: u64) -> Option<(u8, u64)> {
        self.bakc_pairs.get(&bakc_token_id).copied()
    }

    fn stake_ape_coin(&mut self, ape_coin: &mut ApeCoin, staker: &Pubkey, amount: u128) -> StakingResult<()> {
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }
        let index = self.accumulated_rewards_per_share(APE_COIN_POOL_ID);
        let mut position = self.address_position(staker);
        position.stake(amount, &index)?;
        self.check_cap(APE_COIN_POOL_ID, position.staked_amount)?;

        ape_coin.transfer(staker, &self.address, amount)?;
        self.add_stake(APE_COIN_POOL_ID, amount)?;
        self.address_positions.insert(*staker, position);
        Ok(())
    }

    fn unstake_ape_coin(
        &mut self,
        ape_coin: &mut ApeCoin,
        staker: &Pubkey,
        amount: u128,
        recipient: &Pubkey,
    ) -> StakingResult<Withdrawal> {
        let index = self.accumulated_rewards_per_share(APE_COIN_POOL_ID);
        let mut position = self.address_position(staker);
        let withdrawal = Self::withdraw_position(&mut position, amount, &index)?;
        self.remove_stake(APE_COIN_POOL_ID, amount)?;
        self.address_positions.insert(*staker, position);

        let total = withdrawal
            .principal
            .checked_add(withdrawal.rewards)
            .ok_or(StakingError::Overflow)?;
        ape_coin.transfer(&self.address, recipient, total)?;
        Ok(withdrawal)
    }

    fn claim_ape_coin(&mut self, ape_coin: &mut ApeCoin, staker: &Pubkey, recipient: &Pubkey) -> StakingResult<u128> {
        let index = self.accumulated_rewards_per_share(APE_COIN_POOL_ID);
        let mut position = self.address_position(staker);
        let rewards = position.claim(&index)?;
        self.address_positions.insert(*staker, position);
        ape_coin.transfer(&self.address, recipient, rewards)?;
        Ok(rewards)
    }

    fn stake(&mut self, ape_coin: &mut ApeCoin, from: &Pubkey, pool_id: u8, nfts: &[SingleNft]) -> StakingResult<()> {
        if pool_id != BAYC_POOL_ID && pool_id != MAYC_POOL_ID {
            return Err(StakingError::InvalidPoolId);
        }
        let index = self.accumulated_rewards_per_share(pool_id);
        let mut total: u128 = 0;
        for nft in nfts {
            if nft.amount == 0 {
                return Err(StakingError::ZeroAmount);
            }
            let mut position = self.nft_position(pool_id, nft.token_id);
            position.stake(nft.amount, &index)?;
            self.check_cap(pool_id, position.staked_amount)?;
            self.nft_positions.insert((pool_id, nft.token_id), position);
            total = total.checked_add(nft.amount).ok_or(StakingError::Overflow)?;
        }
        ape_coin.transfer(from, &self.address, total)?;
        self.add_stake(pool_id, total)
    }

    fn stake_pairs(
        &mut self,
        ape_coin: &mut ApeCoin,
        from: &Pubkey,
        main_pool_id: u8,
        pairs: &[PairNftWithAmount],
    ) -> StakingResult<()> {
        if main_pool_id != BAYC_POOL_ID && main_pool_id != MAYC_POOL_ID {
            return Err(StakingError::InvalidPoolId);
        }
        let index = self.accumulated_rewards_per_share(BAKC_POOL_ID);
        let mut total: u128 = 0;
        for pair in pairs {
            if pair.amount == 0 {
                return Err(StakingError::ZeroAmount);
            }
            let main = (main_pool_id, pair.main_token_id);
            match self.bakc_pairs.get(&pair.bakc_token_id) {
                Some(existing) if *existing != main => return Err(StakingError::NftAlreadyPaired),
                _ => {}
            }
            match self.main_pairs.get(&main) {
                Some(existing) if *existing != pair.bakc_token_id => {
                    return Err(StakingError::NftAlreadyPaired)
                }
                _ => {}
            }
            let mut position = self.nft_position(BAKC_POOL_ID, pair.bakc_token_id);
            position.stake(pair.amount, &index)?;
            self.check_cap(BAKC_POOL_ID, position.staked_amount)?;
            self.nft_positions.insert((BAKC_POOL_ID, pair.bakc_token_id), position);
            self.bakc_pairs.insert(pair.bakc_token_id, main);
            self.main_pairs.insert(main, pair.bakc_token_id);
            total = total.checked_add(pair.amount).ok_or(StakingError::Overflow)?;
        }
        ape_coin.transfer(from, &self.address, total)?;
        self.add_stake(BAKC_POOL_ID, total)
    }

    fn unstake(
        &mut self,
        ape_coin: &mut ApeCoin,
        pool_id: u8,
        nfts: &[SingleNft],
        recipient: &Pubkey,
    ) -> StakingResult<Withdrawal> {
        validate_nft_pool(pool_id)?;
        let index = self.accumulated_rewards_per_share(pool_id);
        let mut proceeds = Withdrawal::default();
        for nft in nfts {
            let mut position = self.nft_position(pool_id, nft.token_id);
            let withdrawal = Self::withdraw_position(&mut position, nft.amount, &index)?;
            self.nft_positions.insert((pool_id, nft.token_id), position);
            if pool_id == BAKC_POOL_ID && position.staked_amount == 0 {
                if let Some(main) = self.bakc_pairs.remove(&nft.token_id) {
                    self.main_pairs.remove(&main);
                }
            }
            self.remove_stake(pool_id, withdrawal.principal)?;
            proceeds.principal = proceeds
                .principal
                .checked_add(withdrawal.principal)
                .ok_or(StakingError::Overflow)?;
            proceeds.rewards = proceeds
                .rewards
                .checked_add(withdrawal.rewards)
                .ok_or(StakingError::Overflow)?;
        }
        let total = proceeds
            .principal
            .checked_add(proceeds.rewards)
            .ok_or(StakingError::Overflow)?;
        ape_coin.transfer(&self.address, recipient, total)?;
        Ok(proceeds)
    }

    fn claim(&mut self, ape_coin: &mut ApeCoin, pool_id: u8, token_ids: &[u64], recipient: &Pubkey) -> StakingResult<u128> {
        validate_nft_pool(pool_id)?;
        let index = self.accumulated_rewards_per_share(pool_id);
        let mut rewards: u128 = 0;
        for token_id in token_ids {
            let mut position = self.nft_position(pool_id, *token_id);
            if position.staked_amount == 0 {
                return Err(StakingError::NftNotStaking);
            }
            let claimed = position.claim(&index)?;
            self.nft_positions.insert((pool_id, *token_id), position);
            rewards = rewards.checked_add(claimed).ok_or(StakingError::Overflow)?;
        }
        ape_coin.transfer(&self.address, recipient, rewards)?;
        Ok(rewards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::SignedDebt;
    use crate::math::precision;

    fn setup() -> (InMemoryApeCoinStaking, ApeCoin, Pubkey) {
        let staker = Pubkey::new_unique();
        let mut ape = ApeCoin::default();
        ape.mint(&staker, 1_000_000).unwrap();
        let staking = InMemoryApeCoinStaking::new(Pubkey::new_unique(), [0, 10_094, 2_042, 856]);
        (staking, ape, staker)
    }

    #[test]
    fn test_nft_rewards_split_by_stake() {
        let (mut staking, mut ape, staker) = setup();
        staking
            .stake(
                &mut ape,
                &staker,
                BAYC_POOL_ID,
                &[
                    SingleNft { token_id: 1, amount: 1_000 },
                    SingleNft { token_id: 2, amount: 3_000 },
                ],
            )
            .unwrap();
        staking.distribute_rewards(&mut ape, BAYC_POOL_ID, 400).unwrap();
        assert_eq!(staking.pending_rewards(BAYC_POOL_ID, &staker, 1).unwrap(), 100);
        assert_eq!(staking.pending_rewards(BAYC_POOL_ID, &staker, 2).unwrap(), 300);

        let claimed = staking.claim(&mut ape, BAYC_POOL_ID, &[2], &staker).unwrap();
        assert_eq!(claimed, 300);
        assert_eq!(staking.pending_rewards(BAYC_POOL_ID, &staker, 2).unwrap(), 0);
    }

    #[test]
    fn test_cap_enforced() {
        let (mut staking, mut ape, staker) = setup();
        let result = staking.stake(
            &mut ape,
            &staker,
            MAYC_POOL_ID,
            &[SingleNft { token_id: 1, amount: 2_043 }],
        );
        assert_eq!(result, Err(StakingError::ExceedsCap));
    }

    #[test]
    fn test_full_unstake_pays_rewards_partial_does_not() {
        let (mut staking, mut ape, staker) = setup();
        staking.stake_ape_coin(&mut ape, &staker, 1_000).unwrap();
        staking.distribute_rewards(&mut ape, APE_COIN_POOL_ID, 50).unwrap();

        let partial = staking.unstake_ape_coin(&mut ape, &staker, 400, &staker).unwrap();
        assert_eq!(partial, Withdrawal { principal: 400, rewards: 0 });
        assert_eq!(staking.pending_rewards(APE_COIN_POOL_ID, &staker, 0).unwrap(), 50);

        let full = staking.unstake_ape_coin(&mut ape, &staker, 600, &staker).unwrap();
        assert_eq!(full, Withdrawal { principal: 600, rewards: 50 });
        assert_eq!(ape.balance_of(&staker), 1_000_050);
    }

    #[test]
    fn test_pairing_is_exclusive() {
        let (mut staking, mut ape, staker) = setup();
        let pair = PairNftWithAmount { main_token_id: 7, bakc_token_id: 9, amount: 100 };
        staking.stake_pairs(&mut ape, &staker, BAYC_POOL_ID, &[pair]).unwrap();
        assert_eq!(staking.bakc_to_main(9), Some((BAYC_POOL_ID, 7)));
        assert_eq!(staking.main_to_bakc(BAYC_POOL_ID, 7), Some(9));

        let other = PairNftWithAmount { main_token_id: 8, bakc_token_id: 9, amount: 100 };
        assert_eq!(
            staking.stake_pairs(&mut ape, &staker, MAYC_POOL_ID, &[other]),
            Err(StakingError::NftAlreadyPaired)
        );

        staking
            .unstake(&mut ape, BAKC_POOL_ID, &[SingleNft { token_id: 9, amount: 100 }], &staker)
            .unwrap();
        assert_eq!(staking.bakc_to_main(9), None);
        assert_eq!(staking.main_to_bakc(BAYC_POOL_ID, 7), None);
    }

    #[test]
    fn test_pending_rewards_surfaces_debt_underflow() {
        let (mut staking, _, _) = setup();
        let broken = Position {
            staked_amount: 1,
            rewards_debt: SignedDebt::from_unsigned(precision()).unwrap(),
        };
        staking.nft_positions.insert((BAYC_POOL_ID, 1), broken);
        assert_eq!(
            staking.pending_rewards(BAYC_POOL_ID, &Pubkey::default(), 1),
            Err(StakingError::RewardsDebtUnderflow)
        );
    }

    #[test]
    fn test_distribute_without_stake_fails() {
        let (mut staking, mut ape, _) = setup();
        assert_eq!(
            staking.distribute_rewards(&mut ape, BAYC_POOL_ID, 10),
            Err(StakingError::NothingStaked)
        );
    }
}
