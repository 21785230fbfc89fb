//! NFT pool: per-collection reward index over deposited NFTs.
//!
//! Rewards arrive as ApeCoin, are deposited into the coin pool, and the
//! resulting shares are spread over the collection's staked NFTs through
//! `accumulated_rewards_per_nft`. A token's claim is the index delta since
//! its snapshot, redeemed from the coin pool at the current rate.

use std::collections::{BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{msg, pubkey::Pubkey};

use crate::ape_coin_staking::ApeCoinStaking;
use crate::error::{StakingError, StakingResult};
use crate::math::Index;
use crate::{Collection, Protocol};

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolState {
    pub accumulated_rewards_per_nft: Index,
    pub total_staked_nft: u64,
    /// Coin pool shares received while nothing was staked.
    pub pending_ape_coin: u128,
}

impl PoolState {
    // 32 + 8 + 16 = 56
    pub const SIZE: usize = 56;

    /// Index after folding `pending_ape_coin` in, without mutating.
    pub fn projected_index(&self) -> StakingResult<Index> {
        if self.total_staked_nft == 0 || self.pending_ape_coin == 0 {
            return Ok(self.accumulated_rewards_per_nft);
        }
        self.accumulated_rewards_per_nft
            .accrue(self.pending_ape_coin, self.total_staked_nft as u128)
    }

    fn fold_pending(&mut self) -> StakingResult<()> {
        if self.total_staked_nft == 0 {
            return Ok(());
        }
        self.accumulated_rewards_per_nft = self.projected_index()?;
        self.pending_ape_coin = 0;
        Ok(())
    }
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NftState {
    pub rewards_debt: Index,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct NftPool {
    pub address: Pubkey,
    pub owner: Pubkey,
    pub paused: bool,
    pools: [PoolState; 3],
    nfts: BTreeMap<(Collection, u64), NftState>,
}

impl NftPool {
    pub fn new(address: Pubkey, owner: Pubkey) -> Self {
        Self {
            address,
            owner,
            paused: false,
            pools: [PoolState::default(); 3],
            nfts: BTreeMap::new(),
        }
    }

    pub fn pool_state(&self, collection: Collection) -> PoolState {
        self.pools[collection.slot()]
    }

    pub fn nft_state(&self, collection: Collection, token_id: u64) -> Option<NftState> {
        self.nfts.get(&(collection, token_id)).copied()
    }

    fn pool_mut(&mut self, collection: Collection) -> &mut PoolState {
        &mut self.pools[collection.slot()]
    }

    fn check_not_paused(&self) -> StakingResult<()> {
        if self.paused {
            return Err(StakingError::Paused);
        }
        Ok(())
    }

    /// Shares owed to the listed tokens at `index` per collection.
    fn accrued_shares(
        &self,
        collections: &[Collection],
        token_ids: &[Vec<u64>],
        index_of: impl Fn(&PoolState) -> StakingResult<Index>,
    ) -> StakingResult<u128> {
        let mut shares: u128 = 0;
        for (collection, ids) in collections.iter().zip(token_ids) {
            let index = index_of(&self.pool_state(*collection))?;
            for token_id in ids {
                let state = self
                    .nft_state(*collection, *token_id)
                    .ok_or(StakingError::NftNotDeposited)?;
                let accrued = index.units_since(&state.rewards_debt)?;
                shares = shares.checked_add(accrued).ok_or(StakingError::Overflow)?;
            }
        }
        Ok(shares)
    }

    /// Folds pending rewards, moves every listed token's snapshot to the
    /// current index and returns the shares they had accrued.
    fn settle(&mut self, collections: &[Collection], token_ids: &[Vec<u64>]) -> StakingResult<u128> {
        for collection in collections {
            self.pool_mut(*collection).fold_pending()?;
        }
        let shares = self.accrued_shares(collections, token_ids, |pool| Ok(pool.accumulated_rewards_per_nft))?;
        for (collection, ids) in collections.iter().zip(token_ids) {
            let index = self.pool_state(*collection).accumulated_rewards_per_nft;
            for token_id in ids {
                self.nfts.insert((*collection, *token_id), NftState { rewards_debt: index });
            }
        }
        Ok(shares)
    }
}

/// Rejects mismatched lengths, empty id sets, a collection listed twice and a
/// token id listed twice within one collection.
pub fn check_nfts(collections: &[Collection], token_ids: &[Vec<u64>]) -> StakingResult<()> {
    if collections.len() != token_ids.len() {
        return Err(StakingError::InconsistentLength);
    }
    let mut seen_collections = BTreeSet::new();
    for (collection, ids) in collections.iter().zip(token_ids) {
        if !seen_collections.insert(*collection) {
            return Err(StakingError::DuplicateNfts);
        }
        if ids.is_empty() {
            return Err(StakingError::EmptyTokenIds);
        }
        let mut seen_ids = BTreeSet::new();
        for token_id in ids {
            if !seen_ids.insert(*token_id) {
                return Err(StakingError::DuplicateTokenIds);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

impl<S: ApeCoinStaking + Clone> Protocol<S> {
    pub fn deposit_nfts(&mut self, caller: &Pubkey, collections: &[Collection], token_ids: &[Vec<u64>]) -> StakingResult<()> {
        self.atomic(|p| {
            p.nft_pool.check_not_paused()?;
            check_nfts(collections, token_ids)?;

            for (collection, ids) in collections.iter().zip(token_ids) {
                let pool = p.nft_pool.pool_mut(*collection);
                pool.fold_pending()?;
                let index = pool.accumulated_rewards_per_nft;
                pool.total_staked_nft = pool
                    .total_staked_nft
                    .checked_add(ids.len() as u64)
                    .ok_or(StakingError::Overflow)?;
                for token_id in ids {
                    p.nft_pool
                        .nfts
                        .insert((*collection, *token_id), NftState { rewards_debt: index });
                }

                let nft_pool = p.nft_pool.address;
                let stake_manager = p.stake_manager.address;
                p.st_nft.mint(
                    &nft_pool,
                    &mut p.nft_vault,
                    &mut p.nfts,
                    *collection,
                    ids,
                    caller,
                    &stake_manager,
                )?;

                msg!(
                    "EVENT:NftDeposited:{{\"caller\":\"{}\",\"collection\":\"{}\",\"count\":{}}}",
                    caller,
                    collection,
                    ids.len(),
                );
            }
            Ok(())
        })
    }

    pub fn claim_nfts(&mut self, caller: &Pubkey, collections: &[Collection], token_ids: &[Vec<u64>]) -> StakingResult<u128> {
        self.atomic(|p| {
            p.nft_pool.check_not_paused()?;
            check_nfts(collections, token_ids)?;
            p.check_receipt_owner(caller, collections, token_ids)?;
            p.claim_nfts_for(caller, collections, token_ids)
        })
    }

    pub fn withdraw_nfts(&mut self, caller: &Pubkey, collections: &[Collection], token_ids: &[Vec<u64>]) -> StakingResult<u128> {
        self.atomic(|p| {
            p.nft_pool.check_not_paused()?;
            check_nfts(collections, token_ids)?;
            p.check_receipt_owner(caller, collections, token_ids)?;

            let shares = p.nft_pool.settle(collections, token_ids)?;
            for (collection, ids) in collections.iter().zip(token_ids) {
                for token_id in ids {
                    p.nft_pool.nfts.remove(&(*collection, *token_id));
                }
                let pool = p.nft_pool.pool_mut(*collection);
                pool.total_staked_nft = pool
                    .total_staked_nft
                    .checked_sub(ids.len() as u64)
                    .ok_or(StakingError::Overflow)?;
            }

            for (collection, ids) in collections.iter().zip(token_ids) {
                let nft_pool = p.nft_pool.address;
                p.st_nft.burn(
                    &nft_pool,
                    &mut p.nft_vault,
                    &mut p.ape_coin_staking,
                    &mut p.ape_coin,
                    &mut p.nfts,
                    *collection,
                    ids,
                    caller,
                )?;
                msg!(
                    "EVENT:NftWithdrawn:{{\"caller\":\"{}\",\"collection\":\"{}\",\"count\":{}}}",
                    caller,
                    collection,
                    ids.len(),
                );
            }

            p.pay_nft_rewards(caller, shares)
        })
    }

    pub fn nft_pool_receive_ape_coin(&mut self, caller: &Pubkey, collection: Collection, amount: u128) -> StakingResult<()> {
        self.atomic(|p| p.credit_nft_pool(caller, collection, amount))
    }

    pub fn set_nft_pool_paused(&mut self, caller: &Pubkey, paused: bool) -> StakingResult<()> {
        if *caller != self.nft_pool.owner {
            return Err(StakingError::NotOwner);
        }
        self.nft_pool.paused = paused;
        msg!("EVENT:NftPoolPaused:{{\"paused\":{}}}", paused);
        Ok(())
    }

    /// ApeCoin the listed tokens could claim now, including rewards still
    /// waiting to be folded into the index.
    pub fn claimable_nfts(&self, collections: &[Collection], token_ids: &[Vec<u64>]) -> StakingResult<u128> {
        check_nfts(collections, token_ids)?;
        let shares = self
            .nft_pool
            .accrued_shares(collections, token_ids, PoolState::projected_index)?;
        self.preview_redeem(shares)
    }

    pub fn pool_state(&self, collection: Collection) -> PoolState {
        self.nft_pool.pool_state(collection)
    }

    pub fn nft_state(&self, collection: Collection, token_id: u64) -> Option<NftState> {
        self.nft_pool.nft_state(collection, token_id)
    }
}

// ---------------------------------------------------------------------------
// Flows shared with the other components
// ---------------------------------------------------------------------------

impl<S: ApeCoinStaking + Clone> Protocol<S> {
    fn check_receipt_owner(&self, caller: &Pubkey, collections: &[Collection], token_ids: &[Vec<u64>]) -> StakingResult<()> {
        for (collection, ids) in collections.iter().zip(token_ids) {
            for token_id in ids {
                if self.st_nft.owner_of(*collection, *token_id) != Some(*caller) {
                    return Err(StakingError::InvalidTokenOwner);
                }
            }
        }
        Ok(())
    }

    fn claim_nfts_for(&mut self, caller: &Pubkey, collections: &[Collection], token_ids: &[Vec<u64>]) -> StakingResult<u128> {
        let shares = self.nft_pool.settle(collections, token_ids)?;
        self.pay_nft_rewards(caller, shares)
    }

    fn pay_nft_rewards(&mut self, recipient: &Pubkey, shares: u128) -> StakingResult<u128> {
        if shares == 0 {
            return Ok(0);
        }
        let nft_pool = self.nft_pool.address;
        let assets = self.redeem_from_coin_pool(&nft_pool, shares)?;
        self.ape_coin.transfer(&nft_pool, recipient, assets)?;
        msg!(
            "EVENT:NftRewardsClaimed:{{\"caller\":\"{}\",\"shares\":{},\"assets\":{}}}",
            recipient,
            shares,
            assets,
        );
        Ok(assets)
    }

    /// Takes `amount` ApeCoin from the stake manager, converts it into coin
    /// pool shares and distributes them over the collection's staked NFTs.
    pub(crate) fn credit_nft_pool(&mut self, caller: &Pubkey, collection: Collection, amount: u128) -> StakingResult<()> {
        if *caller != self.stake_manager.address {
            return Err(StakingError::NotStakeManager);
        }
        let nft_pool = self.nft_pool.address;
        let shares = if amount > 0 {
            self.ape_coin.transfer(caller, &nft_pool, amount)?;
            self.deposit_to_coin_pool(&nft_pool, amount)?
        } else {
            0
        };

        let pool = self.nft_pool.pool_mut(collection);
        pool.pending_ape_coin = pool
            .pending_ape_coin
            .checked_add(shares)
            .ok_or(StakingError::Overflow)?;
        pool.fold_pending()?;

        let index = pool.accumulated_rewards_per_nft;
        msg!(
            "EVENT:NftPoolRewardsReceived:{{\"collection\":\"{}\",\"amount\":{},\"shares\":{},\"index\":\"{}\"}}",
            collection,
            amount,
            shares,
            index.value(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::PRECISION;
    use ruint::aliases::U256;

    #[test]
    fn test_check_nfts_distinguishes_duplicates() {
        let ids = vec![vec![1, 2], vec![3]];
        assert!(check_nfts(&[Collection::Bayc, Collection::Mayc], &ids).is_ok());
        assert_eq!(
            check_nfts(&[Collection::Bayc, Collection::Bayc], &ids),
            Err(StakingError::DuplicateNfts)
        );
        assert_eq!(
            check_nfts(&[Collection::Bayc], &[vec![4, 5, 4]]),
            Err(StakingError::DuplicateTokenIds)
        );
        assert_eq!(
            check_nfts(&[Collection::Bayc], &ids),
            Err(StakingError::InconsistentLength)
        );
        assert_eq!(
            check_nfts(&[Collection::Bakc], &[vec![]]),
            Err(StakingError::EmptyTokenIds)
        );
        assert_eq!(StakingError::DuplicateNfts.to_string(), "duplicate nfts");
        assert_eq!(StakingError::DuplicateTokenIds.to_string(), "duplicate tokenIds");
    }

    #[test]
    fn test_pending_waits_for_stake() {
        let mut pool = PoolState { pending_ape_coin: 90, ..PoolState::default() };
        assert_eq!(pool.projected_index().unwrap(), Index::ZERO);
        pool.fold_pending().unwrap();
        assert_eq!(pool.pending_ape_coin, 90);
        assert_eq!(pool.accumulated_rewards_per_nft, Index::ZERO);

        pool.total_staked_nft = 3;
        pool.fold_pending().unwrap();
        assert_eq!(pool.pending_ape_coin, 0);
        assert_eq!(pool.accumulated_rewards_per_nft.value(), U256::from(30 * PRECISION));
    }

    #[test]
    fn test_settle_moves_snapshots() {
        let mut nft_pool = NftPool::new(Pubkey::new_unique(), Pubkey::new_unique());
        for id in 1..=6 {
            nft_pool.nfts.insert((Collection::Bayc, id), NftState::default());
        }
        let pool = nft_pool.pool_mut(Collection::Bayc);
        pool.total_staked_nft = 6;
        pool.pending_ape_coin = 100;

        let ids = vec![vec![1, 2]];
        let shares = nft_pool.settle(&[Collection::Bayc], &ids).unwrap();
        assert_eq!(shares, 32);
        let again = nft_pool.settle(&[Collection::Bayc], &ids).unwrap();
        assert_eq!(again, 0);
        let rest = nft_pool
            .accrued_shares(&[Collection::Bayc], &[vec![3, 4, 5, 6]], |pool| Ok(pool.accumulated_rewards_per_nft))
            .unwrap();
        assert_eq!(rest, 64);
    }

    #[test]
    fn test_pool_state_size() {
        let bytes = borsh::to_vec(&PoolState::default()).unwrap();
        assert_eq!(bytes.len(), PoolState::SIZE);
    }
}
