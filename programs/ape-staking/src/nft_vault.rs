//! NFT custody vault.
//!
//! The vault is the single holder of every NFT and upstream position. Each
//! deposited token records the contract that deposited it (`owner`) and the
//! account allowed to stake it (`staker`). Per (collection, staker) it keeps
//! an aggregate [`Position`], the set of actively staked token ids, and the
//! refund parked when a staked token is withdrawn from custody.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{msg, pubkey::Pubkey};

use crate::accumulator::Position;
use crate::ape_coin_staking::{ApeCoinStaking, PairNftWithAmount, SingleNft, Withdrawal};
use crate::error::{StakingError, StakingResult};
use crate::token::{ApeCoin, NftRegistry};
use crate::{Collection, BAYC_POOL_ID, MAYC_POOL_ID};

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NftStatus {
    pub owner: Pubkey,
    pub staker: Pubkey,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Refund {
    pub principal: u128,
    pub reward: u128,
}

impl Refund {
    pub fn total(&self) -> StakingResult<u128> {
        self.principal
            .checked_add(self.reward)
            .ok_or(StakingError::Overflow)
    }
}

/// Dense id list plus id -> slot map; removal swaps the last id into the hole.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StakingSet {
    ids: Vec<u64>,
    slots: HashMap<u64, usize>,
}

impl StakingSet {
    pub fn insert(&mut self, token_id: u64) -> bool {
        if self.slots.contains_key(&token_id) {
            return false;
        }
        self.slots.insert(token_id, self.ids.len());
        self.ids.push(token_id);
        true
    }

    pub fn remove(&mut self, token_id: u64) -> bool {
        let Some(slot) = self.slots.remove(&token_id) else {
            return false;
        };
        self.ids.swap_remove(slot);
        if let Some(moved) = self.ids.get(slot) {
            self.slots.insert(*moved, slot);
        }
        true
    }

    pub fn contains(&self, token_id: u64) -> bool {
        self.slots.contains_key(&token_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u64> {
        self.ids.get(index).copied()
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct NftVault {
    pub address: Pubkey,
    pub admin: Pubkey,
    authorised: BTreeSet<Pubkey>,
    nfts: BTreeMap<(Collection, u64), NftStatus>,
    positions: BTreeMap<(Collection, Pubkey), Position>,
    staking: BTreeMap<(Collection, Pubkey), StakingSet>,
    refunds: BTreeMap<(Collection, Pubkey), Refund>,
}

impl NftVault {
    pub fn new(address: Pubkey, admin: Pubkey) -> Self {
        Self {
            address,
            admin,
            authorised: BTreeSet::new(),
            nfts: BTreeMap::new(),
            positions: BTreeMap::new(),
            staking: BTreeMap::new(),
            refunds: BTreeMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn is_authorised(&self, caller: &Pubkey) -> bool {
        self.authorised.contains(caller)
    }

    pub fn owner_of(&self, collection: Collection, token_id: u64) -> Option<Pubkey> {
        self.nfts.get(&(collection, token_id)).map(|status| status.owner)
    }

    pub fn staker_of(&self, collection: Collection, token_id: u64) -> Option<Pubkey> {
        self.nfts.get(&(collection, token_id)).map(|status| status.staker)
    }

    pub fn position_of(&self, collection: Collection, staker: &Pubkey) -> Position {
        self.positions
            .get(&(collection, *staker))
            .copied()
            .unwrap_or_default()
    }

    pub fn refund_of(&self, collection: Collection, staker: &Pubkey) -> Refund {
        self.refunds
            .get(&(collection, *staker))
            .copied()
            .unwrap_or_default()
    }

    pub fn is_staking(&self, collection: Collection, staker: &Pubkey, token_id: u64) -> bool {
        self.staking
            .get(&(collection, *staker))
            .is_some_and(|set| set.contains(token_id))
    }

    pub fn total_staking_nft(&self, collection: Collection, staker: &Pubkey) -> usize {
        self.staking
            .get(&(collection, *staker))
            .map_or(0, StakingSet::len)
    }

    pub fn staking_nft_id_by_index(&self, collection: Collection, staker: &Pubkey, index: usize) -> Option<u64> {
        self.staking
            .get(&(collection, *staker))
            .and_then(|set| set.get(index))
    }

    pub fn staking_nft_ids(&self, collection: Collection, staker: &Pubkey) -> Vec<u64> {
        self.staking
            .get(&(collection, *staker))
            .map(|set| set.ids().to_vec())
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Access control
    // -----------------------------------------------------------------------

    pub fn authorise(&mut self, caller: &Pubkey, target: &Pubkey, authorised: bool) -> StakingResult<()> {
        if *caller != self.admin {
            return Err(StakingError::NotOwner);
        }
        if authorised {
            self.authorised.insert(*target);
        } else {
            self.authorised.remove(target);
        }
        msg!(
            "EVENT:VaultAuthorised:{{\"target\":\"{}\",\"authorised\":{}}}",
            target,
            authorised,
        );
        Ok(())
    }

    fn check_authorised(&self, caller: &Pubkey) -> StakingResult<()> {
        if !self.is_authorised(caller) {
            return Err(StakingError::NotAuthorised);
        }
        Ok(())
    }

    fn check_staker(&self, caller: &Pubkey, collection: Collection, token_id: u64) -> StakingResult<()> {
        match self.staker_of(collection, token_id) {
            Some(staker) if staker == *caller => Ok(()),
            Some(_) => Err(StakingError::NotNftStaker),
            None => Err(StakingError::NftNotDeposited),
        }
    }

    // -----------------------------------------------------------------------
    // Custody
    // -----------------------------------------------------------------------

    pub fn deposit_nft(
        &mut self,
        caller: &Pubkey,
        nfts: &mut NftRegistry,
        collection: Collection,
        token_ids: &[u64],
        staker: &Pubkey,
    ) -> StakingResult<()> {
        self.check_authorised(caller)?;
        for token_id in token_ids {
            nfts.transfer(collection, caller, &self.address, *token_id)?;
            self.nfts.insert(
                (collection, *token_id),
                NftStatus {
                    owner: *caller,
                    staker: *staker,
                },
            );
        }
        msg!(
            "EVENT:NftDeposited:{{\"collection\":\"{}\",\"count\":{},\"staker\":\"{}\"}}",
            collection,
            token_ids.len(),
            staker,
        );
        Ok(())
    }

    /// Returns custody of `token_ids` to `recipient`. Tokens still staked
    /// upstream are force-unstaked first and their proceeds parked as a
    /// refund for their staker; a main token drags its paired BAKC with it.
    #[allow(clippy::too_many_arguments)]
    pub fn withdraw_nft<S: ApeCoinStaking>(
        &mut self,
        caller: &Pubkey,
        staking: &mut S,
        ape_coin: &mut ApeCoin,
        nfts: &mut NftRegistry,
        collection: Collection,
        token_ids: &[u64],
        recipient: &Pubkey,
    ) -> StakingResult<()> {
        self.check_authorised(caller)?;
        for token_id in token_ids {
            match self.owner_of(collection, *token_id) {
                Some(owner) if owner == *caller => {}
                Some(_) => return Err(StakingError::NotNftOwner),
                None => return Err(StakingError::NftNotDeposited),
            }

            if collection != Collection::Bakc {
                if let Some(bakc_id) = staking.main_to_bakc(collection.pool_id(), *token_id) {
                    self.refund_staked(staking, ape_coin, Collection::Bakc, bakc_id)?;
                }
            }
            self.refund_staked(staking, ape_coin, collection, *token_id)?;

            self.nfts.remove(&(collection, *token_id));
            nfts.transfer(collection, &self.address, recipient, *token_id)?;
        }
        msg!(
            "EVENT:NftWithdrawn:{{\"collection\":\"{}\",\"count\":{},\"recipient\":\"{}\"}}",
            collection,
            token_ids.len(),
            recipient,
        );
        Ok(())
    }

    fn refund_staked<S: ApeCoinStaking>(
        &mut self,
        staking: &mut S,
        ape_coin: &mut ApeCoin,
        collection: Collection,
        token_id: u64,
    ) -> StakingResult<()> {
        let staked = staking.nft_position(collection.pool_id(), token_id).staked_amount;
        if staked == 0 {
            return Ok(());
        }
        let staker = self
            .staker_of(collection, token_id)
            .ok_or(StakingError::NftNotDeposited)?;
        let vault = self.address;
        let withdrawal = self.unstake_token(staking, ape_coin, collection, &staker, token_id, staked, &vault)?;

        let refund = self.refunds.entry((collection, staker)).or_default();
        refund.principal = refund
            .principal
            .checked_add(withdrawal.principal)
            .ok_or(StakingError::Overflow)?;
        refund.reward = refund
            .reward
            .checked_add(withdrawal.rewards)
            .ok_or(StakingError::Overflow)?;

        msg!(
            "EVENT:RefundRecorded:{{\"collection\":\"{}\",\"token_id\":{},\"principal\":{},\"reward\":{}}}",
            collection,
            token_id,
            withdrawal.principal,
            withdrawal.rewards,
        );
        Ok(())
    }

    /// Bookkeeping shared by voluntary and forced unstakes of one token.
    #[allow(clippy::too_many_arguments)]
    fn unstake_token<S: ApeCoinStaking>(
        &mut self,
        staking: &mut S,
        ape_coin: &mut ApeCoin,
        collection: Collection,
        staker: &Pubkey,
        token_id: u64,
        amount: u128,
        recipient: &Pubkey,
    ) -> StakingResult<Withdrawal> {
        let pool_id = collection.pool_id();
        let index = staking.accumulated_rewards_per_share(pool_id);
        let upstream = staking.nft_position(pool_id, token_id);
        let full = amount == upstream.staked_amount;

        let position = self.positions.entry((collection, *staker)).or_default();
        if full {
            position.settle(upstream.pending_scaled(&index)?)?;
        }
        position.unstake(amount, &index)?;
        if full {
            if let Some(set) = self.staking.get_mut(&(collection, *staker)) {
                set.remove(token_id);
            }
        }

        staking.unstake(ape_coin, pool_id, &[SingleNft { token_id, amount }], recipient)
    }

    // -----------------------------------------------------------------------
    // Staking
    // -----------------------------------------------------------------------

    /// Stakes BAYC or MAYC positions; ApeCoin is pulled from the caller.
    pub fn stake_pool<S: ApeCoinStaking>(
        &mut self,
        caller: &Pubkey,
        staking: &mut S,
        ape_coin: &mut ApeCoin,
        collection: Collection,
        nfts: &[SingleNft],
    ) -> StakingResult<()> {
        self.check_authorised(caller)?;
        if collection == Collection::Bakc {
            return Err(StakingError::InvalidNft);
        }
        let pool_id = collection.pool_id();
        let index = staking.accumulated_rewards_per_share(pool_id);

        let mut total: u128 = 0;
        for nft in nfts {
            self.check_staker(caller, collection, nft.token_id)?;
            total = total.checked_add(nft.amount).ok_or(StakingError::Overflow)?;
        }

        let position = self.positions.entry((collection, *caller)).or_default();
        let set = self.staking.entry((collection, *caller)).or_default();
        for nft in nfts {
            position.stake(nft.amount, &index)?;
            set.insert(nft.token_id);
        }

        ape_coin.transfer(caller, &self.address, total)?;
        staking.stake(ape_coin, &self.address, pool_id, nfts)
    }

    pub fn stake_bakc_pool<S: ApeCoinStaking>(
        &mut self,
        caller: &Pubkey,
        staking: &mut S,
        ape_coin: &mut ApeCoin,
        bayc_pairs: &[PairNftWithAmount],
        mayc_pairs: &[PairNftWithAmount],
    ) -> StakingResult<()> {
        self.check_authorised(caller)?;
        let index = staking.accumulated_rewards_per_share(Collection::Bakc.pool_id());

        let mut total: u128 = 0;
        for (main, pairs) in [(Collection::Bayc, bayc_pairs), (Collection::Mayc, mayc_pairs)] {
            for pair in pairs {
                self.check_staker(caller, main, pair.main_token_id)?;
                self.check_staker(caller, Collection::Bakc, pair.bakc_token_id)?;
                total = total.checked_add(pair.amount).ok_or(StakingError::Overflow)?;
            }
        }

        let position = self.positions.entry((Collection::Bakc, *caller)).or_default();
        let set = self.staking.entry((Collection::Bakc, *caller)).or_default();
        for pair in bayc_pairs.iter().chain(mayc_pairs) {
            position.stake(pair.amount, &index)?;
            set.insert(pair.bakc_token_id);
        }

        ape_coin.transfer(caller, &self.address, total)?;
        if !bayc_pairs.is_empty() {
            staking.stake_pairs(ape_coin, &self.address, BAYC_POOL_ID, bayc_pairs)?;
        }
        if !mayc_pairs.is_empty() {
            staking.stake_pairs(ape_coin, &self.address, MAYC_POOL_ID, mayc_pairs)?;
        }
        Ok(())
    }

    /// Unstakes positions (BAKC positions by BAKC id) and pays principal plus
    /// any rewards released by full exits to `recipient`.
    pub fn unstake_pool<S: ApeCoinStaking>(
        &mut self,
        caller: &Pubkey,
        staking: &mut S,
        ape_coin: &mut ApeCoin,
        collection: Collection,
        nfts: &[SingleNft],
        recipient: &Pubkey,
    ) -> StakingResult<Withdrawal> {
        self.check_authorised(caller)?;
        let mut proceeds = Withdrawal::default();
        for nft in nfts {
            self.check_staker(caller, collection, nft.token_id)?;
            if !self.is_staking(collection, caller, nft.token_id) {
                return Err(StakingError::NftNotStaking);
            }
            let withdrawal =
                self.unstake_token(staking, ape_coin, collection, caller, nft.token_id, nft.amount, recipient)?;
            proceeds.principal = proceeds
                .principal
                .checked_add(withdrawal.principal)
                .ok_or(StakingError::Overflow)?;
            proceeds.rewards = proceeds
                .rewards
                .checked_add(withdrawal.rewards)
                .ok_or(StakingError::Overflow)?;
        }
        Ok(proceeds)
    }

    pub fn claim_pool<S: ApeCoinStaking>(
        &mut self,
        caller: &Pubkey,
        staking: &mut S,
        ape_coin: &mut ApeCoin,
        collection: Collection,
        token_ids: &[u64],
        recipient: &Pubkey,
    ) -> StakingResult<u128> {
        self.check_authorised(caller)?;
        let pool_id = collection.pool_id();
        let index = staking.accumulated_rewards_per_share(pool_id);
        for token_id in token_ids {
            self.check_staker(caller, collection, *token_id)?;
            if !self.is_staking(collection, caller, *token_id) {
                return Err(StakingError::NftNotStaking);
            }
        }

        let position = self.positions.entry((collection, *caller)).or_default();
        for token_id in token_ids {
            let upstream = staking.nft_position(pool_id, *token_id);
            position.settle(upstream.pending_scaled(&index)?)?;
        }

        staking.claim(ape_coin, pool_id, token_ids, recipient)
    }

    /// Pays out and clears the caller's parked refund for `collection`.
    pub fn withdraw_refund(
        &mut self,
        caller: &Pubkey,
        ape_coin: &mut ApeCoin,
        collection: Collection,
    ) -> StakingResult<Refund> {
        self.check_authorised(caller)?;
        let refund = self
            .refunds
            .remove(&(collection, *caller))
            .unwrap_or_default();
        ape_coin.transfer(&self.address, caller, refund.total()?)?;
        Ok(refund)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ape_coin_staking::InMemoryApeCoinStaking;

    #[test]
    fn test_staking_set_swap_remove() {
        let mut set = StakingSet::default();
        for id in [10, 20, 30, 40] {
            assert!(set.insert(id));
        }
        assert!(!set.insert(20));
        assert!(set.remove(20));
        assert!(!set.remove(20));
        assert_eq!(set.len(), 3);
        let mut ids = set.ids().to_vec();
        ids.sort();
        assert_eq!(ids, vec![10, 30, 40]);
        // every remaining id is still reachable through its slot
        for index in 0..set.len() {
            let id = set.get(index).unwrap();
            assert!(set.contains(id));
        }
        assert!(set.remove(40));
        assert!(set.remove(10));
        assert!(set.remove(30));
        assert!(set.is_empty());
    }

    struct Fixture {
        vault: NftVault,
        staking: InMemoryApeCoinStaking,
        ape: ApeCoin,
        nfts: NftRegistry,
        depositor: Pubkey,
        staker: Pubkey,
    }

    fn fixture() -> Fixture {
        let admin = Pubkey::new_unique();
        let depositor = Pubkey::new_unique();
        let staker = Pubkey::new_unique();
        let mut vault = NftVault::new(Pubkey::new_unique(), admin);
        vault.authorise(&admin, &depositor, true).unwrap();
        vault.authorise(&admin, &staker, true).unwrap();

        let mut nfts = NftRegistry::default();
        for id in 1..=3 {
            nfts.mint(Collection::Bayc, id, &depositor).unwrap();
            nfts.mint(Collection::Bakc, id, &depositor).unwrap();
        }
        vault
            .deposit_nft(&depositor, &mut nfts, Collection::Bayc, &[1, 2, 3], &staker)
            .unwrap();
        vault
            .deposit_nft(&depositor, &mut nfts, Collection::Bakc, &[1, 2, 3], &staker)
            .unwrap();

        let mut ape = ApeCoin::default();
        ape.mint(&staker, 100_000).unwrap();
        Fixture {
            vault,
            staking: InMemoryApeCoinStaking::new(Pubkey::new_unique(), [0, 10_094, 2_042, 856]),
            ape,
            nfts,
            depositor,
            staker,
        }
    }

    #[test]
    fn test_deposit_requires_authorisation() {
        let mut f = fixture();
        let stranger = Pubkey::new_unique();
        f.nfts.mint(Collection::Mayc, 1, &stranger).unwrap();
        assert_eq!(
            f.vault
                .deposit_nft(&stranger, &mut f.nfts, Collection::Mayc, &[1], &stranger),
            Err(StakingError::NotAuthorised)
        );
    }

    #[test]
    fn test_stake_claim_and_position() {
        let mut f = fixture();
        let nfts = [
            SingleNft { token_id: 1, amount: 1_000 },
            SingleNft { token_id: 2, amount: 1_000 },
        ];
        f.vault
            .stake_pool(&f.staker, &mut f.staking, &mut f.ape, Collection::Bayc, &nfts)
            .unwrap();
        assert_eq!(f.vault.position_of(Collection::Bayc, &f.staker).staked_amount, 2_000);
        assert_eq!(f.vault.total_staking_nft(Collection::Bayc, &f.staker), 2);
        let mut enumerated: Vec<u64> = (0..2)
            .filter_map(|i| f.vault.staking_nft_id_by_index(Collection::Bayc, &f.staker, i))
            .collect();
        enumerated.sort();
        assert_eq!(enumerated, vec![1, 2]);
        assert_eq!(f.vault.staking_nft_id_by_index(Collection::Bayc, &f.staker, 2), None);
        assert_eq!(f.vault.staking_nft_id_by_index(Collection::Mayc, &f.staker, 0), None);

        f.staking.distribute_rewards(&mut f.ape, BAYC_POOL_ID, 200).unwrap();
        let index = f.staking.accumulated_rewards_per_share(BAYC_POOL_ID);
        let position = f.vault.position_of(Collection::Bayc, &f.staker);
        assert_eq!(position.pending(&index).unwrap(), 200);

        let staker = f.staker;
        let claimed = f
            .vault
            .claim_pool(&staker, &mut f.staking, &mut f.ape, Collection::Bayc, &[1], &staker)
            .unwrap();
        assert_eq!(claimed, 100);
        let position = f.vault.position_of(Collection::Bayc, &f.staker);
        assert_eq!(position.pending(&index).unwrap(), 100);
    }

    #[test]
    fn test_stake_rejects_foreign_staker() {
        let mut f = fixture();
        let depositor = f.depositor;
        let result = f.vault.stake_pool(
            &depositor,
            &mut f.staking,
            &mut f.ape,
            Collection::Bayc,
            &[SingleNft { token_id: 1, amount: 10 }],
        );
        assert_eq!(result, Err(StakingError::NotNftStaker));
    }

    #[test]
    fn test_withdraw_staked_main_cascades_to_pair_refund() {
        let mut f = fixture();
        let staker = f.staker;
        f.vault
            .stake_pool(
                &staker,
                &mut f.staking,
                &mut f.ape,
                Collection::Bayc,
                &[SingleNft { token_id: 1, amount: 1_000 }],
            )
            .unwrap();
        f.vault
            .stake_bakc_pool(
                &staker,
                &mut f.staking,
                &mut f.ape,
                &[PairNftWithAmount { main_token_id: 1, bakc_token_id: 2, amount: 500 }],
                &[],
            )
            .unwrap();
        f.staking.distribute_rewards(&mut f.ape, BAYC_POOL_ID, 30).unwrap();
        f.staking
            .distribute_rewards(&mut f.ape, Collection::Bakc.pool_id(), 20)
            .unwrap();

        let depositor = f.depositor;
        f.vault
            .withdraw_nft(
                &depositor,
                &mut f.staking,
                &mut f.ape,
                &mut f.nfts,
                Collection::Bayc,
                &[1],
                &depositor,
            )
            .unwrap();

        assert_eq!(
            f.vault.refund_of(Collection::Bayc, &staker),
            Refund { principal: 1_000, reward: 30 }
        );
        assert_eq!(
            f.vault.refund_of(Collection::Bakc, &staker),
            Refund { principal: 500, reward: 20 }
        );
        assert_eq!(f.vault.position_of(Collection::Bayc, &staker).staked_amount, 0);
        assert_eq!(f.vault.position_of(Collection::Bakc, &staker).staked_amount, 0);
        assert!(!f.vault.is_staking(Collection::Bakc, &staker, 2));
        // BAKC itself stays in custody
        assert_eq!(f.vault.owner_of(Collection::Bakc, 2), Some(depositor));
        assert_eq!(f.nfts.owner_of(Collection::Bayc, 1), Some(depositor));

        let refund = f.vault.withdraw_refund(&staker, &mut f.ape, Collection::Bayc).unwrap();
        assert_eq!(refund.total().unwrap(), 1_030);
        assert_eq!(f.vault.refund_of(Collection::Bayc, &staker), Refund::default());
    }

    #[test]
    fn test_withdraw_paired_bakc_leaves_main_staked() {
        let mut f = fixture();
        let staker = f.staker;
        f.vault
            .stake_pool(
                &staker,
                &mut f.staking,
                &mut f.ape,
                Collection::Bayc,
                &[SingleNft { token_id: 3, amount: 700 }],
            )
            .unwrap();
        f.vault
            .stake_bakc_pool(
                &staker,
                &mut f.staking,
                &mut f.ape,
                &[PairNftWithAmount { main_token_id: 3, bakc_token_id: 3, amount: 100 }],
                &[],
            )
            .unwrap();

        let depositor = f.depositor;
        f.vault
            .withdraw_nft(
                &depositor,
                &mut f.staking,
                &mut f.ape,
                &mut f.nfts,
                Collection::Bakc,
                &[3],
                &depositor,
            )
            .unwrap();
        assert_eq!(f.vault.refund_of(Collection::Bakc, &staker).principal, 100);
        assert!(f.vault.is_staking(Collection::Bayc, &staker, 3));
        assert_eq!(f.vault.position_of(Collection::Bayc, &staker).staked_amount, 700);
    }
}
