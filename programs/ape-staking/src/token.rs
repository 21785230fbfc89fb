//! Minimal ledgers for the assets the pools move: ApeCoin balances and NFT
//! ownership for the three collections.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::pubkey::Pubkey;

use crate::error::{StakingError, StakingResult};
use crate::Collection;

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ApeCoin {
    balances: BTreeMap<Pubkey, u128>,
    total_supply: u128,
}

impl ApeCoin {
    pub fn balance_of(&self, owner: &Pubkey) -> u128 {
        self.balances.get(owner).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    pub fn mint(&mut self, to: &Pubkey, amount: u128) -> StakingResult<()> {
        self.total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(StakingError::Overflow)?;
        let balance = self.balances.entry(*to).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(StakingError::Overflow)?;
        Ok(())
    }

    pub fn transfer(&mut self, from: &Pubkey, to: &Pubkey, amount: u128) -> StakingResult<()> {
        if amount == 0 || from == to {
            return Ok(());
        }
        let from_balance = self.balance_of(from);
        if from_balance < amount {
            return Err(StakingError::InsufficientBalance);
        }
        self.balances.insert(*from, from_balance - amount);
        let to_balance = self.balances.entry(*to).or_insert(0);
        *to_balance = to_balance.checked_add(amount).ok_or(StakingError::Overflow)?;
        Ok(())
    }
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct NftRegistry {
    owners: BTreeMap<(Collection, u64), Pubkey>,
}

impl NftRegistry {
    pub fn owner_of(&self, collection: Collection, token_id: u64) -> Option<Pubkey> {
        self.owners.get(&(collection, token_id)).copied()
    }

    pub fn balance_of(&self, collection: Collection, owner: &Pubkey) -> usize {
        self.owners
            .iter()
            .filter(|((c, _), o)| *c == collection && *o == owner)
            .count()
    }

    pub fn mint(&mut self, collection: Collection, token_id: u64, to: &Pubkey) -> StakingResult<()> {
        if self.owners.contains_key(&(collection, token_id)) {
            return Err(StakingError::NftAlreadyExists);
        }
        self.owners.insert((collection, token_id), *to);
        Ok(())
    }

    pub fn transfer(
        &mut self,
        collection: Collection,
        from: &Pubkey,
        to: &Pubkey,
        token_id: u64,
    ) -> StakingResult<()> {
        match self.owners.get_mut(&(collection, token_id)) {
            Some(owner) if owner == from => {
                *owner = *to;
                Ok(())
            }
            _ => Err(StakingError::InvalidTokenOwner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ape_coin_transfer() {
        let alice = Pubkey::new_unique();
        let bob = Pubkey::new_unique();
        let mut ape = ApeCoin::default();
        ape.mint(&alice, 100).unwrap();
        ape.transfer(&alice, &bob, 40).unwrap();
        assert_eq!(ape.balance_of(&alice), 60);
        assert_eq!(ape.balance_of(&bob), 40);
        assert_eq!(ape.total_supply(), 100);
        assert_eq!(ape.transfer(&bob, &alice, 41), Err(StakingError::InsufficientBalance));
    }

    #[test]
    fn test_nft_transfer_requires_owner() {
        let alice = Pubkey::new_unique();
        let bob = Pubkey::new_unique();
        let mut nfts = NftRegistry::default();
        nfts.mint(Collection::Bayc, 1, &alice).unwrap();
        assert_eq!(nfts.mint(Collection::Bayc, 1, &bob), Err(StakingError::NftAlreadyExists));
        // same id in another collection is a different token
        nfts.mint(Collection::Mayc, 1, &bob).unwrap();
        assert_eq!(
            nfts.transfer(Collection::Bayc, &bob, &alice, 1),
            Err(StakingError::InvalidTokenOwner)
        );
        nfts.transfer(Collection::Bayc, &alice, &bob, 1).unwrap();
        assert_eq!(nfts.owner_of(Collection::Bayc, 1), Some(bob));
        assert_eq!(nfts.balance_of(Collection::Bayc, &bob), 1);
    }
}
