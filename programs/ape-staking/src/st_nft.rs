//! Staking receipts.
//!
//! A receipt stands for one underlying NFT held in the vault. Minting moves
//! the underlying into custody with the stake manager as its staker; burning
//! takes it back out, which force-unstakes it if it is still staked.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{msg, pubkey::Pubkey};

use crate::ape_coin_staking::ApeCoinStaking;
use crate::error::{StakingError, StakingResult};
use crate::nft_vault::NftVault;
use crate::token::{ApeCoin, NftRegistry};
use crate::Collection;

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct StNft {
    pub address: Pubkey,
    /// Only the NFT pool mints and burns receipts.
    pub minter: Pubkey,
    owners: BTreeMap<(Collection, u64), Pubkey>,
}

impl StNft {
    pub fn new(address: Pubkey, minter: Pubkey) -> Self {
        Self {
            address,
            minter,
            owners: BTreeMap::new(),
        }
    }

    pub fn owner_of(&self, collection: Collection, token_id: u64) -> Option<Pubkey> {
        self.owners.get(&(collection, token_id)).copied()
    }

    pub fn balance_of(&self, collection: Collection, owner: &Pubkey) -> usize {
        self.owners
            .iter()
            .filter(|((c, _), o)| *c == collection && *o == owner)
            .count()
    }

    fn check_minter(&self, caller: &Pubkey) -> StakingResult<()> {
        if *caller != self.minter {
            return Err(StakingError::NotNftPool);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn mint(
        &mut self,
        caller: &Pubkey,
        vault: &mut NftVault,
        nfts: &mut NftRegistry,
        collection: Collection,
        token_ids: &[u64],
        from: &Pubkey,
        staker: &Pubkey,
    ) -> StakingResult<()> {
        self.check_minter(caller)?;
        for token_id in token_ids {
            if self.owners.contains_key(&(collection, *token_id)) {
                return Err(StakingError::NftAlreadyExists);
            }
            nfts.transfer(collection, from, &self.address, *token_id)?;
            self.owners.insert((collection, *token_id), *from);
        }
        vault.deposit_nft(&self.address, nfts, collection, token_ids, staker)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn burn<S: ApeCoinStaking>(
        &mut self,
        caller: &Pubkey,
        vault: &mut NftVault,
        staking: &mut S,
        ape_coin: &mut ApeCoin,
        nfts: &mut NftRegistry,
        collection: Collection,
        token_ids: &[u64],
        owner: &Pubkey,
    ) -> StakingResult<()> {
        self.check_minter(caller)?;
        for token_id in token_ids {
            if self.owner_of(collection, *token_id) != Some(*owner) {
                return Err(StakingError::InvalidTokenOwner);
            }
            self.owners.remove(&(collection, *token_id));
        }
        vault.withdraw_nft(&self.address, staking, ape_coin, nfts, collection, token_ids, owner)
    }

    pub fn transfer(&mut self, collection: Collection, from: &Pubkey, to: &Pubkey, token_id: u64) -> StakingResult<()> {
        match self.owners.get_mut(&(collection, token_id)) {
            Some(owner) if owner == from => {
                *owner = *to;
            }
            _ => return Err(StakingError::InvalidTokenOwner),
        }
        msg!(
            "EVENT:ReceiptTransferred:{{\"collection\":\"{}\",\"token_id\":{},\"from\":\"{}\",\"to\":\"{}\"}}",
            collection,
            token_id,
            from,
            to,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ape_coin_staking::InMemoryApeCoinStaking;

    #[test]
    fn test_mint_burn_round_trip() {
        let admin = Pubkey::new_unique();
        let nft_pool = Pubkey::new_unique();
        let staker = Pubkey::new_unique();
        let user = Pubkey::new_unique();

        let mut receipts = StNft::new(Pubkey::new_unique(), nft_pool);
        let mut vault = NftVault::new(Pubkey::new_unique(), admin);
        vault.authorise(&admin, &receipts.address, true).unwrap();
        let mut staking = InMemoryApeCoinStaking::new(Pubkey::new_unique(), [0, 10_094, 2_042, 856]);
        let mut ape = ApeCoin::default();
        let mut nfts = NftRegistry::default();
        nfts.mint(Collection::Mayc, 5, &user).unwrap();

        assert_eq!(
            receipts.mint(&user, &mut vault, &mut nfts, Collection::Mayc, &[5], &user, &staker),
            Err(StakingError::NotNftPool)
        );
        receipts
            .mint(&nft_pool, &mut vault, &mut nfts, Collection::Mayc, &[5], &user, &staker)
            .unwrap();
        assert_eq!(receipts.owner_of(Collection::Mayc, 5), Some(user));
        assert_eq!(nfts.owner_of(Collection::Mayc, 5), Some(vault.address));
        assert_eq!(vault.staker_of(Collection::Mayc, 5), Some(staker));

        let other = Pubkey::new_unique();
        assert_eq!(
            receipts.burn(&nft_pool, &mut vault, &mut staking, &mut ape, &mut nfts, Collection::Mayc, &[5], &other),
            Err(StakingError::InvalidTokenOwner)
        );
        receipts
            .burn(&nft_pool, &mut vault, &mut staking, &mut ape, &mut nfts, Collection::Mayc, &[5], &user)
            .unwrap();
        assert_eq!(receipts.owner_of(Collection::Mayc, 5), None);
        assert_eq!(nfts.owner_of(Collection::Mayc, 5), Some(user));
    }

    #[test]
    fn test_transfer_moves_receipt() {
        let mut receipts = StNft::new(Pubkey::new_unique(), Pubkey::new_unique());
        let alice = Pubkey::new_unique();
        let bob = Pubkey::new_unique();
        receipts.owners.insert((Collection::Bayc, 1), alice);
        assert_eq!(
            receipts.transfer(Collection::Bayc, &bob, &alice, 1),
            Err(StakingError::InvalidTokenOwner)
        );
        receipts.transfer(Collection::Bayc, &alice, &bob, 1).unwrap();
        assert_eq!(receipts.balance_of(Collection::Bayc, &bob), 1);
        assert_eq!(receipts.balance_of(Collection::Bayc, &alice), 0);
    }
}
