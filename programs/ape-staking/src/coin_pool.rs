//! Coin pool: ERC4626-style share vault over ApeCoin.
//!
//! `total_assets` is the idle balance plus everything the stake manager holds
//! on the pool's behalf. Conversions use a virtual share and a virtual asset
//! so an empty pool prices shares 1:1.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{msg, pubkey::Pubkey};

use crate::ape_coin_staking::ApeCoinStaking;
use crate::error::{StakingError, StakingResult};
use crate::math::{mul_div, Rounding};
use crate::Protocol;

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct CoinPool {
    pub address: Pubkey,
    pub owner: Pubkey,
    pub paused: bool,
    pending_ape_coin: u128,
    total_supply: u128,
    shares: BTreeMap<Pubkey, u128>,
}

impl CoinPool {
    pub fn new(address: Pubkey, owner: Pubkey) -> Self {
        Self {
            address,
            owner,
            paused: false,
            pending_ape_coin: 0,
            total_supply: 0,
            shares: BTreeMap::new(),
        }
    }

    /// Idle ApeCoin held directly by the pool.
    pub fn pending_ape_coin(&self) -> u128 {
        self.pending_ape_coin
    }

    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    /// Share balance.
    pub fn balance_of(&self, owner: &Pubkey) -> u128 {
        self.shares.get(owner).copied().unwrap_or(0)
    }

    fn check_not_paused(&self) -> StakingResult<()> {
        if self.paused {
            return Err(StakingError::Paused);
        }
        Ok(())
    }

    fn mint_shares(&mut self, to: &Pubkey, shares: u128) -> StakingResult<()> {
        self.total_supply = self
            .total_supply
            .checked_add(shares)
            .ok_or(StakingError::Overflow)?;
        let balance = self.shares.entry(*to).or_insert(0);
        *balance = balance.checked_add(shares).ok_or(StakingError::Overflow)?;
        Ok(())
    }

    fn burn_shares(&mut self, from: &Pubkey, shares: u128) -> StakingResult<()> {
        let balance = self.balance_of(from);
        if balance < shares {
            return Err(StakingError::InsufficientShares);
        }
        if balance == shares {
            self.shares.remove(from);
        } else {
            self.shares.insert(*from, balance - shares);
        }
        self.total_supply = self
            .total_supply
            .checked_sub(shares)
            .ok_or(StakingError::Overflow)?;
        Ok(())
    }

    fn add_pending(&mut self, amount: u128) -> StakingResult<()> {
        self.pending_ape_coin = self
            .pending_ape_coin
            .checked_add(amount)
            .ok_or(StakingError::Overflow)?;
        Ok(())
    }

    fn take_pending(&mut self, amount: u128) -> StakingResult<()> {
        self.pending_ape_coin = self
            .pending_ape_coin
            .checked_sub(amount)
            .ok_or(StakingError::InsufficientPendingApeCoin)?;
        Ok(())
    }

    /// With no shares outstanding the pool prices 1:1, whatever dust it holds.
    pub fn shares_for(&self, assets: u128, total_assets: u128, rounding: Rounding) -> StakingResult<u128> {
        if self.total_supply == 0 {
            return Ok(assets);
        }
        let supply = self.total_supply.checked_add(1).ok_or(StakingError::Overflow)?;
        let total = total_assets.checked_add(1).ok_or(StakingError::Overflow)?;
        mul_div(assets, supply, total, rounding)
    }

    pub fn assets_for(&self, shares: u128, total_assets: u128, rounding: Rounding) -> StakingResult<u128> {
        if self.total_supply == 0 {
            return Ok(shares);
        }
        let supply = self.total_supply.checked_add(1).ok_or(StakingError::Overflow)?;
        let total = total_assets.checked_add(1).ok_or(StakingError::Overflow)?;
        mul_div(shares, total, supply, rounding)
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

impl<S: ApeCoinStaking + Clone> Protocol<S> {
    pub fn total_assets(&self) -> StakingResult<u128> {
        self.coin_pool
            .pending_ape_coin
            .checked_add(self.coin_pool_attributable_assets()?)
            .ok_or(StakingError::Overflow)
    }

    pub fn convert_to_shares(&self, assets: u128) -> StakingResult<u128> {
        self.coin_pool
            .shares_for(assets, self.total_assets()?, Rounding::Down)
    }

    pub fn convert_to_assets(&self, shares: u128) -> StakingResult<u128> {
        self.coin_pool
            .assets_for(shares, self.total_assets()?, Rounding::Down)
    }

    pub fn preview_deposit(&self, assets: u128) -> StakingResult<u128> {
        self.convert_to_shares(assets)
    }

    pub fn preview_mint(&self, shares: u128) -> StakingResult<u128> {
        self.coin_pool
            .assets_for(shares, self.total_assets()?, Rounding::Up)
    }

    pub fn preview_withdraw(&self, assets: u128) -> StakingResult<u128> {
        self.coin_pool
            .shares_for(assets, self.total_assets()?, Rounding::Up)
    }

    pub fn preview_redeem(&self, shares: u128) -> StakingResult<u128> {
        self.convert_to_assets(shares)
    }

    pub fn asset_balance_of(&self, owner: &Pubkey) -> StakingResult<u128> {
        self.convert_to_assets(self.coin_pool.balance_of(owner))
    }

    pub fn max_withdraw(&self, owner: &Pubkey) -> StakingResult<u128> {
        self.asset_balance_of(owner)
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

impl<S: ApeCoinStaking + Clone> Protocol<S> {
    pub fn deposit_self(&mut self, caller: &Pubkey, assets: u128) -> StakingResult<u128> {
        self.atomic(|p| {
            p.coin_pool.check_not_paused()?;
            if assets == 0 {
                return Err(StakingError::ZeroAmount);
            }
            if p.preview_deposit(assets)? == 0 {
                return Err(StakingError::ZeroShares);
            }
            p.deposit_to_coin_pool(caller, assets)
        })
    }

    pub fn withdraw_self(&mut self, caller: &Pubkey, assets: u128) -> StakingResult<u128> {
        self.atomic(|p| {
            p.coin_pool.check_not_paused()?;
            if assets == 0 {
                return Err(StakingError::ZeroAmount);
            }
            let shares = p.preview_withdraw(assets)?;
            p.withdraw_from_coin_pool(caller, assets, shares)?;
            Ok(shares)
        })
    }

    pub fn redeem_self(&mut self, caller: &Pubkey, shares: u128) -> StakingResult<u128> {
        self.atomic(|p| {
            p.coin_pool.check_not_paused()?;
            if shares == 0 {
                return Err(StakingError::ZeroAmount);
            }
            p.redeem_from_coin_pool(caller, shares)
        })
    }

    pub fn pull_ape_coin(&mut self, caller: &Pubkey, amount: u128) -> StakingResult<()> {
        self.atomic(|p| p.pull_ape_coin_from_coin_pool(caller, amount))
    }

    pub fn coin_pool_receive_ape_coin(&mut self, caller: &Pubkey, principal: u128, rewards: u128) -> StakingResult<()> {
        self.atomic(|p| p.credit_coin_pool(caller, principal, rewards))
    }

    pub fn set_coin_pool_paused(&mut self, caller: &Pubkey, paused: bool) -> StakingResult<()> {
        if *caller != self.coin_pool.owner {
            return Err(StakingError::NotOwner);
        }
        self.coin_pool.paused = paused;
        msg!("EVENT:CoinPoolPaused:{{\"paused\":{}}}", paused);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Flows shared with the other components
// ---------------------------------------------------------------------------

impl<S: ApeCoinStaking + Clone> Protocol<S> {
    /// Mints shares for `assets` pulled from `depositor`, who also receives them.
    pub(crate) fn deposit_to_coin_pool(&mut self, depositor: &Pubkey, assets: u128) -> StakingResult<u128> {
        let shares = self.preview_deposit(assets)?;
        self.coin_pool.mint_shares(depositor, shares)?;
        self.coin_pool.add_pending(assets)?;
        self.ape_coin
            .transfer(depositor, &self.coin_pool.address, assets)?;

        msg!(
            "EVENT:Deposit:{{\"caller\":\"{}\",\"assets\":{},\"shares\":{}}}",
            depositor,
            assets,
            shares,
        );
        Ok(shares)
    }

    /// Burns `shares` of `owner` and pays out their asset value.
    pub(crate) fn redeem_from_coin_pool(&mut self, owner: &Pubkey, shares: u128) -> StakingResult<u128> {
        let assets = self.preview_redeem(shares)?;
        self.withdraw_from_coin_pool(owner, assets, shares)?;
        Ok(assets)
    }

    /// Pays `assets` to `owner` for `shares`, pulling any idle shortfall
    /// through the stake manager before the shares are burned.
    fn withdraw_from_coin_pool(&mut self, owner: &Pubkey, assets: u128, shares: u128) -> StakingResult<()> {
        if self.coin_pool.balance_of(owner) < shares {
            return Err(StakingError::InsufficientShares);
        }
        let pending = self.coin_pool.pending_ape_coin;
        if assets > pending {
            let coin_pool = self.coin_pool.address;
            self.withdraw_ape_coin_to_coin_pool(&coin_pool, assets - pending)?;
        }
        if self.coin_pool.pending_ape_coin < assets {
            return Err(StakingError::WithdrawFailed);
        }

        self.coin_pool.burn_shares(owner, shares)?;
        self.coin_pool.take_pending(assets)?;
        self.ape_coin
            .transfer(&self.coin_pool.address, owner, assets)?;

        msg!(
            "EVENT:Withdraw:{{\"caller\":\"{}\",\"assets\":{},\"shares\":{}}}",
            owner,
            assets,
            shares,
        );
        Ok(())
    }

    pub(crate) fn pull_ape_coin_from_coin_pool(&mut self, caller: &Pubkey, amount: u128) -> StakingResult<()> {
        if *caller != self.stake_manager.address {
            return Err(StakingError::NotStakeManager);
        }
        self.coin_pool.take_pending(amount)?;
        self.ape_coin
            .transfer(&self.coin_pool.address, caller, amount)?;
        msg!("EVENT:ApeCoinPulled:{{\"amount\":{}}}", amount);
        Ok(())
    }

    pub(crate) fn credit_coin_pool(&mut self, caller: &Pubkey, principal: u128, rewards: u128) -> StakingResult<()> {
        if *caller != self.stake_manager.address {
            return Err(StakingError::NotStakeManager);
        }
        let amount = principal.checked_add(rewards).ok_or(StakingError::Overflow)?;
        if amount == 0 {
            return Ok(());
        }
        self.coin_pool.add_pending(amount)?;
        self.ape_coin
            .transfer(caller, &self.coin_pool.address, amount)?;
        msg!(
            "EVENT:CoinPoolCredited:{{\"principal\":{},\"rewards\":{}}}",
            principal,
            rewards,
        );
        Ok(())
    }
}
