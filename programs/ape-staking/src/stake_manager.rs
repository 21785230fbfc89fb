//! Stake manager: routes pooled ApeCoin through the vault into the four
//! upstream pools.
//!
//! Every realized reward pays the protocol fee first; the net amount of an
//! NFT pool reward is split by that collection's rewards strategy between the
//! NFT pool and the coin pool, while pool 0 rewards and all principal go to
//! the coin pool.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{msg, pubkey::Pubkey};

use crate::ape_coin_staking::{ApeCoinStaking, PairNft, PairNftWithAmount, SingleNft, Withdrawal};
use crate::error::{StakingError, StakingResult};
use crate::math::calculate_fee;
use crate::nft_vault::Refund;
use crate::strategy::{RewardsStrategy, WithdrawBalances, WithdrawStrategy};
use crate::{Collection, InitializeArgs, Protocol, APE_COIN_POOL_ID, BAKC_POOL_ID, MAX_FEE_BPS};

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct StakeManager {
    pub address: Pubkey,
    pub owner: Pubkey,
    pub fee: u16,
    pub fee_recipient: Pubkey,
    pub bot_admin: Pubkey,
    pub coin_pool: Pubkey,
    pub nft_pool: Pubkey,
    pub rewards_strategies: [RewardsStrategy; 3],
    pub withdraw_strategy: WithdrawStrategy,
    pub total_fee_collected: u128,
}

impl StakeManager {
    pub fn new(address: Pubkey, args: &InitializeArgs, coin_pool: Pubkey, nft_pool: Pubkey) -> Self {
        Self {
            address,
            owner: args.owner,
            fee: args.fee,
            fee_recipient: args.fee_recipient,
            bot_admin: args.bot_admin,
            coin_pool,
            nft_pool,
            rewards_strategies: args.rewards_strategies,
            withdraw_strategy: args.withdraw_strategy,
            total_fee_collected: 0,
        }
    }

    pub fn rewards_strategy(&self, collection: Collection) -> RewardsStrategy {
        self.rewards_strategies[collection.slot()]
    }

    fn check_owner(&self, caller: &Pubkey) -> StakingResult<()> {
        if *caller != self.owner {
            return Err(StakingError::NotOwner);
        }
        Ok(())
    }

    fn check_bot(&self, caller: &Pubkey) -> StakingResult<()> {
        if *caller != self.bot_admin {
            return Err(StakingError::NotBotAdmin);
        }
        Ok(())
    }

    /// Rewards minus the protocol fee.
    pub fn net_of_fee(&self, rewards: u128) -> StakingResult<u128> {
        rewards
            .checked_sub(calculate_fee(rewards, self.fee)?)
            .ok_or(StakingError::Overflow)
    }

    /// The coin pool's part of `rewards` realized from `pool_id`.
    pub fn coin_pool_share(&self, pool_id: u8, rewards: u128) -> StakingResult<u128> {
        let net = self.net_of_fee(rewards)?;
        if pool_id == APE_COIN_POOL_ID {
            return Ok(net);
        }
        let collection = Collection::from_pool_id(pool_id)?;
        Ok(self.rewards_strategy(collection).split(net)?.1)
    }
}

/// One bot-driven maintenance cycle. Token lists may be empty; BAKC
/// positions are addressed by BAKC id when unstaking or claiming.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundArgs {
    pub claim_coin_pool: bool,
    pub unstake_bayc: Vec<u64>,
    pub unstake_mayc: Vec<u64>,
    pub unstake_bakc: Vec<u64>,
    pub claim_bayc: Vec<u64>,
    pub claim_mayc: Vec<u64>,
    pub claim_bakc: Vec<u64>,
    pub stake_bayc: Vec<u64>,
    pub stake_mayc: Vec<u64>,
    pub stake_bakc_bayc_pairs: Vec<PairNft>,
    pub stake_bakc_mayc_pairs: Vec<PairNft>,
    /// Idle coin pool balance at or above this is staked into pool 0; zero
    /// disables the step.
    pub coin_stake_threshold: u128,
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

impl<S: ApeCoinStaking + Clone> Protocol<S> {
    pub fn staked_ape_coin(&self, pool_id: u8) -> StakingResult<u128> {
        let manager = self.stake_manager.address;
        if pool_id == APE_COIN_POOL_ID {
            return Ok(self.ape_coin_staking.address_position(&manager).staked_amount);
        }
        let collection = Collection::from_pool_id(pool_id)?;
        Ok(self.nft_vault.position_of(collection, &manager).staked_amount)
    }

    pub fn pending_rewards_include_fee(&self, pool_id: u8) -> StakingResult<u128> {
        let manager = self.stake_manager.address;
        if pool_id == APE_COIN_POOL_ID {
            return self
                .ape_coin_staking
                .pending_rewards(APE_COIN_POOL_ID, &manager, 0);
        }
        let collection = Collection::from_pool_id(pool_id)?;
        let mut pending: u128 = 0;
        for token_id in self.nft_vault.staking_nft_ids(collection, &manager) {
            pending = pending
                .checked_add(self.ape_coin_staking.pending_rewards(pool_id, &manager, token_id)?)
                .ok_or(StakingError::Overflow)?;
        }
        Ok(pending)
    }

    pub fn pending_rewards(&self, pool_id: u8) -> StakingResult<u128> {
        self.stake_manager
            .net_of_fee(self.pending_rewards_include_fee(pool_id)?)
    }

    pub fn total_staked_ape_coin(&self) -> StakingResult<u128> {
        (APE_COIN_POOL_ID..=BAKC_POOL_ID).try_fold(0u128, |total, pool_id| {
            total
                .checked_add(self.staked_ape_coin(pool_id)?)
                .ok_or(StakingError::Overflow)
        })
    }

    pub fn total_pending_rewards(&self) -> StakingResult<u128> {
        (APE_COIN_POOL_ID..=BAKC_POOL_ID).try_fold(0u128, |total, pool_id| {
            total
                .checked_add(self.pending_rewards(pool_id)?)
                .ok_or(StakingError::Overflow)
        })
    }

    pub fn refund_of_details(&self, collection: Collection) -> Refund {
        self.nft_vault
            .refund_of(collection, &self.stake_manager.address)
    }

    /// Outstanding refund with the fee already taken from its reward part.
    pub fn refund_of(&self, collection: Collection) -> StakingResult<u128> {
        let refund = self.refund_of_details(collection);
        refund
            .principal
            .checked_add(self.stake_manager.net_of_fee(refund.reward)?)
            .ok_or(StakingError::Overflow)
    }

    pub fn total_refund(&self) -> StakingResult<u128> {
        Collection::ALL.iter().try_fold(0u128, |total, collection| {
            total
                .checked_add(self.refund_of(*collection)?)
                .ok_or(StakingError::Overflow)
        })
    }

    /// Refund principal plus the coin pool's part of refund rewards.
    fn coin_pool_refund(&self) -> StakingResult<u128> {
        Collection::ALL.iter().try_fold(0u128, |total, collection| {
            let refund = self.refund_of_details(*collection);
            let rewards = self
                .stake_manager
                .coin_pool_share(collection.pool_id(), refund.reward)?;
            total
                .checked_add(refund.principal)
                .and_then(|total| total.checked_add(rewards))
                .ok_or(StakingError::Overflow)
        })
    }

    /// Everything the stake manager holds or has staked on the coin pool's
    /// behalf, net of fee and of the NFT pool's reward share.
    pub(crate) fn coin_pool_attributable_assets(&self) -> StakingResult<u128> {
        let mut total = self.ape_coin.balance_of(&self.stake_manager.address);
        total = total
            .checked_add(self.total_staked_ape_coin()?)
            .ok_or(StakingError::Overflow)?;
        for pool_id in APE_COIN_POOL_ID..=BAKC_POOL_ID {
            let rewards = self
                .stake_manager
                .coin_pool_share(pool_id, self.pending_rewards_include_fee(pool_id)?)?;
            total = total.checked_add(rewards).ok_or(StakingError::Overflow)?;
        }
        total
            .checked_add(self.coin_pool_refund()?)
            .ok_or(StakingError::Overflow)
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

impl<S: ApeCoinStaking + Clone> Protocol<S> {
    pub fn stake_ape_coin(&mut self, caller: &Pubkey, amount: u128) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.stake_ape_coin_pool(amount)
        })
    }

    pub fn unstake_ape_coin(&mut self, caller: &Pubkey, amount: u128) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.unstake_ape_coin_pool(amount)
        })
    }

    pub fn claim_ape_coin(&mut self, caller: &Pubkey) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.claim_ape_coin_pool()
        })
    }

    pub fn stake_bayc(&mut self, caller: &Pubkey, token_ids: &[u64]) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.stake_main_pool(Collection::Bayc, token_ids)
        })
    }

    pub fn stake_mayc(&mut self, caller: &Pubkey, token_ids: &[u64]) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.stake_main_pool(Collection::Mayc, token_ids)
        })
    }

    pub fn stake_bakc(&mut self, caller: &Pubkey, bayc_pairs: &[PairNft], mayc_pairs: &[PairNft]) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.stake_bakc_pool(bayc_pairs, mayc_pairs)
        })
    }

    pub fn unstake_bayc(&mut self, caller: &Pubkey, token_ids: &[u64]) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.unstake_nft_pool(Collection::Bayc, token_ids)
        })
    }

    pub fn unstake_mayc(&mut self, caller: &Pubkey, token_ids: &[u64]) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.unstake_nft_pool(Collection::Mayc, token_ids)
        })
    }

    pub fn unstake_bakc(&mut self, caller: &Pubkey, bakc_token_ids: &[u64]) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.unstake_nft_pool(Collection::Bakc, bakc_token_ids)
        })
    }

    pub fn claim_bayc(&mut self, caller: &Pubkey, token_ids: &[u64]) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.claim_nft_pool(Collection::Bayc, token_ids)
        })
    }

    pub fn claim_mayc(&mut self, caller: &Pubkey, token_ids: &[u64]) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.claim_nft_pool(Collection::Mayc, token_ids)
        })
    }

    pub fn claim_bakc(&mut self, caller: &Pubkey, bakc_token_ids: &[u64]) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.claim_nft_pool(Collection::Bakc, bakc_token_ids)
        })
    }

    /// Leaves `amount` ApeCoin with the stake manager, sourced from idle coin
    /// pool balance, then pool 0 rewards, then pool 0 principal.
    pub fn prepare_ape_coin(&mut self, caller: &Pubkey, amount: u128) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.prepare_from_coin_pool(amount)
        })
    }

    pub fn withdraw_refund(&mut self, caller: &Pubkey, collection: Collection) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.withdraw_refund_of(collection)
        })
    }

    pub fn withdraw_total_refund(&mut self, caller: &Pubkey) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;
            p.withdraw_all_refunds()
        })
    }

    /// Coin-pool-only. Returns how much the coin pool's idle balance grew.
    pub fn withdraw_ape_coin(&mut self, caller: &Pubkey, required: u128) -> StakingResult<u128> {
        self.atomic(|p| p.withdraw_ape_coin_to_coin_pool(caller, required))
    }

    pub fn compound(&mut self, caller: &Pubkey, args: &CompoundArgs) -> StakingResult<()> {
        self.atomic(|p| {
            p.stake_manager.check_bot(caller)?;

            if args.claim_coin_pool && p.pending_rewards_include_fee(APE_COIN_POOL_ID)? > 0 {
                p.claim_ape_coin_pool()?;
            }
            p.withdraw_all_refunds()?;

            for (collection, token_ids) in [
                (Collection::Bayc, &args.claim_bayc),
                (Collection::Mayc, &args.claim_mayc),
                (Collection::Bakc, &args.claim_bakc),
            ] {
                if !token_ids.is_empty() {
                    p.claim_nft_pool(collection, token_ids)?;
                }
            }
            for (collection, token_ids) in [
                (Collection::Bayc, &args.unstake_bayc),
                (Collection::Mayc, &args.unstake_mayc),
                (Collection::Bakc, &args.unstake_bakc),
            ] {
                if !token_ids.is_empty() {
                    p.unstake_nft_pool(collection, token_ids)?;
                }
            }
            p.stake_main_pool(Collection::Bayc, &args.stake_bayc)?;
            p.stake_main_pool(Collection::Mayc, &args.stake_mayc)?;
            p.stake_bakc_pool(&args.stake_bakc_bayc_pairs, &args.stake_bakc_mayc_pairs)?;

            let idle = p.coin_pool.pending_ape_coin();
            if args.coin_stake_threshold > 0 && idle >= args.coin_stake_threshold {
                p.stake_ape_coin_pool(idle)?;
            }

            msg!(
                "EVENT:Compounded:{{\"pending_ape_coin\":{},\"total_staked\":{}}}",
                p.coin_pool.pending_ape_coin(),
                p.total_staked_ape_coin()?,
            );
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Admin
    // -----------------------------------------------------------------------

    pub fn update_fee(&mut self, caller: &Pubkey, fee: u16) -> StakingResult<()> {
        self.stake_manager.check_owner(caller)?;
        if fee > MAX_FEE_BPS {
            return Err(StakingError::FeeTooHigh);
        }
        self.stake_manager.fee = fee;
        msg!("EVENT:FeeUpdated:{{\"fee\":{}}}", fee);
        Ok(())
    }

    pub fn update_fee_recipient(&mut self, caller: &Pubkey, recipient: &Pubkey) -> StakingResult<()> {
        self.stake_manager.check_owner(caller)?;
        if *recipient == Pubkey::default() {
            return Err(StakingError::ZeroAddress);
        }
        self.stake_manager.fee_recipient = *recipient;
        msg!("EVENT:FeeRecipientUpdated:{{\"recipient\":\"{}\"}}", recipient);
        Ok(())
    }

    pub fn update_bot_admin(&mut self, caller: &Pubkey, bot_admin: &Pubkey) -> StakingResult<()> {
        self.stake_manager.check_owner(caller)?;
        self.stake_manager.bot_admin = *bot_admin;
        msg!("EVENT:BotAdminUpdated:{{\"bot_admin\":\"{}\"}}", bot_admin);
        Ok(())
    }

    pub fn update_rewards_strategy(
        &mut self,
        caller: &Pubkey,
        collection: Collection,
        strategy: RewardsStrategy,
    ) -> StakingResult<()> {
        self.stake_manager.check_owner(caller)?;
        strategy.validate()?;
        self.stake_manager.rewards_strategies[collection.slot()] = strategy;
        msg!(
            "EVENT:RewardsStrategyUpdated:{{\"collection\":\"{}\",\"nft_share_bps\":{}}}",
            collection,
            strategy.nft_rewards_share(),
        );
        Ok(())
    }

    pub fn update_withdraw_strategy(&mut self, caller: &Pubkey, strategy: WithdrawStrategy) -> StakingResult<()> {
        self.stake_manager.check_owner(caller)?;
        self.stake_manager.withdraw_strategy = strategy;
        msg!("EVENT:WithdrawStrategyUpdated:{{\"strategy\":\"{:?}\"}}", strategy);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Capital routing
// ---------------------------------------------------------------------------

impl<S: ApeCoinStaking + Clone> Protocol<S> {
    /// Pays the fee on rewards the stake manager just received from
    /// `pool_id`, hands the NFT pool its share and returns the coin pool's.
    fn distribute_rewards(&mut self, pool_id: u8, rewards: u128) -> StakingResult<u128> {
        if rewards == 0 {
            return Ok(0);
        }
        let manager = self.stake_manager.address;
        let fee = calculate_fee(rewards, self.stake_manager.fee)?;
        if fee > 0 {
            let recipient = self.stake_manager.fee_recipient;
            self.ape_coin.transfer(&manager, &recipient, fee)?;
            self.stake_manager.total_fee_collected = self
                .stake_manager
                .total_fee_collected
                .checked_add(fee)
                .ok_or(StakingError::Overflow)?;
        }
        let net = rewards - fee;

        let coin_share = if pool_id == APE_COIN_POOL_ID {
            net
        } else {
            let collection = Collection::from_pool_id(pool_id)?;
            let (nft_share, coin_share) = self.stake_manager.rewards_strategy(collection).split(net)?;
            if nft_share > 0 {
                self.credit_nft_pool(&manager, collection, nft_share)?;
            }
            coin_share
        };

        msg!(
            "EVENT:RewardsDistributed:{{\"pool_id\":{},\"rewards\":{},\"fee\":{},\"coin_pool\":{}}}",
            pool_id,
            rewards,
            fee,
            coin_share,
        );
        Ok(coin_share)
    }

    /// Routes upstream proceeds: rewards through the fee and split, principal
    /// straight back to the coin pool.
    fn settle_proceeds(&mut self, pool_id: u8, proceeds: Withdrawal) -> StakingResult<()> {
        let coin_rewards = self.distribute_rewards(pool_id, proceeds.rewards)?;
        let manager = self.stake_manager.address;
        self.credit_coin_pool(&manager, proceeds.principal, coin_rewards)
    }

    fn prepare_from_coin_pool(&mut self, amount: u128) -> StakingResult<()> {
        if self.coin_pool.pending_ape_coin() < amount {
            if self.pending_rewards_include_fee(APE_COIN_POOL_ID)? > 0 {
                self.claim_ape_coin_pool()?;
            }
            let pending = self.coin_pool.pending_ape_coin();
            if pending < amount {
                let unstake = (amount - pending).min(self.staked_ape_coin(APE_COIN_POOL_ID)?);
                if unstake > 0 {
                    self.unstake_ape_coin_pool(unstake)?;
                }
            }
        }
        let manager = self.stake_manager.address;
        self.pull_ape_coin_from_coin_pool(&manager, amount)
    }

    fn claim_ape_coin_pool(&mut self) -> StakingResult<()> {
        let manager = self.stake_manager.address;
        let rewards = self
            .ape_coin_staking
            .claim_ape_coin(&mut self.ape_coin, &manager, &manager)?;
        self.settle_proceeds(APE_COIN_POOL_ID, Withdrawal { principal: 0, rewards })
    }

    fn unstake_ape_coin_pool(&mut self, amount: u128) -> StakingResult<()> {
        let manager = self.stake_manager.address;
        let proceeds = self
            .ape_coin_staking
            .unstake_ape_coin(&mut self.ape_coin, &manager, amount, &manager)?;
        self.settle_proceeds(APE_COIN_POOL_ID, proceeds)
    }

    fn stake_ape_coin_pool(&mut self, amount: u128) -> StakingResult<()> {
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }
        self.prepare_from_coin_pool(amount)?;
        let manager = self.stake_manager.address;
        self.ape_coin_staking
            .stake_ape_coin(&mut self.ape_coin, &manager, amount)
    }

    /// Tops each token up to the pool cap; tokens already at cap are skipped.
    fn stake_main_pool(&mut self, collection: Collection, token_ids: &[u64]) -> StakingResult<()> {
        let pool_id = collection.pool_id();
        let cap = self.ape_coin_staking.cap_per_position(pool_id);
        let mut nfts = Vec::with_capacity(token_ids.len());
        let mut total: u128 = 0;
        for token_id in token_ids {
            let staked = self.ape_coin_staking.nft_position(pool_id, *token_id).staked_amount;
            let amount = cap.saturating_sub(staked);
            if amount == 0 {
                continue;
            }
            nfts.push(SingleNft { token_id: *token_id, amount });
            total = total.checked_add(amount).ok_or(StakingError::Overflow)?;
        }
        if nfts.is_empty() {
            return Ok(());
        }

        self.prepare_from_coin_pool(total)?;
        let manager = self.stake_manager.address;
        self.nft_vault.stake_pool(
            &manager,
            &mut self.ape_coin_staking,
            &mut self.ape_coin,
            collection,
            &nfts,
        )
    }

    fn stake_bakc_pool(&mut self, bayc_pairs: &[PairNft], mayc_pairs: &[PairNft]) -> StakingResult<()> {
        let cap = self.ape_coin_staking.cap_per_position(BAKC_POOL_ID);
        let mut total: u128 = 0;
        let mut with_amounts = |pairs: &[PairNft]| -> StakingResult<Vec<PairNftWithAmount>> {
            let mut out = Vec::with_capacity(pairs.len());
            for pair in pairs {
                let staked = self
                    .ape_coin_staking
                    .nft_position(BAKC_POOL_ID, pair.bakc_token_id)
                    .staked_amount;
                let amount = cap.saturating_sub(staked);
                if amount == 0 {
                    continue;
                }
                out.push(PairNftWithAmount {
                    main_token_id: pair.main_token_id,
                    bakc_token_id: pair.bakc_token_id,
                    amount,
                });
                total = total.checked_add(amount).ok_or(StakingError::Overflow)?;
            }
            Ok(out)
        };
        let bayc = with_amounts(bayc_pairs)?;
        let mayc = with_amounts(mayc_pairs)?;
        if total == 0 {
            return Ok(());
        }

        self.prepare_from_coin_pool(total)?;
        let manager = self.stake_manager.address;
        self.nft_vault.stake_bakc_pool(
            &manager,
            &mut self.ape_coin_staking,
            &mut self.ape_coin,
            &bayc,
            &mayc,
        )
    }

    /// Fully unstakes the listed tokens.
    fn unstake_nft_pool(&mut self, collection: Collection, token_ids: &[u64]) -> StakingResult<()> {
        let pool_id = collection.pool_id();
        let nfts: Vec<SingleNft> = token_ids
            .iter()
            .map(|token_id| SingleNft {
                token_id: *token_id,
                amount: self.ape_coin_staking.nft_position(pool_id, *token_id).staked_amount,
            })
            .collect();
        self.unstake_nft_positions(collection, &nfts)
    }

    fn unstake_nft_positions(&mut self, collection: Collection, nfts: &[SingleNft]) -> StakingResult<()> {
        let manager = self.stake_manager.address;
        let proceeds = self.nft_vault.unstake_pool(
            &manager,
            &mut self.ape_coin_staking,
            &mut self.ape_coin,
            collection,
            nfts,
            &manager,
        )?;
        self.settle_proceeds(collection.pool_id(), proceeds)
    }

    fn claim_nft_pool(&mut self, collection: Collection, token_ids: &[u64]) -> StakingResult<()> {
        let manager = self.stake_manager.address;
        let rewards = self.nft_vault.claim_pool(
            &manager,
            &mut self.ape_coin_staking,
            &mut self.ape_coin,
            collection,
            token_ids,
            &manager,
        )?;
        self.settle_proceeds(collection.pool_id(), Withdrawal { principal: 0, rewards })
    }

    fn withdraw_refund_of(&mut self, collection: Collection) -> StakingResult<()> {
        let manager = self.stake_manager.address;
        let refund = self
            .nft_vault
            .withdraw_refund(&manager, &mut self.ape_coin, collection)?;
        if refund == Refund::default() {
            return Ok(());
        }
        msg!(
            "EVENT:RefundWithdrawn:{{\"collection\":\"{}\",\"principal\":{},\"reward\":{}}}",
            collection,
            refund.principal,
            refund.reward,
        );
        self.settle_proceeds(
            collection.pool_id(),
            Withdrawal {
                principal: refund.principal,
                rewards: refund.reward,
            },
        )
    }

    fn withdraw_all_refunds(&mut self) -> StakingResult<()> {
        for collection in Collection::ALL {
            self.withdraw_refund_of(collection)?;
        }
        Ok(())
    }

    /// Unstakes NFT positions, BAKC first and BAYC last, until `shortfall`
    /// of principal has been released.
    fn unstake_nfts_for(&mut self, shortfall: u128) -> StakingResult<()> {
        let manager = self.stake_manager.address;
        let mut remaining = shortfall;
        for collection in [Collection::Bakc, Collection::Mayc, Collection::Bayc] {
            if remaining == 0 {
                break;
            }
            let pool_id = collection.pool_id();
            let mut nfts = Vec::new();
            for token_id in self.nft_vault.staking_nft_ids(collection, &manager) {
                if remaining == 0 {
                    break;
                }
                let staked = self.ape_coin_staking.nft_position(pool_id, token_id).staked_amount;
                let amount = staked.min(remaining);
                nfts.push(SingleNft { token_id, amount });
                remaining -= amount;
            }
            if !nfts.is_empty() {
                self.unstake_nft_positions(collection, &nfts)?;
            }
        }
        Ok(())
    }

    pub(crate) fn withdraw_ape_coin_to_coin_pool(&mut self, caller: &Pubkey, required: u128) -> StakingResult<u128> {
        if *caller != self.stake_manager.coin_pool {
            return Err(StakingError::NotCoinPool);
        }
        let before = self.coin_pool.pending_ape_coin();
        let balances = WithdrawBalances {
            refund: self.coin_pool_refund()?,
            ape_coin_rewards: self.pending_rewards(APE_COIN_POOL_ID)?,
            ape_coin_staked: self.staked_ape_coin(APE_COIN_POOL_ID)?,
        };
        let plan = self.stake_manager.withdraw_strategy.plan(required, &balances);

        if plan.withdraw_refund {
            self.withdraw_all_refunds()?;
        }
        if plan.claim_ape_coin {
            self.claim_ape_coin_pool()?;
        }
        if plan.unstake_ape_coin > 0 {
            self.unstake_ape_coin_pool(plan.unstake_ape_coin)?;
        }
        if plan.nft_shortfall > 0 {
            let received = self.coin_pool.pending_ape_coin().saturating_sub(before);
            let remaining = required.saturating_sub(received);
            if remaining > 0 {
                self.unstake_nfts_for(remaining)?;
            }
        }

        let received = self
            .coin_pool
            .pending_ape_coin()
            .checked_sub(before)
            .ok_or(StakingError::Overflow)?;
        msg!(
            "EVENT:ApeCoinWithdrawn:{{\"required\":{},\"received\":{}}}",
            required,
            received,
        );
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(fee: u16, nft_share_bps: u16) -> StakeManager {
        let args = InitializeArgs {
            owner: Pubkey::new_unique(),
            bot_admin: Pubkey::new_unique(),
            fee_recipient: Pubkey::new_unique(),
            fee,
            rewards_strategies: [RewardsStrategy::Fixed { nft_share_bps }; 3],
            withdraw_strategy: WithdrawStrategy::Waterfall,
        };
        StakeManager::new(Pubkey::new_unique(), &args, Pubkey::new_unique(), Pubkey::new_unique())
    }

    #[test]
    fn test_coin_pool_share_by_pool() {
        let manager = manager(500, 5_000);
        assert_eq!(manager.net_of_fee(1_000).unwrap(), 950);
        // pool 0 keeps the whole net amount
        assert_eq!(manager.coin_pool_share(APE_COIN_POOL_ID, 1_000).unwrap(), 950);
        assert_eq!(manager.coin_pool_share(BAKC_POOL_ID, 1_000).unwrap(), 475);
        assert_eq!(manager.coin_pool_share(4, 1_000), Err(StakingError::InvalidPoolId));
    }

    #[test]
    fn test_capability_checks() {
        let manager = manager(0, 0);
        let stranger = Pubkey::new_unique();
        assert_eq!(manager.check_owner(&stranger), Err(StakingError::NotOwner));
        assert_eq!(manager.check_bot(&stranger), Err(StakingError::NotBotAdmin));
        assert!(manager.check_owner(&manager.owner).is_ok());
        assert!(manager.check_bot(&manager.bot_admin).is_ok());
    }

    #[test]
    fn test_compound_args_borsh() {
        let args = CompoundArgs {
            claim_coin_pool: true,
            stake_bayc: vec![1, 2],
            stake_bakc_mayc_pairs: vec![PairNft { main_token_id: 3, bakc_token_id: 4 }],
            coin_stake_threshold: 1_000,
            ..CompoundArgs::default()
        };
        let bytes = borsh::to_vec(&args).unwrap();
        assert_eq!(CompoundArgs::try_from_slice(&bytes).unwrap(), args);
    }
}
