// Ape Staking: pooled ApeCoin staking accounting engine.
// ERC4626-style coin pool, per-NFT reward index pool and a fee-taking stake
// manager routing capital through an NFT custody vault into the upstream
// ApeCoin staking pools.

pub mod accumulator;
pub mod ape_coin_staking;
pub mod coin_pool;
pub mod error;
pub mod instruction;
pub mod math;
pub mod nft_pool;
pub mod nft_vault;
pub mod st_nft;
pub mod stake_manager;
pub mod strategy;
pub mod token;

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{msg, pubkey::Pubkey};

use crate::ape_coin_staking::ApeCoinStaking;
use crate::coin_pool::CoinPool;
use crate::error::{StakingError, StakingResult};
use crate::nft_pool::NftPool;
use crate::nft_vault::NftVault;
use crate::st_nft::StNft;
use crate::stake_manager::StakeManager;
use crate::strategy::{RewardsStrategy, WithdrawStrategy};
use crate::token::{ApeCoin, NftRegistry};

pub use crate::error::ErrorKind;
pub use crate::instruction::process_instruction;

// ---------------------------------------------------------------------------
// Program ID
// ---------------------------------------------------------------------------

solana_program::declare_id!("ApeStak111111111111111111111111111111111111");

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const APE_COIN_POOL_ID: u8 = 0;
pub const BAYC_POOL_ID: u8 = 1;
pub const MAYC_POOL_ID: u8 = 2;
pub const BAKC_POOL_ID: u8 = 3;

/// Maximum protocol fee: 1000 bps = 10%.
pub const MAX_FEE_BPS: u16 = 1_000;

const COIN_POOL_SEED: &[u8] = b"coin_pool";
const NFT_POOL_SEED: &[u8] = b"nft_pool";
const STAKE_MANAGER_SEED: &[u8] = b"stake_manager";
const NFT_VAULT_SEED: &[u8] = b"nft_vault";
const ST_NFT_SEED: &[u8] = b"st_nft";

pub fn component_address(seed: &[u8]) -> Pubkey {
    Pubkey::find_program_address(&[seed], &ID).0
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Bayc,
    Mayc,
    Bakc,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Bayc, Collection::Mayc, Collection::Bakc];

    pub fn pool_id(&self) -> u8 {
        match self {
            Collection::Bayc => BAYC_POOL_ID,
            Collection::Mayc => MAYC_POOL_ID,
            Collection::Bakc => BAKC_POOL_ID,
        }
    }

    pub fn from_pool_id(pool_id: u8) -> StakingResult<Collection> {
        match pool_id {
            BAYC_POOL_ID => Ok(Collection::Bayc),
            MAYC_POOL_ID => Ok(Collection::Mayc),
            BAKC_POOL_ID => Ok(Collection::Bakc),
            _ => Err(StakingError::InvalidPoolId),
        }
    }

    pub(crate) fn slot(&self) -> usize {
        match self {
            Collection::Bayc => 0,
            Collection::Mayc => 1,
            Collection::Bakc => 2,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Collection::Bayc => "bayc",
            Collection::Mayc => "mayc",
            Collection::Bakc => "bakc",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Rewards strategies are indexed by collection: `[bayc, mayc, bakc]`.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct InitializeArgs {
    pub owner: Pubkey,
    pub bot_admin: Pubkey,
    pub fee_recipient: Pubkey,
    pub fee: u16,
    pub rewards_strategies: [RewardsStrategy; 3],
    pub withdraw_strategy: WithdrawStrategy,
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Every component of the protocol plus the asset ledgers and the upstream
/// staking backend they move value through.
///
/// Components hold each other's addresses, not references; cross-component
/// flows are methods on `Protocol` so that each one borrows exactly the
/// components it touches. Public entry points run through [`Protocol::atomic`].
#[derive(Debug, Clone)]
pub struct Protocol<S: ApeCoinStaking + Clone> {
    pub ape_coin: ApeCoin,
    pub nfts: NftRegistry,
    pub ape_coin_staking: S,
    pub nft_vault: NftVault,
    pub st_nft: StNft,
    pub coin_pool: CoinPool,
    pub nft_pool: NftPool,
    pub stake_manager: StakeManager,
}

impl<S: ApeCoinStaking + Clone> Protocol<S> {
    pub fn initialize(args: InitializeArgs, ape_coin_staking: S) -> StakingResult<Self> {
        if args.fee > MAX_FEE_BPS {
            return Err(StakingError::FeeTooHigh);
        }
        if args.fee_recipient == Pubkey::default() || args.owner == Pubkey::default() {
            return Err(StakingError::ZeroAddress);
        }
        for strategy in &args.rewards_strategies {
            strategy.validate()?;
        }

        let coin_pool = component_address(COIN_POOL_SEED);
        let nft_pool = component_address(NFT_POOL_SEED);
        let stake_manager = component_address(STAKE_MANAGER_SEED);
        let nft_vault = component_address(NFT_VAULT_SEED);
        let st_nft = component_address(ST_NFT_SEED);

        let mut vault = NftVault::new(nft_vault, args.owner);
        vault.authorise(&args.owner, &st_nft, true)?;
        vault.authorise(&args.owner, &stake_manager, true)?;

        msg!(
            "EVENT:Initialized:{{\"owner\":\"{}\",\"bot_admin\":\"{}\",\"fee\":{},\"coin_pool\":\"{}\",\"nft_pool\":\"{}\",\"stake_manager\":\"{}\"}}",
            args.owner,
            args.bot_admin,
            args.fee,
            coin_pool,
            nft_pool,
            stake_manager,
        );

        Ok(Self {
            ape_coin: ApeCoin::default(),
            nfts: NftRegistry::default(),
            ape_coin_staking,
            nft_vault: vault,
            st_nft: StNft::new(st_nft, nft_pool),
            coin_pool: CoinPool::new(coin_pool, args.owner),
            nft_pool: NftPool::new(nft_pool, args.owner),
            stake_manager: StakeManager::new(
                stake_manager,
                &args,
                coin_pool,
                nft_pool,
            ),
        })
    }

    /// Runs `f` against the protocol and restores the prior state if it fails.
    pub fn atomic<T>(&mut self, f: impl FnOnce(&mut Self) -> StakingResult<T>) -> StakingResult<T> {
        let snapshot = self.clone();
        let result = f(self);
        if result.is_err() {
            *self = snapshot;
        }
        result
    }
}
