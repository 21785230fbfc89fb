//! Instruction decoding: one discriminator byte followed by borsh arguments.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{entrypoint::ProgramResult, msg, program_error::ProgramError, pubkey::Pubkey};

use crate::ape_coin_staking::{ApeCoinStaking, PairNft};
use crate::error::StakingError;
use crate::stake_manager::CompoundArgs;
use crate::strategy::{RewardsStrategy, WithdrawStrategy};
use crate::{Collection, Protocol};

// ---------------------------------------------------------------------------
// Discriminators
// ---------------------------------------------------------------------------

pub const IX_DEPOSIT_SELF: u8 = 0;
pub const IX_WITHDRAW_SELF: u8 = 1;
pub const IX_REDEEM_SELF: u8 = 2;
pub const IX_SET_COIN_POOL_PAUSED: u8 = 3;
pub const IX_PULL_APE_COIN: u8 = 4;
pub const IX_COIN_POOL_RECEIVE_APE_COIN: u8 = 5;

pub const IX_DEPOSIT_NFTS: u8 = 10;
pub const IX_WITHDRAW_NFTS: u8 = 11;
pub const IX_CLAIM_NFTS: u8 = 12;
pub const IX_SET_NFT_POOL_PAUSED: u8 = 13;
pub const IX_NFT_POOL_RECEIVE_APE_COIN: u8 = 14;
pub const IX_TRANSFER_RECEIPT: u8 = 15;

pub const IX_STAKE_APE_COIN: u8 = 20;
pub const IX_UNSTAKE_APE_COIN: u8 = 21;
pub const IX_CLAIM_APE_COIN: u8 = 22;
pub const IX_STAKE_BAYC: u8 = 23;
pub const IX_STAKE_MAYC: u8 = 24;
pub const IX_STAKE_BAKC: u8 = 25;
pub const IX_UNSTAKE_BAYC: u8 = 26;
pub const IX_UNSTAKE_MAYC: u8 = 27;
pub const IX_UNSTAKE_BAKC: u8 = 28;
pub const IX_CLAIM_BAYC: u8 = 29;
pub const IX_CLAIM_MAYC: u8 = 30;
pub const IX_CLAIM_BAKC: u8 = 31;
pub const IX_PREPARE_APE_COIN: u8 = 32;
pub const IX_WITHDRAW_REFUND: u8 = 33;
pub const IX_WITHDRAW_TOTAL_REFUND: u8 = 34;
pub const IX_WITHDRAW_APE_COIN: u8 = 35;
pub const IX_COMPOUND: u8 = 36;

pub const IX_UPDATE_FEE: u8 = 40;
pub const IX_UPDATE_FEE_RECIPIENT: u8 = 41;
pub const IX_UPDATE_BOT_ADMIN: u8 = 42;
pub const IX_UPDATE_REWARDS_STRATEGY: u8 = 43;
pub const IX_UPDATE_WITHDRAW_STRATEGY: u8 = 44;

// ---------------------------------------------------------------------------
// Instruction args
// ---------------------------------------------------------------------------

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct AmountArgs {
    pub amount: u128,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct PausedArgs {
    pub paused: bool,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct CreditArgs {
    pub principal: u128,
    pub rewards: u128,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct NftsArgs {
    pub collections: Vec<Collection>,
    pub token_ids: Vec<Vec<u64>>,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct NftRewardsArgs {
    pub collection: Collection,
    pub amount: u128,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransferReceiptArgs {
    pub collection: Collection,
    pub token_id: u64,
    pub to: Pubkey,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenIdsArgs {
    pub token_ids: Vec<u64>,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct StakeBakcArgs {
    pub bayc_pairs: Vec<PairNft>,
    pub mayc_pairs: Vec<PairNft>,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct CollectionArgs {
    pub collection: Collection,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct FeeArgs {
    pub fee: u16,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct AddressArgs {
    pub address: Pubkey,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct RewardsStrategyArgs {
    pub collection: Collection,
    pub strategy: RewardsStrategy,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct WithdrawStrategyArgs {
    pub strategy: WithdrawStrategy,
}

/// Builds instruction data for `discriminator` with borsh-encoded `args`.
pub fn encode<T: BorshSerialize>(discriminator: u8, args: &T) -> Result<Vec<u8>, ProgramError> {
    let mut data = vec![discriminator];
    args.serialize(&mut data)
        .map_err(|_| ProgramError::InvalidInstructionData)?;
    Ok(data)
}

fn parse<T: BorshDeserialize>(data: &[u8]) -> Result<T, ProgramError> {
    T::try_from_slice(data).map_err(|_| StakingError::InvalidInstructionData.into())
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn process_instruction<S: ApeCoinStaking + Clone>(
    protocol: &mut Protocol<S>,
    caller: &Pubkey,
    instruction_data: &[u8],
) -> ProgramResult {
    let (&discriminator, data) = instruction_data
        .split_first()
        .ok_or(StakingError::InvalidInstruction)?;

    match discriminator {
        IX_DEPOSIT_SELF => {
            let args: AmountArgs = parse(data)?;
            protocol.deposit_self(caller, args.amount)?;
        }
        IX_WITHDRAW_SELF => {
            let args: AmountArgs = parse(data)?;
            protocol.withdraw_self(caller, args.amount)?;
        }
        IX_REDEEM_SELF => {
            let args: AmountArgs = parse(data)?;
            protocol.redeem_self(caller, args.amount)?;
        }
        IX_SET_COIN_POOL_PAUSED => {
            let args: PausedArgs = parse(data)?;
            protocol.set_coin_pool_paused(caller, args.paused)?;
        }
        IX_PULL_APE_COIN => {
            let args: AmountArgs = parse(data)?;
            protocol.pull_ape_coin(caller, args.amount)?;
        }
        IX_COIN_POOL_RECEIVE_APE_COIN => {
            let args: CreditArgs = parse(data)?;
            protocol.coin_pool_receive_ape_coin(caller, args.principal, args.rewards)?;
        }

        IX_DEPOSIT_NFTS => {
            let args: NftsArgs = parse(data)?;
            protocol.deposit_nfts(caller, &args.collections, &args.token_ids)?;
        }
        IX_WITHDRAW_NFTS => {
            let args: NftsArgs = parse(data)?;
            protocol.withdraw_nfts(caller, &args.collections, &args.token_ids)?;
        }
        IX_CLAIM_NFTS => {
            let args: NftsArgs = parse(data)?;
            protocol.claim_nfts(caller, &args.collections, &args.token_ids)?;
        }
        IX_SET_NFT_POOL_PAUSED => {
            let args: PausedArgs = parse(data)?;
            protocol.set_nft_pool_paused(caller, args.paused)?;
        }
        IX_NFT_POOL_RECEIVE_APE_COIN => {
            let args: NftRewardsArgs = parse(data)?;
            protocol.nft_pool_receive_ape_coin(caller, args.collection, args.amount)?;
        }
        IX_TRANSFER_RECEIPT => {
            let args: TransferReceiptArgs = parse(data)?;
            protocol
                .st_nft
                .transfer(args.collection, caller, &args.to, args.token_id)?;
        }

        IX_STAKE_APE_COIN => {
            let args: AmountArgs = parse(data)?;
            protocol.stake_ape_coin(caller, args.amount)?;
        }
        IX_UNSTAKE_APE_COIN => {
            let args: AmountArgs = parse(data)?;
            protocol.unstake_ape_coin(caller, args.amount)?;
        }
        IX_CLAIM_APE_COIN => protocol.claim_ape_coin(caller)?,
        IX_STAKE_BAYC => {
            let args: TokenIdsArgs = parse(data)?;
            protocol.stake_bayc(caller, &args.token_ids)?;
        }
        IX_STAKE_MAYC => {
            let args: TokenIdsArgs = parse(data)?;
            protocol.stake_mayc(caller, &args.token_ids)?;
        }
        IX_STAKE_BAKC => {
            let args: StakeBakcArgs = parse(data)?;
            protocol.stake_bakc(caller, &args.bayc_pairs, &args.mayc_pairs)?;
        }
        IX_UNSTAKE_BAYC => {
            let args: TokenIdsArgs = parse(data)?;
            protocol.unstake_bayc(caller, &args.token_ids)?;
        }
        IX_UNSTAKE_MAYC => {
            let args: TokenIdsArgs = parse(data)?;
            protocol.unstake_mayc(caller, &args.token_ids)?;
        }
        IX_UNSTAKE_BAKC => {
            let args: TokenIdsArgs = parse(data)?;
            protocol.unstake_bakc(caller, &args.token_ids)?;
        }
        IX_CLAIM_BAYC => {
            let args: TokenIdsArgs = parse(data)?;
            protocol.claim_bayc(caller, &args.token_ids)?;
        }
        IX_CLAIM_MAYC => {
            let args: TokenIdsArgs = parse(data)?;
            protocol.claim_mayc(caller, &args.token_ids)?;
        }
        IX_CLAIM_BAKC => {
            let args: TokenIdsArgs = parse(data)?;
            protocol.claim_bakc(caller, &args.token_ids)?;
        }
        IX_PREPARE_APE_COIN => {
            let args: AmountArgs = parse(data)?;
            protocol.prepare_ape_coin(caller, args.amount)?;
        }
        IX_WITHDRAW_REFUND => {
            let args: CollectionArgs = parse(data)?;
            protocol.withdraw_refund(caller, args.collection)?;
        }
        IX_WITHDRAW_TOTAL_REFUND => protocol.withdraw_total_refund(caller)?,
        IX_WITHDRAW_APE_COIN => {
            let args: AmountArgs = parse(data)?;
            protocol.withdraw_ape_coin(caller, args.amount)?;
        }
        IX_COMPOUND => {
            let args: CompoundArgs = parse(data)?;
            protocol.compound(caller, &args)?;
        }

        IX_UPDATE_FEE => {
            let args: FeeArgs = parse(data)?;
            protocol.update_fee(caller, args.fee)?;
        }
        IX_UPDATE_FEE_RECIPIENT => {
            let args: AddressArgs = parse(data)?;
            protocol.update_fee_recipient(caller, &args.address)?;
        }
        IX_UPDATE_BOT_ADMIN => {
            let args: AddressArgs = parse(data)?;
            protocol.update_bot_admin(caller, &args.address)?;
        }
        IX_UPDATE_REWARDS_STRATEGY => {
            let args: RewardsStrategyArgs = parse(data)?;
            protocol.update_rewards_strategy(caller, args.collection, args.strategy)?;
        }
        IX_UPDATE_WITHDRAW_STRATEGY => {
            let args: WithdrawStrategyArgs = parse(data)?;
            protocol.update_withdraw_strategy(caller, args.strategy)?;
        }

        _ => {
            msg!("unknown instruction {}", discriminator);
            return Err(StakingError::InvalidInstruction.into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_prefixes_discriminator() {
        let data = encode(IX_DEPOSIT_SELF, &AmountArgs { amount: 7 }).unwrap();
        assert_eq!(data[0], IX_DEPOSIT_SELF);
        assert_eq!(data.len(), 1 + 16);
        let args: AmountArgs = parse(&data[1..]).unwrap();
        assert_eq!(args.amount, 7);
    }

    #[test]
    fn test_parse_rejects_trailing_bytes() {
        let mut data = borsh::to_vec(&FeeArgs { fee: 10 }).unwrap();
        data.push(0);
        assert_eq!(
            parse::<FeeArgs>(&data).unwrap_err(),
            ProgramError::from(StakingError::InvalidInstructionData)
        );
    }
}
