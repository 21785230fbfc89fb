use solana_program::program_error::ProgramError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StakingError {
    #[error("Invalid instruction discriminator")]
    InvalidInstruction,
    #[error("Invalid instruction data")]
    InvalidInstructionData,

    // Authorization
    #[error("caller is not owner")]
    NotOwner,
    #[error("caller is not bot admin")]
    NotBotAdmin,
    #[error("caller is not coin pool")]
    NotCoinPool,
    #[error("caller is not stake manager")]
    NotStakeManager,
    #[error("caller is not nft pool")]
    NotNftPool,
    #[error("caller is not authorised")]
    NotAuthorised,
    #[error("caller must be nft owner")]
    NotNftOwner,
    #[error("caller must be nft staker")]
    NotNftStaker,
    #[error("invalid token owner")]
    InvalidTokenOwner,

    // Invalid argument
    #[error("fee too high")]
    FeeTooHigh,
    #[error("zero address")]
    ZeroAddress,
    #[error("duplicate nfts")]
    DuplicateNfts,
    #[error("duplicate tokenIds")]
    DuplicateTokenIds,
    #[error("inconsistent length")]
    InconsistentLength,
    #[error("empty token ids")]
    EmptyTokenIds,
    #[error("invalid nft")]
    InvalidNft,
    #[error("invalid pool id")]
    InvalidPoolId,
    #[error("invalid rewards share")]
    InvalidRewardsShare,
    #[error("zero amount")]
    ZeroAmount,
    #[error("zero shares")]
    ZeroShares,
    #[error("nft already exists")]
    NftAlreadyExists,
    #[error("nft not deposited")]
    NftNotDeposited,
    #[error("nft not staking")]
    NftNotStaking,
    #[error("nft already paired")]
    NftAlreadyPaired,
    #[error("exceeds cap per position")]
    ExceedsCap,

    // Insufficient funds / paused
    #[error("paused")]
    Paused,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("insufficient shares")]
    InsufficientShares,
    #[error("pending ape coin not enough")]
    InsufficientPendingApeCoin,
    #[error("insufficient staked amount")]
    InsufficientStake,
    #[error("withdraw failed")]
    WithdrawFailed,

    // State inconsistency
    #[error("nothing staked in pool")]
    NothingStaked,
    #[error("rewards debt exceeds accrued rewards")]
    RewardsDebtUnderflow,
    #[error("Arithmetic overflow")]
    Overflow,
}

/// Coarse failure classes callers can branch on without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    InvalidArgument,
    InsufficientFunds,
    Paused,
    StateInconsistency,
    Arithmetic,
}

impl StakingError {
    pub fn kind(&self) -> ErrorKind {
        use StakingError::*;
        match self {
            NotOwner | NotBotAdmin | NotCoinPool | NotStakeManager | NotNftPool | NotAuthorised
            | NotNftOwner | NotNftStaker | InvalidTokenOwner => ErrorKind::Authorization,
            InvalidInstruction | InvalidInstructionData | FeeTooHigh | ZeroAddress
            | DuplicateNfts | DuplicateTokenIds | InconsistentLength | EmptyTokenIds
            | InvalidNft | InvalidPoolId | InvalidRewardsShare | ZeroAmount | ZeroShares
            | NftAlreadyExists
            | NftNotDeposited | NftNotStaking | NftAlreadyPaired | ExceedsCap => {
                ErrorKind::InvalidArgument
            }
            Paused => ErrorKind::Paused,
            InsufficientBalance | InsufficientShares | InsufficientPendingApeCoin
            | InsufficientStake | WithdrawFailed => ErrorKind::InsufficientFunds,
            NothingStaked | RewardsDebtUnderflow => ErrorKind::StateInconsistency,
            Overflow => ErrorKind::Arithmetic,
        }
    }
}

impl From<StakingError> for ProgramError {
    fn from(e: StakingError) -> Self {
        ProgramError::Custom(e as u32)
    }
}

pub type StakingResult<T> = Result<T, StakingError>;
