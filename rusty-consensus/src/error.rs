use rusty_crypto::PrngError;
use rusty_shared_types::{ParamsError, TxClass};
use thiserror::Error;

/// A stake transaction whose inputs or outputs do not have the layout its
/// declared class requires. The reason is for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct StructureError {
    pub reason: String,
}

impl StructureError {
    pub fn new(reason: impl Into<String>) -> Self {
        StructureError {
            reason: reason.into(),
        }
    }
}

/// Broad rejection categories. Every [`RejectReason`] falls in exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectKind {
    Structure,
    MissingOrSpentInput,
    IllegalInputForStakeClass,
    ImmatureTicket,
    AmountMismatch,
    PaymentAddressMismatch,
    BadLotteryReference,
    VoteCountOutOfRange,
    HeaderVoteBitsMismatch,
    HeaderCommitmentMismatch,
    Malformed,
}

/// Why a transaction or block was rejected. [`RejectReason::code`] gives the
/// stable reason string peers and logs use.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("Transaction has no inputs")]
    NoInputs,

    #[error("Transaction has no outputs")]
    NoOutputs,

    #[error("Output value is negative")]
    NegativeOutput,

    #[error("Output value above the money supply")]
    OutputTooLarge,

    #[error("Total output value above the money supply")]
    OutputTotalTooLarge,

    #[error("Transaction spends the same outpoint twice")]
    DuplicateInputs,

    #[error("Coinbase signature script has invalid length")]
    CoinbaseLength,

    #[error("Vote subsidy script has invalid length")]
    StakeRewardLength,

    #[error("Vote subsidy script differs from the network stake base script")]
    StakeRewardScriptSig,

    #[error("Vote does not reference a ticket")]
    NullTicketReference,

    #[error("Input spends the null outpoint")]
    NullPrevout,

    #[error("Inputs missing or spent")]
    InputsMissingOrSpent,

    #[error("Could not parse the vote declaration")]
    UnparsableVote,

    #[error("Bad {} structure: {reason}", class.name())]
    BadStructure { class: TxClass, reason: String },

    #[error("Ticket funding input missing or spent")]
    FundingMissingOrSpent,

    #[error("Input is not spendable by this transaction class")]
    IllegalInput,

    #[error("Contribution plus change differs from the funding input")]
    ContributionAmountMismatch,

    #[error("{} spends an output that is not a ticket stake", .0.name())]
    SpendsNonStake(TxClass),

    #[error("{} references an unknown ticket", .0.name())]
    BadTicketReference(TxClass),

    #[error("{} spends a missing or spent ticket stake", .0.name())]
    TicketStakeMissingOrSpent(TxClass),

    #[error("{} spends an immature ticket", .0.name())]
    TicketStakeImmature(TxClass),

    #[error("{} payment count differs from the ticket contribution count", .0.name())]
    PaymentsContributionsMismatch(TxClass),

    #[error("{} payment is neither P2PKH nor P2SH", .0.name())]
    InvalidPaymentType(TxClass),

    #[error("{} payment has no valid address", .0.name())]
    InvalidPaymentAddress(TxClass),

    #[error("{} payment goes to the wrong address", .0.name())]
    IncorrectPaymentAddress(TxClass),

    #[error("{} payment has the wrong amount", .0.name())]
    BadPaymentAmount(TxClass),

    #[error("Coinbase spent at depth {0}")]
    PrematureSpendOfCoinbase(u32),

    #[error("Ticket stake spent by a transaction that is neither a vote nor a revocation")]
    IllegalSpendOfTicketStake,

    #[error("Vote reward or revocation refund spent before maturity")]
    RewardOrRefundImmature,

    #[error("Input values out of range")]
    InputValuesOutOfRange,

    #[error("Value in {value_in} below value out {value_out}")]
    InBelowOut { value_in: i64, value_out: i64 },

    #[error("Fee out of range")]
    FeeOutOfRange,

    #[error("Stake transaction before the hybrid fork")]
    StakeTxBeforeFork,

    #[error("Header layout does not match the block height")]
    WrongHeaderLayout,

    #[error("Block buys {0} tickets, maximum is {1}")]
    TooManyFreshStake(usize, u8),

    #[error("Header fresh stake {header} differs from {actual} tickets in block")]
    FreshStakeMismatch { header: u8, actual: usize },

    #[error("Header revocations {header} differ from {actual} revocations in block")]
    RevocationCountMismatch { header: u8, actual: usize },

    #[error("Header voters {header} differ from {actual} votes in block")]
    VoterCountMismatch { header: u16, actual: usize },

    #[error("Ticket pays {paid}, required stake difficulty is {required}")]
    WrongTicketPrice { paid: i64, required: i64 },

    #[error("Header stake difficulty {header}, required {required}")]
    WrongStakeDifficulty { header: i64, required: i64 },

    #[error("Block has {votes} votes, needs at least {min}")]
    TooFewVotes { votes: usize, min: u16 },

    #[error("Block has {votes} votes, allows at most {max}")]
    TooManyVotes { votes: usize, max: u16 },

    #[error("Votes before the stake validation height")]
    VotesBeforeValidation,

    #[error("Vote spends ticket {0} which is not a winner")]
    VoteForNonWinner(String),

    #[error("Ticket {0} voted twice in one block")]
    DuplicateVote(String),

    #[error("Vote is for a block other than the parent")]
    VoteOnWrongBlock,

    #[error("Header vote bits disagree with the vote tally")]
    HeaderVoteBitsMismatch,

    #[error("Revocation spends ticket {0} which is not missed")]
    RevokeNonMissed(String),

    #[error("Ticket {0} already in the ticket pool")]
    DuplicateTicket(String),

    #[error("Header pool size {header}, expected {expected}")]
    PoolSizeMismatch { header: u32, expected: u32 },

    #[error("Header lottery state does not match the ticket pool")]
    LotteryStateMismatch,

    #[error("Header stake version {header}, expected {expected}")]
    StakeVersionMismatch { header: u32, expected: u32 },
}

impl RejectReason {
    /// The stable reason string.
    pub fn code(&self) -> String {
        use RejectReason::*;
        match self {
            NoInputs => "bad-txns-vin-empty".into(),
            NoOutputs => "bad-txns-vout-empty".into(),
            NegativeOutput => "bad-txns-vout-negative".into(),
            OutputTooLarge => "bad-txns-vout-toolarge".into(),
            OutputTotalTooLarge => "bad-txns-txouttotal-toolarge".into(),
            DuplicateInputs => "bad-txns-inputs-duplicate".into(),
            CoinbaseLength => "bad-cb-length".into(),
            StakeRewardLength => "bad-stakereward-length".into(),
            StakeRewardScriptSig => "bad-stakereward-scriptsig".into(),
            NullTicketReference => "bad-ticket-ref".into(),
            NullPrevout => "bad-txns-prevout-null".into(),
            InputsMissingOrSpent => "bad-txns-inputs-missingorspent".into(),
            UnparsableVote => "could-not-parse-vote-tx".into(),
            BadStructure { class, .. } => format!("bad-{}-structure", class.name()),
            FundingMissingOrSpent => "bad-txin-missingorspent".into(),
            IllegalInput => "bad-txin-illegal-input".into(),
            ContributionAmountMismatch => "bad-txin-amount-mismatch".into(),
            SpendsNonStake(class) => format!("bad-txin-{}-spends-nonstake", class.name()),
            BadTicketReference(class) => format!("bad-txin-{}-bad-ticket-reference", class.name()),
            TicketStakeMissingOrSpent(class) => {
                format!("bad-txin-{}-ticketstake-missingorspent", class.name())
            }
            TicketStakeImmature(class) => format!("bad-txin-{}-ticketstake-immature", class.name()),
            PaymentsContributionsMismatch(class) => {
                format!("{}-payments-contributions-mismatch", class.name())
            }
            InvalidPaymentType(class) => format!("{}-invalid-payment-type", class.name()),
            InvalidPaymentAddress(class) => format!("{}-invalid-payment-address", class.name()),
            IncorrectPaymentAddress(class) => format!("{}-incorrect-payment-address", class.name()),
            BadPaymentAmount(class) => format!("{}-bad-payment-amount", class.name()),
            PrematureSpendOfCoinbase(_) => "bad-txns-premature-spend-of-coinbase".into(),
            IllegalSpendOfTicketStake => "bad-txns-illegal-spend-of-ticket-stake".into(),
            RewardOrRefundImmature => "bad-txns-reward-or-refund-immature".into(),
            InputValuesOutOfRange => "bad-txns-inputvalues-outofrange".into(),
            InBelowOut { .. } => "bad-txns-in-belowout".into(),
            FeeOutOfRange => "bad-txns-fee-outofrange".into(),
            StakeTxBeforeFork => "bad-stake-tx-before-fork".into(),
            WrongHeaderLayout => "bad-header-layout".into(),
            TooManyFreshStake(..) => "bad-too-many-tickets".into(),
            FreshStakeMismatch { .. } => "bad-fresh-stake-count".into(),
            RevocationCountMismatch { .. } => "bad-revocation-count".into(),
            VoterCountMismatch { .. } => "bad-voter-count".into(),
            WrongTicketPrice { .. } => "bad-ticket-price".into(),
            WrongStakeDifficulty { .. } => "bad-stake-difficulty".into(),
            TooFewVotes { .. } => "bad-too-few-votes".into(),
            TooManyVotes { .. } => "bad-too-many-votes".into(),
            VotesBeforeValidation => "bad-premature-votes".into(),
            VoteForNonWinner(_) => "bad-vote-not-winner".into(),
            DuplicateVote(_) => "bad-duplicate-vote".into(),
            VoteOnWrongBlock => "bad-vote-block".into(),
            HeaderVoteBitsMismatch => "bad-header-votebits".into(),
            RevokeNonMissed(_) => "bad-revoke-not-missed".into(),
            DuplicateTicket(_) => "bad-duplicate-ticket".into(),
            PoolSizeMismatch { .. } => "bad-header-poolsize".into(),
            LotteryStateMismatch => "bad-header-lottery-state".into(),
            StakeVersionMismatch { .. } => "bad-header-stake-version".into(),
        }
    }

    /// The rejection category.
    pub fn kind(&self) -> RejectKind {
        use RejectReason::*;
        match self {
            BadStructure { .. }
            | UnparsableVote
            | NullTicketReference
            | SpendsNonStake(_)
            | PaymentsContributionsMismatch(_)
            | StakeTxBeforeFork
            | WrongHeaderLayout => RejectKind::Structure,

            InputsMissingOrSpent
            | FundingMissingOrSpent
            | BadTicketReference(_)
            | TicketStakeMissingOrSpent(_) => RejectKind::MissingOrSpentInput,

            IllegalInput | IllegalSpendOfTicketStake | InvalidPaymentType(_) => {
                RejectKind::IllegalInputForStakeClass
            }

            TicketStakeImmature(_) | PrematureSpendOfCoinbase(_) | RewardOrRefundImmature => {
                RejectKind::ImmatureTicket
            }

            ContributionAmountMismatch
            | BadPaymentAmount(_)
            | InBelowOut { .. }
            | FeeOutOfRange
            | InputValuesOutOfRange
            | NegativeOutput
            | OutputTooLarge
            | OutputTotalTooLarge
            | WrongTicketPrice { .. }
            | WrongStakeDifficulty { .. } => RejectKind::AmountMismatch,

            InvalidPaymentAddress(_) | IncorrectPaymentAddress(_) => {
                RejectKind::PaymentAddressMismatch
            }

            VoteForNonWinner(_)
            | DuplicateVote(_)
            | VoteOnWrongBlock
            | RevokeNonMissed(_)
            | DuplicateTicket(_) => RejectKind::BadLotteryReference,

            TooFewVotes { .. } | TooManyVotes { .. } | VotesBeforeValidation => {
                RejectKind::VoteCountOutOfRange
            }

            HeaderVoteBitsMismatch => RejectKind::HeaderVoteBitsMismatch,

            TooManyFreshStake(..)
            | FreshStakeMismatch { .. }
            | RevocationCountMismatch { .. }
            | VoterCountMismatch { .. }
            | PoolSizeMismatch { .. }
            | LotteryStateMismatch
            | StakeVersionMismatch { .. } => RejectKind::HeaderCommitmentMismatch,

            NoInputs
            | NoOutputs
            | DuplicateInputs
            | CoinbaseLength
            | StakeRewardLength
            | StakeRewardScriptSig
            | NullPrevout => RejectKind::Malformed,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error("Unknown block: {0}")]
    UnknownBlock(String),

    #[error("Block already connected: {0}")]
    DuplicateBlock(String),

    #[error("No stake node for block {0}")]
    MissingStakeNode(String),

    #[error("Ticket pool inconsistent: {0}")]
    CorruptTicketPool(String),

    #[error("Lottery error: {0}")]
    Lottery(#[from] PrngError),

    #[error("Invalid parameters: {0}")]
    Params(#[from] ParamsError),

    #[error("Invalid estimate: {0}")]
    InvalidEstimate(String),
}

impl ConsensusError {
    /// The rejection reason, when this error rejects a block or transaction.
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            ConsensusError::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn reject_kind(&self) -> Option<RejectKind> {
        self.reject_reason().map(RejectReason::kind)
    }
}
