// crates/uniperp-core/src/error.rs

use thiserror::Error;

/// Engine-wide error type for the UniPerp staking engine.
///
/// Every variant is a failed synchronous precondition: the call that produced
/// it is reverted as a whole and the caller may resubmit once the condition
/// is fixed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Zero or otherwise unusable amount.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Caller lacks the governance or handler capability for the operation.
    #[error("Unauthorized caller: {0}")]
    UnauthorizedCaller(String),

    /// Token balance too low for a transfer or burn.
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Allowance too low for a pull transfer.
    #[error("Insufficient allowance: {0}")]
    InsufficientAllowance(String),

    /// Unstake larger than the account's total staked amount.
    #[error("Amount exceeds staked amount: {0}")]
    ExceedsStakedAmount(String),

    /// Unstake larger than the account's balance of the given deposit token.
    #[error("Amount exceeds deposit balance: {0}")]
    ExceedsDepositBalance(String),

    /// Vesting deposit would exceed the account's vestable allowance.
    #[error("Max vestable amount exceeded: {0}")]
    MaxVestableAmountExceeded(String),

    /// Receiving account has its own outgoing transfer pending.
    #[error("Transfer already signalled: {0}")]
    TransferAlreadySignalled(String),

    /// No pending transfer from the given source to the caller.
    #[error("Transfer not signalled: {0}")]
    TransferNotSignalled(String),

    /// Component was already initialized.
    #[error("Already initialized: {0}")]
    AlreadyInitialized(String),

    /// Cooldown period after the last stake has not elapsed.
    #[error("Cooldown not elapsed: {0}")]
    CooldownNotElapsed(String),

    /// Token is not accepted as a deposit token by the ledger.
    #[error("Invalid deposit token: {0}")]
    InvalidDepositToken(String),

    /// Direct action disabled by a private-mode flag.
    #[error("Action not enabled: {0}")]
    ActionNotEnabled(String),

    /// Transfer receiver already carries reward history.
    #[error("Invalid receiver: {0}")]
    InvalidReceiver(String),

    /// Unknown component, token or account.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Checked arithmetic overflowed or underflowed.
    #[error("Math overflow: {0}")]
    MathOverflow(String),

    /// Invalid deployment configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}
