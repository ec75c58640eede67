use async_trait::async_trait;
use audit_models::{AuditError, ContentHash};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod ethereum;
pub mod memory;
pub mod utils;

#[cfg(test)]
mod tests;

pub use ethereum::{EthersLedger, EthersLedgerConfig};
pub use memory::{ConnectedLedger, InMemoryLedger};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Signer error: {0}")]
    SignerError(String),
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
    #[error("Contract error: {0}")]
    ContractError(String),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

impl From<LedgerError> for AuditError {
    fn from(err: LedgerError) -> Self {
        AuditError::external("ledger", err.to_string())
    }
}

/// What the ledger holds for one `(owner, content hash)` key.
/// Unset keys read back as an empty locator and a zero timestamp.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub locator: String,
    pub timestamp: u64,
}

impl LedgerEntry {
    pub fn is_unset(&self) -> bool {
        self.timestamp == 0
    }
}

/// Confirmation of a write. `sender` is the account the entry was bound to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerReceipt {
    pub tx_hash: H256,
    pub sender: Address,
    pub block_number: Option<u64>,
}

impl LedgerReceipt {
    pub fn reference(&self) -> String {
        format!("{:?}", self.tx_hash)
    }
}

/// Per-sender upsert store of audit locators.
///
/// Writes are always attributed to the ledger's own sender; reads are open
/// to any address.
#[async_trait]
pub trait AuditLedger: Send + Sync {
    /// Account every write from this handle is bound to.
    fn sender(&self) -> Address;

    /// Overwrites the locator for `(sender, content_hash)` and refreshes its timestamp.
    async fn store_audit(&self, content_hash: ContentHash, locator: &str) -> LedgerResult<LedgerReceipt>;

    async fn get_audit(&self, owner: Address, content_hash: ContentHash) -> LedgerResult<LedgerEntry>;

    /// Deduplicated content hashes written by `owner`, in first-write order.
    async fn get_audited_hashes(&self, owner: Address) -> LedgerResult<Vec<ContentHash>>;
}
