use async_trait::async_trait;
use audit_models::ContentHash;
use ethers::types::{Address, H256};
use ethers::utils::keccak256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{AuditLedger, LedgerEntry, LedgerReceipt, LedgerResult};

#[derive(Default)]
struct LedgerState {
    entries: HashMap<(Address, ContentHash), LedgerEntry>,
    audited: HashMap<Address, Vec<ContentHash>>,
    block_number: u64,
    block_timestamp: u64,
}

impl LedgerState {
    /// Every write lands in its own block, and block timestamps strictly increase.
    fn mine_block(&mut self) -> (u64, u64) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.block_number += 1;
        self.block_timestamp = now.max(self.block_timestamp + 1);
        (self.block_number, self.block_timestamp)
    }
}

/// In-process instance of the audit storage contract.
///
/// Each `deploy` is a fresh, empty instance. Writes go through a
/// [`ConnectedLedger`] obtained from `connect`, which plays the role of the
/// transaction sender.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    pub fn deploy() -> Self {
        Self::default()
    }

    pub fn connect(&self, sender: Address) -> ConnectedLedger {
        ConnectedLedger {
            ledger: self.clone(),
            sender,
        }
    }

    pub async fn block_number(&self) -> u64 {
        self.state.read().await.block_number
    }

    async fn store_as(&self, sender: Address, content_hash: ContentHash, locator: &str) -> LedgerReceipt {
        let mut state = self.state.write().await;
        let (block_number, timestamp) = state.mine_block();

        state.entries.insert(
            (sender, content_hash),
            LedgerEntry {
                locator: locator.to_string(),
                timestamp,
            },
        );

        let hashes = state.audited.entry(sender).or_default();
        if !hashes.contains(&content_hash) {
            hashes.push(content_hash);
        }

        let mut preimage = Vec::with_capacity(20 + 32 + locator.len() + 8);
        preimage.extend_from_slice(sender.as_bytes());
        preimage.extend_from_slice(content_hash.as_bytes());
        preimage.extend_from_slice(locator.as_bytes());
        preimage.extend_from_slice(&block_number.to_be_bytes());
        let tx_hash = H256::from(keccak256(preimage));

        debug!(?sender, %content_hash, block_number, "stored audit entry");

        LedgerReceipt {
            tx_hash,
            sender,
            block_number: Some(block_number),
        }
    }

    async fn read_entry(&self, owner: Address, content_hash: ContentHash) -> LedgerEntry {
        self.state
            .read()
            .await
            .entries
            .get(&(owner, content_hash))
            .cloned()
            .unwrap_or_default()
    }

    async fn read_hashes(&self, owner: Address) -> Vec<ContentHash> {
        self.state
            .read()
            .await
            .audited
            .get(&owner)
            .cloned()
            .unwrap_or_default()
    }
}

/// An [`InMemoryLedger`] bound to one sending account.
#[derive(Clone)]
pub struct ConnectedLedger {
    ledger: InMemoryLedger,
    sender: Address,
}

#[async_trait]
impl AuditLedger for ConnectedLedger {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn store_audit(&self, content_hash: ContentHash, locator: &str) -> LedgerResult<LedgerReceipt> {
        Ok(self.ledger.store_as(self.sender, content_hash, locator).await)
    }

    async fn get_audit(&self, owner: Address, content_hash: ContentHash) -> LedgerResult<LedgerEntry> {
        Ok(self.ledger.read_entry(owner, content_hash).await)
    }

    async fn get_audited_hashes(&self, owner: Address) -> LedgerResult<Vec<ContentHash>> {
        Ok(self.ledger.read_hashes(owner).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    #[test]
    fn test_block_timestamps_strictly_increase() {
        block_on(async {
            let ledger = InMemoryLedger::deploy();
            let user = ledger.connect(Address::from_low_u64_be(7));
            let hash = ContentHash::of("contract A {}");

            let mut last = 0;
            for i in 0..5 {
                user.store_audit(hash, &format!("Qm{}", i)).await.unwrap();
                let entry = user.get_audit(user.sender(), hash).await.unwrap();
                assert!(entry.timestamp > last);
                last = entry.timestamp;
            }
            assert_eq!(ledger.block_number().await, 5);
        });
    }

    #[test]
    fn test_tx_hashes_are_distinct() {
        block_on(async {
            let ledger = InMemoryLedger::deploy();
            let user = ledger.connect(Address::from_low_u64_be(7));
            let hash = ContentHash::of("contract A {}");

            let first = user.store_audit(hash, "QmA").await.unwrap();
            let second = user.store_audit(hash, "QmA").await.unwrap();
            assert_ne!(first.tx_hash, second.tx_hash);
            assert_eq!(first.sender, user.sender());
        });
    }
}
