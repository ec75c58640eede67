use async_trait::async_trait;
use audit_models::ContentHash;
use ethers::{
    contract::abigen,
    middleware::{Middleware, SignerMiddleware},
    providers::{Http, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, U64},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::utils::parse_address;
use crate::{AuditLedger, LedgerEntry, LedgerError, LedgerReceipt, LedgerResult};

abigen!(
    AuditStorage,
    r#"[
        function storeAudit(bytes32 codeHash, string ipfsHash) external
        function getAudit(address user, bytes32 codeHash) external view returns (string, uint256)
        function getAuditedCodeHashes(address user) external view returns (bytes32[])
    ]"#
);

type SignedClient = SignerMiddleware<Provider<Http>, LocalWallet>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EthersLedgerConfig {
    pub rpc_url: String,
    pub contract_address: String,
    #[serde(skip_serializing)]
    pub private_key: String,
    pub chain_id: Option<u64>,
    pub confirmations: usize,
}

/// Client for a deployed audit storage contract. Writes are signed by the
/// configured key, which is therefore the sender every entry is bound to.
pub struct EthersLedger {
    contract: AuditStorage<SignedClient>,
    sender: Address,
    confirmations: usize,
}

impl EthersLedger {
    pub async fn connect(config: &EthersLedgerConfig) -> LedgerResult<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| LedgerError::ProviderError(e.to_string()))?;

        let chain_id = match config.chain_id {
            Some(id) => id,
            None => provider
                .get_chainid()
                .await
                .map_err(|e| LedgerError::ProviderError(e.to_string()))?
                .as_u64(),
        };

        let wallet = config
            .private_key
            .parse::<LocalWallet>()
            .map_err(|e| LedgerError::SignerError(e.to_string()))?
            .with_chain_id(chain_id);
        let sender = wallet.address();

        let address = parse_address(&config.contract_address)?;
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = AuditStorage::new(address, client);

        info!(?sender, contract = ?address, chain_id, "connected to audit ledger");

        Ok(Self {
            contract,
            sender,
            confirmations: config.confirmations.max(1),
        })
    }
}

#[async_trait]
impl AuditLedger for EthersLedger {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn store_audit(&self, content_hash: ContentHash, locator: &str) -> LedgerResult<LedgerReceipt> {
        let call = self.contract.store_audit(*content_hash.as_bytes(), locator.to_string());

        let pending_tx = call
            .send()
            .await
            .map_err(|e| LedgerError::TransactionFailed(e.to_string()))?;

        let receipt = pending_tx
            .confirmations(self.confirmations)
            .await
            .map_err(|e| LedgerError::TransactionFailed(e.to_string()))?
            .ok_or_else(|| LedgerError::TransactionFailed("No receipt".to_string()))?;

        if receipt.status == Some(U64::zero()) {
            warn!(tx = ?receipt.transaction_hash, "storeAudit reverted");
            return Err(LedgerError::TransactionFailed(format!(
                "transaction {:?} reverted",
                receipt.transaction_hash
            )));
        }

        Ok(LedgerReceipt {
            tx_hash: receipt.transaction_hash,
            sender: receipt.from,
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }

    async fn get_audit(&self, owner: Address, content_hash: ContentHash) -> LedgerResult<LedgerEntry> {
        let (locator, timestamp) = self
            .contract
            .get_audit(owner, *content_hash.as_bytes())
            .call()
            .await
            .map_err(|e| LedgerError::ContractError(e.to_string()))?;

        Ok(LedgerEntry {
            locator,
            timestamp: timestamp.low_u64(),
        })
    }

    async fn get_audited_hashes(&self, owner: Address) -> LedgerResult<Vec<ContentHash>> {
        let hashes = self
            .contract
            .get_audited_code_hashes(owner)
            .call()
            .await
            .map_err(|e| LedgerError::ContractError(e.to_string()))?;

        Ok(hashes.into_iter().map(ContentHash).collect())
    }
}
