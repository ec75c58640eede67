use ethers::types::Address;
use std::str::FromStr;

use crate::{LedgerError, LedgerReceipt, LedgerResult};

pub fn validate_address(address: Address) -> LedgerResult<()> {
    if address == Address::zero() {
        return Err(LedgerError::InvalidAddress("zero address".to_string()));
    }
    Ok(())
}

/// Parses a `0x`-prefixed wallet string into a non-zero address.
pub fn parse_address(raw: &str) -> LedgerResult<Address> {
    let address = Address::from_str(raw.trim()).map_err(|_| LedgerError::InvalidAddress(raw.to_string()))?;
    validate_address(address)?;
    Ok(address)
}

/// One-line summary of a ledger write for logs and operator output.
pub fn format_receipt(receipt: &LedgerReceipt) -> String {
    format!(
        "Transaction: hash={:?}, from={:?}, block={}",
        receipt.tx_hash,
        receipt.sender,
        receipt
            .block_number
            .map(|n| n.to_string())
            .unwrap_or_else(|| "pending".to_string())
    )
}
