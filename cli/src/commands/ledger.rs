use audit_models::ContentHash;
use audit_service::ServiceConfig;
use chrono::{TimeZone, Utc};
use colored::*;
use provenance_ledger::utils::parse_address;
use provenance_ledger::{AuditLedger, EthersLedger, EthersLedgerConfig};

use crate::commands::{create_progress_bar, CommandError, CommandResult};

async fn connect(config: &ServiceConfig) -> CommandResult<EthersLedger> {
    let ledger_config: &EthersLedgerConfig = config.ledger.as_ref().ok_or_else(|| {
        CommandError::Validation(
            "no ledger configured; set LEDGER_RPC_URL, LEDGER_CONTRACT and LEDGER_PRIVATE_KEY".to_string(),
        )
    })?;
    Ok(EthersLedger::connect(ledger_config).await?)
}

pub async fn get(config: &ServiceConfig, owner: &str, hash: &str) -> CommandResult<()> {
    let owner = parse_address(owner)?;
    let hash = hash
        .parse::<ContentHash>()
        .map_err(|e| CommandError::Validation(format!("invalid content hash: {}", e)))?;

    let ledger = connect(config).await?;
    let pb = create_progress_bar("Reading ledger entry...");
    let entry = ledger.get_audit(owner, hash).await;
    pb.finish_and_clear();
    let entry = entry?;

    if entry.is_unset() {
        println!("{}", "No entry for this owner and hash.".yellow());
        return Ok(());
    }

    let recorded = Utc
        .timestamp_opt(entry.timestamp as i64, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| entry.timestamp.to_string());
    println!("Locator: {}", entry.locator.green());
    println!("Recorded: {}", recorded);
    Ok(())
}

pub async fn hashes(config: &ServiceConfig, owner: &str) -> CommandResult<()> {
    let owner = parse_address(owner)?;
    let ledger = connect(config).await?;

    let pb = create_progress_bar("Reading audited hashes...");
    let hashes = ledger.get_audited_hashes(owner).await;
    pb.finish_and_clear();
    let hashes = hashes?;

    if hashes.is_empty() {
        println!("{}", "No audits anchored by this owner.".yellow());
        return Ok(());
    }
    for hash in hashes {
        println!("{}", hash);
    }
    Ok(())
}
