use audit_models::AuditError;
use audit_service::{ConfigError, ServiceConfig};
use indicatif::{ProgressBar, ProgressStyle};
use provenance_ledger::LedgerError;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub mod analyze;
pub mod inspect;
pub mod ledger;
pub mod serve;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CommandResult<T> = Result<T, CommandError>;

/// File config (if any) with environment overrides applied, then validated.
pub fn load_config(path: Option<&Path>) -> CommandResult<ServiceConfig> {
    let config = match path {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    let config = config.with_env_overrides()?;
    config.validate()?;
    Ok(config)
}

pub fn read_source(path: &Path) -> CommandResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| CommandError::Validation(format!("cannot read {}: {}", path.display(), e)))
}

pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
    {
        pb.set_style(style.tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
