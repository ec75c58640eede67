use audit_models::tier::line_count;
use audit_models::{ContentHash, Tier};
use audit_service::ServiceConfig;
use colored::*;
use std::path::Path;

use crate::commands::{read_source, CommandResult};

pub fn tier(config: &ServiceConfig, file: &Path) -> CommandResult<()> {
    let source = read_source(file)?;
    let tier = Tier::route(&source);
    let mode = if tier.is_deferred() { "deferred" } else { "inline" };

    println!("Tier: {}", tier.to_string().bold());
    println!("Lines: {}", line_count(&source));
    println!("Execution: {}", mode);
    println!("Model: {}", config.analysis.models.model_for(tier));
    Ok(())
}

pub fn hash(file: &Path) -> CommandResult<()> {
    let source = read_source(file)?;
    println!("{}", ContentHash::of(&source));
    Ok(())
}
