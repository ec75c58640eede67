use analysis_integrations::{Analyzer, OpenRouterAnalyzer};
use audit_models::{AnalysisReport, Severity, Tier};
use audit_service::renderer::format_amount;
use audit_service::timeouts::external_call;
use audit_service::ServiceConfig;
use colored::*;
use prettytable::{Cell, Row, Table};
use std::path::Path;

use crate::commands::{create_progress_bar, read_source, CommandResult};

fn severity_label(severity: Severity) -> ColoredString {
    let label = severity.as_str().to_uppercase();
    match severity {
        Severity::Critical => label.red().bold(),
        Severity::High => label.red(),
        Severity::Medium => label.yellow(),
        Severity::Low => label.normal(),
    }
}

pub async fn run(config: &ServiceConfig, file: &Path, json: bool) -> CommandResult<()> {
    let source = read_source(file)?;
    let tier = Tier::route(&source);
    let analyzer = OpenRouterAnalyzer::new(config.analysis.clone());

    let pb = create_progress_bar(&format!(
        "Analyzing {} with {}...",
        file.display(),
        config.analysis.models.model_for(tier)
    ));
    let result = external_call(
        "analysis",
        config.pipeline.external_timeout(),
        analyzer.analyze(&source),
    )
    .await;
    pb.finish_and_clear();
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
        return Ok(());
    }

    print_report(&report);
    Ok(())
}

fn print_report(report: &AnalysisReport) {
    println!("\n{}", "Vulnerabilities".bold());
    if report.vulnerabilities.is_empty() {
        println!("{}", "No vulnerabilities found.".green());
    } else {
        let mut findings: Vec<_> = report.vulnerabilities.iter().collect();
        findings.sort_by_key(|f| (f.severity, f.line));

        let mut table = Table::new();
        table.add_row(Row::new(vec![
            Cell::new("Severity"),
            Cell::new("Line"),
            Cell::new("Issue"),
            Cell::new("Recommendation"),
        ]));
        for finding in findings {
            table.add_row(Row::new(vec![
                Cell::new(&severity_label(finding.severity).to_string()),
                Cell::new(&finding.line.to_string()),
                Cell::new(&finding.issue),
                Cell::new(&finding.recommendation),
            ]));
        }
        table.printstd();
    }

    let gas = &report.gas_optimizations;
    println!(
        "\n{} (estimated usage {})",
        "Gas Optimizations".bold(),
        format_amount(gas.estimated_gas)
    );
    if gas.suggestions.is_empty() {
        println!("No gas optimization suggestions found.");
        return;
    }

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Line"),
        Cell::new("Suggestion"),
        Cell::new("Est. Savings"),
    ]));
    for suggestion in &gas.suggestions {
        table.add_row(Row::new(vec![
            Cell::new(&suggestion.line.to_string()),
            Cell::new(&suggestion.description),
            Cell::new(&format_amount(suggestion.estimated_savings)),
        ]));
    }
    table.printstd();
}
