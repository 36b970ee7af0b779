use console::style;
use tracing::info;
use crate::cli::commands::StatusArgs;
use crate::cli::runtime::Runtime;
use crate::errors::WardenError;
use crate::models::{FindingStatus, ScanStatus, Severity};
use crate::pipeline::state::next_steps;
use crate::pipeline::ScanSummary;
use crate::utils::formatting::severity_label;

pub async fn handle_status(args: StatusArgs) -> Result<(), WardenError> {
    info!(scan_id = %args.scan_id, "Loading scan status");
    let runtime = Runtime::open(&args.store, false).await?;
    let summary = ScanSummary::load(&runtime.db, &args.scan_id).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn styled_status(status: ScanStatus) -> String {
    let label = status.as_str();
    match status {
        ScanStatus::Completed => style(label).green().to_string(),
        ScanStatus::Failed => style(label).red().to_string(),
        ScanStatus::Cancelled | ScanStatus::Cancelling => style(label).yellow().to_string(),
        ScanStatus::Pending | ScanStatus::Running => style(label).cyan().to_string(),
    }
}

fn styled_severity(severity: Severity) -> String {
    let label = severity_label(severity);
    match severity {
        Severity::Critical => style(label).red().bold().to_string(),
        Severity::High => style(label).red().to_string(),
        Severity::Medium => style(label).yellow().to_string(),
        Severity::Low => style(label).cyan().to_string(),
        Severity::Info => style(label).dim().to_string(),
    }
}

/// Human-readable scan report shared by `scan` and `status`.
pub fn print_summary(summary: &ScanSummary) {
    let scan = &summary.scan;
    println!();
    println!("{} {}", style("Scan").bold(), scan.id);
    println!("  Name:      {}", scan.name);
    println!("  Principal: {}", scan.principal);
    println!("  Type:      {}", scan.scan_type);
    println!("  Targets:   {}", scan.targets.join(", "));
    println!("  Status:    {} ({}%)", styled_status(scan.status), scan.progress_percent);
    if let Some(secs) = scan.duration_secs {
        println!("  Duration:  {}s", secs);
    }
    if let Some(error) = &scan.error_message {
        println!("  Error:     {}", style(error).red());
    }

    let counts = summary.counts();
    println!(
        "  Findings:  {} total | {} critical | {} high | {} medium | {} low | {} info",
        counts.total(),
        counts.critical,
        counts.high,
        counts.medium,
        counts.low,
        counts.info
    );

    let failed = summary.failed_tools();
    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed tools").bold());
        for (tool, error) in failed {
            println!("  {} {}: {}", style("✗").red(), tool, error);
        }
    }

    let mut findings: Vec<_> = summary
        .findings
        .iter()
        .filter(|f| f.status != FindingStatus::FalsePositive)
        .collect();
    if !findings.is_empty() {
        findings.sort_by(|a, b| a.severity.rank().cmp(&b.severity.rank()).then_with(|| a.title.cmp(&b.title)));
        println!();
        println!("{}", style("Findings").bold());
        for finding in findings {
            let location = match finding.port {
                Some(port) => format!("{}:{}", finding.target, port),
                None => finding.target.clone(),
            };
            let status = match finding.status {
                FindingStatus::Open => String::new(),
                FindingStatus::Confirmed => format!(" [{}]", style("confirmed").red().bold()),
                other => format!(" [{}]", other.as_str()),
            };
            println!("  {} {} ({}){}", styled_severity(finding.severity), finding.title, location, status);
        }
    }

    let steps = next_steps(&summary.findings);
    if !steps.is_empty() {
        println!();
        println!("{}", style("Next steps").bold());
        for step in steps {
            println!("  - {}", step);
        }
    }
}
