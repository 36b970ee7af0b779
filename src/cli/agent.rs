use std::path::Path;
use std::sync::Arc;
use console::style;
use tracing::info;
use crate::agent::{AgentLoop, AgentReport};
use crate::cli::commands::AgentArgs;
use crate::cli::runtime::Runtime;
use crate::config::LLMConfig;
use crate::errors::WardenError;
use crate::llm::FallbackProvider;
use crate::pipeline::{AutomationEngine, MethodologyPlanner, ScanService};
use crate::queue::LocalQueue;
use crate::session::{InMemorySessionStore, StaticAuthenticator};
use crate::utils::truncation::truncate_chars;

/// Flag values win over the config section they overlay.
fn overlay(
    base: Option<&LLMConfig>,
    provider: &Option<String>,
    model: &Option<String>,
    api_key: &Option<String>,
    base_url: &Option<String>,
) -> LLMConfig {
    let base = base.cloned().unwrap_or_default();
    LLMConfig {
        provider: provider.clone().or(base.provider),
        model: model.clone().or(base.model),
        api_key: api_key.clone().or(base.api_key),
        base_url: base_url.clone().or(base.base_url),
    }
}

fn primary_config(args: &AgentArgs, file: Option<&LLMConfig>) -> LLMConfig {
    overlay(file, &args.provider, &args.model, &args.api_key, &args.base_url)
}

/// A fallback exists when the config names one or any fallback flag is set.
fn fallback_config(args: &AgentArgs, file: Option<&LLMConfig>) -> Option<LLMConfig> {
    let flagged = args.fallback_provider.is_some()
        || args.fallback_model.is_some()
        || args.fallback_api_key.is_some()
        || args.fallback_base_url.is_some();
    if file.is_none() && !flagged {
        return None;
    }
    Some(overlay(
        file,
        &args.fallback_provider,
        &args.fallback_model,
        &args.fallback_api_key,
        &args.fallback_base_url,
    ))
}

pub async fn handle_agent(args: AgentArgs, quiet: bool) -> Result<(), WardenError> {
    let runtime = Runtime::open(&args.store, true).await?;
    let mut agent_config = runtime.config.agent();
    if let Some(max) = args.max_iterations {
        agent_config.max_iterations = max;
    }

    let primary = primary_config(&args, runtime.config.llm.as_ref());
    let fallback = fallback_config(&args, agent_config.fallback.as_ref());
    let provider = Arc::new(FallbackProvider::from_config(&primary, fallback.as_ref())?);

    let engine = runtime.engine.clone();
    let automation = runtime.config.automation();
    let planner = match &automation.methodology_dir {
        Some(dir) => MethodologyPlanner::load(Path::new(dir))?,
        None => MethodologyPlanner::new(),
    };
    let worker = Arc::new(AutomationEngine::new(engine.clone(), planner, automation));
    let queue = Arc::new(LocalQueue::new(worker, engine.config().workers));
    let service = Arc::new(ScanService::new(
        engine.gate().clone(),
        engine.aggregator().clone(),
        queue.clone(),
        runtime.notifier.clone(),
    ));

    let authenticator = Arc::new(StaticAuthenticator::new(agent_config.operator.clone()));
    let sessions = Arc::new(InMemorySessionStore::new(agent_config.session_ttl_secs));

    let mut agent = AgentLoop::new(provider, engine, service, authenticator, sessions, agent_config);
    if let Some(scan_id) = &args.scan {
        agent = agent.with_scan(scan_id);
    }

    let report = agent.run(&args.task).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, quiet);
    }

    info!("Waiting for scans started during the session");
    queue.drain().await;
    Ok(())
}

fn print_report(report: &AgentReport, quiet: bool) {
    let outcome = if report.complete {
        style("complete").green().to_string()
    } else {
        style(format!("{:?}", report.termination).to_lowercase()).yellow().to_string()
    };
    println!();
    println!("{} {} ({} / {})", style("Agent session").bold(), outcome, report.provider, report.model);
    println!("  Task:       {}", report.task);
    println!("  Iterations: {}", report.iterations);
    println!("  Summary:    {}", report.summary);
    if report.complete {
        println!("  Findings:   {}", report.findings_count);
        for critical in &report.critical_findings {
            println!("    {} {}", style("!").red().bold(), critical);
        }
    }

    if quiet || report.tool_calls.is_empty() {
        return;
    }
    println!();
    println!("{}", style("Tool calls").bold());
    for call in &report.tool_calls {
        let marker = if call.is_error { style("✗").red() } else { style("✓").green() };
        println!("  {} [{}] {} {}", marker, call.iteration, call.tool, call.arguments);
        let output = truncate_chars(call.output.trim(), 160);
        if !output.is_empty() {
            println!("      {}", style(output).dim());
        }
    }
}
