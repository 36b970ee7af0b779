use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use crate::cli::commands::ScanArgs;
use crate::cli::progress::ScanProgress;
use crate::cli::runtime::Runtime;
use crate::cli::status::print_summary;
use crate::errors::WardenError;
use crate::events::ScanEvent;
use crate::models::{ScanStatus, ScanType};
use crate::pipeline::{AutomationEngine, MethodologyPlanner, ScanRequest, ScanService};
use crate::queue::{LocalQueue, ScanWorker};

pub async fn handle_scan(args: ScanArgs, quiet: bool) -> Result<(), WardenError> {
    let scan_type = ScanType::parse(&args.scan_type)?;
    let tool_options = parse_tool_options(args.options.as_deref())?;

    let mut runtime = Runtime::open(&args.store, true).await?;
    let events = runtime
        .events
        .take()
        .ok_or_else(|| WardenError::Internal("event stream already taken".into()))?;
    let engine = runtime.engine.clone();

    let worker: Arc<dyn ScanWorker> = if args.automate {
        let automation = runtime.config.automation();
        let planner = match &automation.methodology_dir {
            Some(dir) => MethodologyPlanner::load(Path::new(dir))?,
            None => MethodologyPlanner::new(),
        };
        Arc::new(AutomationEngine::new(engine.clone(), planner, automation))
    } else {
        engine.clone()
    };
    let queue = Arc::new(LocalQueue::new(worker, engine.config().workers));
    let service = ScanService::new(
        engine.gate().clone(),
        engine.aggregator().clone(),
        queue.clone(),
        runtime.notifier.clone(),
    );

    let mut request = ScanRequest::new(&args.name, args.targets.clone(), scan_type);
    request.tools = args.tools.clone();
    request.tool_options = tool_options;

    let scan = service.submit(request, &args.principal).await?;
    if !quiet {
        println!("Scan {} submitted ({} scan of {})", scan.id, scan.scan_type, scan.targets.join(", "));
    }

    let done = CancellationToken::new();
    let renderer = tokio::spawn(render_events(events, scan.id.clone(), quiet, done.clone()));

    let wait = queue.wait(&scan.id);
    tokio::pin!(wait);
    tokio::select! {
        _ = &mut wait => {}
        _ = tokio::signal::ctrl_c() => {
            warn!(scan_id = %scan.id, "Interrupted, cancelling scan");
            match service.cancel(&scan.id).await {
                Ok(s) => info!(scan_id = %s.id, status = %s.status, "Cancel accepted"),
                Err(e) => warn!(scan_id = %scan.id, error = %e, "Cancel not applied"),
            }
            (&mut wait).await;
        }
    }

    done.cancel();
    if let Err(e) = renderer.await {
        warn!(error = %e, "Progress renderer ended abnormally");
    }

    let summary = service.status(&scan.id).await?;
    print_summary(&summary);

    match summary.scan.status {
        ScanStatus::Failed => Err(WardenError::ToolFailed(
            summary.scan.error_message.unwrap_or_else(|| "scan failed".into()),
        )),
        ScanStatus::Cancelled => Err(WardenError::Cancelled(format!("scan {}", scan.id))),
        _ => Ok(()),
    }
}

/// `--options '{"nmap": {"ports": "22,80"}}'` into per-tool option objects.
pub fn parse_tool_options(raw: Option<&str>) -> Result<BTreeMap<String, Value>, WardenError> {
    let Some(raw) = raw else {
        return Ok(BTreeMap::new());
    };
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(WardenError::Config(format!(
            "--options must be a JSON object keyed by tool name, got {}",
            other
        ))),
    }
}

async fn render_events(
    mut events: UnboundedReceiver<ScanEvent>,
    scan_id: String,
    quiet: bool,
    done: CancellationToken,
) {
    let mut progress = ScanProgress::new(quiet);
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) if event.scan_id() == scan_id => progress.handle_event(&event),
                Some(_) => {}
                None => break,
            },
            _ = done.cancelled() => {
                while let Ok(event) = events.try_recv() {
                    if event.scan_id() == scan_id {
                        progress.handle_event(&event);
                    }
                }
                break;
            }
        }
    }
    progress.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_options_parsed_per_tool() {
        let opts = parse_tool_options(Some(r#"{"nmap": {"ports": "22,80"}, "nuclei": {"severity": "high"}}"#)).unwrap();
        assert_eq!(opts.len(), 2);
        assert_eq!(opts["nmap"]["ports"], "22,80");
    }

    #[test]
    fn test_tool_options_must_be_object() {
        assert!(matches!(parse_tool_options(Some("[1,2]")), Err(WardenError::Config(_))));
        assert!(parse_tool_options(Some("{not json")).is_err());
        assert!(parse_tool_options(None).unwrap().is_empty());
    }
}
