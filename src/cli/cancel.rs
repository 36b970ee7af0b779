use std::sync::Arc;
use crate::cli::commands::CancelArgs;
use crate::cli::runtime::Runtime;
use crate::errors::WardenError;
use crate::models::ScanStatus;
use crate::pipeline::ScanService;
use crate::queue::DetachedQueue;

pub async fn handle_cancel(args: CancelArgs) -> Result<(), WardenError> {
    let runtime = Runtime::open(&args.store, false).await?;
    let engine = &runtime.engine;
    let service = ScanService::new(
        engine.gate().clone(),
        engine.aggregator().clone(),
        Arc::new(DetachedQueue),
        runtime.notifier.clone(),
    );

    let scan = service.cancel(&args.scan_id).await?;
    match scan.status {
        ScanStatus::Cancelled => println!("Scan {} cancelled", scan.id),
        _ => println!(
            "Scan {} is {}; the running worker will stop after its current tools",
            scan.id, scan.status
        ),
    }
    Ok(())
}
