use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::{config::Config, fetcher::ShipmentWatcher};

/// Polls on `config.cron_schedule` (and once right away) until every watched
/// shipment has been delivered.
pub async fn create_and_run_scheduler(config: Config, watcher: Arc<ShipmentWatcher>) -> Result<()> {
    let mut scheduler = JobScheduler::new().await?;

    let job_watcher = watcher.clone();
    let job = Job::new_async(config.cron_schedule.as_str(), move |_uuid, _l| {
        let watcher = job_watcher.clone();
        Box::pin(async move {
            execute_watch_job(watcher).await;
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    execute_watch_job(watcher.clone()).await;

    while !watcher.is_finished().await {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
    }

    println!("🎉 All shipments delivered");
    scheduler.shutdown().await?;
    Ok(())
}

async fn execute_watch_job(watcher: Arc<ShipmentWatcher>) {
    if watcher.is_finished().await {
        return;
    }

    println!(
        "[{}] Polling carriers...",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("================================");

    if let Err(e) = watcher.run().await {
        log::error!("Error during watch job: {:?}", e);
    } else {
        println!(
            "[{}] Poll completed, {} shipment(s) still pending",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            watcher.pending().await.len()
        );
    }
    println!("================================");
}
