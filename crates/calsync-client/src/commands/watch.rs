//! `calsync watch`: poll every connected calendar until Ctrl-C.

use std::time::Duration;

use calsync_core::TimeWindow;
use calsync_providers::CalendarAggregator;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::poller::{Poller, PollerStats};

use super::events::format_event;

pub async fn run(config: &ClientConfig, interval: Option<u64>) -> ClientResult<()> {
    let mut poller_config = config.poller_config();
    if let Some(secs) = interval {
        poller_config.interval = Duration::from_secs(secs.max(1));
    }

    let aggregator = &config.aggregator()?;
    let hours = config.sync.hours;

    let stats = Poller::new(poller_config)
        .run(
            move || sync_once(aggregator, hours),
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for Ctrl-C");
                }
            },
        )
        .await;

    report(&stats);
    Ok(())
}

async fn sync_once(aggregator: &CalendarAggregator, hours: i64) -> ClientResult<()> {
    let events = aggregator
        .fetch_events(TimeWindow::upcoming_hours(hours))
        .await?;
    info!(events = events.len(), hours, "calendars synced");
    if let Some(next) = events.first() {
        println!("{}", format_event(next, &chrono::Local));
    }
    Ok(())
}

fn report(stats: &PollerStats) {
    eprintln!(
        "Stopped after {} sync(s), {} failed.",
        stats.syncs, stats.failures
    );
}
