//! `calsync events`: upcoming meetings across every connected account.

use calsync_core::{CalendarEventRecord, EventTime, TimeWindow};
use chrono::{Local, TimeZone};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

pub async fn run(config: &ClientConfig, hours: Option<i64>, json: bool) -> ClientResult<()> {
    let hours = hours.unwrap_or(config.sync.hours);
    if hours <= 0 {
        return Err(ClientError::Config("--hours must be positive".to_string()));
    }

    let aggregator = config.aggregator()?;
    if aggregator.connected_providers().await?.is_empty() {
        return Err(ClientError::AuthRequired(
            "no connected calendars. Run `calsync auth google` or `calsync auth microsoft`"
                .to_string(),
        ));
    }

    let events = aggregator
        .fetch_events(TimeWindow::upcoming_hours(hours))
        .await?;

    if json {
        let out = serde_json::to_string_pretty(&events)
            .map_err(|e| ClientError::Config(format!("failed to serialize events: {e}")))?;
        println!("{out}");
        return Ok(());
    }

    if events.is_empty() {
        println!("No meetings in the next {hours} hours.");
    }
    for event in &events {
        println!("{}", format_event(event, &Local));
    }
    Ok(())
}

fn format_time<Tz: TimeZone>(time: &EventTime, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match time {
        EventTime::DateTime(dt) => dt.with_timezone(tz).format("%H:%M").to_string(),
        EventTime::AllDay(_) => String::new(),
    }
}

/// One line per event: day, time range, title, provider and join link.
pub fn format_event<Tz: TimeZone>(event: &CalendarEventRecord, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let (day, span) = match event.start {
        EventTime::DateTime(dt) => (
            dt.with_timezone(tz).format("%a %d %b").to_string(),
            format!("{}-{}", format_time(&event.start, tz), format_time(&event.end, tz)),
        ),
        EventTime::AllDay(date) => (date.format("%a %d %b").to_string(), "all day".to_string()),
    };

    let mut line = format!("{day} {span:<11} {} [{}]", event.title, event.provider);
    if let Some(ref link) = event.meeting_link {
        line.push_str("  ");
        line.push_str(link);
    }
    line
}
