//! `calsync calendars <provider>`: list calendars or change the selection.

use calsync_core::ProviderKind;
use calsync_providers::CalendarInfo;

use crate::config::ClientConfig;
use crate::error::ClientResult;

pub async fn run(
    config: &ClientConfig,
    provider: ProviderKind,
    select: Option<Vec<String>>,
) -> ClientResult<()> {
    let aggregator = config.aggregator()?;

    if let Some(ids) = select {
        aggregator.set_visible_calendars(provider, &ids).await?;
        let stored = aggregator.visible_calendars(provider).await?;
        if stored.is_empty() {
            println!("Fetching the primary {provider} calendar.");
        } else {
            println!("Fetching {} {provider} calendar(s): {}", stored.len(), stored.join(", "));
        }
        return Ok(());
    }

    let calendars = aggregator.list_calendars(provider).await?;
    let visible = aggregator.visible_calendars(provider).await?;
    for calendar in &calendars {
        println!("{}", format_calendar(calendar, is_fetched(calendar, &visible)));
    }
    Ok(())
}

/// Whether `calendar` is part of the fetch set for `visible`.
fn is_fetched(calendar: &CalendarInfo, visible: &[String]) -> bool {
    if visible.is_empty() {
        calendar.is_primary
    } else {
        visible.iter().any(|id| *id == calendar.id)
    }
}

fn format_calendar(calendar: &CalendarInfo, fetched: bool) -> String {
    let marker = if fetched { '*' } else { ' ' };
    let mut line = format!("{marker} {}  {}", calendar.id, calendar.name);
    if calendar.is_primary {
        line.push_str(" (primary)");
    }
    if let Some(ref role) = calendar.access_role {
        line.push_str(&format!(" [{role}]"));
    }
    line
}
