//! `calsync link` and `calsync lookup`.

use calsync_core::ProviderKind;
use calsync_providers::EventNotesMap;

use crate::cli::LookupArgs;
use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Links `event_id` to `notes_id`, then tries to annotate the event.
pub async fn link(
    config: &ClientConfig,
    event_id: &str,
    notes_id: &str,
    provider: ProviderKind,
) -> ClientResult<()> {
    let aggregator = config.aggregator()?;
    let link = aggregator.link(event_id, notes_id, provider).await?;
    println!(
        "Linked {provider} event {} to notes {} at {}",
        link.calendar_event_id,
        link.notes_id,
        link.linked_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

/// Looks up either direction. Reads only the local store, so no relay or
/// network access is needed.
pub async fn lookup(config: &ClientConfig, args: &LookupArgs) -> ClientResult<()> {
    let map = EventNotesMap::new(config.store());
    match resolve(&map, args).await? {
        Some(id) => println!("{id}"),
        None => match (&args.event, &args.notes) {
            (Some(event), _) => println!("No notes linked to event {event}."),
            (_, Some(notes)) => println!("No event linked to notes {notes}."),
            _ => {}
        },
    }
    Ok(())
}

async fn resolve(map: &EventNotesMap, args: &LookupArgs) -> ClientResult<Option<String>> {
    match (&args.event, &args.notes) {
        (Some(event), _) => Ok(map.get(event).await?),
        (_, Some(notes)) => Ok(map.reverse_lookup(notes).await?),
        (None, None) => Ok(None),
    }
}
