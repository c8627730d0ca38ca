//! Durable links between calendar events and notes.
//!
//! All links live in one JSON object under [`MAPPING_KEY`], keyed by the
//! provider's event id. Links are created or updated, never removed here.

use std::collections::BTreeMap;
use std::sync::Arc;

use calsync_core::ProviderKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ProviderResult;
use crate::store::{SecureStore, get_json, set_json};

/// Store key of the mapping table.
pub const MAPPING_KEY: &str = "event_notes_mappings";

/// One event-to-notes link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventNotesLink {
    pub calendar_event_id: String,
    pub notes_id: String,
    pub provider: ProviderKind,
    pub linked_at: DateTime<Utc>,
}

type Table = BTreeMap<String, EventNotesLink>;

/// Forward and reverse lookup over the persisted links.
///
/// The table is read from the store once and cached; every write goes
/// through to the store before the cache is updated.
pub struct EventNotesMap {
    store: Arc<dyn SecureStore>,
    cache: Mutex<Option<Table>>,
}

impl std::fmt::Debug for EventNotesMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNotesMap").finish_non_exhaustive()
    }
}

impl EventNotesMap {
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(None),
        }
    }

    async fn loaded<'a>(
        &self,
        cache: &'a mut Option<Table>,
    ) -> ProviderResult<&'a mut Table> {
        if cache.is_none() {
            let table: Table = get_json(self.store.as_ref(), MAPPING_KEY)
                .await?
                .unwrap_or_default();
            debug!(links = table.len(), "loaded event notes mapping");
            *cache = Some(table);
        }
        Ok(cache.get_or_insert_with(Table::new))
    }

    /// Creates or updates the link for `event_id`.
    pub async fn link(
        &self,
        event_id: &str,
        notes_id: &str,
        provider: ProviderKind,
    ) -> ProviderResult<EventNotesLink> {
        let mut guard = self.cache.lock().await;
        let table = self.loaded(&mut guard).await?;

        let entry = EventNotesLink {
            calendar_event_id: event_id.to_string(),
            notes_id: notes_id.to_string(),
            provider,
            linked_at: Utc::now(),
        };
        let mut updated = table.clone();
        if let Some(previous) = updated.insert(event_id.to_string(), entry.clone()) {
            debug!(event_id, previous = %previous.notes_id, "relinking event");
        }
        set_json(self.store.as_ref(), MAPPING_KEY, &updated).await?;
        *table = updated;
        Ok(entry)
    }

    /// The notes linked to `event_id`.
    pub async fn get(&self, event_id: &str) -> ProviderResult<Option<String>> {
        Ok(self.entry(event_id).await?.map(|link| link.notes_id))
    }

    /// The full link for `event_id`.
    pub async fn entry(&self, event_id: &str) -> ProviderResult<Option<EventNotesLink>> {
        let mut guard = self.cache.lock().await;
        let table = self.loaded(&mut guard).await?;
        Ok(table.get(event_id).cloned())
    }

    /// The event linked to `notes_id`. A linear scan; if several events point
    /// at the same notes, the most recently linked one wins.
    pub async fn reverse_lookup(&self, notes_id: &str) -> ProviderResult<Option<String>> {
        let mut guard = self.cache.lock().await;
        let table = self.loaded(&mut guard).await?;
        Ok(table
            .values()
            .filter(|link| link.notes_id == notes_id)
            .max_by_key(|link| link.linked_at)
            .map(|link| link.calendar_event_id.clone()))
    }

    /// Number of stored links.
    pub async fn len(&self) -> ProviderResult<usize> {
        let mut guard = self.cache.lock().await;
        Ok(self.loaded(&mut guard).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;
    use crate::store::MemoryStore;

    fn map() -> (Arc<MemoryStore>, EventNotesMap) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), EventNotesMap::new(store))
    }

    #[tokio::test]
    async fn link_then_lookup_both_ways() {
        let (_, map) = map();
        map.link("evt-1", "note-a", ProviderKind::Google).await.unwrap();

        assert_eq!(map.get("evt-1").await.unwrap().as_deref(), Some("note-a"));
        assert_eq!(
            map.reverse_lookup("note-a").await.unwrap().as_deref(),
            Some("evt-1")
        );
        assert_eq!(map.get("evt-2").await.unwrap(), None);
        assert_eq!(map.reverse_lookup("note-z").await.unwrap(), None);
    }

    #[tokio::test]
    async fn relinking_updates_in_place() {
        let (_, map) = map();
        map.link("evt-1", "note-a", ProviderKind::Google).await.unwrap();
        map.link("evt-1", "note-b", ProviderKind::Google).await.unwrap();

        assert_eq!(map.len().await.unwrap(), 1);
        assert_eq!(map.get("evt-1").await.unwrap().as_deref(), Some("note-b"));
        assert_eq!(map.reverse_lookup("note-a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn persists_across_instances() {
        let (store, map) = map();
        map.link("AAMk1", "note-1", ProviderKind::Microsoft).await.unwrap();
        assert_eq!(store.keys(), vec![MAPPING_KEY.to_string()]);

        let reopened = EventNotesMap::new(store);
        let entry = reopened.entry("AAMk1").await.unwrap().unwrap();
        assert_eq!(entry.notes_id, "note-1");
        assert_eq!(entry.provider, ProviderKind::Microsoft);
    }

    #[tokio::test]
    async fn corrupt_table_is_storage_error() {
        let store = Arc::new(MemoryStore::new());
        store.set(MAPPING_KEY, "[not json".into()).await.unwrap();
        let map = EventNotesMap::new(store);
        let err = map.get("evt").await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::StorageError);
    }

    #[tokio::test]
    async fn stored_shape_is_keyed_by_event_id() {
        let (store, map) = map();
        map.link("evt-1", "note-a", ProviderKind::Google).await.unwrap();
        let raw = store.get(MAPPING_KEY).await.unwrap().unwrap();
        let table: Table = serde_json::from_str(&raw).unwrap();
        insta::assert_json_snapshot!(table, { ".*.linked_at" => "[linked_at]" }, @r#"
        {
          "evt-1": {
            "calendar_event_id": "evt-1",
            "notes_id": "note-a",
            "provider": "google",
            "linked_at": "[linked_at]"
          }
        }
        "#);
    }
}
