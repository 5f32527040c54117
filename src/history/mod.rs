use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::errors::{OptimizerError, Result};
use crate::storage::{Storage, HISTORY_KEY};
use crate::wire::HistoryItem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    Appended { len: usize },
    Cleared,
}

/// A history item together with its position in the flat, newest-first list.
#[derive(Debug, Clone, Copy)]
pub struct GroupEntry<'a> {
    pub index: usize,
    pub item: &'a HistoryItem,
}

#[derive(Debug, Clone)]
pub struct HistoryGroup<'a> {
    pub original_prompt: &'a str,
    pub entries: Vec<GroupEntry<'a>>,
}

impl<'a> HistoryGroup<'a> {
    pub fn latest(&self) -> Option<GroupEntry<'a>> {
        self.entries.first().copied()
    }
}

/// Newest-first list of completed optimizations, persisted after every mutation.
pub struct HistoryStore {
    storage: Arc<dyn Storage>,
    items: Vec<HistoryItem>,
    events: broadcast::Sender<HistoryEvent>,
}

impl HistoryStore {
    /// Never fails: missing or unreadable storage yields an empty history.
    pub fn load(storage: Arc<dyn Storage>) -> Self {
        let items = match storage.get(HISTORY_KEY) {
            Ok(Some(raw)) => decode(&raw),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "history storage unreadable; starting empty");
                Vec::new()
            }
        };
        debug!(count = items.len(), "history loaded");
        let (events, _) = broadcast::channel(16);
        Self { storage, items, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    pub fn append(&mut self, item: HistoryItem) {
        self.items.insert(0, item);
        self.persist();
        let _ = self.events.send(HistoryEvent::Appended { len: self.items.len() });
    }

    /// Drops the stored document; a later `load` starts empty.
    pub fn clear(&mut self) {
        self.items.clear();
        if let Err(e) = self.storage.remove(HISTORY_KEY) {
            warn!(error = %e, "failed to remove stored history");
        }
        let _ = self.events.send(HistoryEvent::Cleared);
    }

    pub fn all(&self) -> &[HistoryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&HistoryItem> {
        self.items
            .get(index)
            .ok_or_else(|| OptimizerError::NotFound(format!("history item {index}")))
    }

    /// Groups by exact `original_prompt`, in first-seen order. With a non-empty
    /// search term, a group whose original prompt matches is kept whole;
    /// otherwise only items whose optimized prompt or change request match
    /// survive, and groups left empty are dropped.
    pub fn grouped(&self, search: &str) -> Vec<HistoryGroup<'_>> {
        let mut groups: Vec<HistoryGroup<'_>> = Vec::new();
        for (index, item) in self.items.iter().enumerate() {
            let entry = GroupEntry { index, item };
            match groups.iter_mut().find(|g| g.original_prompt == item.original_prompt) {
                Some(g) => g.entries.push(entry),
                None => groups.push(HistoryGroup {
                    original_prompt: &item.original_prompt,
                    entries: vec![entry],
                }),
            }
        }

        let term = search.trim().to_lowercase();
        if term.is_empty() {
            return groups;
        }

        groups
            .into_iter()
            .filter_map(|mut g| {
                if g.original_prompt.to_lowercase().contains(&term) {
                    return Some(g);
                }
                g.entries.retain(|e| {
                    e.item.optimized_prompt.to_lowercase().contains(&term)
                        || e.item.change_request.to_lowercase().contains(&term)
                });
                (!g.entries.is_empty()).then_some(g)
            })
            .collect()
    }

    fn persist(&self) {
        let write = serde_json::to_string(&self.items)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.storage.set(HISTORY_KEY, &json));
        if let Err(e) = write {
            warn!(error = %e, "failed to persist history");
        }
    }
}

fn decode(raw: &str) -> Vec<HistoryItem> {
    let values: Vec<serde_json::Value> = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "stored history is corrupt; starting empty");
            return Vec::new();
        }
    };
    values
        .into_iter()
        .enumerate()
        .filter_map(|(i, v)| match serde_json::from_value::<HistoryItem>(v) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(index = i, error = %e, "skipping unreadable history item");
                None
            }
        })
        .collect()
}
