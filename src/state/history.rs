/// Creation history ledger
///
/// A capped, most-recent-first list of past creations, persisted as one
/// JSON array in a single library slot. Storage failures never reach the
/// caller: a full slot is handled by evicting the oldest entries until the
/// write fits.

use rand::Rng;

use super::data::{HistoryEntry, HistoryKind, HistoryPatch, NewHistoryEntry};
use super::library::SlotStore;
use crate::error::StudioError;

/// Slot holding the serialized history
pub const HISTORY_KEY: &str = "masterbot-history";

/// Maximum number of entries kept
pub const MAX_HISTORY_ENTRIES: usize = 50;

const ID_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

type Clock = Box<dyn FnMut() -> i64 + Send>;

/// Epoch millis from the system clock
pub fn system_now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Time followed by a random base-36 suffix. Collisions are unlikely but possible.
pub fn generate_id(now_ms: i64) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{now_ms}{suffix}")
}

pub struct HistoryLedger<S: SlotStore> {
    store: S,
    entries: Vec<HistoryEntry>,
    clock: Clock,
}

impl<S: SlotStore> HistoryLedger<S> {
    /// Load the ledger from `store` using the system clock
    pub fn load(store: S) -> Self {
        Self::with_clock(store, Box::new(system_now_ms))
    }

    /// Load the ledger with an injected clock
    pub fn with_clock(store: S, clock: Clock) -> Self {
        let entries = load_all(&store);
        tracing::info!("history loaded with {} entries", entries.len());
        Self { store, entries, clock }
    }

    /// All entries, most recent first
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Entries of one kind, for the history tabs
    pub fn entries_of(&self, kind: HistoryKind) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    pub fn get(&self, id: &str) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Record a new creation at the front of the ledger
    pub fn add(&mut self, new: NewHistoryEntry) -> HistoryEntry {
        let now = (self.clock)();
        let entry = HistoryEntry {
            id: generate_id(now),
            kind: new.kind,
            created_at_epoch_ms: now,
            result_image: new.result_image,
            prompt_text: new.prompt_text,
            source_images: new.source_images,
        };

        self.entries.insert(0, entry.clone());
        self.entries.truncate(MAX_HISTORY_ENTRIES);
        self.persist();

        tracing::debug!(id = %entry.id, kind = entry.kind.label(), "history entry added");
        entry
    }

    /// Merge `patch` into entry `id`, refresh its timestamp and move it to the front.
    ///
    /// Nothing is written when the serialized ledger is unchanged, which is
    /// always the case for an unknown id.
    pub fn update(&mut self, id: &str, patch: HistoryPatch) {
        let before = serialize(&self.entries);

        let mut updated = self.entries.clone();
        if let Some(entry) = updated.iter_mut().find(|e| e.id == id) {
            patch.apply_to(entry);
            entry.created_at_epoch_ms = (self.clock)();
        }
        updated.sort_by(|a, b| b.created_at_epoch_ms.cmp(&a.created_at_epoch_ms));

        if serialize(&updated) != before {
            self.entries = updated;
            self.persist();
        }
    }

    /// Delete entry `id`
    pub fn remove(&mut self, id: &str) {
        self.entries.retain(|e| e.id != id);
        self.persist();
    }

    /// Write the ledger, evicting the oldest entries while the slot is full.
    ///
    /// Returns how many entries were dropped. The in-memory ledger always
    /// ends up equal to what was written.
    fn persist(&mut self) -> usize {
        let mut trimmed = self.entries.clone();

        loop {
            let json = serialize(&trimmed);
            match self.store.write_slot(HISTORY_KEY, &json) {
                Ok(()) => break,
                Err(StudioError::Persistence(reason)) => {
                    if trimmed.is_empty() {
                        tracing::warn!("history slot rejects even an empty ledger: {reason}");
                        break;
                    }
                    tracing::warn!("history slot full ({reason}), dropping oldest entry");
                    trimmed.pop();
                }
                Err(e) => {
                    tracing::error!("error saving history: {e}");
                    return 0;
                }
            }
        }

        let dropped = self.entries.len() - trimmed.len();
        if dropped > 0 {
            tracing::warn!("history trimmed by {dropped} entries to fit storage");
            self.entries = trimmed;
        }
        dropped
    }
}

/// Read the ledger from storage; empty on absence or corruption.
pub fn load_all<S: SlotStore>(store: &S) -> Vec<HistoryEntry> {
    let raw = match store.read_slot(HISTORY_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::error!("error loading history: {e}");
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<HistoryEntry>>(&raw) {
        Ok(mut entries) => {
            entries.sort_by(|a, b| b.created_at_epoch_ms.cmp(&a.created_at_epoch_ms));
            entries.truncate(MAX_HISTORY_ENTRIES);
            entries
        }
        Err(e) => {
            tracing::error!("stored history is corrupt, starting empty: {e}");
            Vec::new()
        }
    }
}

fn serialize(entries: &[HistoryEntry]) -> String {
    // Serializing plain strings and integers cannot fail
    serde_json::to_string(entries).unwrap_or_else(|_| "[]".to_string())
}
