use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::{B256, hex};
use tracing::debug;

use crate::models::datasets::logs::UNKNOWN_EVENT;

#[derive(Debug, Clone)]
pub struct EventEntry {
    pub name: String,
    pub event: Arc<Event>,
}

// topic0 -> event, built once per run and read-only afterwards
#[derive(Debug, Clone, Default)]
pub struct SignatureTable {
    entries: HashMap<B256, EventEntry>,
    by_name: HashMap<String, B256>,
}

impl SignatureTable {
    pub fn from_abi(abi: &JsonAbi) -> Self {
        let mut entries = HashMap::new();
        let mut by_name = HashMap::new();
        let mut taken: HashSet<String> = HashSet::new();

        // `JsonAbi::events` groups overloads under one name; keep ABI order within a group
        for event in abi.events() {
            if event.anonymous {
                debug!("Skipping anonymous event {}: it has no signature topic", event.name);
                continue;
            }

            let selector = event.selector();
            if entries.contains_key(&selector) {
                continue;
            }

            let name = if taken.contains(&event.name) {
                format!("{}_{}", event.name, &hex::encode(selector)[..8])
            } else {
                event.name.clone()
            };
            debug!("{} - {:#x} ({})", name, selector, event.signature());

            taken.insert(name.clone());
            by_name.insert(name.clone(), selector);
            entries.insert(
                selector,
                EventEntry {
                    name,
                    event: Arc::new(event.clone()),
                },
            );
        }

        Self { entries, by_name }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, topic0: &B256) -> Option<&EventEntry> {
        self.entries.get(topic0)
    }

    pub fn by_name(&self, name: &str) -> Option<&EventEntry> {
        self.by_name.get(name).and_then(|topic| self.entries.get(topic))
    }

    pub fn classify(&self, topics: &[B256]) -> &str {
        topics
            .first()
            .and_then(|topic0| self.entries.get(topic0))
            .map(|entry| entry.name.as_str())
            .unwrap_or(UNKNOWN_EVENT)
    }

    // Same as `classify` for topics that are still text (ingest writes rows without
    // validating them)
    pub fn classify_text(&self, topics: &[String]) -> &str {
        topics
            .first()
            .and_then(|topic0| topic0.parse::<B256>().ok())
            .and_then(|topic0| self.entries.get(&topic0))
            .map(|entry| entry.name.as_str())
            .unwrap_or(UNKNOWN_EVENT)
    }
}
