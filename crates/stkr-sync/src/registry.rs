//! In-process registry of known packs and their published assets.
//!
//! Packs keep the order they were first registered in. Every mutation is
//! announced on a broadcast channel so front-ends can refresh without
//! polling.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use stkr_core::types::unix_now;
use stkr_core::{CachedPack, PackReference, StickerAsset};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 64;

/// One registered pack and, once loaded, its contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredPack {
    pub reference: PackReference,
    pub name: Option<String>,
    pub pack: Option<CachedPack>,
}

impl RegisteredPack {
    /// User-chosen name, else the manifest title, else the pack id.
    pub fn display_name(&self) -> &str {
        if let Some(name) = &self.name {
            return name;
        }
        match &self.pack {
            Some(pack) if !pack.manifest.title.is_empty() => &pack.manifest.title,
            _ => &self.reference.pack_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    PackRegistered { pack_id: String },
    PackUpdated { pack_id: String, stickers: usize, placeholder: bool },
    PackRemoved { pack_id: String },
    SelectionChanged { pack_id: Option<String> },
    Cleared,
}

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    packs: HashMap<String, RegisteredPack>,
    assets: HashMap<String, Vec<StickerAsset>>,
    selected: Option<String>,
}

impl Inner {
    fn upsert(&mut self, reference: &PackReference, name: Option<String>) -> bool {
        match self.packs.get_mut(&reference.pack_id) {
            Some(entry) => {
                entry.reference = reference.clone();
                if name.is_some() {
                    entry.name = name;
                }
                false
            }
            None => {
                self.order.push(reference.pack_id.clone());
                self.packs.insert(
                    reference.pack_id.clone(),
                    RegisteredPack {
                        reference: reference.clone(),
                        name,
                        pack: None,
                    },
                );
                true
            }
        }
    }
}

pub struct Registry {
    inner: Mutex<Inner>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    /// Receive every change made after this call. Slow receivers see
    /// `RecvError::Lagged` rather than blocking the registry.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Add a pack, or update the key and name of an existing one in place.
    /// Returns true if the pack was new.
    pub fn register(&self, reference: &PackReference, name: Option<String>) -> bool {
        let added = self.inner.lock().unwrap().upsert(reference, name);
        if added {
            debug!(pack_id = %reference.pack_id, "pack registered");
            self.emit(RegistryEvent::PackRegistered {
                pack_id: reference.pack_id.clone(),
            });
        }
        added
    }

    /// Store a loaded pack and its assets, registering it first if needed.
    pub fn publish(&self, reference: &PackReference, pack: CachedPack) {
        let stickers = pack.assets.len();
        let placeholder = pack.manifest.placeholder;
        let added = {
            let mut inner = self.inner.lock().unwrap();
            let added = inner.upsert(reference, None);
            inner
                .assets
                .insert(reference.pack_id.clone(), pack.assets.clone());
            if let Some(entry) = inner.packs.get_mut(&reference.pack_id) {
                entry.pack = Some(pack);
            }
            added
        };
        if added {
            self.emit(RegistryEvent::PackRegistered {
                pack_id: reference.pack_id.clone(),
            });
        }
        self.emit(RegistryEvent::PackUpdated {
            pack_id: reference.pack_id.clone(),
            stickers,
            placeholder,
        });
    }

    /// Drop a pack. Clears the selection if it pointed at this pack.
    pub fn remove(&self, pack_id: &str) -> bool {
        let (removed, deselected) = {
            let mut inner = self.inner.lock().unwrap();
            let removed = inner.packs.remove(pack_id).is_some();
            inner.assets.remove(pack_id);
            inner.order.retain(|id| id != pack_id);
            let deselected = inner.selected.as_deref() == Some(pack_id);
            if deselected {
                inner.selected = None;
            }
            (removed, deselected)
        };
        if removed {
            self.emit(RegistryEvent::PackRemoved {
                pack_id: pack_id.to_string(),
            });
        }
        if deselected {
            self.emit(RegistryEvent::SelectionChanged { pack_id: None });
        }
        removed
    }

    pub fn clear(&self) {
        *self.inner.lock().unwrap() = Inner::default();
        self.emit(RegistryEvent::Cleared);
    }

    pub fn contains(&self, pack_id: &str) -> bool {
        self.inner.lock().unwrap().packs.contains_key(pack_id)
    }

    pub fn get(&self, pack_id: &str) -> Option<RegisteredPack> {
        self.inner.lock().unwrap().packs.get(pack_id).cloned()
    }

    /// All packs in registration order.
    pub fn list_packs(&self) -> Vec<RegisteredPack> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.packs.get(id).cloned())
            .collect()
    }

    /// Assets of one pack in manifest order; empty if unknown or not loaded.
    /// Marks the pack as accessed.
    pub fn get_pack_assets(&self, pack_id: &str) -> Vec<StickerAsset> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pack) = inner
            .packs
            .get_mut(pack_id)
            .and_then(|entry| entry.pack.as_mut())
        {
            pack.last_accessed = unix_now();
        }
        inner.assets.get(pack_id).cloned().unwrap_or_default()
    }

    /// Every published asset, packs in registration order.
    pub fn get_all_assets(&self) -> Vec<StickerAsset> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.assets.get(id))
            .flatten()
            .cloned()
            .collect()
    }

    /// Select a registered pack, or clear the selection with `None`.
    /// Returns false if the pack is unknown.
    pub fn select_pack(&self, pack_id: Option<&str>) -> bool {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(id) = pack_id {
                if !inner.packs.contains_key(id) {
                    return false;
                }
            }
            let next = pack_id.map(str::to_string);
            let changed = inner.selected != next;
            inner.selected = next;
            changed
        };
        if changed {
            self.emit(RegistryEvent::SelectionChanged {
                pack_id: pack_id.map(str::to_string),
            });
        }
        true
    }

    pub fn selected_pack(&self) -> Option<String> {
        self.inner.lock().unwrap().selected.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
