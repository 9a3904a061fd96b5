// src/registry.rs
//
// Live devices on one link, keyed by connection handle.
//
// Owned by the link's decoding thread. Every handle insertion and removal is
// mirrored into a HandleSet shared with the dispatcher, so command routing from
// other threads reads an atomic snapshot instead of locking the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::decoders::DeviceState;
use crate::error::{DongleError, Result};
use crate::io::LinkId;
use crate::protocol::DeviceType;

// ============================================================================
// Handle Set
// ============================================================================

/// Lock-free set of the 256 possible handles.
#[derive(Debug, Default)]
pub struct HandleSet {
    bits: [AtomicU64; 4],
}

impl HandleSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(handle: u8) -> (usize, u64) {
        ((handle >> 6) as usize, 1u64 << (handle & 0x3F))
    }

    pub fn insert(&self, handle: u8) {
        let (word, mask) = Self::slot(handle);
        self.bits[word].fetch_or(mask, Ordering::AcqRel);
    }

    pub fn remove(&self, handle: u8) {
        let (word, mask) = Self::slot(handle);
        self.bits[word].fetch_and(!mask, Ordering::AcqRel);
    }

    pub fn contains(&self, handle: u8) -> bool {
        let (word, mask) = Self::slot(handle);
        self.bits[word].load(Ordering::Acquire) & mask != 0
    }

    pub fn clear(&self) {
        for word in &self.bits {
            word.store(0, Ordering::Release);
        }
    }

    /// Handles currently present, ascending.
    pub fn handles(&self) -> Vec<u8> {
        (0..=u8::MAX).filter(|h| self.contains(*h)).collect()
    }
}

// ============================================================================
// Device Records
// ============================================================================

/// One live logical device behind a connection handle.
#[derive(Clone, Debug)]
pub struct DeviceRecord {
    pub device_type: DeviceType,
    pub handle: u8,
    pub link: LinkId,
    /// Name announced in the identity frame
    pub name: String,
    pub state: DeviceState,
    pub connected_at: DateTime<Utc>,
    /// Data frames routed to this device
    pub frames: u64,
}

/// Result of registering an identity frame.
#[derive(Debug)]
pub enum IdentityOutcome {
    /// Handle was free
    Created,
    /// Handle was still live; the old occupant was retired
    Replaced(DeviceRecord),
}

/// Device name from an identity payload (`[config, name...]`).
fn announced_name(payload: &[u8]) -> String {
    let raw = payload.get(1..).unwrap_or(&[]);
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

/// Live devices on one link.
pub struct DeviceRegistry {
    link: LinkId,
    records: HashMap<u8, DeviceRecord>,
    handles: Arc<HandleSet>,
}

impl DeviceRegistry {
    pub fn new(link: LinkId) -> Self {
        DeviceRegistry {
            link,
            records: HashMap::new(),
            handles: Arc::new(HandleSet::new()),
        }
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Shared view of the live handles.
    pub fn handle_set(&self) -> Arc<HandleSet> {
        Arc::clone(&self.handles)
    }

    /// Register the device announced by an identity frame, replacing any live
    /// occupant of the handle. Decoder state always starts fresh.
    pub fn on_identity_frame(
        &mut self,
        device_type: DeviceType,
        handle: u8,
        payload: &[u8],
    ) -> (&DeviceRecord, IdentityOutcome) {
        let record = DeviceRecord {
            device_type,
            handle,
            link: self.link,
            name: announced_name(payload),
            state: DeviceState::from_identity(device_type, payload),
            connected_at: Utc::now(),
            frames: 0,
        };

        let outcome = match self.records.insert(handle, record) {
            Some(old) => {
                tlog!(
                    "[registry:{}] Handle {} reassigned without disconnect: retiring {} '{}' after {} frames",
                    self.link,
                    handle,
                    old.device_type,
                    old.name,
                    old.frames
                );
                IdentityOutcome::Replaced(old)
            }
            None => IdentityOutcome::Created,
        };
        self.handles.insert(handle);

        let record = &self.records[&handle];
        tlog!(
            "[registry:{}] Handle {}: {} '{}' connected",
            self.link,
            handle,
            record.device_type,
            record.name
        );
        (record, outcome)
    }

    /// Remove the device on `handle`, if any.
    pub fn on_disconnect(&mut self, handle: u8) -> Option<DeviceRecord> {
        let removed = self.records.remove(&handle);
        self.handles.remove(handle);
        if let Some(record) = &removed {
            tlog!(
                "[registry:{}] Handle {}: {} '{}' disconnected after {} frames",
                self.link,
                handle,
                record.device_type,
                record.name,
                record.frames
            );
        }
        removed
    }

    pub fn lookup(&self, handle: u8) -> Result<&DeviceRecord> {
        self.records
            .get(&handle)
            .ok_or(DongleError::UnknownHandle { handle })
    }

    pub fn lookup_mut(&mut self, handle: u8) -> Result<&mut DeviceRecord> {
        self.records
            .get_mut(&handle)
            .ok_or(DongleError::UnknownHandle { handle })
    }

    /// Drop every record, as when the link closes.
    pub fn close(&mut self) {
        self.records.clear();
        self.handles.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.values()
    }
}
