//! Preview cache
//!
//! Thumbnails keyed by (page identity, rotation) and nothing else. Position
//! and compression profile are not part of the key, so reordering pages or
//! changing profiles never causes a re-render.
//!
//! Each identity owns one slot. The map lock is only held to find or
//! replace a slot; rendering happens under the slot's own lock, so a second
//! request for the same key waits for the first render instead of
//! duplicating it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::PreviewConfig;
use crate::error::RenderError;
use crate::page::{Page, PageId, Rotation, SourceId};
use crate::raster::{placeholder, Bitmap, Rasterizer, Resolution};

/// A rendered thumbnail, or a placeholder standing in for one
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub bitmap: Bitmap,
    pub rotation: Rotation,
    /// Why the page could not be rendered, when `bitmap` is a placeholder
    pub error: Option<RenderError>,
}

impl Preview {
    pub fn is_placeholder(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Absent,
    Pending,
    Ready,
}

type Cell = Arc<Mutex<Option<Arc<Preview>>>>;

struct Slot {
    rotation: Rotation,
    cell: Cell,
}

pub struct PreviewCache {
    config: PreviewConfig,
    slots: Mutex<HashMap<PageId, Slot>>,
    renders: AtomicUsize,
}

impl PreviewCache {
    pub fn new(config: PreviewConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
            renders: AtomicUsize::new(0),
        }
    }

    /// Slot for (id, rotation), replacing one cached for another rotation
    fn slot(&self, id: PageId, rotation: Rotation) -> Cell {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(&id) {
            if slot.rotation == rotation {
                return Arc::clone(&slot.cell);
            }
            debug!(page = %id, ?rotation, "Rotation changed, evicting preview");
        }

        let cell: Cell = Arc::new(Mutex::new(None));
        slots.insert(
            id,
            Slot {
                rotation,
                cell: Arc::clone(&cell),
            },
        );
        cell
    }

    /// Cached preview for the page's current rotation, rendering it once
    ///
    /// A page that fails to render gets a placeholder, which is cached like
    /// any other preview. Only cancellation is returned as an error, and a
    /// cancelled render leaves the entry empty.
    pub fn get_or_render(
        &self,
        page: &Page,
        rasterizer: &dyn Rasterizer,
        cancel: &CancelToken,
    ) -> Result<Arc<Preview>, RenderError> {
        let rotation = page.rotation;
        let cell = self.slot(page.id(), rotation);
        let mut entry = cell.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(preview) = entry.as_ref() {
            return Ok(Arc::clone(preview));
        }

        self.renders.fetch_add(1, Ordering::SeqCst);
        let preview = match rasterizer.render(page, rotation, Resolution::from(self.config), cancel)
        {
            Ok(bitmap) => Preview {
                bitmap,
                rotation,
                error: None,
            },
            Err(RenderError::Cancelled) => return Err(RenderError::Cancelled),
            Err(err) => {
                warn!(page = %page.id(), error = %err, "Preview failed, using placeholder");
                Preview {
                    bitmap: placeholder(&self.config),
                    rotation,
                    error: Some(err),
                }
            }
        };

        let preview = Arc::new(preview);
        *entry = Some(Arc::clone(&preview));
        Ok(preview)
    }

    /// State of the entry for the page's current rotation
    pub fn state(&self, page: &Page) -> EntryState {
        let cell = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            match slots.get(&page.id()) {
                Some(slot) if slot.rotation == page.rotation => Arc::clone(&slot.cell),
                _ => return EntryState::Absent,
            }
        };

        let state = match cell.try_lock() {
            Ok(entry) if entry.is_some() => EntryState::Ready,
            Ok(_) => EntryState::Absent,
            Err(TryLockError::WouldBlock) => EntryState::Pending,
            Err(TryLockError::Poisoned(_)) => EntryState::Absent,
        };
        state
    }

    pub fn invalidate(&self, id: PageId) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Drop every preview belonging to one source file
    pub fn evict_source(&self, source: SourceId) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id, _| id.source != source);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders started since the cache was created
    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}
