//! Memory watchpoints.
//!
//! A watchpoint names a byte range of one object. Every load, store, fill and copy that may
//! touch an enabled range is logged and appended to the state's hit list, which ends up in the
//! path's terminal record.

use std::sync::Arc;

use strum::Display;
use tracing::info;

use crate::{memory::ObjectId, Result};

/// A watched byte range `[low, high]` of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Watchpoint {
    object: ObjectId,
    low: u64,
    high: u64,
}

impl Watchpoint {
    /// Watches `bytes` bytes of `object` starting at `offset`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Malformed`] for an empty range or one that overflows.
    pub fn new(object: ObjectId, offset: u64, bytes: u64) -> Result<Self> {
        let high = bytes
            .checked_sub(1)
            .and_then(|extra| offset.checked_add(extra))
            .ok_or_else(|| malformed_error!("watchpoint of {} bytes at offset {}", bytes, offset))?;
        Ok(Watchpoint {
            object,
            low: offset,
            high,
        })
    }

    /// The watched object.
    #[must_use]
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// First watched offset.
    #[must_use]
    pub fn low(&self) -> u64 {
        self.low
    }

    /// Last watched offset, inclusive.
    #[must_use]
    pub fn high(&self) -> u64 {
        self.high
    }

    /// Whether `len` bytes at `start` overlap the range.
    fn overlaps(&self, start: u64, len: u64) -> bool {
        let end = start.saturating_add(len.max(1) - 1);
        start <= self.high && end >= self.low
    }
}

/// Direction of a watched access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum AccessKind {
    /// Load, or the source of a copy
    Read,
    /// Store, fill, or the destination of a copy
    Write,
}

/// One access that triggered a watchpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchHit {
    /// Name the watchpoint was added under
    pub name: Arc<str>,
    /// Direction of the access
    pub kind: AccessKind,
    /// Start of the access within the object; `None` when the offset was symbolic and the
    /// access only may have touched the range
    pub offset: Option<u64>,
    /// Bytes accessed
    pub len: u64,
}

/// The watchpoints of one state, with the hits recorded so far.
///
/// Both tables are persistent, so forked states share them until one side records a hit.
#[derive(Debug, Clone, Default)]
pub struct Watchpoints {
    entries: imbl::HashMap<Arc<str>, (Watchpoint, bool)>,
    hits: imbl::Vector<WatchHit>,
}

impl Watchpoints {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an enabled watchpoint. Returns `true` if it replaced one of the same name.
    pub fn add(&mut self, name: impl Into<Arc<str>>, watchpoint: Watchpoint) -> bool {
        self.entries
            .insert(name.into(), (watchpoint, true))
            .is_some()
    }

    /// Removes a watchpoint. Returns `false` if none had that name.
    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Re-enables a watchpoint. Returns `false` if none had that name.
    pub fn enable(&mut self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    /// Disables a watchpoint without removing it. Returns `false` if none had that name.
    pub fn disable(&mut self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.1 = enabled;
                true
            }
            None => false,
        }
    }

    /// Returns `true` if no watchpoint is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hits recorded so far, oldest first.
    pub fn hits(&self) -> impl Iterator<Item = &WatchHit> {
        self.hits.iter()
    }

    /// Records the hits of an access of `len` bytes to `object` at `offset`.
    ///
    /// A symbolic offset (`None`) may reach any byte of the object, so every enabled
    /// watchpoint on that object reports a possible hit.
    pub(crate) fn observe(&mut self, object: ObjectId, offset: Option<u64>, len: u64, kind: AccessKind) {
        let mut triggered: Vec<Arc<str>> = self
            .entries
            .iter()
            .filter(|(_, (watch, enabled))| {
                *enabled
                    && watch.object == object
                    && offset.is_none_or(|start| watch.overlaps(start, len))
            })
            .map(|(name, _)| name.clone())
            .collect();
        triggered.sort();
        for name in triggered {
            info!(watchpoint = %name, %kind, ?offset, len, "watchpoint triggered");
            self.hits.push_back(WatchHit {
                name,
                kind,
                offset,
                len,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_watchpoint_is_rejected() {
        assert!(Watchpoint::new(ObjectId(0), 4, 0).is_err());
        assert!(Watchpoint::new(ObjectId(0), u64::MAX, 2).is_err());
        let watch = Watchpoint::new(ObjectId(0), 4, 4).unwrap();
        assert_eq!((watch.low(), watch.high()), (4, 7));
    }

    #[test]
    fn test_overlap_and_enable() {
        let mut watches = Watchpoints::new();
        let id = ObjectId(3);
        assert!(!watches.add("w", Watchpoint::new(id, 4, 4).unwrap()));

        watches.observe(id, Some(0), 4, AccessKind::Write);
        watches.observe(ObjectId(2), Some(4), 4, AccessKind::Write);
        assert_eq!(watches.hits().count(), 0);

        watches.observe(id, Some(6), 4, AccessKind::Read);
        watches.observe(id, None, 1, AccessKind::Write);
        let hits: Vec<_> = watches.hits().map(|h| (h.kind, h.offset)).collect();
        assert_eq!(
            hits,
            vec![(AccessKind::Read, Some(6)), (AccessKind::Write, None)]
        );

        assert!(watches.disable("w"));
        watches.observe(id, Some(4), 1, AccessKind::Read);
        assert_eq!(watches.hits().count(), 2);
        assert!(watches.enable("w"));
        assert!(watches.remove("w"));
        assert!(!watches.enable("w"));
    }
}
