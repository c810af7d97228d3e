//! Playlist identity and display order
//!
//! Every playlist is born with a unique integer stamp (the basename of its
//! on-disk file, `1000.aplist`, `1001.aplist`, …). The stamp's record in the
//! ID table is immortal: deleting a playlist clears the record's data and
//! sets its index to -1, so public handles held by consumers keep resolving,
//! to nothing, instead of dangling.
//!
//! In brief:  Playlist (public handle, wraps a stamp)
//!              looks up ->
//!            IdRecord (unique ID / weak link, lives forever)
//!              owns ->
//!            PlaylistData (actual playlist data, present while alive)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::playlist::PlaylistData;
use crate::types::DEFAULT_TITLE;

/// Public playlist handle
///
/// A small copyable value that may outlive the playlist it names. Every
/// operation through a handle whose playlist is gone is a safe no-op
/// returning the operation's neutral value. The null handle (`default()`)
/// names no playlist at all and behaves the same way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Playlist {
    pub(crate) stamp: Option<u32>,
}

impl Playlist {
    pub(crate) fn from_stamp(stamp: u32) -> Self {
        Self { stamp: Some(stamp) }
    }

    /// The handle that names no playlist
    pub fn null() -> Self {
        Self::default()
    }

    /// Whether this handle names no playlist (it may still name a deleted one)
    pub fn is_null(&self) -> bool {
        self.stamp.is_none()
    }
}

/// Immortal record behind one stamp
#[derive(Debug)]
pub(crate) struct IdRecord {
    /// Display position, -1 once the playlist has been deleted
    pub index: i32,

    /// The playlist itself; `None` once deleted
    pub data: Option<PlaylistData>,
}

/// Stamp table plus display order
#[derive(Debug)]
pub(crate) struct Registry {
    table: HashMap<u32, IdRecord>,
    order: Vec<u32>,
    next_stamp: u32,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            order: Vec::new(),
            next_stamp: 1000,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn stamps(&self) -> Vec<u32> {
        self.order.clone()
    }

    pub fn stamp_at(&self, index: usize) -> Option<u32> {
        self.order.get(index).copied()
    }

    /// Display index of a stamp, -1 when deleted or unknown
    pub fn index_of(&self, stamp: u32) -> i32 {
        self.table.get(&stamp).map(|record| record.index).unwrap_or(-1)
    }

    pub fn data(&self, stamp: u32) -> Option<&PlaylistData> {
        self.table.get(&stamp).and_then(|record| record.data.as_ref())
    }

    pub fn data_mut(&mut self, stamp: u32) -> Option<&mut PlaylistData> {
        self.table
            .get_mut(&stamp)
            .and_then(|record| record.data.as_mut())
    }

    /// Allocate a stamp, honoring `requested` when it is free
    fn allocate_stamp(&mut self, requested: Option<u32>) -> u32 {
        if let Some(stamp) = requested {
            if !self.table.contains_key(&stamp) {
                return stamp;
            }
        }
        while self.table.contains_key(&self.next_stamp) {
            self.next_stamp += 1;
        }
        self.next_stamp
    }

    /// Create a playlist and insert it at `at` (clamped). Returns its stamp.
    pub fn insert(&mut self, at: usize, requested: Option<u32>) -> u32 {
        let at = at.min(self.order.len());
        let stamp = self.allocate_stamp(requested);

        self.table.insert(
            stamp,
            IdRecord {
                index: -1,
                data: Some(PlaylistData::new(DEFAULT_TITLE)),
            },
        );
        self.order.insert(at, stamp);
        self.renumber_from(at);
        stamp
    }

    /// Delete a playlist: drop it from the order, null its record.
    ///
    /// Returns its old display index, or `None` for a dead/unknown stamp.
    pub fn remove(&mut self, stamp: u32) -> Option<usize> {
        let record = self.table.get_mut(&stamp)?;
        if record.data.is_none() {
            return None;
        }

        let at = record.index as usize;
        record.data = None;
        record.index = -1;

        self.order.remove(at);
        self.renumber_from(at);
        Some(at)
    }

    /// Move `count` playlists from `from` so they end up starting at `to`.
    pub fn reorder(&mut self, from: i32, to: i32, count: i32) -> bool {
        let len = self.order.len() as i32;
        if from < 0 || to < 0 || count < 0 || from + count > len || to + count > len {
            return false;
        }

        let (from, to, count) = (from as usize, to as usize, count as usize);
        let block: Vec<u32> = self.order.drain(from..from + count).collect();
        self.order.splice(to..to, block);

        let begin = from.min(to);
        let end = from.max(to) + count;
        self.renumber_range(begin, end);
        true
    }

    fn renumber_from(&mut self, at: usize) {
        self.renumber_range(at, self.order.len());
    }

    fn renumber_range(&mut self, begin: usize, end: usize) {
        for i in begin..end.min(self.order.len()) {
            let stamp = self.order[i];
            if let Some(record) = self.table.get_mut(&stamp) {
                record.index = i as i32;
            }
        }
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.table.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_start_at_1000_and_stay_unique() {
        let mut registry = Registry::new();
        let a = registry.insert(0, None);
        let b = registry.insert(1, None);
        assert_eq!(a, 1000);
        assert_eq!(b, 1001);

        // a requested stamp in use falls back to allocation
        let c = registry.insert(2, Some(1000));
        assert_eq!(c, 1002);

        // a free requested stamp is honored
        let d = registry.insert(3, Some(500));
        assert_eq!(d, 500);
    }

    #[test]
    fn indices_track_display_order() {
        let mut registry = Registry::new();
        let a = registry.insert(0, None);
        let b = registry.insert(1, None);
        let c = registry.insert(0, None);

        assert_eq!(registry.index_of(c), 0);
        assert_eq!(registry.index_of(a), 1);
        assert_eq!(registry.index_of(b), 2);
        for i in 0..registry.len() {
            let stamp = registry.stamp_at(i).unwrap();
            assert_eq!(registry.index_of(stamp), i as i32);
        }
    }

    #[test]
    fn removal_nulls_the_record_but_keeps_it() {
        let mut registry = Registry::new();
        let a = registry.insert(0, None);
        let b = registry.insert(1, None);

        assert_eq!(registry.remove(a), Some(0));
        assert_eq!(registry.index_of(a), -1);
        assert!(registry.data(a).is_none());
        assert_eq!(registry.index_of(b), 0);

        // double delete is a no-op
        assert_eq!(registry.remove(a), None);

        // the dead stamp is never reallocated
        let c = registry.insert(1, Some(a));
        assert_ne!(c, a);
    }

    #[test]
    fn reorder_rotates_the_block() {
        let mut registry = Registry::new();
        let stamps: Vec<u32> = (0..5).map(|i| registry.insert(i, None)).collect();

        assert!(registry.reorder(0, 2, 2));
        let order: Vec<u32> = (0..5).map(|i| registry.stamp_at(i).unwrap()).collect();
        assert_eq!(
            order,
            vec![stamps[2], stamps[3], stamps[0], stamps[1], stamps[4]]
        );
        for (i, stamp) in order.iter().enumerate() {
            assert_eq!(registry.index_of(*stamp), i as i32);
        }

        // out-of-bounds reorders are rejected
        assert!(!registry.reorder(3, 4, 2));
        assert!(!registry.reorder(-1, 0, 1));
    }
}
