//! Per-playlist container
//!
//! Entries, selection, the play queue, position/focus, sorting, and the
//! per-playlist update record. All access happens under the core lock; this
//! module contains no synchronization of its own.
//!
//! Entries are referenced internally by a stable per-playlist key so that
//! positions, the queue, and in-flight scan items survive inserts, removals,
//! and reorderings.

use std::cmp::Ordering;

use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::scanner::ScanOutcome;
use crate::types::{AddItem, ScanStatus, Settings, Tuple, Update, UpdateLevel};

/// One playlist row
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    /// Stable key within the owning playlist
    pub key: u64,

    pub filename: String,

    /// Decoder selected by the tag reader
    pub decoder: Option<String>,

    /// Parsed metadata; `None` until scanned (or after a reset)
    pub tuple: Option<Tuple>,

    /// Last scan failure for this entry
    pub error: Option<String>,

    /// Formatted display title
    pub title: String,

    /// Current row index, kept equal to the vector index
    pub number: usize,

    pub selected: bool,
    pub queued: bool,

    /// Set once a scan has run, successful or not
    pub scanned: bool,
}

/// Change signal produced by a mutation, drained by the core
///
/// `delayed` requests the debounced notification path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UpdateSignal {
    pub level: UpdateLevel,
    pub delayed: bool,
}

/// The data behind one live playlist
#[derive(Debug)]
pub(crate) struct PlaylistData {
    pub title: String,
    pub filename: Option<String>,
    pub modified: bool,
    pub scan_status: ScanStatus,
    pub resume_time: i32,

    entries: Vec<Entry>,
    next_entry_key: u64,

    position: Option<u64>,
    focus: Option<u64>,
    selected_count: usize,

    /// Play queue of entry keys, served before linear order
    queue: Vec<u64>,

    next_update: Update,
    last_update: Update,
    signal: Option<UpdateSignal>,
}

impl PlaylistData {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            filename: None,
            modified: false,
            scan_status: ScanStatus::NotScanning,
            resume_time: 0,
            entries: Vec::new(),
            next_entry_key: 1,
            position: None,
            focus: None,
            selected_count: 0,
            queue: Vec::new(),
            next_update: Update::default(),
            last_update: Update::default(),
            signal: None,
        }
    }

    // ===== Entry access =====

    pub fn n_entries(&self) -> i32 {
        self.entries.len() as i32
    }

    fn index(&self, entry_num: i32) -> Option<usize> {
        if entry_num < 0 {
            return None;
        }
        let idx = entry_num as usize;
        (idx < self.entries.len()).then_some(idx)
    }

    pub fn index_of_key(&self, key: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    pub fn entry_at(&self, entry_num: i32) -> Option<&Entry> {
        self.index(entry_num).map(|idx| &self.entries[idx])
    }

    pub fn entry_key_at(&self, entry_num: i32) -> Option<u64> {
        self.entry_at(entry_num).map(|e| e.key)
    }

    pub fn entry_by_key(&self, key: u64) -> Option<&Entry> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Keys of the entries in `[at, at + number)`, clamped to bounds
    pub fn entry_keys_in(&self, at: i32, number: i32) -> Vec<u64> {
        let (at, number) = self.clamp_range(at, number);
        self.entries[at..at + number].iter().map(|e| e.key).collect()
    }

    pub fn selected_keys(&self) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|e| e.selected)
            .map(|e| e.key)
            .collect()
    }

    fn clamp_range(&self, at: i32, number: i32) -> (usize, usize) {
        let len = self.entries.len() as i32;
        let at = at.clamp(0, len);
        let number = number.clamp(0, len - at);
        (at as usize, number as usize)
    }

    fn renumber(&mut self, from: usize) {
        for i in from..self.entries.len() {
            self.entries[i].number = i;
        }
    }

    // ===== Position & focus =====

    pub fn position(&self) -> i32 {
        self.position
            .and_then(|key| self.index_of_key(key))
            .map(|idx| idx as i32)
            .unwrap_or(-1)
    }

    pub fn position_key(&self) -> Option<u64> {
        self.position
    }

    /// Set the position to an entry key (or clear it)
    pub fn set_position(&mut self, key: Option<u64>, update_focus: bool) {
        self.position = key;
        if update_focus && key.is_some() {
            self.focus = key;
        }
    }

    pub fn focus(&self) -> i32 {
        self.focus
            .and_then(|key| self.index_of_key(key))
            .map(|idx| idx as i32)
            .unwrap_or(-1)
    }

    pub fn set_focus(&mut self, entry_num: i32) {
        self.focus = self.entry_key_at(entry_num);
    }

    // ===== Selection =====

    pub fn entry_selected(&self, entry_num: i32) -> bool {
        self.entry_at(entry_num).map(|e| e.selected).unwrap_or(false)
    }

    pub fn select_entry(&mut self, entry_num: i32, selected: bool) {
        if let Some(idx) = self.index(entry_num) {
            let entry = &mut self.entries[idx];
            if entry.selected != selected {
                entry.selected = selected;
                if selected {
                    self.selected_count += 1;
                } else {
                    self.selected_count -= 1;
                }
            }
        }
    }

    pub fn n_selected(&self, at: i32, number: i32) -> i32 {
        let (at, number) = self.clamp_range(at, number);
        self.entries[at..at + number]
            .iter()
            .filter(|e| e.selected)
            .count() as i32
    }

    pub fn select_all(&mut self, selected: bool) {
        for entry in &mut self.entries {
            entry.selected = selected;
        }
        self.selected_count = if selected { self.entries.len() } else { 0 };
    }

    /// Move the selected entries as one block so that the first selected row
    /// shifts by up to `distance`. Returns the distance actually moved.
    pub fn shift_entries(&mut self, entry_num: i32, distance: i32) -> i32 {
        if self.index(entry_num).is_none() || self.selected_count == 0 || distance == 0 {
            return 0;
        }

        let first = self
            .entries
            .iter()
            .position(|e| e.selected)
            .expect("selected_count is nonzero");
        let movable = self.entries.len() - self.selected_count;
        let target = (first as i64 + distance as i64).clamp(0, movable as i64) as usize;
        if target == first {
            return 0;
        }

        let (selected, mut rest): (Vec<Entry>, Vec<Entry>) =
            std::mem::take(&mut self.entries).into_iter().partition(|e| e.selected);
        let tail = rest.split_off(target.min(rest.len()));
        rest.extend(selected);
        rest.extend(tail);
        self.entries = rest;

        let from = first.min(target);
        self.renumber(from);
        self.queue_update(UpdateLevel::Structure, from, self.entries.len() - from);
        target as i32 - first as i32
    }

    // ===== Mutation =====

    pub fn insert_items(&mut self, at: i32, items: Vec<AddItem>, settings: &Settings) {
        if items.is_empty() {
            return;
        }

        let len = self.entries.len();
        let at = if at < 0 || at as usize > len { len } else { at as usize };
        let count = items.len();

        let new_entries: Vec<Entry> = items
            .into_iter()
            .map(|item| {
                let key = self.next_entry_key;
                self.next_entry_key += 1;
                let scanned = item.tuple.is_some();
                Entry {
                    key,
                    filename: item.filename,
                    decoder: None,
                    tuple: item.tuple,
                    error: None,
                    title: String::new(),
                    number: 0,
                    selected: false,
                    queued: false,
                    scanned,
                }
            })
            .collect();

        self.entries.splice(at..at, new_entries);
        self.renumber(at);
        for i in at..at + count {
            self.reformat_entry(i, settings);
        }

        self.queue_update(UpdateLevel::Structure, at, self.entries.len() - at);
    }

    /// Remove `[at, at + number)`, returning the removed entry keys.
    ///
    /// `position_changed` is set when the position entry was removed.
    pub fn remove_entries(&mut self, at: i32, number: i32, position_changed: &mut bool) -> Vec<u64> {
        let (at, number) = self.clamp_range(at, number);
        if number == 0 {
            return Vec::new();
        }

        let removed: Vec<u64> = self.entries[at..at + number].iter().map(|e| e.key).collect();
        self.entries.drain(at..at + number);
        self.after_removal(&removed, at, position_changed);
        removed
    }

    /// Remove every selected entry, returning the removed keys.
    pub fn remove_selected(&mut self, position_changed: &mut bool) -> Vec<u64> {
        if self.selected_count == 0 {
            return Vec::new();
        }

        let first = self
            .entries
            .iter()
            .position(|e| e.selected)
            .expect("selected_count is nonzero");
        let removed: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| e.selected)
            .map(|e| e.key)
            .collect();
        self.entries.retain(|e| !e.selected);
        self.after_removal(&removed, first, position_changed);
        removed
    }

    fn after_removal(&mut self, removed: &[u64], from: usize, position_changed: &mut bool) {
        if let Some(pos) = self.position {
            if removed.contains(&pos) {
                self.position = None;
                *position_changed = true;
            }
        }
        if let Some(focus) = self.focus {
            if removed.contains(&focus) {
                // move focus to the row now occupying the removal point
                self.focus = self
                    .entries
                    .get(from.min(self.entries.len().saturating_sub(1)))
                    .filter(|_| !self.entries.is_empty())
                    .map(|e| e.key);
            }
        }

        self.queue.retain(|key| !removed.contains(key));
        self.selected_count = self.entries.iter().filter(|e| e.selected).count();
        self.renumber(from);
        self.queue_update(UpdateLevel::Structure, from, self.entries.len() - from);
    }

    // ===== Sort & shuffle =====

    fn tuple_compare(
        a: &Option<Tuple>,
        b: &Option<Tuple>,
        compare: &dyn Fn(&Tuple, &Tuple) -> Ordering,
    ) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => compare(a, b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    pub fn sort_by_filename(&mut self, compare: &dyn Fn(&str, &str) -> Ordering) {
        self.entries.sort_by(|a, b| compare(&a.filename, &b.filename));
        self.finish_reorder();
    }

    pub fn sort_by_tuple(&mut self, compare: &dyn Fn(&Tuple, &Tuple) -> Ordering) {
        self.entries
            .sort_by(|a, b| Self::tuple_compare(&a.tuple, &b.tuple, compare));
        self.finish_reorder();
    }

    pub fn sort_selected_by_filename(&mut self, compare: &dyn Fn(&str, &str) -> Ordering) {
        self.permute_selected(|sub| sub.sort_by(|a, b| compare(&a.filename, &b.filename)));
    }

    pub fn sort_selected_by_tuple(&mut self, compare: &dyn Fn(&Tuple, &Tuple) -> Ordering) {
        self.permute_selected(|sub| {
            sub.sort_by(|a, b| Self::tuple_compare(&a.tuple, &b.tuple, compare))
        });
    }

    pub fn reverse_order(&mut self) {
        self.entries.reverse();
        self.finish_reorder();
    }

    pub fn reverse_selected(&mut self) {
        self.permute_selected(|sub| sub.reverse());
    }

    pub fn randomize_order(&mut self) {
        self.entries.shuffle(&mut thread_rng());
        self.finish_reorder();
    }

    pub fn randomize_selected(&mut self) {
        self.permute_selected(|sub| sub.shuffle(&mut thread_rng()));
    }

    fn permute_selected(&mut self, permute: impl FnOnce(&mut Vec<Entry>)) {
        let slots: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.selected)
            .map(|(i, _)| i)
            .collect();
        if slots.len() < 2 {
            return;
        }

        let mut sub: Vec<Entry> = slots.iter().map(|&i| self.entries[i].clone()).collect();
        permute(&mut sub);
        for (slot, entry) in slots.into_iter().zip(sub) {
            self.entries[slot] = entry;
        }
        self.finish_reorder();
    }

    fn finish_reorder(&mut self) {
        self.renumber(0);
        self.queue_update(UpdateLevel::Structure, 0, self.entries.len());
    }

    // ===== Lengths =====

    pub fn total_length(&self) -> i64 {
        self.entries
            .iter()
            .filter_map(|e| e.tuple.as_ref())
            .map(|t| t.length_ms)
            .sum()
    }

    pub fn selected_length(&self) -> i64 {
        self.entries
            .iter()
            .filter(|e| e.selected)
            .filter_map(|e| e.tuple.as_ref())
            .map(|t| t.length_ms)
            .sum()
    }

    // ===== Play queue =====

    pub fn n_queued(&self) -> i32 {
        self.queue.len() as i32
    }

    pub fn queue_insert(&mut self, at: i32, entry_num: i32) {
        let Some(idx) = self.index(entry_num) else {
            return;
        };
        if self.entries[idx].queued {
            return;
        }

        let key = self.entries[idx].key;
        let at = if at < 0 || at as usize > self.queue.len() {
            self.queue.len()
        } else {
            at as usize
        };
        self.queue.insert(at, key);
        self.entries[idx].queued = true;
    }

    pub fn queue_insert_selected(&mut self, at: i32) {
        let mut at = if at < 0 || at as usize > self.queue.len() {
            self.queue.len() as i32
        } else {
            at
        };
        let selected: Vec<i32> = self
            .entries
            .iter()
            .filter(|e| e.selected && !e.queued)
            .map(|e| e.number as i32)
            .collect();
        for entry_num in selected {
            self.queue_insert(at, entry_num);
            at += 1;
        }
    }

    pub fn queue_get_entry(&self, at: i32) -> i32 {
        if at < 0 {
            return -1;
        }
        self.queue
            .get(at as usize)
            .and_then(|&key| self.index_of_key(key))
            .map(|idx| idx as i32)
            .unwrap_or(-1)
    }

    pub fn queue_find_entry(&self, entry_num: i32) -> i32 {
        let Some(key) = self.entry_key_at(entry_num) else {
            return -1;
        };
        self.queue
            .iter()
            .position(|&k| k == key)
            .map(|i| i as i32)
            .unwrap_or(-1)
    }

    pub fn queue_remove(&mut self, at: i32, number: i32) {
        let len = self.queue.len() as i32;
        let at = at.clamp(0, len);
        let number = number.clamp(0, len - at);
        for key in self.queue.drain(at as usize..(at + number) as usize) {
            if let Some(idx) = self.entries.iter().position(|e| e.key == key) {
                self.entries[idx].queued = false;
            }
        }
    }

    pub fn queue_remove_selected(&mut self) {
        let entries = &mut self.entries;
        self.queue.retain(|&key| {
            match entries.iter_mut().find(|e| e.key == key) {
                Some(entry) if entry.selected => {
                    entry.queued = false;
                    false
                }
                _ => true,
            }
        });
    }

    fn pop_queue(&mut self) -> Option<u64> {
        if self.queue.is_empty() {
            return None;
        }
        let key = self.queue.remove(0);
        if let Some(entry) = self.entries.iter_mut().find(|e| e.key == key) {
            entry.queued = false;
        }
        Some(key)
    }

    // ===== Navigation =====

    /// Advance the position: queued entries first, then the row at `hint`.
    ///
    /// With `repeat`, a hint past the end wraps to row 0. Returns false when
    /// no move was possible.
    pub fn next_song(&mut self, repeat: bool, hint: i32) -> bool {
        if let Some(key) = self.pop_queue() {
            self.set_position(Some(key), true);
            return true;
        }

        if self.entries.is_empty() {
            return false;
        }

        let mut idx = hint.max(0) as usize;
        if idx >= self.entries.len() {
            if !repeat {
                return false;
            }
            idx = 0;
        }

        let key = self.entries[idx].key;
        self.set_position(Some(key), true);
        true
    }

    /// Step the position back one row. Returns false at row 0 or with no
    /// position.
    pub fn prev_song(&mut self) -> bool {
        let pos = self.position();
        if pos <= 0 {
            return false;
        }

        let key = self.entries[pos as usize - 1].key;
        self.set_position(Some(key), true);
        true
    }

    // ===== Scan support =====

    /// First row at or after `row` that has not been scanned, or -1
    pub fn next_unscanned_entry(&self, row: i32) -> i32 {
        let start = row.max(0) as usize;
        self.entries[start.min(self.entries.len())..]
            .iter()
            .find(|e| !e.scanned)
            .map(|e| e.number as i32)
            .unwrap_or(-1)
    }

    pub fn reset_tuples(&mut self, selected_only: bool) {
        let mut first = None;
        let mut last = 0;
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            if selected_only && !entry.selected {
                continue;
            }
            entry.tuple = None;
            entry.decoder = None;
            entry.error = None;
            entry.scanned = false;
            first.get_or_insert(idx);
            last = idx;
        }

        if let Some(first) = first {
            self.queue_update(UpdateLevel::Metadata, first, last - first + 1);
        }
    }

    /// Reset every entry whose filename matches `path` exactly.
    pub fn reset_tuple_of_file(&mut self, path: &str) -> bool {
        let mut found = false;
        for idx in 0..self.entries.len() {
            if self.entries[idx].filename == path {
                let entry = &mut self.entries[idx];
                entry.tuple = None;
                entry.decoder = None;
                entry.error = None;
                entry.scanned = false;
                found = true;
                self.queue_update(UpdateLevel::Metadata, idx, 1);
            }
        }
        found
    }

    /// Merge a finished scan into the entry. Returns false when the entry is
    /// gone (deleted while the scan was in flight).
    pub fn update_entry_from_scan(
        &mut self,
        key: u64,
        outcome: &ScanOutcome,
        delayed: bool,
        settings: &Settings,
    ) -> bool {
        let Some(idx) = self.index_of_key(key) else {
            return false;
        };

        let entry = &mut self.entries[idx];
        entry.scanned = true;
        if entry.decoder.is_none() {
            entry.decoder = outcome.decoder.clone();
        }
        entry.error = outcome.error.clone();
        if let Some(tuple) = &outcome.tuple {
            entry.tuple = Some(tuple.clone());
            self.reformat_entry(idx, settings);
        }

        self.queue_update_delayed(UpdateLevel::Metadata, idx, 1, delayed);
        true
    }

    pub fn set_entry_tuple(&mut self, key: u64, tuple: Tuple, settings: &Settings) -> bool {
        let Some(idx) = self.index_of_key(key) else {
            return false;
        };
        self.entries[idx].tuple = Some(tuple);
        self.entries[idx].scanned = true;
        self.reformat_entry(idx, settings);
        true
    }

    // ===== Updates =====

    pub fn queue_update(&mut self, level: UpdateLevel, at: usize, number: usize) {
        self.queue_update_delayed(level, at, number, false);
    }

    pub fn queue_update_delayed(
        &mut self,
        level: UpdateLevel,
        at: usize,
        number: usize,
        delayed: bool,
    ) {
        if level == UpdateLevel::None {
            return;
        }

        if self.next_update.level == UpdateLevel::None {
            self.next_update = Update { level, at, number };
        } else {
            let begin = self.next_update.at.min(at);
            let end = (self.next_update.at + self.next_update.number).max(at + number);
            self.next_update = Update {
                level: self.next_update.level.max(level),
                at: begin,
                number: end - begin,
            };
        }

        let merged = match self.signal {
            Some(prev) => UpdateSignal {
                level: prev.level.max(level),
                // an immediate request overrides a pending delayed one
                delayed: prev.delayed && delayed,
            },
            None => UpdateSignal { level, delayed },
        };
        self.signal = Some(merged);
    }

    /// Drain the pending change signal for the core's notification path.
    pub fn take_signal(&mut self) -> Option<UpdateSignal> {
        self.signal.take()
    }

    pub fn update_pending(&self) -> bool {
        self.next_update.level != UpdateLevel::None
    }

    pub fn last_update(&self) -> Update {
        self.last_update
    }

    pub fn swap_updates(&mut self) {
        self.last_update = self.next_update;
        self.next_update = Update::default();
    }

    pub fn cancel_updates(&mut self) {
        self.next_update = Update::default();
        self.signal = None;
    }

    // ===== Titles =====

    pub fn reformat_titles(&mut self, settings: &Settings) {
        for idx in 0..self.entries.len() {
            self.reformat_entry(idx, settings);
        }
        if !self.entries.is_empty() {
            self.queue_update(UpdateLevel::Metadata, 0, self.entries.len());
        }
    }

    fn reformat_entry(&mut self, idx: usize, settings: &Settings) {
        let width = decimal_width(self.entries.len());
        let entry = &mut self.entries[idx];
        entry.title = format_title(settings, entry.tuple.as_ref(), &entry.filename, idx, width);
    }
}

fn decimal_width(len: usize) -> usize {
    let mut width = 1;
    let mut rest = len / 10;
    while rest > 0 {
        width += 1;
        rest /= 10;
    }
    width
}

fn filename_stem(filename: &str) -> &str {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    }
}

/// Render an entry title from its tuple and the title settings.
fn format_title(
    settings: &Settings,
    tuple: Option<&Tuple>,
    filename: &str,
    number: usize,
    width: usize,
) -> String {
    let stem = filename_stem(filename);

    let body = match tuple {
        Some(tuple) => {
            let title = match &tuple.title {
                Some(t) if !t.is_empty() => t.clone(),
                _ if settings.metadata_fallbacks => stem.to_string(),
                _ => String::new(),
            };
            let rendered = render_pattern(&settings.generic_title_format, |field| match field {
                "title" => title.clone(),
                "artist" => tuple.artist.clone().unwrap_or_default(),
                "album" => tuple.album.clone().unwrap_or_default(),
                "track" => tuple
                    .track_number
                    .map(|n| n.to_string())
                    .unwrap_or_default(),
                _ => String::new(),
            });
            if rendered.is_empty() {
                stem.to_string()
            } else {
                rendered
            }
        }
        None => stem.to_string(),
    };

    if settings.show_numbers_in_pl {
        if settings.leading_zero {
            format!("{:0width$}. {}", number + 1, body, width = width)
        } else {
            format!("{}. {}", number + 1, body)
        }
    } else {
        body
    }
}

/// Substitute `${field}` tokens; a literal run following an empty field is
/// dropped, collapsing separators like `" - "`.
fn render_pattern(pattern: &str, value: impl Fn(&str) -> String) -> String {
    let mut out = String::new();
    let mut rest = pattern;
    let mut drop_literal = false;

    while let Some(start) = rest.find("${") {
        let literal = &rest[..start];
        if !drop_literal {
            out.push_str(literal);
        }
        drop_literal = false;

        let Some(end) = rest[start..].find('}') else {
            break;
        };
        let field = &rest[start + 2..start + end];
        let substituted = value(field);
        if substituted.is_empty() {
            drop_literal = true;
        } else {
            out.push_str(&substituted);
        }
        rest = &rest[start + end + 1..];
    }

    if !drop_literal {
        out.push_str(rest);
    }
    out.trim().trim_matches('-').trim().to_string()
}
