//! Core types for playlist management

use serde::{Deserialize, Serialize};

/// Upper bound on concurrently outstanding scan requests
pub const SCAN_THREADS: usize = 2;

/// Debounce window for batched metadata updates
pub(crate) const DELAYED_UPDATE_MS: u64 = 250;

/// Title given to freshly created playlists
pub const DEFAULT_TITLE: &str = "New Playlist";

/// Title of the shared "temporary" playlist
pub const TEMPORARY_TITLE: &str = "Now Playing";

/// Tag bundle for one audio file
///
/// An entry's tuple is its parsed metadata; absence means the entry has not
/// been scanned yet (or the scan failed). `start_time_ms` is set only for
/// cuesheet segments, which must never be overwritten by stream metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    /// Track title
    pub title: Option<String>,

    /// Artist name
    pub artist: Option<String>,

    /// Album name
    pub album: Option<String>,

    /// Track number in album
    pub track_number: Option<u32>,

    /// Track length in milliseconds (0 = unknown)
    pub length_ms: i64,

    /// Segment start offset, present only for cuesheet entries
    pub start_time_ms: Option<i64>,

    /// Opaque codec/stream description from the tag reader
    pub audio_info: Option<String>,
}

impl Tuple {
    /// Whether this tuple describes a cuesheet segment
    pub fn is_cuesheet_segment(&self) -> bool {
        self.start_time_ms.is_some()
    }
}

/// One item handed to `insert_flat_items`
///
/// A tuple may accompany the filename when the caller already has parsed
/// metadata (playlist files carry cached tuples); such entries skip the
/// initial scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddItem {
    pub filename: String,
    pub tuple: Option<Tuple>,
}

impl AddItem {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            tuple: None,
        }
    }

    pub fn with_tuple(filename: impl Into<String>, tuple: Tuple) -> Self {
        Self {
            filename: filename.into(),
            tuple: Some(tuple),
        }
    }
}

/// Access mode for entry metadata getters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GetMode {
    /// Return whatever is available right now
    NoWait,

    /// Block until the entry has been scanned (bounded by one retry)
    Wait,
}

/// Granularity of a queued change notification
///
/// Levels are ordered; `Structure` subsumes `Metadata`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum UpdateLevel {
    /// Nothing pending
    #[default]
    None,

    /// Tag/title changes within existing entries
    Metadata,

    /// Entries were added, removed, or reordered
    Structure,
}

/// Accumulated per-playlist change record
///
/// The affected range is `[at, at + number)`. Cleared when the update bus
/// fires and swaps it into the "last update" slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub level: UpdateLevel,
    pub at: usize,
    pub number: usize,
}

/// Per-playlist scanner phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    /// No scan pending for this playlist
    #[default]
    NotScanning,

    /// The scheduler is still walking this playlist for unscanned entries
    ScanActive,

    /// Walk finished, waiting for the last in-flight items to complete
    ScanEnding,
}

/// What playback needs to open the current entry
///
/// Returned by `playback_entry_read`; all fields empty when the entry went
/// away while the playback thread was reading it.
#[derive(Debug, Clone, Default)]
pub struct DecodeInfo {
    /// Filename of the entry
    pub filename: Option<String>,

    /// Decoder selected by the tag reader
    pub decoder: Option<String>,

    /// Open-file token from the tag reader, reused by the decoder
    pub file: Option<String>,

    /// Reader error, if the scan failed
    pub error: Option<String>,
}

/// Settings observed by the playlist core
///
/// `update_settings` diffs against the previous values: the title keys
/// reformat every playlist, `metadata_on_play` recomputes the effective
/// scan-enable flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Defer metadata reads until an entry is played
    pub metadata_on_play: bool,

    /// Format pattern for entry titles, e.g. `"${artist} - ${title}"`
    pub generic_title_format: String,

    /// Zero-pad entry numbers to the playlist's width
    pub leading_zero: bool,

    /// Render lengths of an hour or more as h:mm:ss
    pub show_hours: bool,

    /// Substitute the filename stem when a tag field is missing
    pub metadata_fallbacks: bool,

    /// Prefix entry titles with their position
    pub show_numbers_in_pl: bool,

    /// Resume in the paused state regardless of how playback ended
    pub always_resume_paused: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            metadata_on_play: false,
            generic_title_format: "${artist} - ${title}".to_string(),
            leading_zero: false,
            show_hours: true,
            metadata_fallbacks: true,
            show_numbers_in_pl: false,
            always_resume_paused: false,
        }
    }
}
