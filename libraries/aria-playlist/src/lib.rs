//! Aria Player - Playlist Core
//!
//! Process-wide registry of ordered playlists, a background metadata
//! scanner, and the coordination binding "currently playing entry" to one
//! playlist position.
//!
//! This crate provides:
//! - Ordered playlist registry with stable integer identities (stamps)
//! - Weak public handles that survive playlist deletion as safe no-ops
//! - Background tag/decoder/art scanning with a bounded in-flight pool
//! - Coalesced change notifications with an immediate and a debounced path
//! - Playback coordination, including the synchronous playback-thread scan
//! - Persistence of active/playing/resume state across sessions
//!
//! # Architecture
//!
//! One global lock guards all playlist state. Public operations mutate under
//! the lock, then fire observer hooks after releasing it, so hook callbacks
//! can call back into the API. The decoding pipeline, the tag reader, and
//! the art cache are external collaborators behind the [`PlaybackControl`],
//! [`TagReader`], and [`ArtCache`] traits, handed to [`init`] as
//! [`Backends`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use aria_playlist::{
//!     events, AddItem, ArtCache, Backends, Playlist, PlaybackControl, ScanOutcome,
//!     ScanRequest, TagReader, Tuple,
//! };
//!
//! struct Reader;
//! impl TagReader for Reader {
//!     fn scan(&self, request: &ScanRequest) -> ScanOutcome {
//!         // read tags/art for request.filename here
//!         ScanOutcome::default()
//!     }
//! }
//!
//! struct Engine;
//! impl PlaybackControl for Engine {
//!     fn play(&self, serial: u64, seek_ms: i32, paused: bool) {}
//!     fn stop(&self) {}
//!     fn set_paused(&self, paused: bool) {}
//!     fn is_paused(&self) -> bool { false }
//!     fn time_ms(&self) -> i32 { 0 }
//!     fn set_info(&self, position: i32, tuple: Tuple) {}
//! }
//!
//! struct Art;
//! impl ArtCache for Art {
//!     fn clear_current(&self) {}
//!     fn cache_current(&self, filename: &str, image: Option<Vec<u8>>, file: Option<String>) {}
//! }
//!
//! aria_playlist::init(
//!     PathBuf::from("/home/user/.config/aria"),
//!     Backends {
//!         reader: Arc::new(Reader),
//!         playback: Arc::new(Engine),
//!         art: Arc::new(Art),
//!     },
//! );
//!
//! let _watch = events::subscribe(|event| println!("{event:?}"));
//!
//! let playlist = Playlist::active_playlist();
//! playlist.insert_flat_items(0, vec![AddItem::new("/music/song.mp3")]);
//! aria_playlist::enable_scan(true);
//! playlist.start_playback(false);
//! ```

mod error;
pub mod events;
mod manager;
mod playlist;
mod registry;
mod scanner;
mod state;
pub mod types;
mod updates;

// Public exports
pub use error::{PlaylistError, Result};
pub use events::{HookEvent, HookId};
pub use manager::{
    enable_scan, end, init, load_state, playback_entry_read, playback_entry_set_tuple, resume,
    rescan_file, save_state, settings, stop, update_settings, ArtCache, Backends, PlaybackControl,
};
pub use registry::Playlist;
pub use scanner::{ScanFlags, ScanOutcome, ScanRequest, TagReader};
pub use types::{
    AddItem, DecodeInfo, GetMode, ScanStatus, Settings, Tuple, Update, UpdateLevel, DEFAULT_TITLE,
    SCAN_THREADS, TEMPORARY_TITLE,
};
