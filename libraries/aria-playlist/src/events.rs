//! Observer hooks
//!
//! Named events emitted by the playlist core. Consumers subscribe with a
//! callback; the core fires events strictly after releasing its lock, so
//! callbacks may call back into the public API freely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};

use serde::{Deserialize, Serialize};

use crate::registry::Playlist;
use crate::types::UpdateLevel;

/// Events emitted by the playlist core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HookEvent {
    /// Coalesced change notification covering all playlists
    PlaylistUpdate {
        /// Highest level accumulated since the previous notification
        level: UpdateLevel,
    },

    /// A playlist finished scanning (fired once per scan pass)
    PlaylistScanComplete,

    /// The active playlist changed
    PlaylistActivate,

    /// The playing playlist changed (including to none)
    PlaylistSetPlaying,

    /// A playlist's position moved
    PlaylistPosition {
        /// The playlist whose position changed
        playlist: Playlist,
    },

    /// Playback of an entry began
    PlaybackBegin,

    /// Playback stopped
    PlaybackStop,
}

/// Subscription handle returned by [`subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookId(u64);

type Callback = Box<dyn Fn(&HookEvent) + Send + Sync>;

fn callbacks() -> &'static RwLock<Vec<(u64, Callback)>> {
    static CALLBACKS: OnceLock<RwLock<Vec<(u64, Callback)>>> = OnceLock::new();
    CALLBACKS.get_or_init(|| RwLock::new(Vec::new()))
}

/// Register an observer for all core events
pub fn subscribe(callback: impl Fn(&HookEvent) + Send + Sync + 'static) -> HookId {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    callbacks()
        .write()
        .expect("hook registry poisoned")
        .push((id, Box::new(callback)));
    HookId(id)
}

/// Remove a previously registered observer
pub fn unsubscribe(id: HookId) {
    callbacks()
        .write()
        .expect("hook registry poisoned")
        .retain(|(existing, _)| *existing != id.0);
}

/// Fire an event to every observer
///
/// Must never be called with the core lock held.
pub(crate) fn emit(event: &HookEvent) {
    let callbacks = callbacks().read().expect("hook registry poisoned");
    for (_, callback) in callbacks.iter() {
        callback(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn subscribe_receives_events_until_unsubscribed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let id = subscribe(move |event| {
            seen_clone.lock().unwrap().push(event.clone());
        });

        emit(&HookEvent::PlaybackBegin);
        assert_eq!(seen.lock().unwrap().as_slice(), &[HookEvent::PlaybackBegin]);

        unsubscribe(id);
        emit(&HookEvent::PlaybackStop);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
