//! Process-wide playlist core
//!
//! One global lock guards the registry, every playlist's contents, the scan
//! scheduler, and the pending-update state. Public operations take the lock,
//! mutate, queue notifications, then release it and fire observer hooks —
//! hooks therefore may call straight back into this API.
//!
//! The scanner worker pool and the playback thread re-enter through
//! [`scan_finish`] (via the request handler) and [`playback_entry_read`] /
//! [`playback_entry_set_tuple`].

use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, RwLock};

use tracing::{debug, info, warn};

use crate::events::{self, HookEvent};
use crate::playlist::PlaylistData;
use crate::registry::{Playlist, Registry};
use crate::scanner::{ScanFlags, ScanRequest, ScanService, TagReader};
use crate::types::{
    AddItem, DecodeInfo, GetMode, ScanStatus, Settings, Tuple, Update, UpdateLevel, SCAN_THREADS,
    TEMPORARY_TITLE,
};
use crate::updates::UpdateBus;

// playback hook bits, consumed outside the lock
const SET_PLAYLIST: u8 = 1 << 0;
const SET_POSITION: u8 = 1 << 1;
const PLAYBACK_BEGIN: u8 = 1 << 2;
const PLAYBACK_STOP: u8 = 1 << 3;

/// External playback engine
///
/// Implementations are thread-safe services. Calls arrive with the core
/// lock held, so they must not call back into the playlist API.
pub trait PlaybackControl: Send + Sync {
    /// Start playing the current entry of the playing playlist.
    ///
    /// `serial` identifies this playback session; the playback thread hands
    /// it back to [`playback_entry_read`].
    fn play(&self, serial: u64, seek_ms: i32, paused: bool);

    fn stop(&self);

    fn set_paused(&self, paused: bool);

    fn is_paused(&self) -> bool;

    /// Current playback time in milliseconds
    fn time_ms(&self) -> i32;

    /// Publish the tuple shown for the playing entry
    fn set_info(&self, position: i32, tuple: Tuple);
}

/// External album-art cache
pub trait ArtCache: Send + Sync {
    fn clear_current(&self);

    fn cache_current(&self, filename: &str, image: Option<Vec<u8>>, image_file: Option<String>);
}

/// The collaborators handed to [`init`]
#[derive(Clone)]
pub struct Backends {
    pub reader: Arc<dyn TagReader>,
    pub playback: Arc<dyn PlaybackControl>,
    pub art: Arc<dyn ArtCache>,
}

/// One tracked pending scan
struct ScanItem {
    stamp: u32,
    entry_key: u64,
    request: Arc<ScanRequest>,
    for_playback: bool,
    handled_by_playback: bool,
}

pub(crate) struct CoreState {
    pub registry: Registry,
    pub active: Option<u32>,
    pub playing: Option<u32>,
    pub resume_playlist: i32,
    pub resume_paused: bool,

    pub update_level: UpdateLevel,
    pub update_delayed: bool,

    scan_enabled_nominal: bool,
    scan_enabled: bool,
    scan_playlist: usize,
    scan_row: i32,
    scan_items: Vec<ScanItem>,

    playback_serial: u64,

    pub settings: Settings,
    pub data_dir: Option<PathBuf>,
}

impl CoreState {
    fn new() -> Self {
        Self {
            registry: Registry::new(),
            active: None,
            playing: None,
            resume_playlist: -1,
            resume_paused: false,
            update_level: UpdateLevel::None,
            update_delayed: false,
            scan_enabled_nominal: false,
            scan_enabled: false,
            scan_playlist: 0,
            scan_row: 0,
            scan_items: Vec::new(),
            playback_serial: 0,
            settings: Settings::default(),
            data_dir: None,
        }
    }
}

pub(crate) struct Core {
    pub state: Mutex<CoreState>,
    pub cond: Condvar,
    backends: RwLock<Option<Backends>>,
    pub bus: UpdateBus,
    scan_service: ScanService,
}

impl Core {
    pub fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().expect("playlist core lock poisoned")
    }

    pub(crate) fn backends(&self) -> Option<Backends> {
        self.backends
            .read()
            .expect("backends lock poisoned")
            .clone()
    }

    fn reader(&self) -> Option<Arc<dyn TagReader>> {
        self.backends().map(|b| b.reader)
    }
}

pub(crate) fn core() -> &'static Core {
    static CORE: OnceLock<Core> = OnceLock::new();
    CORE.get_or_init(|| Core {
        state: Mutex::new(CoreState::new()),
        cond: Condvar::new(),
        backends: RwLock::new(None),
        bus: UpdateBus::new(fire_update, || events::emit(&HookEvent::PlaylistScanComplete)),
        scan_service: ScanService::new(SCAN_THREADS, run_and_finish_arc),
    })
}

// ===== Update bus integration =====

/// Bus-thread callback: swap per-playlist records, snapshot the level, then
/// notify observers outside the lock.
fn fire_update() {
    let core = core();
    let mut state = core.lock();

    for stamp in state.registry.stamps() {
        if let Some(data) = state.registry.data_mut(stamp) {
            data.swap_updates();
        }
    }

    let level = state.update_level;
    state.update_level = UpdateLevel::None;
    state.update_delayed = false;
    drop(state);

    if level != UpdateLevel::None {
        events::emit(&HookEvent::PlaylistUpdate { level });
    }
}

fn queue_global_update(core: &Core, state: &mut CoreState, level: UpdateLevel, delayed: bool) {
    if level == UpdateLevel::Structure {
        scan_restart(core, state);
    }

    if delayed {
        if state.update_level == UpdateLevel::None {
            core.bus.schedule_delayed();
            state.update_delayed = true;
        }
    } else if state.update_level == UpdateLevel::None || state.update_delayed {
        core.bus.schedule_immediate();
        state.update_delayed = false;
    }

    state.update_level = state.update_level.max(level);
}

/// Drain a playlist's pending change signal into the global update state.
///
/// Runs after every mutation: a `Structure` change re-arms the playlist for
/// scanning, a `Metadata`-or-higher change marks it modified and refreshes
/// the playback display when it is the playing playlist.
fn flush_signal(core: &Core, state: &mut CoreState, stamp: u32) {
    let Some(signal) = state.registry.data_mut(stamp).and_then(|d| d.take_signal()) else {
        return;
    };

    if let Some(data) = state.registry.data_mut(stamp) {
        if signal.level == UpdateLevel::Structure {
            data.scan_status = ScanStatus::ScanActive;
        }
        if signal.level >= UpdateLevel::Metadata {
            data.modified = true;
        }
    }

    if signal.level >= UpdateLevel::Metadata && state.playing == Some(stamp) {
        if let Some(data) = state.registry.data(stamp) {
            let pos = data.position();
            if pos >= 0 {
                let tuple = data
                    .entry_at(pos)
                    .and_then(|e| e.tuple.clone())
                    .unwrap_or_default();
                if let Some(backends) = core.backends() {
                    backends.playback.set_info(pos, tuple);
                }
            }
        }
    }

    queue_global_update(core, state, signal.level, signal.delayed);
}

// ===== Scan scheduler =====

fn scan_item_for_entry(state: &CoreState, stamp: u32, entry_key: u64) -> Option<usize> {
    state
        .scan_items
        .iter()
        .position(|item| item.stamp == stamp && item.entry_key == entry_key)
}

fn scan_queue_entry(core: &Core, state: &mut CoreState, stamp: u32, entry_key: u64, for_playback: bool) {
    let Some((filename, decoder_hint, tuple)) = state
        .registry
        .data(stamp)
        .and_then(|d| d.entry_by_key(entry_key))
        .map(|e| (e.filename.clone(), e.decoder.clone(), e.tuple.clone()))
    else {
        return;
    };

    let flags = ScanFlags {
        tuple: tuple.is_none(),
        image: for_playback,
        file: for_playback,
    };
    // the reader reuses a still-valid tuple rather than re-reading tags
    let tuple_hint = if flags.tuple { None } else { tuple };

    let request = Arc::new(ScanRequest::new(
        crate::scanner::next_request_id(),
        filename,
        flags,
        decoder_hint,
        tuple_hint,
    ));

    state.scan_items.push(ScanItem {
        stamp,
        entry_key,
        request: Arc::clone(&request),
        for_playback,
        handled_by_playback: false,
    });

    // playback entries are scanned synchronously by the playback thread
    if !for_playback {
        core.scan_service.submit(request);
    }
}

/// Detach the previous playback scan, requeueing it for ordinary scanning
/// when the playback thread never picked it up.
fn scan_reset_playback(core: &Core, state: &mut CoreState) {
    let Some(item) = state.scan_items.iter_mut().find(|item| item.for_playback) else {
        return;
    };

    item.for_playback = false;
    if !item.handled_by_playback {
        core.scan_service.submit(Arc::clone(&item.request));
    }
}

fn scan_cancel(state: &mut CoreState, stamp: u32, entry_key: u64) {
    if let Some(idx) = scan_item_for_entry(state, stamp, entry_key) {
        state.scan_items.remove(idx);
    }
}

fn scan_check_complete(core: &Core, state: &mut CoreState, stamp: u32) {
    let has_items = state.scan_items.iter().any(|item| item.stamp == stamp);
    let Some(data) = state.registry.data_mut(stamp) else {
        return;
    };
    if data.scan_status != ScanStatus::ScanEnding || has_items {
        return;
    }

    data.scan_status = ScanStatus::NotScanning;
    debug!(stamp, "scan complete");

    // flush a pending delayed update now that the storm is over
    if state.update_delayed {
        core.bus.schedule_immediate();
        state.update_delayed = false;
    }

    core.bus.notify_scan_complete();
}

fn scan_queue_next_entry(core: &Core, state: &mut CoreState) -> bool {
    if !state.scan_enabled {
        return false;
    }

    while state.scan_playlist < state.registry.len() {
        let stamp = match state.registry.stamp_at(state.scan_playlist) {
            Some(stamp) => stamp,
            None => break,
        };

        let active = state
            .registry
            .data(stamp)
            .map(|d| d.scan_status == ScanStatus::ScanActive)
            .unwrap_or(false);

        if active {
            loop {
                let scan_row = state.scan_row;
                let found = state.registry.data(stamp).and_then(|data| {
                    let row = data.next_unscanned_entry(scan_row);
                    if row < 0 {
                        return None;
                    }
                    let entry = data.entry_at(row)?;
                    Some((row, entry.key, entry.filename.starts_with("stdin://")))
                });

                let Some((row, key, blacklisted)) = found else {
                    break;
                };

                state.scan_row = row + 1;
                if !blacklisted && scan_item_for_entry(state, stamp, key).is_none() {
                    scan_queue_entry(core, state, stamp, key, false);
                    return true;
                }
            }

            if let Some(data) = state.registry.data_mut(stamp) {
                data.scan_status = ScanStatus::ScanEnding;
            }
            scan_check_complete(core, state, stamp);
        }

        state.scan_playlist += 1;
        state.scan_row = 0;
    }

    false
}

/// Keep up to `SCAN_THREADS` requests outstanding.
fn scan_schedule(core: &Core, state: &mut CoreState) {
    let mut scheduled = state.scan_items.len();
    while scheduled < SCAN_THREADS && scan_queue_next_entry(core, state) {
        scheduled += 1;
    }
}

fn scan_restart(core: &Core, state: &mut CoreState) {
    state.scan_playlist = 0;
    state.scan_row = 0;
    scan_schedule(core, state);
}

/// Execute a request and merge its results; used by scan workers and the
/// playback thread.
fn run_and_finish(request: &Arc<ScanRequest>) {
    if let Some(reader) = core().reader() {
        request.run(&*reader);
    }
    scan_finish(request);
}

fn run_and_finish_arc(request: Arc<ScanRequest>) {
    run_and_finish(&request);
}

/// Completion path for a finished scan. Tolerates requests whose item was
/// cancelled while they were in flight.
pub(crate) fn scan_finish(request: &Arc<ScanRequest>) {
    let core = core();
    let mut state = core.lock();

    let Some(idx) = state
        .scan_items
        .iter()
        .position(|item| item.request.id() == request.id())
    else {
        return;
    };
    let item = state.scan_items.remove(idx);

    // only batch behind the debounce timer while a scan is still running
    let delayed = state.scan_enabled
        && state
            .registry
            .data(item.stamp)
            .map(|d| d.scan_status != ScanStatus::NotScanning)
            .unwrap_or(false);

    let settings = state.settings.clone();
    let outcome = request.outcome();
    if let Some(data) = state.registry.data_mut(item.stamp) {
        data.update_entry_from_scan(item.entry_key, &outcome, delayed, &settings);
    }
    flush_signal(core, &mut state, item.stamp);

    scan_check_complete(core, &mut state, item.stamp);
    scan_schedule(core, &mut state);

    core.cond.notify_all();
}

/// Wait (in `Wait` mode) until the entry has what the caller needs.
///
/// The lock is released while waiting. The scan is retried at most once so a
/// persistently failing file cannot block the caller forever. Returns the
/// entry's `(decoder, tuple, error)` snapshot, or `None` when the entry does
/// not exist (any more).
type EntrySnapshot = (Option<String>, Option<Tuple>, Option<String>);

fn wait_for_entry<'a>(
    core: &'static Core,
    mut guard: MutexGuard<'a, CoreState>,
    stamp: u32,
    entry_num: i32,
    need_decoder: bool,
    need_tuple: bool,
) -> (MutexGuard<'a, CoreState>, Option<EntrySnapshot>) {
    let mut scan_started = false;

    loop {
        let Some(entry) = guard
            .registry
            .data(stamp)
            .and_then(|d| d.entry_at(entry_num))
        else {
            return (guard, None);
        };

        let ready = entry.filename.starts_with("stdin://")
            || ((!need_decoder || entry.decoder.is_some())
                && (!need_tuple || entry.tuple.is_some()));
        let snapshot = (entry.decoder.clone(), entry.tuple.clone(), entry.error.clone());
        let key = entry.key;

        if ready {
            return (guard, Some(snapshot));
        }

        if scan_item_for_entry(&guard, stamp, key).is_none() {
            // give a failing scan exactly one more chance
            if scan_started {
                return (guard, Some(snapshot));
            }
            scan_queue_entry(core, &mut guard, stamp, key, false);
        }

        scan_started = true;
        guard = core
            .cond
            .wait(guard)
            .expect("playlist core lock poisoned");
    }
}

// ===== Playback coordination =====

fn playback_serial_valid(state: &CoreState, serial: u64) -> bool {
    state.playing.is_some() && state.playback_serial == serial
}

/// (Re)start playback of the playing playlist's current entry.
///
/// Playback always begins with a fresh for-playback scan of the entry, run
/// by the playback thread itself, to open the file, validate the tuple, and
/// read album art.
fn start_playback_locked(core: &Core, state: &mut CoreState, seek_time: i32, pause: bool) {
    let Some(backends) = core.backends() else {
        return;
    };

    backends.art.clear_current();
    scan_reset_playback(core, state);

    state.playback_serial += 1;
    backends.playback.play(state.playback_serial, seek_time, pause);

    let Some(stamp) = state.playing else {
        return;
    };
    let key = state.registry.data(stamp).and_then(|data| data.position_key());
    if let Some(key) = key {
        scan_cancel(state, stamp, key);
        scan_queue_entry(core, state, stamp, key, true);
    }
}

fn stop_playback_locked(core: &Core, state: &mut CoreState) {
    let Some(backends) = core.backends() else {
        return;
    };

    backends.art.clear_current();
    scan_reset_playback(core, state);

    state.playback_serial += 1;
    backends.playback.stop();
}

fn set_playing_locked(core: &Core, state: &mut CoreState, id: Option<u32>, paused: bool) -> u8 {
    if id == state.playing {
        // already playing this one, just match the pause state
        if let Some(backends) = core.backends() {
            if backends.playback.is_paused() != paused {
                backends.playback.set_paused(paused);
            }
        }
        return 0;
    }

    let mut hooks = SET_PLAYLIST;

    if let Some(prev) = state.playing {
        let time = core.backends().map(|b| b.playback.time_ms()).unwrap_or(0);
        if let Some(data) = state.registry.data_mut(prev) {
            data.resume_time = time;
        }
    }

    // is there anything to play?
    let mut id = id;
    if let Some(stamp) = id {
        match state.registry.data_mut(stamp) {
            Some(data) if data.position() < 0 => {
                if data.next_song(true, 0) {
                    hooks |= SET_POSITION;
                } else {
                    id = None;
                }
            }
            Some(_) => {}
            None => id = None,
        }
    }

    state.playing = id;

    if let Some(stamp) = id {
        let resume_time = state
            .registry
            .data(stamp)
            .map(|d| d.resume_time)
            .unwrap_or(0);
        start_playback_locked(core, state, resume_time, paused);
        hooks |= PLAYBACK_BEGIN;
    } else {
        stop_playback_locked(core, state);
        hooks |= PLAYBACK_STOP;
    }

    hooks
}

/// Re-aim playback after the playing playlist's position changed.
fn change_playback(core: &Core, state: &mut CoreState, stamp: u32) -> u8 {
    let mut hooks = SET_POSITION;

    if state.playing == Some(stamp) {
        let pos = state.registry.data(stamp).map(|d| d.position()).unwrap_or(-1);
        if pos >= 0 {
            let paused = core.backends().map(|b| b.playback.is_paused()).unwrap_or(false);
            start_playback_locked(core, state, 0, paused);
            hooks |= PLAYBACK_BEGIN;
        } else {
            state.playing = None;
            stop_playback_locked(core, state);
            hooks |= SET_PLAYLIST | PLAYBACK_STOP;
        }
    }

    hooks
}

/// Fire the hook set captured under the lock, in the documented order.
fn call_playback_hooks(playlist: Playlist, hooks: u8) {
    if hooks & SET_PLAYLIST != 0 {
        events::emit(&HookEvent::PlaylistSetPlaying);
    }
    if hooks & SET_POSITION != 0 {
        events::emit(&HookEvent::PlaylistPosition { playlist });
    }
    if hooks & PLAYBACK_BEGIN != 0 {
        events::emit(&HookEvent::PlaybackBegin);
    }
    if hooks & PLAYBACK_STOP != 0 {
        events::emit(&HookEvent::PlaybackStop);
    }
}

// ===== Registry operations =====

fn insert_playlist_locked(core: &Core, state: &mut CoreState, at: usize, stamp: Option<u32>) -> u32 {
    let stamp = state.registry.insert(at, stamp);

    // only happens at startup
    if state.active.is_none() {
        state.active = Some(stamp);
    }

    if let Some(data) = state.registry.data_mut(stamp) {
        data.queue_update(UpdateLevel::Structure, 0, 0);
    }
    flush_signal(core, state, stamp);
    stamp
}

fn blank_playlist_locked(core: &Core, state: &mut CoreState) -> Option<u32> {
    let active = state.active?;
    let reusable = state
        .registry
        .data(active)
        .map(|d| d.title == crate::types::DEFAULT_TITLE && d.n_entries() == 0)
        .unwrap_or(false);
    if reusable {
        return Some(active);
    }

    let at = (state.registry.index_of(active) + 1).max(0) as usize;
    Some(insert_playlist_locked(core, state, at, None))
}

// ===== Public handle API =====

impl Playlist {
    fn with_data<R>(&self, neutral: R, f: impl FnOnce(&PlaylistData) -> R) -> R {
        let Some(stamp) = self.stamp else {
            return neutral;
        };
        let state = core().lock();
        match state.registry.data(stamp) {
            Some(data) => f(data),
            None => neutral,
        }
    }

    /// Run a mutation and drain its change signal into the update bus.
    fn with_data_mut<R>(&self, neutral: R, f: impl FnOnce(&mut PlaylistData) -> R) -> R {
        let Some(stamp) = self.stamp else {
            return neutral;
        };
        let core = core();
        let mut state = core.lock();
        let Some(data) = state.registry.data_mut(stamp) else {
            return neutral;
        };
        let result = f(data);
        flush_signal(core, &mut state, stamp);
        result
    }

    // ----- registry -----

    pub fn n_playlists() -> i32 {
        core().lock().registry.len() as i32
    }

    pub fn by_index(at: i32) -> Playlist {
        let state = core().lock();
        if at < 0 {
            return Playlist::null();
        }
        state
            .registry
            .stamp_at(at as usize)
            .map(Playlist::from_stamp)
            .unwrap_or_default()
    }

    pub fn active_playlist() -> Playlist {
        core().lock().active.map(Playlist::from_stamp).unwrap_or_default()
    }

    pub fn playing_playlist() -> Playlist {
        core().lock().playing.map(Playlist::from_stamp).unwrap_or_default()
    }

    /// The active playlist when it is still an untitled empty default,
    /// otherwise a fresh playlist inserted right after it.
    pub fn blank_playlist() -> Playlist {
        let core = core();
        let mut state = core.lock();
        blank_playlist_locked(core, &mut state)
            .map(Playlist::from_stamp)
            .unwrap_or_default()
    }

    /// The shared "Now Playing" playlist, reusing an existing one by title.
    pub fn temporary_playlist() -> Playlist {
        let core = core();
        let mut state = core.lock();

        for stamp in state.registry.stamps() {
            if state
                .registry
                .data(stamp)
                .map(|d| d.title == TEMPORARY_TITLE)
                .unwrap_or(false)
            {
                return Playlist::from_stamp(stamp);
            }
        }

        let Some(stamp) = blank_playlist_locked(core, &mut state) else {
            return Playlist::null();
        };
        if let Some(data) = state.registry.data_mut(stamp) {
            data.title = TEMPORARY_TITLE.to_string();
        }
        Playlist::from_stamp(stamp)
    }

    /// Insert a fresh playlist after the active one and activate it.
    pub fn new_playlist() -> Playlist {
        let core = core();
        let mut state = core.lock();
        let at = state
            .active
            .map(|a| (state.registry.index_of(a) + 1).max(0) as usize)
            .unwrap_or(0);
        let stamp = insert_playlist_locked(core, &mut state, at, None);
        state.active = Some(stamp);
        drop(state);

        events::emit(&HookEvent::PlaylistActivate);
        Playlist::from_stamp(stamp)
    }

    pub fn insert_playlist(at: i32) -> Playlist {
        let core = core();
        let mut state = core.lock();
        let at = clamp_insert_point(&state, at);
        let stamp = insert_playlist_locked(core, &mut state, at, None);
        Playlist::from_stamp(stamp)
    }

    /// Insert with a caller-chosen stamp (used when restoring from disk).
    /// A negative or already-used stamp falls back to automatic allocation.
    pub fn insert_with_stamp(at: i32, stamp: i32) -> Playlist {
        let core = core();
        let mut state = core.lock();
        let at = clamp_insert_point(&state, at);
        let requested = (stamp >= 0).then_some(stamp as u32);
        let stamp = insert_playlist_locked(core, &mut state, at, requested);
        Playlist::from_stamp(stamp)
    }

    pub fn reorder_playlists(from: i32, to: i32, count: i32) {
        let core = core();
        let mut state = core.lock();
        if state.registry.reorder(from, to, count) {
            queue_global_update(core, &mut state, UpdateLevel::Structure, false);
        }
    }

    pub fn remove_playlist(&self) {
        let Some(stamp) = self.stamp else {
            return;
        };
        let core = core();
        let mut state = core.lock();

        let Some(at) = ({
            // entries die with the playlist, so their scans die too
            let live = state.registry.data(stamp).is_some();
            if live {
                state.scan_items.retain(|item| item.stamp != stamp);
            }
            state.registry.remove(stamp)
        }) else {
            return;
        };

        if state.registry.len() == 0 {
            insert_playlist_locked(core, &mut state, 0, None);
        }

        let mut was_active = false;
        if state.active == Some(stamp) {
            let fallback = at.min(state.registry.len() - 1);
            state.active = state.registry.stamp_at(fallback);
            was_active = true;
        }

        let mut was_playing = false;
        if state.playing == Some(stamp) {
            state.playing = None;
            stop_playback_locked(core, &mut state);
            was_playing = true;
        }

        queue_global_update(core, &mut state, UpdateLevel::Structure, false);
        drop(state);

        if was_active {
            events::emit(&HookEvent::PlaylistActivate);
        }
        if was_playing {
            events::emit(&HookEvent::PlaylistSetPlaying);
            events::emit(&HookEvent::PlaybackStop);
        }
    }

    pub fn activate(&self) {
        let Some(stamp) = self.stamp else {
            return;
        };
        let core = core();
        let mut state = core.lock();
        if state.registry.data(stamp).is_none() {
            return;
        }

        let changed = state.active != Some(stamp);
        if changed {
            state.active = Some(stamp);
        }
        drop(state);

        if changed {
            events::emit(&HookEvent::PlaylistActivate);
        }
    }

    /// Current display position, -1 once deleted
    pub fn index(&self) -> i32 {
        let Some(stamp) = self.stamp else {
            return -1;
        };
        core().lock().registry.index_of(stamp)
    }

    /// The immortal integer identity of this playlist, -1 for a null handle
    pub fn stamp(&self) -> i32 {
        match self.stamp {
            Some(stamp) => stamp as i32,
            None => -1,
        }
    }

    // ----- metadata -----

    pub fn get_title(&self) -> String {
        self.with_data(String::new(), |d| d.title.clone())
    }

    pub fn set_title(&self, title: &str) {
        let Some(stamp) = self.stamp else {
            return;
        };
        let core = core();
        let mut state = core.lock();
        let Some(data) = state.registry.data_mut(stamp) else {
            return;
        };
        data.title = title.to_string();
        data.modified = true;
        queue_global_update(core, &mut state, UpdateLevel::Metadata, false);
    }

    pub fn get_filename(&self) -> String {
        self.with_data(String::new(), |d| d.filename.clone().unwrap_or_default())
    }

    pub fn set_filename(&self, filename: &str) {
        let Some(stamp) = self.stamp else {
            return;
        };
        let core = core();
        let mut state = core.lock();
        let Some(data) = state.registry.data_mut(stamp) else {
            return;
        };
        data.filename = Some(filename.to_string());
        data.modified = true;
        queue_global_update(core, &mut state, UpdateLevel::Metadata, false);
    }

    pub fn get_modified(&self) -> bool {
        self.with_data(false, |d| d.modified)
    }

    pub fn set_modified(&self, modified: bool) {
        let Some(stamp) = self.stamp else {
            return;
        };
        let mut state = core().lock();
        if let Some(data) = state.registry.data_mut(stamp) {
            data.modified = modified;
        }
    }

    // ----- entries -----

    pub fn n_entries(&self) -> i32 {
        self.with_data(0, |d| d.n_entries())
    }

    pub fn insert_flat_items(&self, at: i32, items: Vec<AddItem>) {
        let Some(stamp) = self.stamp else {
            return;
        };
        let core = core();
        let mut state = core.lock();
        let settings = state.settings.clone();
        let Some(data) = state.registry.data_mut(stamp) else {
            return;
        };
        data.insert_items(at, items, &settings);
        flush_signal(core, &mut state, stamp);
    }

    pub fn remove_entries(&self, at: i32, number: i32) {
        let Some(stamp) = self.stamp else {
            return;
        };
        let core = core();
        let mut state = core.lock();
        if state.registry.data(stamp).is_none() {
            return;
        }

        for key in state
            .registry
            .data(stamp)
            .map(|d| d.entry_keys_in(at, number))
            .unwrap_or_default()
        {
            scan_cancel(&mut state, stamp, key);
        }

        let mut position_changed = false;
        if let Some(data) = state.registry.data_mut(stamp) {
            data.remove_entries(at, number, &mut position_changed);
        }
        let hooks = if position_changed {
            change_playback(core, &mut state, stamp)
        } else {
            0
        };
        flush_signal(core, &mut state, stamp);
        drop(state);

        call_playback_hooks(*self, hooks);
    }

    pub fn entry_filename(&self, entry_num: i32) -> String {
        self.with_data(String::new(), |d| {
            d.entry_at(entry_num)
                .map(|e| e.filename.clone())
                .unwrap_or_default()
        })
    }

    /// Formatted display title of an entry
    pub fn entry_title(&self, entry_num: i32) -> String {
        self.with_data(String::new(), |d| {
            d.entry_at(entry_num)
                .map(|e| e.title.clone())
                .unwrap_or_default()
        })
    }

    /// The entry's decoder and scan error. In `Wait` mode this blocks until
    /// the entry has been scanned (retrying a failed scan once).
    pub fn entry_decoder(&self, entry_num: i32, mode: GetMode) -> (Option<String>, Option<String>) {
        let Some(stamp) = self.stamp else {
            return (None, None);
        };
        let core = core();
        let guard = core.lock();
        let (_guard, snapshot) =
            wait_for_entry(core, guard, stamp, entry_num, mode == GetMode::Wait, false);
        match snapshot {
            Some((decoder, _, error)) => (decoder, error),
            None => (None, None),
        }
    }

    /// The entry's tuple and scan error; `Wait` semantics as `entry_decoder`.
    pub fn entry_tuple(&self, entry_num: i32, mode: GetMode) -> (Option<Tuple>, Option<String>) {
        let Some(stamp) = self.stamp else {
            return (None, None);
        };
        let core = core();
        let guard = core.lock();
        let (_guard, snapshot) =
            wait_for_entry(core, guard, stamp, entry_num, false, mode == GetMode::Wait);
        match snapshot {
            Some((_, tuple, error)) => (tuple, error),
            None => (None, None),
        }
    }

    // ----- selection -----

    pub fn entry_selected(&self, entry_num: i32) -> bool {
        self.with_data(false, |d| d.entry_selected(entry_num))
    }

    pub fn select_entry(&self, entry_num: i32, selected: bool) {
        self.with_data_mut((), |d| d.select_entry(entry_num, selected));
    }

    pub fn n_selected(&self, at: i32, number: i32) -> i32 {
        self.with_data(0, |d| d.n_selected(at, number))
    }

    pub fn select_all(&self, selected: bool) {
        self.with_data_mut((), |d| d.select_all(selected));
    }

    pub fn remove_selected(&self) {
        let Some(stamp) = self.stamp else {
            return;
        };
        let core = core();
        let mut state = core.lock();
        if state.registry.data(stamp).is_none() {
            return;
        }

        for key in state
            .registry
            .data(stamp)
            .map(|d| d.selected_keys())
            .unwrap_or_default()
        {
            scan_cancel(&mut state, stamp, key);
        }

        let mut position_changed = false;
        if let Some(data) = state.registry.data_mut(stamp) {
            data.remove_selected(&mut position_changed);
        }
        let hooks = if position_changed {
            change_playback(core, &mut state, stamp)
        } else {
            0
        };
        flush_signal(core, &mut state, stamp);
        drop(state);

        call_playback_hooks(*self, hooks);
    }

    pub fn shift_entries(&self, entry_num: i32, distance: i32) -> i32 {
        self.with_data_mut(0, |d| d.shift_entries(entry_num, distance))
    }

    pub fn get_focus(&self) -> i32 {
        self.with_data(-1, |d| d.focus())
    }

    pub fn set_focus(&self, entry_num: i32) {
        self.with_data_mut((), |d| d.set_focus(entry_num));
    }

    // ----- position & playback -----

    pub fn get_position(&self) -> i32 {
        self.with_data(-1, |d| d.position())
    }

    pub fn set_position(&self, entry_num: i32) {
        let Some(stamp) = self.stamp else {
            return;
        };
        let core = core();
        let mut state = core.lock();
        let Some(data) = state.registry.data_mut(stamp) else {
            return;
        };

        let key = data.entry_key_at(entry_num);
        data.set_position(key, true);
        let hooks = change_playback(core, &mut state, stamp);
        drop(state);

        call_playback_hooks(*self, hooks);
    }

    pub fn start_playback(&self, paused: bool) {
        let Some(stamp) = self.stamp else {
            return;
        };
        let core = core();
        let mut state = core.lock();
        if state.registry.data(stamp).is_none() {
            return;
        }
        let hooks = set_playing_locked(core, &mut state, Some(stamp), paused);
        drop(state);

        call_playback_hooks(*self, hooks);
    }

    pub fn prev_song(&self) -> bool {
        let Some(stamp) = self.stamp else {
            return false;
        };
        let core = core();
        let mut state = core.lock();
        let Some(data) = state.registry.data_mut(stamp) else {
            return false;
        };

        if !data.prev_song() {
            return false;
        }
        let hooks = change_playback(core, &mut state, stamp);
        drop(state);

        call_playback_hooks(*self, hooks);
        true
    }

    pub fn next_song(&self, repeat: bool) -> bool {
        let Some(stamp) = self.stamp else {
            return false;
        };
        let core = core();
        let mut state = core.lock();
        let Some(data) = state.registry.data_mut(stamp) else {
            return false;
        };

        let hint = data.position() + 1; // 0 when nothing is current
        if !data.next_song(repeat, hint) {
            return false;
        }
        let hooks = change_playback(core, &mut state, stamp);
        drop(state);

        call_playback_hooks(*self, hooks);
        true
    }

    // ----- sort & shuffle -----

    pub fn sort_by_filename(&self, compare: &dyn Fn(&str, &str) -> std::cmp::Ordering) {
        self.with_data_mut((), |d| d.sort_by_filename(compare));
    }

    pub fn sort_by_tuple(&self, compare: &dyn Fn(&Tuple, &Tuple) -> std::cmp::Ordering) {
        self.with_data_mut((), |d| d.sort_by_tuple(compare));
    }

    pub fn sort_selected_by_filename(&self, compare: &dyn Fn(&str, &str) -> std::cmp::Ordering) {
        self.with_data_mut((), |d| d.sort_selected_by_filename(compare));
    }

    pub fn sort_selected_by_tuple(&self, compare: &dyn Fn(&Tuple, &Tuple) -> std::cmp::Ordering) {
        self.with_data_mut((), |d| d.sort_selected_by_tuple(compare));
    }

    pub fn reverse_order(&self) {
        self.with_data_mut((), |d| d.reverse_order());
    }

    pub fn reverse_selected(&self) {
        self.with_data_mut((), |d| d.reverse_selected());
    }

    pub fn randomize_order(&self) {
        self.with_data_mut((), |d| d.randomize_order());
    }

    pub fn randomize_selected(&self) {
        self.with_data_mut((), |d| d.randomize_selected());
    }

    // ----- lengths -----

    pub fn total_length_ms(&self) -> i64 {
        self.with_data(0, |d| d.total_length())
    }

    pub fn selected_length_ms(&self) -> i64 {
        self.with_data(0, |d| d.selected_length())
    }

    // ----- play queue -----

    pub fn n_queued(&self) -> i32 {
        self.with_data(0, |d| d.n_queued())
    }

    pub fn queue_insert(&self, at: i32, entry_num: i32) {
        self.with_data_mut((), |d| d.queue_insert(at, entry_num));
    }

    pub fn queue_insert_selected(&self, at: i32) {
        self.with_data_mut((), |d| d.queue_insert_selected(at));
    }

    pub fn queue_get_entry(&self, at: i32) -> i32 {
        self.with_data(-1, |d| d.queue_get_entry(at))
    }

    pub fn queue_find_entry(&self, entry_num: i32) -> i32 {
        self.with_data(-1, |d| d.queue_find_entry(entry_num))
    }

    pub fn queue_remove(&self, at: i32, number: i32) {
        self.with_data_mut((), |d| d.queue_remove(at, number));
    }

    pub fn queue_remove_selected(&self) {
        self.with_data_mut((), |d| d.queue_remove_selected());
    }

    // ----- update inspection -----

    pub fn update_pending(&self) -> bool {
        self.with_data(false, |d| d.update_pending())
    }

    pub fn update_detail(&self) -> Update {
        self.with_data(Update::default(), |d| d.last_update())
    }

    pub fn update_pending_any() -> bool {
        core().lock().update_level != UpdateLevel::None
    }

    // ----- scanning -----

    pub fn scan_in_progress(&self) -> bool {
        self.with_data(false, |d| d.scan_status != ScanStatus::NotScanning)
    }

    pub fn scan_in_progress_any() -> bool {
        let state = core().lock();
        state
            .registry
            .stamps()
            .iter()
            .filter_map(|&stamp| state.registry.data(stamp))
            .any(|d| d.scan_status != ScanStatus::NotScanning)
    }

    pub fn rescan_all(&self) {
        self.rescan(false);
    }

    pub fn rescan_selected(&self) {
        self.rescan(true);
    }

    fn rescan(&self, selected_only: bool) {
        let Some(stamp) = self.stamp else {
            return;
        };
        let core = core();
        let mut state = core.lock();
        let Some(data) = state.registry.data_mut(stamp) else {
            return;
        };

        data.reset_tuples(selected_only);
        data.scan_status = ScanStatus::ScanActive;
        flush_signal(core, &mut state, stamp);
        scan_restart(core, &mut state);
    }
}

fn clamp_insert_point(state: &CoreState, at: i32) -> usize {
    if at < 0 || at as usize > state.registry.len() {
        state.registry.len()
    } else {
        at as usize
    }
}

// ===== Free functions =====

/// Reset every entry whose filename matches `path` exactly and rescan.
pub fn rescan_file(path: &str) {
    let core = core();
    let mut state = core.lock();

    let mut restart = false;
    for stamp in state.registry.stamps() {
        let reset = state
            .registry
            .data_mut(stamp)
            .map(|d| d.reset_tuple_of_file(path))
            .unwrap_or(false);
        if reset {
            if let Some(data) = state.registry.data_mut(stamp) {
                data.scan_status = ScanStatus::ScanActive;
            }
            flush_signal(core, &mut state, stamp);
            restart = true;
        }
    }

    if restart {
        scan_restart(core, &mut state);
    }
}

/// Stop playback.
pub fn stop() {
    let core = core();
    let mut state = core.lock();
    let hooks = set_playing_locked(core, &mut state, None, false);
    drop(state);

    call_playback_hooks(Playlist::null(), hooks);
}

/// Restart playback where the last session left off (see [`load_state`]).
pub fn resume() {
    let core = core();
    let mut state = core.lock();
    if state.settings.always_resume_paused {
        state.resume_paused = true;
    }
    let (index, paused) = (state.resume_playlist, state.resume_paused);
    drop(state);

    Playlist::by_index(index).start_playback(paused);
}

/// Current settings snapshot.
pub fn settings() -> Settings {
    core().lock().settings.clone()
}

/// Install new settings, reacting to the keys the core observes.
pub fn update_settings(settings: Settings) {
    let core = core();
    let mut state = core.lock();
    let old = std::mem::replace(&mut state.settings, settings.clone());

    if old.metadata_on_play != settings.metadata_on_play {
        state.scan_enabled = state.scan_enabled_nominal && !settings.metadata_on_play;
        scan_restart(core, &mut state);
    }

    let titles_changed = old.generic_title_format != settings.generic_title_format
        || old.leading_zero != settings.leading_zero
        || old.show_hours != settings.show_hours
        || old.metadata_fallbacks != settings.metadata_fallbacks
        || old.show_numbers_in_pl != settings.show_numbers_in_pl;
    if titles_changed {
        for stamp in state.registry.stamps() {
            if let Some(data) = state.registry.data_mut(stamp) {
                data.reformat_titles(&settings);
            }
            flush_signal(core, &mut state, stamp);
        }
    }
}

/// Turn background scanning on or off.
///
/// The effective state also honors `metadata_on_play`, which defers all
/// metadata reads to playback time.
pub fn enable_scan(enable: bool) {
    let core = core();
    let mut state = core.lock();

    state.scan_enabled_nominal = enable;
    state.scan_enabled = enable && !state.settings.metadata_on_play;
    debug!(enabled = state.scan_enabled, "scan enable");
    scan_restart(core, &mut state);
}

/// Initialize the core: empty registry with one fresh active playlist.
///
/// `data_dir` is where [`save_state`] keeps the `playlist-state` file.
pub fn init(data_dir: PathBuf, backends: Backends) {
    let core = core();
    *core
        .backends
        .write()
        .expect("backends lock poisoned") = Some(backends);

    let mut state = core.lock();
    *state = CoreState::new();
    state.data_dir = Some(data_dir);

    // the registry is never empty after init; no update noise for the seed
    let stamp = state.registry.insert(0, None);
    state.active = Some(stamp);
    core.bus.cancel();
    info!("playlist core initialized");
}

/// Shut the core down, dropping all playlists and identities.
///
/// Playback must already be stopped; a live playing playlist here is a
/// caller bug.
pub fn end() {
    let core = core();
    let mut state = core.lock();

    assert!(
        state.playing.is_none(),
        "playlist core shut down while playback is active"
    );

    core.bus.cancel();
    *state = CoreState::new();
    drop(state);

    *core
        .backends
        .write()
        .expect("backends lock poisoned") = None;
    info!("playlist core shut down");
}

// ===== Playback thread interface =====

/// Called by the playback thread to open the current entry.
///
/// Runs the pending for-playback scan synchronously on the calling thread
/// (the lock is released around it), so the file is read exactly once for
/// decoding, tags, and art. A stale `serial` — the user switched tracks or
/// stopped playback meanwhile — yields an empty [`DecodeInfo`].
pub fn playback_entry_read(serial: u64) -> DecodeInfo {
    let core = core();
    let mut state = core.lock();

    if !playback_serial_valid(&state, serial) {
        return DecodeInfo::default();
    }

    let Some((stamp, key)) = current_playback_entry(&state) else {
        return DecodeInfo::default();
    };

    let request = {
        let idx = scan_item_for_entry(&state, stamp, key)
            .filter(|&idx| state.scan_items[idx].for_playback);
        let idx = idx.expect("playback entry has no pending scan");
        let item = &mut state.scan_items[idx];
        item.handled_by_playback = true;
        Arc::clone(&item.request)
    };

    drop(state);
    // the scan (and its completion merge) runs on the playback thread
    run_and_finish(&request);
    let state = core.lock();

    let mut info = DecodeInfo::default();
    if playback_serial_valid(&state, serial) {
        if let Some((stamp, key)) = current_playback_entry(&state) {
            if let Some(entry) = state
                .registry
                .data(stamp)
                .and_then(|d| d.entry_by_key(key))
            {
                let outcome = request.outcome();
                if let Some(backends) = core.backends() {
                    backends
                        .playback
                        .set_info(entry.number as i32, entry.tuple.clone().unwrap_or_default());
                    backends
                        .art
                        .cache_current(&entry.filename, outcome.image.clone(), outcome.image_file.clone());
                }

                info.filename = Some(entry.filename.clone());
                info.decoder = outcome.decoder.clone().or_else(|| entry.decoder.clone());
                info.file = outcome.file;
                info.error = outcome.error;
            }
        }
    }

    info
}

/// Called by the playback thread when the stream publishes new metadata.
///
/// Cuesheet entries are never overwritten: their tuples describe a segment
/// of the file, not the stream.
pub fn playback_entry_set_tuple(serial: u64, tuple: Tuple) {
    let core = core();
    let mut state = core.lock();

    if !playback_serial_valid(&state, serial) {
        return;
    }
    let Some((stamp, key)) = current_playback_entry(&state) else {
        return;
    };

    let is_cuesheet = state
        .registry
        .data(stamp)
        .and_then(|d| d.entry_by_key(key))
        .and_then(|e| e.tuple.as_ref())
        .map(|t| t.is_cuesheet_segment())
        .unwrap_or(false);
    if is_cuesheet {
        return;
    }

    let settings = state.settings.clone();
    if let Some(data) = state.registry.data_mut(stamp) {
        if data.set_entry_tuple(key, tuple, &settings) {
            if let Some(idx) = data.index_of_key(key) {
                data.queue_update(UpdateLevel::Metadata, idx, 1);
            }
        }
    }
    flush_signal(core, &mut state, stamp);
}

fn current_playback_entry(state: &CoreState) -> Option<(u32, u64)> {
    let stamp = state.playing?;
    let data = state.registry.data(stamp)?;
    let key = data.position_key()?;
    Some((stamp, key))
}

// ===== State file hooks (see state.rs) =====

/// Persist active/playing indices and per-playlist resume state.
pub fn save_state() {
    if let Err(error) = crate::state::save(core()) {
        warn!(%error, "failed to save playlist state");
    }
}

/// Restore state saved by [`save_state`]. Missing files and unknown keys
/// are accepted silently.
pub fn load_state() {
    if let Err(error) = crate::state::load(core()) {
        warn!(%error, "failed to load playlist state");
    }
}
