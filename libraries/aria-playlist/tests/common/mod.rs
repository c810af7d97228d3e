//! Shared test harness
//!
//! The playlist core is process-wide, so every test takes a global guard,
//! initializes a fresh core with mock collaborators, and tears it down on
//! drop. Mock backends record every call for assertions.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once, OnceLock};
use std::time::{Duration, Instant};

use aria_playlist::{
    events, AddItem, ArtCache, Backends, HookEvent, PlaybackControl, Playlist, ScanOutcome,
    ScanRequest, TagReader, Tuple,
};
use tempfile::TempDir;

// ===== Serialization guard =====

fn test_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

// ===== Mock tag reader =====

#[derive(Default)]
pub struct MockReader {
    /// Filenames scanned, in completion order
    pub scanned: Mutex<Vec<String>>,
    /// Artificial per-scan latency
    pub delay: Mutex<Duration>,
    /// Produce an error outcome instead of metadata
    pub fail: AtomicBool,
}

impl MockReader {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn scanned_files(&self) -> Vec<String> {
        self.scanned.lock().unwrap().clone()
    }
}

impl TagReader for MockReader {
    fn scan(&self, request: &ScanRequest) -> ScanOutcome {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.scanned.lock().unwrap().push(request.filename.clone());

        if self.fail.load(Ordering::SeqCst) {
            return ScanOutcome {
                error: Some("unreadable".to_string()),
                ..ScanOutcome::default()
            };
        }

        let title = request
            .filename
            .rsplit('/')
            .next()
            .unwrap_or(&request.filename)
            .trim_end_matches(".mp3")
            .to_string();
        ScanOutcome {
            decoder: Some("mock-decoder".to_string()),
            tuple: request.flags.tuple.then(|| Tuple {
                title: Some(title),
                artist: Some("Mock Artist".to_string()),
                length_ms: 180_000,
                ..Tuple::default()
            }),
            file: request
                .flags
                .file
                .then(|| format!("open:{}", request.filename)),
            ..ScanOutcome::default()
        }
    }
}

// ===== Mock playback engine =====

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCall {
    Play {
        serial: u64,
        seek_ms: i32,
        paused: bool,
    },
    Stop,
    SetPaused(bool),
    SetInfo(i32),
}

#[derive(Default)]
pub struct MockPlayback {
    pub calls: Mutex<Vec<PlaybackCall>>,
    paused: AtomicBool,
    time: AtomicI32,
    serial: AtomicU64,
}

impl MockPlayback {
    /// Serial of the most recent `play` call
    pub fn last_serial(&self) -> u64 {
        self.serial.load(Ordering::SeqCst)
    }

    /// Simulate the playback clock
    pub fn set_time(&self, ms: i32) {
        self.time.store(ms, Ordering::SeqCst);
    }

    pub fn force_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn take_calls(&self) -> Vec<PlaybackCall> {
        std::mem::take(&mut self.calls.lock().unwrap())
    }

    pub fn last_play(&self) -> Option<PlaybackCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|call| matches!(call, PlaybackCall::Play { .. }))
            .cloned()
    }
}

impl PlaybackControl for MockPlayback {
    fn play(&self, serial: u64, seek_ms: i32, paused: bool) {
        self.serial.store(serial, Ordering::SeqCst);
        self.paused.store(paused, Ordering::SeqCst);
        self.calls.lock().unwrap().push(PlaybackCall::Play {
            serial,
            seek_ms,
            paused,
        });
    }

    fn stop(&self) {
        self.calls.lock().unwrap().push(PlaybackCall::Stop);
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push(PlaybackCall::SetPaused(paused));
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn time_ms(&self) -> i32 {
        self.time.load(Ordering::SeqCst)
    }

    fn set_info(&self, position: i32, _tuple: Tuple) {
        self.calls
            .lock()
            .unwrap()
            .push(PlaybackCall::SetInfo(position));
    }
}

// ===== Mock art cache =====

#[derive(Default)]
pub struct MockArt {
    pub cached: Mutex<Vec<String>>,
    pub clears: AtomicU64,
}

impl ArtCache for MockArt {
    fn clear_current(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }

    fn cache_current(&self, filename: &str, _image: Option<Vec<u8>>, _file: Option<String>) {
        self.cached.lock().unwrap().push(filename.to_string());
    }
}

// ===== Event recorder =====

pub struct EventLog {
    events: Arc<Mutex<Vec<HookEvent>>>,
    id: events::HookId,
}

impl EventLog {
    pub fn new() -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let id = events::subscribe(move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        Self { events, id }
    }

    pub fn snapshot(&self) -> Vec<HookEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<HookEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    pub fn count(&self, pred: impl Fn(&HookEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    /// Poll until an event matching `pred` has been recorded.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&HookEvent) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.events.lock().unwrap().iter().any(|e| pred(e)) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        events::unsubscribe(self.id);
    }
}

// ===== Core harness =====

pub struct TestCore {
    pub dir: TempDir,
    pub reader: Arc<MockReader>,
    pub playback: Arc<MockPlayback>,
    pub art: Arc<MockArt>,
    pub events: EventLog,
    // released last: the playlist core is shared process-wide
    _guard: MutexGuard<'static, ()>,
}

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

impl TestCore {
    pub fn new() -> Self {
        init_tracing();
        let guard = test_lock();
        let dir = TempDir::new().expect("failed to create temp dir");
        let reader = Arc::new(MockReader::default());
        let playback = Arc::new(MockPlayback::default());
        let art = Arc::new(MockArt::default());

        aria_playlist::init(dir.path().to_path_buf(), Self::backends(&reader, &playback, &art));

        Self {
            dir,
            reader,
            playback,
            art,
            events: EventLog::new(),
            _guard: guard,
        }
    }

    fn backends(
        reader: &Arc<MockReader>,
        playback: &Arc<MockPlayback>,
        art: &Arc<MockArt>,
    ) -> Backends {
        Backends {
            reader: Arc::clone(reader) as Arc<dyn TagReader>,
            playback: Arc::clone(playback) as Arc<dyn PlaybackControl>,
            art: Arc::clone(art) as Arc<dyn ArtCache>,
        }
    }

    /// Simulate a process restart, keeping the data directory.
    pub fn restart(&self) {
        aria_playlist::stop();
        aria_playlist::end();
        aria_playlist::init(
            self.dir.path().to_path_buf(),
            Self::backends(&self.reader, &self.playback, &self.art),
        );
    }

    /// Insert `names` as entries of `playlist`
    pub fn insert_files(&self, playlist: Playlist, names: &[&str]) {
        let items = names
            .iter()
            .map(|name| AddItem::new(format!("/music/{name}")))
            .collect();
        playlist.insert_flat_items(-1, items);
    }
}

impl Drop for TestCore {
    fn drop(&mut self) {
        aria_playlist::stop();
        aria_playlist::end();
    }
}

/// Poll until `pred` holds.
pub fn wait_until(timeout: Duration, pred: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if pred() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Wait for every playlist to finish scanning.
pub fn wait_scan_idle(timeout: Duration) -> bool {
    wait_until(timeout, || !Playlist::scan_in_progress_any())
}
