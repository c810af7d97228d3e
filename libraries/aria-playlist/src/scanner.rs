//! Metadata scan requests and the worker pool
//!
//! The tag reader itself is an external collaborator behind [`TagReader`];
//! this module owns the request/outcome types and a small pool of worker
//! threads that run ordinary (non-playback) requests. Requests flagged for
//! playback are executed synchronously by the playback thread instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use tracing::debug;

use crate::types::Tuple;

/// Request ids are unique for the process lifetime, so a completion from
/// before a shutdown can never be mistaken for a fresh request.
pub(crate) fn next_request_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// What a scan should produce
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanFlags {
    /// Read tags (set when the entry has no valid tuple)
    pub tuple: bool,

    /// Extract embedded album art (playback scans only)
    pub image: bool,

    /// Open the file and keep the handle for the decoder (playback scans only)
    pub file: bool,
}

/// Result of one scan
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Decoder that accepted the file
    pub decoder: Option<String>,

    /// Parsed tags, present when `flags.tuple` was requested and succeeded
    pub tuple: Option<Tuple>,

    /// Failure description
    pub error: Option<String>,

    /// Embedded art, when requested
    pub image: Option<Vec<u8>>,

    /// Path to an external art file, when requested
    pub image_file: Option<String>,

    /// Open-file token, when requested
    pub file: Option<String>,
}

/// One pending scan of one file
///
/// The hints let the reader skip work it has already done: a valid tuple
/// means tags need not be re-read, a known decoder skips probing.
#[derive(Debug)]
pub struct ScanRequest {
    id: u64,
    pub filename: String,
    pub flags: ScanFlags,
    pub decoder_hint: Option<String>,
    pub tuple_hint: Option<Tuple>,
    outcome: Mutex<Option<ScanOutcome>>,
}

impl ScanRequest {
    pub(crate) fn new(
        id: u64,
        filename: String,
        flags: ScanFlags,
        decoder_hint: Option<String>,
        tuple_hint: Option<Tuple>,
    ) -> Self {
        Self {
            id,
            filename,
            flags,
            decoder_hint,
            tuple_hint,
            outcome: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run the scan and store its outcome. Called from a worker thread or,
    /// for playback requests, from the playback thread.
    pub(crate) fn run(&self, reader: &dyn TagReader) {
        let outcome = reader.scan(self);
        *self.outcome.lock().expect("scan outcome poisoned") = Some(outcome);
    }

    /// The stored outcome; empty when the scan has not run (yet)
    pub(crate) fn outcome(&self) -> ScanOutcome {
        self.outcome
            .lock()
            .expect("scan outcome poisoned")
            .clone()
            .unwrap_or_default()
    }
}

/// External tag/decoder/art reader
///
/// Implementations must be thread-safe: requests run concurrently on the
/// worker pool and on the playback thread.
pub trait TagReader: Send + Sync {
    /// Read whatever `request.flags` asks for
    fn scan(&self, request: &ScanRequest) -> ScanOutcome;
}

/// Worker pool executing non-playback scan requests
///
/// Requests are handed to `handler` on one of `threads` OS threads; the
/// handler runs the request and reports completion back to the core.
pub(crate) struct ScanService {
    tx: Sender<Arc<ScanRequest>>,
}

impl ScanService {
    pub fn new(
        threads: usize,
        handler: impl Fn(Arc<ScanRequest>) + Send + Clone + 'static,
    ) -> Self {
        let (tx, rx) = unbounded::<Arc<ScanRequest>>();

        for index in 0..threads {
            let rx = rx.clone();
            let handler = handler.clone();
            thread::Builder::new()
                .name(format!("aria-scan-{index}"))
                .spawn(move || {
                    while let Ok(request) = rx.recv() {
                        debug!(id = request.id(), file = %request.filename, "scanning");
                        handler(request);
                    }
                })
                .expect("failed to spawn scan worker");
        }

        Self { tx }
    }

    pub fn submit(&self, request: Arc<ScanRequest>) {
        // receiver only closes at process exit
        let _ = self.tx.send(request);
    }
}
