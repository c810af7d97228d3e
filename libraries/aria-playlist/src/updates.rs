//! Batched update notifications
//!
//! Per-playlist modifications coalesce into one process-wide "playlist
//! update" notification. Two paths exist: an immediate one (fires on the
//! bus thread's next turn) for user actions, and a delayed one (250 ms)
//! that amortizes storms of per-entry changes during a scan.
//!
//! The bus thread also drains "scan complete" notifications, de-duplicating
//! back-to-back completions into a single event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};

use crate::types::DELAYED_UPDATE_MS;

enum Command {
    Schedule(Duration),
    Cancel,
    ScanComplete,
}

/// Timer thread driving coalesced notifications
///
/// `fire` runs when a scheduled notification comes due; `scan_complete`
/// runs for each de-duplicated scan completion. Both run on the bus thread
/// with no lock held.
pub(crate) struct UpdateBus {
    tx: Sender<Command>,
    scan_complete_pending: Arc<AtomicBool>,
}

impl UpdateBus {
    pub fn new(fire: impl Fn() + Send + 'static, scan_complete: impl Fn() + Send + 'static) -> Self {
        let (tx, rx) = unbounded::<Command>();
        let scan_complete_pending = Arc::new(AtomicBool::new(false));
        let pending = Arc::clone(&scan_complete_pending);

        thread::Builder::new()
            .name("aria-update-bus".to_string())
            .spawn(move || {
                let mut deadline: Option<Instant> = None;

                loop {
                    let command = match deadline {
                        Some(due) => {
                            let now = Instant::now();
                            if due <= now {
                                deadline = None;
                                fire();
                                continue;
                            }
                            match rx.recv_timeout(due - now) {
                                Ok(command) => command,
                                Err(RecvTimeoutError::Timeout) => {
                                    deadline = None;
                                    fire();
                                    continue;
                                }
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                        None => match rx.recv() {
                            Ok(command) => command,
                            Err(_) => break,
                        },
                    };

                    match command {
                        Command::Schedule(delay) => deadline = Some(Instant::now() + delay),
                        Command::Cancel => deadline = None,
                        Command::ScanComplete => {
                            if pending.swap(false, Ordering::SeqCst) {
                                scan_complete();
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn update bus");

        Self {
            tx,
            scan_complete_pending,
        }
    }

    /// Fire on the bus thread's next turn
    pub fn schedule_immediate(&self) {
        let _ = self.tx.send(Command::Schedule(Duration::ZERO));
    }

    /// Fire after the debounce window
    pub fn schedule_delayed(&self) {
        let _ = self
            .tx
            .send(Command::Schedule(Duration::from_millis(DELAYED_UPDATE_MS)));
    }

    /// Drop any scheduled notification
    pub fn cancel(&self) {
        let _ = self.tx.send(Command::Cancel);
    }

    /// Queue a scan-complete event; consecutive calls collapse into one
    pub fn notify_scan_complete(&self) {
        self.scan_complete_pending.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Command::ScanComplete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_bus() -> (UpdateBus, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let fires = Arc::new(AtomicUsize::new(0));
        let completes = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fires);
        let c = Arc::clone(&completes);
        let bus = UpdateBus::new(
            move || {
                f.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
        );
        (bus, fires, completes)
    }

    fn wait_for(counter: &AtomicUsize, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < expected {
            assert!(Instant::now() < deadline, "bus did not fire in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn immediate_schedule_fires_once() {
        let (bus, fires, _) = counting_bus();
        bus.schedule_immediate();
        wait_for(&fires, 1);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rescheduling_replaces_the_deadline() {
        let (bus, fires, _) = counting_bus();
        bus.schedule_delayed();
        bus.schedule_immediate();
        wait_for(&fires, 1);

        // the delayed deadline was replaced, not queued behind
        thread::sleep(Duration::from_millis(2 * DELAYED_UPDATE_MS));
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_drops_the_deadline() {
        let (bus, fires, _) = counting_bus();
        bus.schedule_delayed();
        bus.cancel();

        thread::sleep(Duration::from_millis(2 * DELAYED_UPDATE_MS));
        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn scan_complete_notifications_collapse() {
        let completes = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&completes);
        let bus = UpdateBus::new(
            // keep the bus thread busy so the notifications below queue up
            || thread::sleep(Duration::from_millis(200)),
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
        );

        bus.schedule_immediate();
        thread::sleep(Duration::from_millis(50));
        bus.notify_scan_complete();
        bus.notify_scan_complete();
        bus.notify_scan_complete();
        wait_for(&completes, 1);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(completes.load(Ordering::SeqCst), 1);
    }
}
