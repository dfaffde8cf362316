//! Deferred workspace removal.
//!
//! A single background thread owns every workspace removal so the response
//! path never waits on disk reclamation. Tasks carry an initial delay (a
//! just-exited tool may still hold file handles) and get exactly one retry
//! after a longer delay if the first attempt fails. A removal that fails
//! twice is logged and abandoned; it is never a job failure.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::workspace::destroy;

/// One pending removal.
#[derive(Debug, PartialEq, Eq)]
struct PendingRemoval {
    due: Instant,
    path: PathBuf,
    retry_delay: Duration,
    attempt: u32,
}

impl Ord for PendingRemoval {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl PartialOrd for PendingRemoval {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

enum Message {
    Schedule(PendingRemoval),
    Shutdown,
}

/// Handle to the cleanup thread.
pub struct CleanupQueue {
    tx: Sender<Message>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupQueue {
    /// Start the cleanup thread.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("apkforge-cleaner".to_string())
            .spawn(move || run_loop(rx))
            .ok();

        Self { tx, handle }
    }

    /// Schedule `path` for removal after `initial_delay`, with one retry
    /// after `retry_delay` if the first attempt fails.
    pub fn schedule(&self, path: PathBuf, initial_delay: Duration, retry_delay: Duration) {
        let task = PendingRemoval {
            due: Instant::now() + initial_delay,
            path,
            retry_delay,
            attempt: 0,
        };
        if self.tx.send(Message::Schedule(task)).is_err() {
            eprintln!("[cleaner] queue is gone; workspace left on disk");
        }
    }

    /// Stop the thread, attempting every still-pending removal immediately.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Default for CleanupQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CleanupQueue {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(rx: Receiver<Message>) {
    let mut pending: BinaryHeap<Reverse<PendingRemoval>> = BinaryHeap::new();

    loop {
        // Block until the next task is due, or indefinitely when idle.
        let message = match pending.peek() {
            Some(Reverse(next)) => {
                let wait = next.due.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(message) => Some(message),
                Err(_) => break,
            },
        };

        match message {
            Some(Message::Schedule(task)) => {
                pending.push(Reverse(task));
            }
            Some(Message::Shutdown) => break,
            None => {}
        }

        // Run everything that has come due.
        while let Some(Reverse(next)) = pending.peek() {
            if next.due > Instant::now() {
                break;
            }
            if let Some(Reverse(task)) = pending.pop() {
                if let Some(retry) = attempt_removal(task) {
                    pending.push(Reverse(retry));
                }
            }
        }
    }

    // Final drain: attempt every remaining task once, ignoring delays, so a
    // clean shutdown does not leak workspaces.
    for Reverse(task) in pending.into_sorted_vec() {
        let _ = attempt_removal(task);
    }
}

/// Try one removal. Returns the retry task if this attempt failed and a
/// retry is still available.
fn attempt_removal(task: PendingRemoval) -> Option<PendingRemoval> {
    match destroy(&task.path) {
        Ok(()) => None,
        Err(e) if task.attempt == 0 => {
            eprintln!(
                "[cleaner] removal of {} failed ({}), retrying in {:?}",
                task.path.display(),
                e,
                task.retry_delay
            );
            Some(PendingRemoval {
                due: Instant::now() + task.retry_delay,
                path: task.path,
                retry_delay: task.retry_delay,
                attempt: 1,
            })
        }
        Err(e) => {
            eprintln!(
                "[cleaner] giving up on {}: {}",
                task.path.display(),
                e
            );
            None
        }
    }
}
