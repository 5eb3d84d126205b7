//! Request/reply pairing for one command code.
//!
//! A rendezvous serialises concurrent callers of the same command behind an
//! async mutex and carries decoded replies from the reader to the single
//! waiting caller over an unbounded channel (the reader never blocks).
//! Replies arriving while nobody waits are unsolicited: logged and dropped.

use ccrf_proto::wire::Reply;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

pub(crate) struct Rendezvous {
    name: &'static str,
    gate: Arc<Mutex<()>>,
    rx: Arc<Mutex<UnboundedReceiver<Reply>>>,
    tx: UnboundedSender<Reply>,
    waiting: AtomicBool,
}

impl Rendezvous {
    pub fn new(name: &'static str) -> Arc<Self> {
        let (tx, rx) = unbounded_channel();
        Arc::new(Rendezvous {
            name,
            gate: Arc::new(Mutex::new(())),
            rx: Arc::new(Mutex::new(rx)),
            tx,
            waiting: AtomicBool::new(false),
        })
    }

    /// Deliver one decoded reply from the reader. Never blocks.
    pub fn deliver(&self, reply: Reply) {
        if !self.waiting.load(Ordering::Acquire) {
            warn!(command = self.name, "unsolicited reply, discarding");
            return;
        }
        if self.tx.send(reply).is_err() {
            warn!(command = self.name, "reply channel closed, discarding");
        }
    }

    /// Claim the rendezvous for one request. Blocks behind any caller
    /// already in flight on this command; the returned guard releases the
    /// claim on drop (including cancellation), after which late replies are
    /// treated as unsolicited.
    pub async fn claim(self: &Arc<Self>) -> Claim {
        let gate = Arc::clone(&self.gate).lock_owned().await;
        let mut rx = Arc::clone(&self.rx).lock_owned().await;
        // Drop anything a previous (cancelled) caller left behind.
        loop {
            match rx.try_recv() {
                Ok(_) => warn!(command = self.name, "stale reply, discarding"),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        self.waiting.store(true, Ordering::Release);
        Claim {
            rendezvous: Arc::clone(self),
            _gate: gate,
            rx,
        }
    }
}

/// Exclusive claim on a rendezvous for the duration of one request.
pub(crate) struct Claim {
    rendezvous: Arc<Rendezvous>,
    _gate: OwnedMutexGuard<()>,
    rx: OwnedMutexGuard<UnboundedReceiver<Reply>>,
}

impl Claim {
    /// Await the next reply. `None` means the link shut down.
    pub async fn recv(&mut self) -> Option<Reply> {
        self.rx.recv().await
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.rendezvous.waiting.store(false, Ordering::Release);
    }
}
