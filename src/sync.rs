//! Async plumbing: an unbounded FIFO channel and a one-shot completion.
//!
//! Both wrap `tokio::sync` primitives with the small contracts the client
//! needs: sends on a closed channel fail instead of panicking, close is
//! idempotent, and a completion can be probed without blocking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

/// Create an unbounded FIFO channel.
///
/// Items are received in send order until the channel is closed and
/// drained. A single consumer is supported.
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Sender {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        Receiver { rx },
    )
}

/// Producer half of the channel. Cloning shares the same close state.
pub struct Sender<T> {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<T>>>>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Sender {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> Sender<T> {
    /// Enqueue without blocking; fails once the channel is closed on either
    /// side.
    pub fn send(&self, value: T) -> Result<()> {
        let guard = self.tx.lock().expect("sender lock");
        match guard.as_ref() {
            Some(tx) => tx.send(value).map_err(|_| Error::ChannelClosed),
            None => Err(Error::ChannelClosed),
        }
    }

    /// Close the channel, waking the consumer. Idempotent.
    pub fn close(&self) {
        self.tx.lock().expect("sender lock").take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().expect("sender lock").is_none()
    }
}

/// Consumer half of the channel.
pub struct Receiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Receiver<T> {
    /// Receive the next item, or `None` once the channel is closed and
    /// drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

/// Create a one-shot completion pair.
pub fn completion<T>() -> (CompletionHandle<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    let resolved = Arc::new(AtomicBool::new(false));
    (
        CompletionHandle {
            tx: Arc::new(Mutex::new(Some(tx))),
            resolved: Arc::clone(&resolved),
        },
        Completion { rx, resolved },
    )
}

/// Producer side of a one-shot completion. Subsequent completions are
/// ignored.
pub struct CompletionHandle<T> {
    tx: Arc<Mutex<Option<oneshot::Sender<T>>>>,
    resolved: Arc<AtomicBool>,
}

impl<T> Clone for CompletionHandle<T> {
    fn clone(&self) -> Self {
        CompletionHandle {
            tx: Arc::clone(&self.tx),
            resolved: Arc::clone(&self.resolved),
        }
    }
}

impl<T> CompletionHandle<T> {
    /// Complete with a value. Only the first call has any effect.
    pub fn resolve(&self, value: T) {
        if let Some(tx) = self.tx.lock().expect("completion lock").take() {
            self.resolved.store(true, Ordering::SeqCst);
            let _ = tx.send(value);
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }
}

/// Consumer side of a one-shot completion.
pub struct Completion<T> {
    rx: oneshot::Receiver<T>,
    resolved: Arc<AtomicBool>,
}

impl<T> Completion<T> {
    /// Await the completion. Fails with `ConnectionClosed` if the handle is
    /// dropped without resolving, which only happens during teardown.
    pub async fn wait(self) -> Result<T> {
        self.rx.await.map_err(|_| Error::ConnectionClosed)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }
}
