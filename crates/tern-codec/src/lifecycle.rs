//! Open/closed state shared by every operation on a codec.
//!
//! Closing flips a watch channel. Every operation races its I/O against
//! that channel, so a close wakes readers and writers stuck on a peer that
//! stopped talking. Frame I/O runs under an [`InFlight`] guard: a frame
//! abandoned half way (the caller dropped the future) leaves the stream
//! misaligned, so the guard closes the codec instead.

use std::future::Future;

use tokio::sync::watch;
use tracing::warn;

use crate::error::CodecError;

pub(crate) struct Lifecycle {
    closed: watch::Sender<bool>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self { closed }
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Mark the codec closed and wake every pending operation.
    ///
    /// Returns true only for the call that did the closing.
    pub(crate) fn close(&self) -> bool {
        self.closed
            .send_if_modified(|closed| !std::mem::replace(closed, true))
    }

    /// Run `op` unless the codec is, or becomes, closed first.
    pub(crate) async fn abortable<T, F>(&self, op: F) -> Result<T, CodecError>
    where
        F: Future<Output = Result<T, CodecError>>,
    {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(CodecError::Closed);
        }
        tokio::select! {
            biased;
            _ = closed.changed() => Err(CodecError::Closed),
            result = op => result,
        }
    }

    /// Guard a stretch of frame I/O.
    pub(crate) fn in_flight(&self) -> InFlight<'_> {
        InFlight {
            lifecycle: self,
            armed: true,
        }
    }
}

/// Closes the codec if dropped before [`InFlight::done`].
#[must_use]
pub(crate) struct InFlight<'a> {
    lifecycle: &'a Lifecycle,
    armed: bool,
}

impl InFlight<'_> {
    /// The frame was transferred completely, or failed in a way the caller
    /// sees as an error.
    pub(crate) fn done(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed && self.lifecycle.close() {
            warn!("Frame I/O abandoned mid-frame, codec closed");
        }
    }
}
