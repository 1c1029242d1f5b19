//! The opaque device-channel seam.
//!
//! Step bodies never talk to hardware directly; they go through a
//! bidirectional message pipe owned by the routine context. The concrete
//! transport (the DAQ pipe) lives outside this crate, so the core only
//! defines the [`MessageChannel`] contract plus an in-process
//! [`Endpoint`] implementation over paired `std::sync::mpsc` channels,
//! which is what the tests and the mock acquisition loop use.
//!
//! The channel is the *only* synchronization point between the signal and
//! data drivers: a signal tick normally precedes the data tick that consumes
//! its effect, but enforcing that ordering is the acquisition loop's job,
//! not this crate's.

use std::sync::mpsc;
use std::time::Duration;

use crate::error::ChannelClosed;

/// Blocking bidirectional message pipe between step bodies and the device
/// layer.
pub trait MessageChannel<M>: Send {
    /// Send a message to the peer.
    fn send(&self, msg: M) -> Result<(), ChannelClosed>;

    /// Block until a message arrives from the peer.
    fn receive(&self) -> Result<M, ChannelClosed>;

    /// Block until a message arrives or the timeout elapses.
    ///
    /// `Ok(None)` means the timeout elapsed with the peer still alive.
    fn receive_timeout(&self, timeout: Duration) -> Result<Option<M>, ChannelClosed>;
}

/// One end of an in-process bidirectional channel.
pub struct Endpoint<M> {
    tx: mpsc::Sender<M>,
    rx: mpsc::Receiver<M>,
}

/// Create a connected pair of [`Endpoint`]s.
#[must_use]
pub fn pair<M: Send>() -> (Endpoint<M>, Endpoint<M>) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    (Endpoint { tx: a_tx, rx: a_rx }, Endpoint { tx: b_tx, rx: b_rx })
}

impl<M: Send> MessageChannel<M> for Endpoint<M> {
    fn send(&self, msg: M) -> Result<(), ChannelClosed> {
        self.tx.send(msg).map_err(|_| ChannelClosed)
    }

    fn receive(&self) -> Result<M, ChannelClosed> {
        self.rx.recv().map_err(|_| ChannelClosed)
    }

    fn receive_timeout(&self, timeout: Duration) -> Result<Option<M>, ChannelClosed> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ChannelClosed),
        }
    }
}
