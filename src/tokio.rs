//! Async wrapper for the reactor's primary descriptor.
//!
//! The adapter signals address-table and other control events through the
//! urgent channel (POLLPRI) in addition to normal readable data, so the
//! descriptor is registered for both interests. All I/O stays non-blocking;
//! an empty queue pair parks the task until the next readiness edge.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{unix::AsyncFd, Interest};

use crate::device::{CecDevice, CecEvent};
use crate::error::Result;
use crate::frame::Frame;
use crate::sys::{CecLogicalAddress, CecModeFollower, CecModeInitiator};

pub struct AsyncCec {
    fd: AsyncFd<CecDevice>,
    path: PathBuf,
}

impl AsyncCec {
    /// Open one device node non-blocking and register it with the runtime.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let dev = CecDevice::open_nonblocking(&path)?;
        Self::register(dev, path.as_ref().to_path_buf())
    }

    /// Probe a list of device nodes in order and take the first that opens.
    pub fn open_first(paths: &[PathBuf]) -> io::Result<Self> {
        let (dev, path) = CecDevice::open_first(paths)?;
        Self::register(dev, path)
    }

    fn register(dev: CecDevice, path: PathBuf) -> io::Result<Self> {
        let fd = AsyncFd::with_interest(dev, Interest::READABLE | Interest::PRIORITY)?;
        Ok(AsyncCec { fd, path })
    }

    /// The device node this handle was opened on; the source-switch
    /// sequencer opens its own blocking descriptor on the same node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for bus activity, then dequeue everything pending: adapter
    /// events first, then received messages. Draining an empty adapter
    /// returns to waiting instead of surfacing an error.
    pub async fn drain(&self) -> io::Result<(Vec<CecEvent>, Vec<Frame>)> {
        self.fd
            .async_io(Interest::READABLE | Interest::PRIORITY, |dev| {
                let mut events = Vec::new();
                let mut frames = Vec::new();
                while let Some(evt) = dev.try_event()? {
                    events.push(evt);
                }
                while let Some(msg) = dev.try_receive()? {
                    frames.push(Frame::parse(&msg));
                }
                if events.is_empty() && frames.is_empty() {
                    // nothing pending: clear readiness and park
                    return Err(io::ErrorKind::WouldBlock.into());
                }
                Ok((events, frames))
            })
            .await
    }

    pub fn set_mode(&self, initiator: CecModeInitiator, follower: CecModeFollower) -> io::Result<()> {
        self.fd.get_ref().set_mode(initiator, follower)
    }

    pub fn claimed_address(&self) -> Result<CecLogicalAddress> {
        self.fd.get_ref().claimed_address()
    }

    /// One non-waiting transmit on the non-blocking descriptor.
    pub fn send(&self, frame: &Frame) -> io::Result<()> {
        self.fd.get_ref().send(frame)
    }
}
