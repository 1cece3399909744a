//! Synchronous handle on a kernel CEC adapter node.
//!
//! The reactor wraps one of these in [AsyncCec](crate::tokio::AsyncCec) for
//! non-blocking drains; the source-switch sequencer opens a second, blocking
//! handle so claim/release calls wait for the driver.

use std::fs::{File, OpenOptions};
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::libc::O_NONBLOCK;
use tracing::{debug, warn};

use crate::error::{CecError, Result};
use crate::frame::Frame;
use crate::sys::{
    self, CecEventLostMsgs, CecEventStateChange, CecLogAddrs, CecLogicalAddress, CecModeFollower,
    CecModeInitiator, CecMsg, TxStatus, CEC_EVENT_LOST_MSGS, CEC_EVENT_STATE_CHANGE,
};

/// An adapter-level notification, distinct from bus message traffic.
#[derive(Debug, Clone, Copy)]
pub enum CecEvent {
    /// The adapter's addressing state changed (address table claimed or
    /// cleared, cable plugged or unplugged)
    StateChange(CecEventStateChange),
    /// The application did not empty the message queue in time
    LostMsgs(CecEventLostMsgs),
}

/// A handle on a CEC device node.
pub struct CecDevice(File);

impl CecDevice {
    /// Open a CEC device in blocking mode. Typically `/dev/cecX`.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map(Self)
    }

    /// Open a CEC device with O_NONBLOCK: receive and event dequeues return
    /// EAGAIN instead of waiting, and transmits/address changes return
    /// without waiting for completion.
    pub fn open_nonblocking<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(O_NONBLOCK)
            .open(path)
            .map(Self)
    }

    /// Probe a list of device nodes in order and open the first that
    /// succeeds (non-blocking). The adapter may not exist yet at startup;
    /// callers retry on a timer.
    pub fn open_first(paths: &[PathBuf]) -> io::Result<(Self, PathBuf)> {
        let mut last = io::Error::from(io::ErrorKind::NotFound);
        for path in paths {
            match Self::open_nonblocking(path) {
                Ok(dev) => return Ok((dev, path.clone())),
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    /// Change this handle's mode. The initiator sends, the follower
    /// receives messages addressed to the adapter.
    pub fn set_mode(
        &self,
        initiator: CecModeInitiator,
        follower: CecModeFollower,
    ) -> io::Result<()> {
        let mode = u32::from(initiator) | u32::from(follower);
        unsafe { sys::set_mode(self.0.as_raw_fd(), &mode) }?;
        Ok(())
    }

    /// Query the physical address, e.g. 0x3300 -> 3.3.0.0.
    pub fn physical_address(&self) -> io::Result<u16> {
        let mut addr = 0;
        unsafe { sys::get_phys(self.0.as_raw_fd(), &mut addr) }?;
        Ok(addr)
    }

    /// Set the physical address. On a blocking handle with logical address
    /// types defined this waits until the addresses are claimed.
    pub fn set_physical_address(&self, addr: u16) -> io::Result<()> {
        unsafe { sys::set_phys(self.0.as_raw_fd(), &addr) }?;
        Ok(())
    }

    /// Read the logical address table (the restorable bus identity).
    pub fn logical_addresses(&self) -> io::Result<CecLogAddrs> {
        let mut log = MaybeUninit::uninit();
        unsafe { sys::get_log(self.0.as_raw_fd(), log.as_mut_ptr()) }?;
        Ok(unsafe { log.assume_init() })
    }

    /// Write a logical address table, claiming its addresses.
    pub fn set_logical_addresses(&self, log: &CecLogAddrs) -> io::Result<()> {
        let mut log = log.clone();
        unsafe { sys::set_log(self.0.as_raw_fd(), &mut log) }?;
        Ok(())
    }

    /// Release all claimed logical addresses; the adapter goes back to the
    /// unconfigured state.
    pub fn clear_logical_addresses(&self) -> io::Result<()> {
        self.set_logical_addresses(&CecLogAddrs::default())
    }

    /// This device's own address for building outgoing frames: the first
    /// claimed entry of the table, queried live so temporary reassignments
    /// are always reflected.
    pub fn claimed_address(&self) -> Result<CecLogicalAddress> {
        let log = self.logical_addresses()?;
        let raw = log.first_claimed().ok_or(CecError::Unconfigured)?;
        CecLogicalAddress::try_from(raw).map_err(|_| CecError::AddressOutOfRange(raw))
    }

    /// Dequeue one pending adapter event. `Ok(None)` means the queue is
    /// empty, which ends a drain, not an error. Event kinds newer than this
    /// build are skipped with a warning.
    pub fn try_event(&self) -> io::Result<Option<CecEvent>> {
        loop {
            let mut evt = MaybeUninit::uninit();
            match unsafe { sys::get_event(self.0.as_raw_fd(), evt.as_mut_ptr()) } {
                Ok(_) => {
                    let evt = unsafe { evt.assume_init() };
                    match evt.typ {
                        CEC_EVENT_STATE_CHANGE => {
                            return Ok(Some(CecEvent::StateChange(unsafe {
                                evt.payload.state_change
                            })))
                        }
                        CEC_EVENT_LOST_MSGS => {
                            return Ok(Some(CecEvent::LostMsgs(unsafe { evt.payload.lost_msgs })))
                        }
                        other => {
                            warn!("ignoring adapter event of unknown kind {}", other);
                            continue;
                        }
                    }
                }
                Err(Errno::EAGAIN) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Dequeue one received message. `Ok(None)` means the queue is empty.
    pub fn try_receive(&self) -> io::Result<Option<CecMsg>> {
        let mut msg = MaybeUninit::uninit();
        let ptr: *mut CecMsg = msg.as_mut_ptr();
        unsafe { std::ptr::addr_of_mut!((*ptr).timeout).write(0) };
        match unsafe { sys::receive(self.0.as_raw_fd(), ptr) } {
            Ok(_) => Ok(Some(unsafe { msg.assume_init() })),
            Err(Errno::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Transmit one frame, fire and forget. On a blocking handle the driver
    /// reports the wire result in the returned status; a failed status is
    /// logged but not an error, the bus is best-effort (see DESIGN.md).
    pub fn send(&self, frame: &Frame) -> io::Result<()> {
        debug!("sending {}", frame);
        let mut msg = frame.encode();
        unsafe { sys::transmit(self.0.as_raw_fd(), &mut msg) }?;
        let tx = msg.tx_status();
        if !tx.is_empty() && !tx.contains(TxStatus::OK) {
            warn!("transmit of {} not acknowledged: {:?}", frame, tx);
        }
        Ok(())
    }
}

impl AsRawFd for CecDevice {
    fn as_raw_fd(&self) -> std::os::unix::prelude::RawFd {
        self.0.as_raw_fd()
    }
}
