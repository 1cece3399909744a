//! Source-switch sequencer.
//!
//! Announcing another HDMI input as the active source requires borrowing
//! that input's bus identity for a moment: release our logical address,
//! take on the input's physical address, re-claim, broadcast ActiveSource,
//! then put everything back. The whole sequence runs on its own *blocking*
//! descriptor so the claim/release ioctls wait for the driver and nothing
//! interleaves with the reactor's non-blocking descriptor. The reactor runs
//! at most one switch at a time.

use std::io;
use std::path::Path;

use tracing::debug;

use crate::device::CecDevice;
use crate::error::{CecError, Result};
use crate::frame::Frame;
use crate::state::Input;
use crate::sys::{
    phys_addr_string, CecLogAddrs, CecLogicalAddress, CecModeFollower, CecModeInitiator, CecOpcode,
};

/// The adapter operations the sequencer needs. `CecDevice` is the real
/// thing; tests drive the sequence against a scripted mock.
pub trait Adapter {
    fn physical_address(&self) -> io::Result<u16>;
    fn set_physical_address(&self, addr: u16) -> io::Result<()>;
    fn logical_addresses(&self) -> io::Result<CecLogAddrs>;
    fn set_logical_addresses(&self, log: &CecLogAddrs) -> io::Result<()>;
    fn clear_logical_addresses(&self) -> io::Result<()>;
    fn claimed_address(&self) -> Result<CecLogicalAddress>;
    fn send(&self, frame: &Frame) -> io::Result<()>;
}

impl Adapter for CecDevice {
    fn physical_address(&self) -> io::Result<u16> {
        CecDevice::physical_address(self)
    }
    fn set_physical_address(&self, addr: u16) -> io::Result<()> {
        CecDevice::set_physical_address(self, addr)
    }
    fn logical_addresses(&self) -> io::Result<CecLogAddrs> {
        CecDevice::logical_addresses(self)
    }
    fn set_logical_addresses(&self, log: &CecLogAddrs) -> io::Result<()> {
        CecDevice::set_logical_addresses(self, log)
    }
    fn clear_logical_addresses(&self) -> io::Result<()> {
        CecDevice::clear_logical_addresses(self)
    }
    fn claimed_address(&self) -> Result<CecLogicalAddress> {
        CecDevice::claimed_address(self)
    }
    fn send(&self, frame: &Frame) -> io::Result<()> {
        CecDevice::send(self, frame)
    }
}

/// Open a second, blocking descriptor on the adapter and run the switch
/// sequence to completion. The descriptor is initiator-only; the reactor's
/// follower handle keeps receiving bus traffic.
pub fn switch_source(path: &Path, input: Input) -> Result<()> {
    let dev = CecDevice::open(path)?;
    dev.set_mode(CecModeInitiator::Send, CecModeFollower::RepliesOnly)?;
    run_switch(&dev, input)
}

/// Snapshot the bus identity, announce `input` as the active source under a
/// borrowed identity, and restore. Restoration runs whether or not the
/// announcement succeeded; the identity is never left in the borrowed state.
pub(crate) fn run_switch<A: Adapter>(dev: &A, input: Input) -> Result<()> {
    let old_phys = dev.physical_address()?;
    let snapshot = dev.logical_addresses()?;

    let announced = announce(dev, &snapshot, input);
    let restored = restore(dev, old_phys, &snapshot);
    // the triggering error wins over a restore error
    announced.and(restored.map_err(CecError::from))
}

fn announce<A: Adapter>(dev: &A, snapshot: &CecLogAddrs, input: Input) -> Result<()> {
    dev.clear_logical_addresses()?;
    debug!("released logical addresses");

    let phys = input.target_phys_addr();
    dev.set_physical_address(phys)?;
    debug!("phys_addr < {}", phys_addr_string(phys));

    // re-claims a logical address under the borrowed physical identity;
    // on the blocking descriptor this waits for the claim to finish
    dev.set_logical_addresses(snapshot)?;
    let addr = dev.claimed_address()?;
    debug!("log_addr > {:?}", addr);

    dev.send(&Frame::broadcast(
        addr,
        CecOpcode::ActiveSource,
        &[(phys >> 8) as u8, (phys & 0xff) as u8],
    ))?;
    debug!("active_source < {}", phys_addr_string(phys));
    Ok(())
}

fn restore<A: Adapter>(dev: &A, old_phys: u16, snapshot: &CecLogAddrs) -> io::Result<()> {
    dev.clear_logical_addresses()?;
    dev.set_physical_address(old_phys)?;
    debug!("phys_addr < {}", phys_addr_string(old_phys));
    dev.set_logical_addresses(snapshot)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// Scripted adapter: tracks identity state and the call sequence, and
    /// can be told to fail the announce transmit.
    struct MockAdapter {
        phys: Cell<u16>,
        log: RefCell<CecLogAddrs>,
        sent: RefCell<Vec<Frame>>,
        ops: RefCell<Vec<&'static str>>,
        fail_send: bool,
    }

    impl MockAdapter {
        fn new() -> Self {
            let mut log = CecLogAddrs::default();
            log.log_addr[0] = CecLogicalAddress::Playback1.into();
            log.log_addr_mask = 1 << 4;
            log.num_log_addrs = 1;
            log.osd_name = "bridge".to_string().try_into().unwrap();
            MockAdapter {
                phys: Cell::new(0x1000),
                log: RefCell::new(log),
                sent: RefCell::new(Vec::new()),
                ops: RefCell::new(Vec::new()),
                fail_send: false,
            }
        }
    }

    impl Adapter for MockAdapter {
        fn physical_address(&self) -> io::Result<u16> {
            self.ops.borrow_mut().push("get_phys");
            Ok(self.phys.get())
        }
        fn set_physical_address(&self, addr: u16) -> io::Result<()> {
            self.ops.borrow_mut().push("set_phys");
            self.phys.set(addr);
            Ok(())
        }
        fn logical_addresses(&self) -> io::Result<CecLogAddrs> {
            self.ops.borrow_mut().push("get_log");
            Ok(self.log.borrow().clone())
        }
        fn set_logical_addresses(&self, log: &CecLogAddrs) -> io::Result<()> {
            self.ops.borrow_mut().push("set_log");
            *self.log.borrow_mut() = log.clone();
            Ok(())
        }
        fn clear_logical_addresses(&self) -> io::Result<()> {
            self.ops.borrow_mut().push("clear_log");
            *self.log.borrow_mut() = CecLogAddrs::default();
            Ok(())
        }
        fn claimed_address(&self) -> Result<CecLogicalAddress> {
            let raw = self
                .log
                .borrow()
                .first_claimed()
                .ok_or(CecError::Unconfigured)?;
            CecLogicalAddress::try_from(raw).map_err(|_| CecError::AddressOutOfRange(raw))
        }
        fn send(&self, frame: &Frame) -> io::Result<()> {
            self.ops.borrow_mut().push("transmit");
            if self.fail_send {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            self.sent.borrow_mut().push(frame.clone());
            Ok(())
        }
    }

    fn assert_identity_restored(mock: &MockAdapter) {
        assert_eq!(mock.phys.get(), 0x1000);
        let log = mock.log.borrow();
        assert_eq!(log.first_claimed(), Some(CecLogicalAddress::Playback1.into()));
        assert_eq!(log.log_addr_mask, 1 << 4);
        assert_eq!(log.osd_name.as_ref(), "bridge");
    }

    #[test]
    fn switch_announces_and_restores() {
        let mock = MockAdapter::new();
        run_switch(&mock, Input::Hdmi3).unwrap();

        let sent = mock.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].initiator, CecLogicalAddress::Playback1);
        assert_eq!(sent[0].destination, CecLogicalAddress::UnregisteredBroadcast);
        assert_eq!(sent[0].opcode, Some(CecOpcode::ActiveSource));
        assert_eq!(sent[0].args, &[0x30, 0x00]);

        assert_identity_restored(&mock);
        assert_eq!(
            *mock.ops.borrow(),
            [
                "get_phys", "get_log", // snapshot
                "clear_log", "set_phys", "set_log", "transmit", // announce
                "clear_log", "set_phys", "set_log", // restore
            ]
        );
    }

    #[test]
    fn sound_bar_slot_announces_sub_port() {
        let mock = MockAdapter::new();
        run_switch(&mock, Input::SoundBar2).unwrap();
        let sent = mock.sent.borrow();
        assert_eq!(sent[0].args, &[0x12, 0x00]);
        assert_identity_restored(&mock);
    }

    #[test]
    fn failed_announce_still_restores_identity() {
        let mut mock = MockAdapter::new();
        mock.fail_send = true;
        let err = run_switch(&mock, Input::Hdmi3).unwrap_err();
        assert!(matches!(err, CecError::Io(_)));

        assert_identity_restored(&mock);
        // restore ran after the failing transmit
        assert_eq!(
            *mock.ops.borrow(),
            [
                "get_phys", "get_log",
                "clear_log", "set_phys", "set_log", "transmit",
                "clear_log", "set_phys", "set_log",
            ]
        );
        assert!(mock.sent.borrow().is_empty());
    }
}
