//! Semantic view of one CEC message: initiator, destination, opcode and
//! argument bytes, detached from the 56 byte kernel envelope.
//!
//! Frames are ephemeral; one is built for every transmit and parsed from
//! every receive. An opcode byte this build does not model decodes as
//! `opcode: None` and is logged, never rejected, since the bus carries
//! traffic from devices speaking the full specification.

use tracing::warn;

use crate::sys::{CecLogicalAddress, CecMsg, CecOpcode, CEC_MAX_ARGS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub initiator: CecLogicalAddress,
    pub destination: CecLogicalAddress,
    /// None for poll messages and unrecognized opcode bytes
    pub opcode: Option<CecOpcode>,
    pub args: Vec<u8>,
}

impl Frame {
    /// A directed message. `args` must fit the 16 byte payload
    /// (address byte + opcode + 14 argument bytes); more is a programming
    /// error, not a runtime condition.
    pub fn new(
        initiator: CecLogicalAddress,
        destination: CecLogicalAddress,
        opcode: CecOpcode,
        args: &[u8],
    ) -> Frame {
        assert!(args.len() <= CEC_MAX_ARGS, "CEC payload exceeds 16 bytes");
        Frame {
            initiator,
            destination,
            opcode: Some(opcode),
            args: args.to_vec(),
        }
    }

    /// A broadcast message (destination 15).
    pub fn broadcast(initiator: CecLogicalAddress, opcode: CecOpcode, args: &[u8]) -> Frame {
        Frame::new(
            initiator,
            CecLogicalAddress::UnregisteredBroadcast,
            opcode,
            args,
        )
    }

    /// Decode the payload of a received message. The declared length is
    /// authoritative, the address nibbles always map to a logical address.
    pub fn parse(msg: &CecMsg) -> Frame {
        let opcode = msg.opcode_byte().and_then(|b| match CecOpcode::try_from(b) {
            Ok(op) => Some(op),
            Err(_) => {
                warn!("{:#04x} is not a known opcode", b);
                None
            }
        });
        Frame {
            initiator: msg.initiator(),
            destination: msg.destination(),
            opcode,
            args: msg.parameters().to_vec(),
        }
    }

    /// Build the kernel envelope. Fields the caller does not control
    /// (timestamps, counters, statuses) stay zero-filled; only the address
    /// byte, opcode, arguments and length matter for transmission.
    pub fn encode(&self) -> CecMsg {
        let mut msg = CecMsg::init(self.initiator, self.destination);
        if let Some(op) = self.opcode {
            msg.msg[1] = op.into();
            msg.len = 2 + self.args.len() as u32;
            msg.msg[2..msg.len as usize].copy_from_slice(&self.args);
        }
        msg
    }

    /// The standard CEC reply addressing: the reply's source is this
    /// request's destination and vice versa.
    pub fn reply(&self, opcode: CecOpcode, args: &[u8]) -> Frame {
        Frame::new(self.destination, self.initiator, opcode, args)
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.opcode {
            Some(op) => write!(
                f,
                "{:?}->{:?} {:?} {:x?}",
                self.initiator, self.destination, op, self.args
            ),
            None => write!(
                f,
                "{:?}->{:?} <unknown> {:x?}",
                self.initiator, self.destination, self.args
            ),
        }
    }
}
