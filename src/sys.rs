//! Kernel CEC ABI: ioctl request codes and the fixed-layout structs they
//! carry. Layouts follow include/uapi/linux/cec.h and must stay byte-exact;
//! the size assertions in the tests below guard the ioctl encoding, which
//! bakes `size_of::<T>()` into the request code.

use bitflags::bitflags;
use nix::{ioctl_read, ioctl_readwrite, ioctl_write_ptr};
use num_enum::{IntoPrimitive, TryFromPrimitive};

//#define CEC_ADAP_G_PHYS_ADDR    _IOR('a',  1, __u16)
ioctl_read! {
    /// Query the adapter's physical address, e.g. 0x3300 -> 3.3.0.0.
    /// 0xffff if nothing is connected.
    get_phys, b'a', 1, u16
}

//#define CEC_ADAP_S_PHYS_ADDR    _IOW('a',  2, __u16)
ioctl_write_ptr! {
    /// Set the adapter's physical address. Only valid on a filehandle in
    /// initiator mode. If logical address types are defined and the
    /// descriptor is blocking, this waits until the addresses are claimed.
    /// A state-change event is sent when the physical address changes.
    set_phys, b'a', 2, u16
}

//#define CEC_ADAP_G_LOG_ADDRS    _IOR('a',  3, struct cec_log_addrs)
ioctl_read! {
    /// Query the logical address table. Filled by the driver.
    get_log, b'a', 3, CecLogAddrs
}

//#define CEC_ADAP_S_LOG_ADDRS    _IOWR('a',  4, struct cec_log_addrs)
ioctl_readwrite! {
    /// Claim (or with num_log_addrs == 0: release) logical addresses.
    /// On a blocking descriptor with a valid physical address this waits
    /// until all requested addresses are claimed.
    set_log, b'a', 4, CecLogAddrs
}

//#define CEC_TRANSMIT            _IOWR('a',  5, struct cec_msg)
ioctl_readwrite! {
    /// Queue one message for transmission. On a non-blocking descriptor the
    /// call returns before the transmit finishes; the result arrives later
    /// through the receive queue with a matching sequence number.
    transmit, b'a', 5, CecMsg
}

//#define CEC_RECEIVE             _IOWR('a',  6, struct cec_msg)
ioctl_readwrite! {
    /// Dequeue one received message. On a non-blocking descriptor EAGAIN
    /// means the queue is empty.
    receive, b'a', 6, CecMsg
}

//#define CEC_DQEVENT             _IOWR('a',  7, struct cec_event)
ioctl_readwrite! {
    /// Dequeue one pending adapter event. Event queues are per-filehandle
    /// and per-type; only the newest event of a type is retained.
    get_event, b'a', 7, CecEventData
}

//#define CEC_S_MODE              _IOW('a',  9, __u32)
ioctl_write_ptr! {
    /// Set this filehandle's initiator/follower mode.
    set_mode, b'a', 9, u32
}

/// Initiator half of the filehandle mode word.
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Clone, Copy)]
#[repr(u32)]
pub enum CecModeInitiator {
    /// Transmitting not possible (but others can)
    None = 0,
    /// **Default** shared access
    Send = 1,
    /// Do not allow other senders
    Exclusive = 2,
}

/// Follower half of the filehandle mode word.
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Clone, Copy)]
#[repr(u32)]
pub enum CecModeFollower {
    /// **Default**: only replies to this handle's own messages
    RepliesOnly = 0x0 << 4,
    /// Receive all messages directed at this device
    All = 0x1 << 4,
    /// As [CecModeFollower::All], locking out other followers
    Exclusive = 0x2 << 4,
    /// Exclusive, and core messages are passed through unprocessed
    ExclusivePassthru = 0x3 << 4,
    /// Monitor traffic of this device. Needs `CAP_NET_ADMIN`.
    Monitor = 0xe << 4,
    /// Monitor the whole bus
    MonitorAll = 0xf << 4,
}

pub const CEC_MAX_LOG_ADDRS: usize = 4;
pub const CEC_MAX_MSG_SIZE: usize = 16;
/// Opcode byte plus up to 14 argument bytes fit after the address byte.
pub const CEC_MAX_ARGS: usize = CEC_MAX_MSG_SIZE - 2;

pub const CEC_LOG_ADDR_INVALID: u8 = 0xff;
pub const CEC_PHYS_ADDR_INVALID: u16 = 0xffff;

/// The logical addresses defined by CEC.
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Clone, Copy)]
#[repr(u8)]
pub enum CecLogicalAddress {
    Tv = 0,
    Record1 = 1,
    Record2 = 2,
    Tuner1 = 3,
    Playback1 = 4,
    Audiosystem = 5,
    Tuner2 = 6,
    Tuner3 = 7,
    Playback2 = 8,
    Record3 = 9,
    Tuner4 = 10,
    Playback3 = 11,
    Backup1 = 12,
    Backup2 = 13,
    Specific = 14,
    /// As a destination: broadcast
    UnregisteredBroadcast = 15,
}

/// The opcodes this bridge speaks. The bus carries many more; anything not
/// listed here decodes as an unknown opcode and is logged, not rejected.
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Clone, Copy)]
#[repr(u8)]
pub enum CecOpcode {
    /// Sent by a source entering the active state; the TV turns on
    ImageViewOn = 0x04,
    /// Put the destination (or with a broadcast: everyone) into standby
    Standby = 0x36,
    /// Remote control button down. __Parameters:__ [CecUserControlCode]
    UserControlPressed = 0x44,
    /// Remote control button up
    UserControlReleased = 0x45,
    /// Audio system turns system audio mode on/off. __Parameters:__ 1 byte
    SetSystemAudioMode = 0x72,
    /// A switch changed its active route.
    /// __Parameters:__ 2 byte old + 2 byte new physical address
    RoutingChange = 0x80,
    /// A switch reports the active route below it.
    /// __Parameters:__ 2 byte physical address
    RoutingInformation = 0x81,
    /// Claims to be the one supplying the video stream.
    /// __Parameters:__ 2 byte physical address
    ActiveSource = 0x82,
    /// Maps the initiator's physical to its logical address.
    /// __Parameters:__ 2 byte physical address + 1 byte device type
    ReportPhysicalAddr = 0x84,
    /// Asks the current active source to announce itself
    RequestActiveSource = 0x85,
    /// The TV requests a stream from the given path.
    /// __Parameters:__ 2 byte physical address
    SetStreamPath = 0x86,
    /// __Parameters:__ 3 byte vendor id
    DeviceVendorId = 0x87,
    /// Requests a [CecOpcode::ReportPowerStatus]
    GiveDevicePowerStatus = 0x8f,
    /// __Parameters:__ 1 byte [CecPowerStatus]
    ReportPowerStatus = 0x90,
}

/// Payload of [CecOpcode::ReportPowerStatus].
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Clone, Copy)]
#[repr(u8)]
pub enum CecPowerStatus {
    On = 0,
    Standby = 1,
    InTransitionStandbyToOn = 2,
    InTransitionOnToStandby = 3,
}

/// Payload of [CecOpcode::UserControlPressed], limited to the buttons the
/// bridge forwards.
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Clone, Copy)]
#[repr(u8)]
pub enum CecUserControlCode {
    Select = 0x00,
    Up = 0x01,
    Down = 0x02,
    Left = 0x03,
    Right = 0x04,
    RootMenu = 0x09,
    Back = 0x0d,
    Enter = 0x2b,
    VolumeUp = 0x41,
    VolumeDown = 0x42,
}

bitflags! {
    /// Transmit status, set by the driver once the frame left the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TxStatus: u8 {
        const OK          = (1 << 0);
        const ARB_LOST    = (1 << 1);
        const NACK        = (1 << 2);
        const LOW_DRIVE   = (1 << 3);
        const ERROR       = (1 << 4);
        const MAX_RETRIES = (1 << 5);
    }
}
bitflags! {
    /// Receive status, set by the driver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RxStatus: u8 {
        const OK            = (1 << 0);
        const TIMEOUT       = (1 << 1);
        const FEATURE_ABORT = (1 << 2);
    }
}

/// struct cec_msg: the 56 byte transmit/receive envelope.
#[derive(Debug, Clone)]
#[repr(C)]
pub struct CecMsg {
    /// CLOCK_MONOTONIC ns, set by the driver when the transmit finished
    tx_ts: u64,
    /// CLOCK_MONOTONIC ns, set by the driver when the message was received
    rx_ts: u64,
    /// Length in bytes of msg
    pub len: u32,
    /// Receive timeout in ms; 0 waits forever (blocking descriptors only)
    pub timeout: u32,
    /// Driver-assigned, matches transmit results to transmits
    pub sequence: u32,
    flags: u32,
    /// Address byte, opcode, arguments
    pub msg: [u8; CEC_MAX_MSG_SIZE],
    /// Transmit only: opcode to wait a reply for. 0 = fire and forget.
    pub reply: u8,
    rx_status: RxStatus,
    tx_status: TxStatus,
    tx_arb_lost_cnt: u8,
    tx_nack_cnt: u8,
    tx_low_drive_cnt: u8,
    tx_error_cnt: u8,
}

impl CecMsg {
    /// An empty directed message; the envelope fields the driver owns are
    /// zero-filled.
    pub fn init(from: CecLogicalAddress, to: CecLogicalAddress) -> CecMsg {
        let f: u8 = from.into();
        let t: u8 = to.into();
        let mut m = CecMsg {
            tx_ts: 0,
            rx_ts: 0,
            len: 1,
            timeout: 0,
            sequence: 0,
            flags: 0,
            msg: [0; CEC_MAX_MSG_SIZE],
            reply: 0,
            rx_status: RxStatus::empty(),
            tx_status: TxStatus::empty(),
            tx_arb_lost_cnt: 0,
            tx_nack_cnt: 0,
            tx_low_drive_cnt: 0,
            tx_error_cnt: 0,
        };
        m.msg[0] = f << 4 | t;
        m
    }

    /// The initiator's logical address.
    pub fn initiator(&self) -> CecLogicalAddress {
        (self.msg[0] >> 4).try_into().unwrap() // a nibble, all values have a variant
    }

    /// The destination's logical address.
    pub fn destination(&self) -> CecLogicalAddress {
        (self.msg[0] & 0xf).try_into().unwrap()
    }

    /// The raw opcode byte; None for a poll message.
    pub fn opcode_byte(&self) -> Option<u8> {
        if self.len > 1 {
            Some(self.msg[1])
        } else {
            None
        }
    }

    /// Argument bytes after the opcode. The declared length is
    /// authoritative; trailing buffer content is not exposed.
    pub fn parameters(&self) -> &[u8] {
        if self.len > 2 {
            &self.msg[2..(self.len as usize).min(CEC_MAX_MSG_SIZE)]
        } else {
            &[]
        }
    }

    pub fn is_broadcast(&self) -> bool {
        (self.msg[0] & 0xf) == 0xf
    }

    pub fn tx_status(&self) -> TxStatus {
        self.tx_status
    }

    pub fn rx_status(&self) -> RxStatus {
        self.rx_status
    }
}

/// struct cec_log_addrs: the 92 byte logical address table.
///
/// The bridge treats this as an opaque read-modify-write unit: it is
/// snapshotted with [get_log], cleared, and written back with [set_log] to
/// restore the previous bus identity. Identity fields the driver fills on
/// read (version, vendor, OSD name, device types, features) are carried as
/// raw bytes, never interpreted.
#[derive(Debug, Clone, Default)]
#[repr(C)]
pub struct CecLogAddrs {
    /// Claimed logical addresses, CEC_LOG_ADDR_INVALID when unused.
    /// Set by the driver.
    pub log_addr: [u8; CEC_MAX_LOG_ADDRS],
    /// Bitmask of claimed addresses, 0 while unconfigured. Set by the driver.
    pub log_addr_mask: u16,
    pub cec_version: u8,
    /// How many addresses to claim; 0 releases them all and the adapter
    /// goes back to the unconfigured state.
    pub num_log_addrs: u8,
    pub vendor_id: u32,
    pub flags: u32,
    pub osd_name: OSDStr<15>,
    pub primary_device_type: [u8; CEC_MAX_LOG_ADDRS],
    pub log_addr_type: [u8; CEC_MAX_LOG_ADDRS],
    pub all_device_types: [u8; CEC_MAX_LOG_ADDRS],
    pub features: [[u8; 12]; CEC_MAX_LOG_ADDRS],
}

impl CecLogAddrs {
    /// First claimed entry, if the adapter is configured.
    pub fn first_claimed(&self) -> Option<u8> {
        if self.num_log_addrs == 0 || self.log_addr[0] == CEC_LOG_ADDR_INVALID {
            None
        } else {
            Some(self.log_addr[0])
        }
    }
}

pub const CEC_EVENT_STATE_CHANGE: u32 = 1;
pub const CEC_EVENT_LOST_MSGS: u32 = 2;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CecEventFlags: u32 {
        /// Generated on open to report the initial adapter state
        const INITIAL_STATE = (1 << 0);
        /// Older events of this type were overwritten
        const DROPPED_EVENTS = (1 << 1);
    }
}

/// Payload of a state-change event.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CecEventStateChange {
    /// The current physical address, CEC_PHYS_ADDR_INVALID when unplugged
    pub phys_addr: u16,
    /// Claimed logical addresses; 0 when unconfigured
    pub log_addr_mask: u16,
    /// Whether the adapter has HDMI connector info
    pub have_conn_info: u16,
}

/// Payload of a lost-messages event.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CecEventLostMsgs {
    pub lost_msgs: u32,
}

#[repr(C)]
pub union CecEventPayload {
    pub state_change: CecEventStateChange,
    pub lost_msgs: CecEventLostMsgs,
    raw: [u32; 16],
}

/// struct cec_event: the 80 byte event envelope. The kind field is kept raw
/// so kinds newer than this build decode safely and can be skipped.
#[repr(C)]
pub struct CecEventData {
    pub ts: u64,
    pub typ: u32,
    pub flags: CecEventFlags,
    pub payload: CecEventPayload,
}

#[allow(non_camel_case_types)]
type c_char = u8;

/// Fixed-size ASCII buffer as used for the OSD name field.
#[repr(transparent)]
#[derive(Clone)]
pub struct OSDStr<const MAX: usize>([c_char; MAX]);

impl<const MAX: usize> TryFrom<String> for OSDStr<MAX> {
    type Error = ();
    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_ascii() && value.len() <= MAX {
            let mut v = value.into_bytes();
            v.resize(MAX, 0);
            let a = v.try_into().unwrap(); // len is ok
            return Ok(OSDStr(a));
        }
        Err(())
    }
}

impl<const MAX: usize> AsRef<str> for OSDStr<MAX> {
    fn as_ref(&self) -> &str {
        match std::ffi::CStr::from_bytes_until_nul(&self.0) {
            Ok(s) => s.to_str().unwrap_or_default(),
            Err(_) => {
                // no terminating null
                std::str::from_utf8(&self.0).unwrap_or_default()
            }
        }
    }
}

impl<const MAX: usize> std::fmt::Display for OSDStr<MAX> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl<const MAX: usize> std::fmt::Debug for OSDStr<MAX> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl<const MAX: usize> Default for OSDStr<MAX> {
    fn default() -> Self {
        Self([0; MAX])
    }
}

/// Dotted notation for a 16 bit physical address, e.g. 0x1200 -> "1.2.0.0".
pub fn phys_addr_string(addr: u16) -> String {
    format!(
        "{:x}.{:x}.{:x}.{:x}",
        (addr >> 12) & 0xf,
        (addr >> 8) & 0xf,
        (addr >> 4) & 0xf,
        addr & 0xf
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    // The ioctl request codes encode these sizes; a drifting layout would
    // produce ENOTTY at runtime rather than a wrong read.
    #[test]
    fn abi_struct_sizes() {
        assert_eq!(size_of::<CecMsg>(), 56);
        assert_eq!(size_of::<CecEventData>(), 80);
        assert_eq!(size_of::<CecLogAddrs>(), 92);
    }

    #[test]
    fn msg_address_byte() {
        let msg = CecMsg::init(
            CecLogicalAddress::Playback1,
            CecLogicalAddress::UnregisteredBroadcast,
        );
        assert_eq!(msg.msg[0], 0x4f);
        assert_eq!(msg.initiator(), CecLogicalAddress::Playback1);
        assert_eq!(msg.destination(), CecLogicalAddress::UnregisteredBroadcast);
        assert!(msg.is_broadcast());
        assert_eq!(msg.opcode_byte(), None);
        assert!(msg.parameters().is_empty());
    }

    #[test]
    fn parameters_respect_declared_length() {
        let mut msg = CecMsg::init(CecLogicalAddress::Tv, CecLogicalAddress::Playback1);
        msg.msg[1] = CecOpcode::SetStreamPath.into();
        msg.msg[2] = 0x20;
        msg.msg[3] = 0x00;
        msg.msg[4] = 0xaa; // beyond len, must be invisible
        msg.len = 4;
        assert_eq!(msg.parameters(), &[0x20, 0x00]);
    }

    #[test]
    fn logical_address_bound() {
        assert!(CecLogicalAddress::try_from(15u8).is_ok());
        assert!(CecLogicalAddress::try_from(16u8).is_err());
        assert!(CecLogicalAddress::try_from(CEC_LOG_ADDR_INVALID).is_err());
    }

    #[test]
    fn phys_addr_formatting() {
        assert_eq!(phys_addr_string(0x1200), "1.2.0.0");
        assert_eq!(phys_addr_string(0xffff), "f.f.f.f");
    }
}
