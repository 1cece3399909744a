//! Routing/power state machine.
//!
//! Tracks two things the presentation layer cares about: whether the display
//! is on, and which HDMI input is active. Decoded frames and adapter events
//! drive the transitions; the only other output is an occasional reply frame
//! for the reactor to transmit.

use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::device::CecEvent;
use crate::error::CecError;
use crate::frame::Frame;
use crate::sys::{
    CecLogicalAddress, CecOpcode, CecPowerStatus, CecUserControlCode, phys_addr_string,
};

/// The fixed, ordered input list this installation exposes. The first four
/// are the TV's own HDMI ports; the last three sit behind the sound bar on
/// port 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// "HDMI 1/ARC" - the port this device itself is plugged into
    Hdmi1 = 0,
    Hdmi2 = 1,
    Hdmi3 = 2,
    Hdmi4 = 3,
    SoundBar1 = 4,
    SoundBar2 = 5,
    SoundBar3 = 6,
}

/// Sub-port nibbles of the three sound-bar inputs, in slot order.
const SOUND_BAR_PORTS: [u8; 3] = [1, 2, 3];

const ALL_INPUTS: [Input; 7] = [
    Input::Hdmi1,
    Input::Hdmi2,
    Input::Hdmi3,
    Input::Hdmi4,
    Input::SoundBar1,
    Input::SoundBar2,
    Input::SoundBar3,
];

impl Input {
    pub fn label(self) -> &'static str {
        match self {
            Input::Hdmi1 => "HDMI 1/ARC",
            Input::Hdmi2 => "HDMI 2",
            Input::Hdmi3 => "HDMI 3",
            Input::Hdmi4 => "HDMI 4",
            Input::SoundBar1 => "HDMI 1.2",
            Input::SoundBar2 => "HDMI 1.3",
            Input::SoundBar3 => "HDMI 1.4",
        }
    }

    pub fn from_label(label: &str) -> Option<Input> {
        ALL_INPUTS.into_iter().find(|i| i.label() == label)
    }

    pub fn all() -> &'static [Input] {
        &ALL_INPUTS
    }

    fn slot(self) -> usize {
        self as usize
    }

    fn from_slot(slot: usize) -> Option<Input> {
        ALL_INPUTS.get(slot).copied()
    }

    /// Resolve the port byte carried by the routing opcodes. A non-zero low
    /// nibble names a sound-bar sub-port and maps through the fixed table to
    /// one of the last three slots; otherwise the high nibble names a
    /// primary TV port directly.
    pub fn from_routing_byte(byte: u8) -> Option<Input> {
        let sub = byte & 0xf;
        if sub != 0 {
            SOUND_BAR_PORTS
                .iter()
                .position(|&p| p == sub)
                .and_then(|i| Input::from_slot(i + 4))
        } else {
            let port = (byte >> 4) as usize;
            port.checked_sub(1)
                .filter(|&slot| slot < 4)
                .and_then(Input::from_slot)
        }
    }

    pub fn is_sound_bar(self) -> bool {
        self.slot() >= 4
    }

    /// The physical address announced while representing this input:
    /// primary ports are `(slot+1).0.0.0`, sound-bar ports hang off port 1
    /// as `1.<sub>.0.0`.
    pub fn target_phys_addr(self) -> u16 {
        let slot = self.slot();
        if self.is_sound_bar() {
            (1 << 12) | (u16::from(SOUND_BAR_PORTS[slot - 4]) << 8)
        } else {
            ((slot as u16) + 1) << 12
        }
    }
}

/// The UI command vocabulary accepted from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    Select,
    Up,
    Down,
    Left,
    Right,
    RootMenu,
    Back,
    Enter,
    VolumeUp,
    VolumeDown,
}

impl UiCommand {
    pub fn control_code(self) -> CecUserControlCode {
        match self {
            UiCommand::Select => CecUserControlCode::Select,
            UiCommand::Up => CecUserControlCode::Up,
            UiCommand::Down => CecUserControlCode::Down,
            UiCommand::Left => CecUserControlCode::Left,
            UiCommand::Right => CecUserControlCode::Right,
            UiCommand::RootMenu => CecUserControlCode::RootMenu,
            UiCommand::Back => CecUserControlCode::Back,
            UiCommand::Enter => CecUserControlCode::Enter,
            UiCommand::VolumeUp => CecUserControlCode::VolumeUp,
            UiCommand::VolumeDown => CecUserControlCode::VolumeDown,
        }
    }
}

impl FromStr for UiCommand {
    type Err = CecError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "select" => UiCommand::Select,
            "up" => UiCommand::Up,
            "down" => UiCommand::Down,
            "left" => UiCommand::Left,
            "right" => UiCommand::Right,
            "device-root-menu" => UiCommand::RootMenu,
            "back" => UiCommand::Back,
            "enter" => UiCommand::Enter,
            "volume-up" => UiCommand::VolumeUp,
            "volume-down" => UiCommand::VolumeDown,
            other => return Err(CecError::UnknownUiCommand(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Power {
    On,
    Off,
}

/// Fire-and-forget notifications towards the presentation layer. These are
/// the only externally visible effect of the state machine besides outbound
/// bus traffic; adapter-level errors never reach the observer.
pub trait StateObserver {
    fn on_power_changed(&mut self, on: bool);
    fn on_source_changed(&mut self, source: Option<&str>);
}

pub struct StateMachine<O: StateObserver> {
    power: Power,
    source: Option<Input>,
    observer: O,
}

impl<O: StateObserver> StateMachine<O> {
    pub fn new(observer: O) -> Self {
        StateMachine {
            power: Power::Off,
            source: None,
            observer,
        }
    }

    pub fn power(&self) -> Power {
        self.power
    }

    pub fn source(&self) -> Option<Input> {
        self.source
    }

    pub(crate) fn set_power(&mut self, on: bool) {
        self.power = if on { Power::On } else { Power::Off };
        info!("display power: {}", if on { "on" } else { "standby" });
        self.observer.on_power_changed(on);
    }

    pub(crate) fn set_source(&mut self, source: Option<Input>) {
        self.source = source;
        info!("active source: {:?}", source.map(Input::label));
        self.observer.on_source_changed(source.map(Input::label));
    }

    /// Apply one decoded frame. Returns a reply frame for the caller to
    /// transmit, if the message asks for one.
    pub fn handle_frame(&mut self, frame: &Frame) -> Option<Frame> {
        use CecLogicalAddress::{Audiosystem, Tv};

        let Some(op) = frame.opcode else {
            debug!("ignoring frame without known opcode: {}", frame);
            return None;
        };
        match (frame.initiator, op) {
            (Tv, CecOpcode::GiveDevicePowerStatus) => {
                debug!("reporting power status");
                return Some(frame.reply(
                    CecOpcode::ReportPowerStatus,
                    &[CecPowerStatus::On.into()],
                ));
            }
            (Tv, CecOpcode::ReportPowerStatus) => match frame.args.first() {
                Some(&raw) => match CecPowerStatus::try_from(raw) {
                    Ok(status) => self.set_power(status == CecPowerStatus::On),
                    Err(_) => warn!("{:#04x} is not a power status", raw),
                },
                None => warn!("power status report without payload"),
            },
            (Tv, CecOpcode::ActiveSource) => {
                // the TV itself took over, e.g. switched to its apps
                self.set_source(None);
            }
            (Tv, CecOpcode::Standby) => self.set_power(false),
            (Tv | Audiosystem, CecOpcode::RoutingChange) => {
                // new route is in args[2..4]; the high byte names the port
                match frame.args.get(2) {
                    Some(&byte) => self.route_changed(byte, false),
                    None => warn!("routing change without a new route"),
                }
            }
            (Tv | Audiosystem, CecOpcode::SetStreamPath) => match frame.args.first() {
                Some(&byte) => self.route_changed(byte, true),
                None => warn!("stream path without a target"),
            },
            (Audiosystem, CecOpcode::RoutingInformation) => {
                if let Some(&byte) = frame.args.first() {
                    // only the sound bar's own inputs are news here; a
                    // primary port would be announced by the TV instead
                    match Input::from_routing_byte(byte) {
                        Some(input) if input.is_sound_bar() => {
                            info!("sound bar switched to {}", input.label());
                            self.set_source(Some(input));
                        }
                        _ => debug!("routing information for {}", phys_addr_string(u16::from(byte) << 8)),
                    }
                }
            }
            _ => debug!("ignoring {}", frame),
        }
        None
    }

    /// Route updates shared by RoutingChange and SetStreamPath. A change
    /// towards our own port (slot 0) means "switched to me" and is already
    /// announced through other opcodes, so RoutingChange skips it;
    /// SetStreamPath always applies.
    fn route_changed(&mut self, byte: u8, include_own_port: bool) {
        match Input::from_routing_byte(byte) {
            Some(Input::Hdmi1) if !include_own_port => {
                debug!("route back to own port, already handled");
            }
            Some(input) => {
                info!(
                    "switched to {} ({})",
                    input.label(),
                    phys_addr_string(input.target_phys_addr())
                );
                self.set_source(Some(input));
            }
            None => warn!("route byte {:#04x} does not map to an input", byte),
        }
    }

    /// Apply one adapter event. Returns true when the caller should re-probe
    /// display power: any (re)claimed logical address means the bus was
    /// renegotiated and the cached power state may be stale.
    pub fn handle_event(&mut self, event: &CecEvent) -> bool {
        match event {
            CecEvent::StateChange(sc) => {
                debug!(
                    "adapter state: phys {} mask {:#06x}",
                    phys_addr_string(sc.phys_addr),
                    sc.log_addr_mask
                );
                sc.log_addr_mask != 0
            }
            CecEvent::LostMsgs(lost) => {
                warn!("{} bus messages lost", lost.lost_msgs);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::CecEventStateChange;
    use test_case::test_case;

    #[derive(Default)]
    struct Recorder {
        power: Vec<bool>,
        sources: Vec<Option<String>>,
    }

    impl StateObserver for Recorder {
        fn on_power_changed(&mut self, on: bool) {
            self.power.push(on);
        }
        fn on_source_changed(&mut self, source: Option<&str>) {
            self.sources.push(source.map(str::to_string));
        }
    }

    fn machine() -> StateMachine<Recorder> {
        StateMachine::new(Recorder::default())
    }

    fn frame_from(
        initiator: CecLogicalAddress,
        opcode: CecOpcode,
        args: &[u8],
    ) -> Frame {
        Frame::new(initiator, CecLogicalAddress::Playback1, opcode, args)
    }

    // sound-bar sub-index 3 is the third table entry -> last slot;
    // a zero low nibble selects the primary port from the high nibble
    #[test_case(0x13, Some(Input::SoundBar3); "sound bar sub index 3")]
    #[test_case(0x11, Some(Input::SoundBar1); "sound bar sub index 1")]
    #[test_case(0x20, Some(Input::Hdmi2); "primary port 2")]
    #[test_case(0x10, Some(Input::Hdmi1); "own port")]
    #[test_case(0x40, Some(Input::Hdmi4); "primary port 4")]
    #[test_case(0x14, None; "sub index outside table")]
    #[test_case(0x50, None; "port above primary range")]
    #[test_case(0x00, None; "no port at all")]
    fn routing_byte_resolution(byte: u8, expect: Option<Input>) {
        assert_eq!(Input::from_routing_byte(byte), expect);
    }

    #[test]
    fn power_status_query_gets_reply_without_state_change() {
        let mut m = machine();
        let request = frame_from(CecLogicalAddress::Tv, CecOpcode::GiveDevicePowerStatus, &[]);
        let reply = m.handle_frame(&request).expect("must reply");
        assert_eq!(reply.initiator, CecLogicalAddress::Playback1);
        assert_eq!(reply.destination, CecLogicalAddress::Tv);
        assert_eq!(reply.opcode, Some(CecOpcode::ReportPowerStatus));
        assert_eq!(reply.args, &[u8::from(CecPowerStatus::On)]);
        assert_eq!(m.power(), Power::Off);
        assert!(m.observer.power.is_empty());
        assert!(m.observer.sources.is_empty());
    }

    #[test]
    fn power_report_updates_and_notifies() {
        let mut m = machine();
        let report = frame_from(
            CecLogicalAddress::Tv,
            CecOpcode::ReportPowerStatus,
            &[CecPowerStatus::On.into()],
        );
        assert!(m.handle_frame(&report).is_none());
        assert_eq!(m.power(), Power::On);
        assert_eq!(m.observer.power, &[true]);

        let standby = frame_from(
            CecLogicalAddress::Tv,
            CecOpcode::ReportPowerStatus,
            &[CecPowerStatus::Standby.into()],
        );
        m.handle_frame(&standby);
        assert_eq!(m.power(), Power::Off);
        assert_eq!(m.observer.power, &[true, false]);
    }

    #[test]
    fn standby_from_tv_turns_off()  {
        let mut m = machine();
        m.set_power(true);
        m.handle_frame(&frame_from(CecLogicalAddress::Tv, CecOpcode::Standby, &[]));
        assert_eq!(m.power(), Power::Off);
    }

    #[test]
    fn tv_active_source_clears_input() {
        let mut m = machine();
        m.set_source(Some(Input::Hdmi3));
        m.handle_frame(&frame_from(
            CecLogicalAddress::Tv,
            CecOpcode::ActiveSource,
            &[0x00, 0x00],
        ));
        assert_eq!(m.source(), None);
        assert_eq!(m.observer.sources.last().unwrap(), &None);
    }

    #[test]
    fn routing_change_skips_own_port() {
        let mut m = machine();
        m.handle_frame(&frame_from(
            CecLogicalAddress::Tv,
            CecOpcode::RoutingChange,
            &[0x00, 0x00, 0x10, 0x00],
        ));
        assert_eq!(m.source(), None);
        assert!(m.observer.sources.is_empty());
    }

    #[test]
    fn routing_change_to_other_input() {
        let mut m = machine();
        m.handle_frame(&frame_from(
            CecLogicalAddress::Audiosystem,
            CecOpcode::RoutingChange,
            &[0x00, 0x00, 0x13, 0x00],
        ));
        assert_eq!(m.source(), Some(Input::SoundBar3));
        assert_eq!(
            m.observer.sources.last().unwrap().as_deref(),
            Some("HDMI 1.4")
        );
    }

    #[test]
    fn stream_path_includes_own_port() {
        let mut m = machine();
        m.handle_frame(&frame_from(
            CecLogicalAddress::Tv,
            CecOpcode::SetStreamPath,
            &[0x10, 0x00],
        ));
        assert_eq!(m.source(), Some(Input::Hdmi1));
    }

    #[test]
    fn routing_information_only_acts_on_sound_bar_inputs() {
        let mut m = machine();
        m.handle_frame(&frame_from(
            CecLogicalAddress::Audiosystem,
            CecOpcode::RoutingInformation,
            &[0x20, 0x00],
        ));
        assert_eq!(m.source(), None);

        m.handle_frame(&frame_from(
            CecLogicalAddress::Audiosystem,
            CecOpcode::RoutingInformation,
            &[0x12, 0x00],
        ));
        assert_eq!(m.source(), Some(Input::SoundBar2));
    }

    #[test]
    fn routing_information_from_tv_is_ignored() {
        let mut m = machine();
        m.handle_frame(&frame_from(
            CecLogicalAddress::Tv,
            CecOpcode::RoutingInformation,
            &[0x12, 0x00],
        ));
        assert_eq!(m.source(), None);
    }

    #[test]
    fn frames_from_other_devices_are_ignored() {
        let mut m = machine();
        m.handle_frame(&frame_from(
            CecLogicalAddress::Playback2,
            CecOpcode::Standby,
            &[],
        ));
        assert_eq!(m.power(), Power::Off);
        assert!(m.observer.power.is_empty());
    }

    #[test]
    fn address_claim_triggers_power_probe() {
        let mut m = machine();
        let claimed = CecEvent::StateChange(CecEventStateChange {
            phys_addr: 0x1000,
            log_addr_mask: 1 << 4,
            have_conn_info: 0,
        });
        assert!(m.handle_event(&claimed));

        let unconfigured = CecEvent::StateChange(CecEventStateChange {
            phys_addr: 0xffff,
            log_addr_mask: 0,
            have_conn_info: 0,
        });
        assert!(!m.handle_event(&unconfigured));
    }

    #[test]
    fn target_phys_addresses() {
        assert_eq!(Input::Hdmi1.target_phys_addr(), 0x1000);
        assert_eq!(Input::Hdmi4.target_phys_addr(), 0x4000);
        assert_eq!(Input::SoundBar1.target_phys_addr(), 0x1100);
        assert_eq!(Input::SoundBar3.target_phys_addr(), 0x1300);
    }

    #[test]
    fn ui_command_vocabulary() {
        assert_eq!("volume-up".parse::<UiCommand>().unwrap(), UiCommand::VolumeUp);
        assert_eq!(
            "device-root-menu".parse::<UiCommand>().unwrap().control_code(),
            CecUserControlCode::RootMenu
        );
        assert!("poweroff".parse::<UiCommand>().is_err());
    }

    #[test]
    fn input_labels_round_trip() {
        for input in Input::all() {
            assert_eq!(Input::from_label(input.label()), Some(*input));
        }
        assert_eq!(Input::from_label("HDMI 9"), None);
    }
}
