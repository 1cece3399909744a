//! The reactor: owns the primary (non-blocking) descriptor, feeds decoded
//! bus traffic to the state machine, answers with outgoing frames, and
//! serves the inbound command surface.
//!
//! Descriptor loss is not fatal: any adapter I/O error drops the handle and
//! the connect loop reopens the node, retrying on a fixed delay for as long
//! as it takes (the node may not exist yet at boot, or may be replaced when
//! the adapter resets). Only cancellation stops the retry.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::CecEvent;
use crate::error::CecError;
use crate::frame::Frame;
use crate::state::{Input, StateMachine, StateObserver, UiCommand};
use crate::switch;
use crate::sys::{CecLogicalAddress, CecModeFollower, CecModeInitiator, CecOpcode};
use crate::tokio::AsyncCec;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Device nodes probed in order on every (re)connect
    pub device_paths: Vec<PathBuf>,
    /// Unsolicited power-status probe period
    pub probe_period: Duration,
    /// Delay between reconnect attempts when no adapter node opens
    pub reopen_delay: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            device_paths: vec![PathBuf::from("/dev/cec0"), PathBuf::from("/dev/cec1")],
            probe_period: Duration::from_secs(30),
            reopen_delay: Duration::from_secs(1),
        }
    }
}

/// The inbound command surface.
#[derive(Debug, Clone)]
pub enum Command {
    TurnOn,
    TurnOff,
    SelectSource(String),
    SendUiCommand(UiCommand),
}

/// Cloneable sender half handed to whoever drives the bridge (a UI, an
/// event bus). Commands are fire and forget; outcomes show up as observer
/// notifications.
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<Command>,
}

impl BridgeHandle {
    pub async fn turn_on(&self) {
        self.send(Command::TurnOn).await;
    }

    pub async fn turn_off(&self) {
        self.send(Command::TurnOff).await;
    }

    pub async fn select_source(&self, name: impl Into<String>) {
        self.send(Command::SelectSource(name.into())).await;
    }

    pub async fn send_ui_command(&self, command: UiCommand) {
        self.send(Command::SendUiCommand(command)).await;
    }

    async fn send(&self, cmd: Command) {
        if self.tx.send(cmd).await.is_err() {
            warn!("bridge is gone, command dropped");
        }
    }
}

enum Tick {
    Shutdown,
    Probe,
    Command(Option<Command>),
    Drained(io::Result<(Vec<CecEvent>, Vec<Frame>)>),
}

pub struct CecBridge<O: StateObserver> {
    config: BridgeConfig,
    machine: StateMachine<O>,
    commands: mpsc::Receiver<Command>,
    dev: Option<AsyncCec>,
}

impl<O: StateObserver> CecBridge<O> {
    pub fn new(config: BridgeConfig, observer: O) -> (CecBridge<O>, BridgeHandle) {
        let (tx, rx) = mpsc::channel(16);
        let bridge = CecBridge {
            config,
            machine: StateMachine::new(observer),
            commands: rx,
            dev: None,
        };
        (bridge, BridgeHandle { tx })
    }

    /// Drive the bridge until cancelled. Runs for the process lifetime; the
    /// observer only ever sees power/source notifications, never adapter
    /// trouble.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut probe = time::interval_at(
            Instant::now() + self.config.probe_period,
            self.config.probe_period,
        );
        let mut commands_open = true;

        loop {
            if self.dev.is_none() && !self.connect(&shutdown).await {
                return;
            }

            let Some(dev) = self.dev.as_ref() else {
                continue;
            };
            let tick = tokio::select! {
                _ = shutdown.cancelled() => Tick::Shutdown,
                _ = probe.tick() => Tick::Probe,
                cmd = self.commands.recv(), if commands_open => Tick::Command(cmd),
                res = dev.drain() => Tick::Drained(res),
            };

            match tick {
                Tick::Shutdown => {
                    info!("bridge shutting down");
                    return;
                }
                Tick::Probe => self.request_power_status(),
                Tick::Command(Some(cmd)) => self.handle_command(cmd).await,
                Tick::Command(None) => commands_open = false,
                Tick::Drained(Ok((events, frames))) => {
                    for event in events {
                        debug!("event: {:?}", event);
                        if self.machine.handle_event(&event) {
                            self.request_power_status();
                        }
                    }
                    for frame in frames {
                        debug!("received {}", frame);
                        if let Some(reply) = self.machine.handle_frame(&frame) {
                            self.send(&reply);
                        }
                    }
                }
                Tick::Drained(Err(e)) => {
                    warn!("adapter read failed: {}, reopening", e);
                    self.dev = None;
                }
            }
        }
    }

    /// Open the first available device node, retrying on a fixed delay.
    /// Returns false only when cancelled.
    async fn connect(&mut self, shutdown: &CancellationToken) -> bool {
        loop {
            match AsyncCec::open_first(&self.config.device_paths) {
                Ok(dev) => match Self::prepare(&dev) {
                    Ok(()) => {
                        info!("opened {}", dev.path().display());
                        self.dev = Some(dev);
                        return true;
                    }
                    Err(e) => warn!("adapter setup failed: {}", e),
                },
                Err(e) => debug!("no adapter node available: {}", e),
            }
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = time::sleep(self.config.reopen_delay) => {}
            }
        }
    }

    /// Put a fresh descriptor into initiator+follower mode and fire the
    /// startup probes, once per (re)open.
    fn prepare(dev: &AsyncCec) -> crate::error::Result<()> {
        dev.set_mode(CecModeInitiator::Send, CecModeFollower::All)?;
        match dev.claimed_address() {
            Ok(addr) => {
                for frame in startup_probes(addr) {
                    dev.send(&frame)?;
                }
            }
            Err(CecError::Io(e)) => return Err(e.into()),
            // not configured yet; the state-change event for the claim will
            // trigger a probe later
            Err(e) => warn!("skipping startup probes: {}", e),
        }
        Ok(())
    }

    /// Ask the TV for its power status, fire and forget. Runs on the 30 s
    /// timer and after every bus renegotiation.
    fn request_power_status(&mut self) {
        match self.own_address() {
            Some(addr) => {
                let probe = Frame::new(addr, CecLogicalAddress::Tv, CecOpcode::GiveDevicePowerStatus, &[]);
                self.send(&probe);
            }
            None => debug!("skipping power probe"),
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        debug!("command: {:?}", cmd);
        match cmd {
            Command::TurnOn => {
                if let Some(addr) = self.own_address() {
                    let wake = Frame::new(addr, CecLogicalAddress::Tv, CecOpcode::ImageViewOn, &[]);
                    if self.send(&wake) {
                        self.machine.set_power(true);
                    }
                }
            }
            Command::TurnOff => {
                if let Some(addr) = self.own_address() {
                    let sleep = Frame::broadcast(addr, CecOpcode::Standby, &[]);
                    if self.send(&sleep) {
                        self.machine.set_power(false);
                    }
                }
            }
            Command::SendUiCommand(ui) => {
                if let Some(addr) = self.own_address() {
                    let pressed = Frame::new(
                        addr,
                        CecLogicalAddress::Tv,
                        CecOpcode::UserControlPressed,
                        &[ui.control_code().into()],
                    );
                    let released =
                        Frame::new(addr, CecLogicalAddress::Tv, CecOpcode::UserControlReleased, &[]);
                    let _ = self.send(&pressed) && self.send(&released);
                }
            }
            Command::SelectSource(name) => self.select_source(&name).await,
        }
    }

    /// Run the source-switch sequence on its own blocking descriptor.
    /// Awaited inline, so at most one switch is ever in flight and the
    /// reactor performs no I/O on the primary descriptor meanwhile.
    async fn select_source(&mut self, name: &str) {
        let Some(input) = Input::from_label(name) else {
            warn!("{}", CecError::UnknownSource(name.to_string()));
            return;
        };
        let Some(dev) = &self.dev else {
            warn!("no adapter, ignoring switch to {}", input.label());
            return;
        };
        let path = dev.path().to_path_buf();
        info!("switching to {}", input.label());
        match tokio::task::spawn_blocking(move || switch::switch_source(&path, input)).await {
            Ok(Ok(())) => self.machine.set_source(Some(input)),
            Ok(Err(e)) => warn!("switch to {} failed: {}", input.label(), e),
            Err(e) => warn!("switch task failed: {}", e),
        }
    }

    /// The adapter's currently claimed address, queried live. Adapter I/O
    /// trouble here drops the descriptor like any other read failure.
    fn own_address(&mut self) -> Option<CecLogicalAddress> {
        let dev = self.dev.as_ref()?;
        match dev.claimed_address() {
            Ok(addr) => Some(addr),
            Err(CecError::Io(e)) => {
                warn!("adapter query failed: {}, reopening", e);
                self.dev = None;
                None
            }
            Err(e) => {
                debug!("no usable own address: {}", e);
                None
            }
        }
    }

    /// Transmit on the primary descriptor. A failure drops the descriptor
    /// for the connect loop to reopen; the frame itself is not retried.
    fn send(&mut self, frame: &Frame) -> bool {
        let Some(dev) = &self.dev else { return false };
        match dev.send(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!("transmit failed: {}, reopening", e);
                self.dev = None;
                false
            }
        }
    }
}

/// The three probes fired after every (re)open: learn the display's power
/// state, the current active source, and the current route.
fn startup_probes(addr: CecLogicalAddress) -> [Frame; 3] {
    [
        Frame::new(addr, CecLogicalAddress::Tv, CecOpcode::GiveDevicePowerStatus, &[]),
        Frame::new(addr, CecLogicalAddress::Tv, CecOpcode::RequestActiveSource, &[]),
        Frame::new(addr, CecLogicalAddress::Tv, CecOpcode::RoutingInformation, &[]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_probe_set() {
        let probes = startup_probes(CecLogicalAddress::Playback1);
        let opcodes: Vec<_> = probes.iter().map(|f| f.opcode.unwrap()).collect();
        assert_eq!(
            opcodes,
            [
                CecOpcode::GiveDevicePowerStatus,
                CecOpcode::RequestActiveSource,
                CecOpcode::RoutingInformation,
            ]
        );
        for probe in &probes {
            assert_eq!(probe.initiator, CecLogicalAddress::Playback1);
            assert_eq!(probe.destination, CecLogicalAddress::Tv);
            assert!(probe.args.is_empty());
        }
    }

    #[test]
    fn default_config_probes_first_two_nodes() {
        let config = BridgeConfig::default();
        assert_eq!(
            config.device_paths,
            [PathBuf::from("/dev/cec0"), PathBuf::from("/dev/cec1")]
        );
        assert_eq!(config.probe_period, Duration::from_secs(30));
    }
}
