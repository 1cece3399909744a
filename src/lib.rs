/*!
 * HDMI-CEC bridge on the [CEC linux API](https://www.kernel.org/doc/html/latest/userspace-api/media/cec/cec-api.html).
 *
 * The bridge opens a kernel CEC adapter (`/dev/cecX`), follows the bus to
 * track whether the display is on and which HDMI input is active, answers
 * power-status queries, and can announce any configured input as the active
 * source on request. State changes are pushed to a [StateObserver]; commands
 * come in through a [BridgeHandle].
 *
 * ```no_run
 * # use cec_bridge::{BridgeConfig, CecBridge, StateObserver};
 * # use tokio_util::sync::CancellationToken;
 * struct Printer;
 * impl StateObserver for Printer {
 *     fn on_power_changed(&mut self, on: bool) { println!("power: {on}"); }
 *     fn on_source_changed(&mut self, source: Option<&str>) { println!("source: {source:?}"); }
 * }
 *
 * # async fn demo() {
 * let (bridge, handle) = CecBridge::new(BridgeConfig::default(), Printer);
 * let shutdown = CancellationToken::new();
 * tokio::spawn(bridge.run(shutdown.clone()));
 * handle.select_source("HDMI 3").await;
 * # }
 * ```
 */
mod bridge;
mod device;
mod error;
mod frame;
mod state;
mod switch;
mod sys;
pub mod tokio;

pub use bridge::{BridgeConfig, BridgeHandle, CecBridge, Command};
pub use device::{CecDevice, CecEvent};
pub use error::{CecError, Result};
pub use frame::Frame;
pub use state::{Input, Power, StateObserver, UiCommand};
pub use switch::switch_source;
pub use sys::{
    phys_addr_string, CecEventLostMsgs, CecEventStateChange, CecLogAddrs, CecLogicalAddress,
    CecModeFollower, CecModeInitiator, CecMsg, CecOpcode, CecPowerStatus, CecUserControlCode,
    OSDStr, RxStatus, TxStatus, CEC_LOG_ADDR_INVALID, CEC_PHYS_ADDR_INVALID,
};
