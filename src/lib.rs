//! # Evolution mount control over the AUX bus
//!
//! This crate speaks the AUX protocol of the "Evolution" family of
//! computerized alt-azimuth telescope mounts, tunneled through the TCP
//! transparent channel of the mount's WiFi bridge. It provides:
//!
//! - the frame codec and the catalogs of bus nodes and command codes
//!   ([`aux`]),
//! - a session engine that pumps commands, dispatches replies and
//!   materializes the mount state ([`session`]),
//! - pointing, rate guiding and closed-loop tracking of a moving target
//!   ([`motion`]),
//! - discovery of the mount on the local network ([`discover`]).
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use evoscope::Scope;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let address = evoscope::discover::discover(Duration::from_secs(30)).await?;
//! let scope = Scope::connect(address).await?;
//!
//! // angles are fractions of a full turn
//! scope.goto(30.0 / 360.0, 120.0 / 360.0).await?;
//! println!("battery: {:.2} V", scope.state().battery_voltage);
//! # Ok(())
//! # }
//! ```

pub mod angle;
pub mod aux;
pub mod discover;
pub mod motion;
pub mod session;
pub mod transport;

pub use crate::{
    aux::{CommandId, Message, TargetId},
    motion::TargetProvider,
    session::{Axis, Error, MountState, Scope},
};
