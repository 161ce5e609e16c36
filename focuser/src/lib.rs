//! Drivers for Owlto-family motorized telescope focusers.
//!
//! The controllers speak one of three small ASCII protocols over a serial link.
//! This crate unifies them behind one [`FocuserSession`] parameterised by a
//! [`DeviceModel`]:
//!
//! - [`protocol`] - command encoding and response decoding per dialect
//! - [`transport`] - the byte-stream boundary (serial port, scripted loopback)
//! - [`session`] - handshake, moves, calibration, settings and polled state
//! - [`events`] / [`runner`] - notifications to and requests from a host
//! - [`config`] - JSON configuration under `~/.cf_config/`
//! - [`sim`] - a simulated controller for offline use and tests

pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod sim;
pub mod transport;

pub use config::FocuserConfig;
pub use error::{FocuserError, FocuserResult};
pub use events::{EventSink, FocuserEvent, NullSink};
pub use protocol::{Capabilities, Command, DeviceModel, Dialect};
pub use runner::{HostRequest, Runner};
pub use session::{FocusDirection, FocuserSession, FocuserStatus, PropertyState, SessionOptions};
pub use sim::SimulatedFocuser;
pub use transport::{LoopbackTransport, SerialTransport, Transport};
