//! # Kevinbot Command Link
//!
//! The remote's link to the robot: a line-oriented `key=value` text protocol
//! carried over an XBee serial radio.
//!
//! ## Features
//!
//! - **Command encoding**: motor pulse widths, LED colors, arm joint arrays and bare action words
//! - **Telemetry decoding**: battery, environment, motor temperature, tilt and remote-disable sentences
//! - **Safety interlocks**: automatic motor stop on low battery or hot motors, with per-session suppression
//! - **Background receive loop**: one reader thread, events published to the UI over a broadcast channel
//!
//! ## Quick Start
//!
//! ```rust
//! use kevinbot_link::{transport, CommandLink, Command, LinkConfig};
//! use std::time::Duration;
//!
//! let (writer, reader, robot) = transport::memory_pair(Duration::from_millis(10));
//! let link = CommandLink::new(LinkConfig::default(), writer);
//! link.start_receiver(reader).unwrap();
//!
//! link.send(&Command::arms([90, 90, 90, 180, 180, 90, 90, 90, 180, 180])).unwrap();
//! assert_eq!(robot.sent_lines(), ["arms=90,90,90,180,180,90,90,90,180,180"]);
//!
//! link.shutdown();
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - outbound command encoding
//! - [`telemetry`] - inbound sentence decoding and readout state
//! - [`safety`] - threshold checks and warning suppression
//! - [`transport`] - serial radio and in-memory connections
//! - [`link`] - the engine tying them together
//! - [`config`] - thresholds, delays and port settings

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod error;
pub mod link;
pub mod protocol;
pub mod safety;
pub mod telemetry;
pub mod transport;

pub use config::LinkConfig;
pub use error::{DecodeError, LinkError, TransportError};
pub use link::{CommandLink, LinkEvent, LinkState, ReceiverExit};
pub use protocol::{encode, encode_with_delay, Command, CommandValue};
pub use telemetry::{decode, Telemetry, TelemetryKey, TelemetryState};
