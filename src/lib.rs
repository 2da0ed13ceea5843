//! Impersonate a "bump" BLE battery-charging controller in front of a real
//! Powerlab charger.
//!
//! The charger speaks a framed binary protocol over RS-232 at 19 200 baud;
//! the mobile companion app speaks a different framed protocol over a
//! NordicUART-style GATT service. This crate translates between the two on
//! the fly: it keeps a faithful model of the charger's options, presets and
//! status, gates which app commands are legal in which charger state, and
//! keeps the charger's presets synchronized with the user's battery
//! specification.
//!
//! The two transports are seams, not dependencies: the charger side is
//! anything implementing [`charger::ChargerLink`] (the [`charger::Powerlab`]
//! implementation drives a real serial port), and the app side is a
//! [`controller::NotifySink`] the embedding BLE layer provides. Inbound app
//! writes are fed to a [`controller::MessageHandler`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! struct LogSink;
//!
//! impl bumpemu::controller::NotifySink for LogSink {
//!     fn notify(&self, payload: &[u8]) {
//!         println!("notify: {}", hex::encode(payload));
//!     }
//! }
//!
//! let charger = bumpemu::charger::Powerlab::new(None);
//! let battery = bumpemu::controller::messages::Battery::from_yaml("battery.yml").unwrap();
//! let presets = [(bumpemu::controller::constants::ChargerOperation::Normal, 2)]
//!     .into_iter()
//!     .collect();
//! let emulator = bumpemu::controller::Emulator::new(
//!     Box::new(charger),
//!     Some(battery),
//!     presets,
//!     Duration::from_secs(1),
//!     Box::new(LogSink),
//! )
//! .unwrap();
//! let handler = bumpemu::controller::MessageHandler::new(emulator.clone());
//! // The BLE layer calls emulator.start_notify() and handler.append(..).
//! # let _ = handler;
//! ```

pub mod charger;
pub mod controller;
pub mod error;
pub mod ring_buffer;
pub mod util;

pub use error::{Error, Result, VerifyError};
