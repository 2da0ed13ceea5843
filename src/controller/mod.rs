//! The app side: frame codec, message types, and the session engine.

pub mod constants;
pub mod emulator;
pub mod message_handler;
pub mod messages;
pub mod serialize;
pub mod state_machine;

pub use emulator::{Emulator, NotifySink};
pub use message_handler::MessageHandler;
