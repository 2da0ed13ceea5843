//! The Powerlab side: record images and the serial link.

pub mod options;
pub mod powerlab;
pub mod preset;
pub mod status;

pub use options::Options;
pub use powerlab::{retry, ChargerLink, Powerlab};
pub use preset::Preset;
pub use status::Status;
