//! `goveewatch` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, terminal setup and
//! process exit codes. The scan/render cycle lives in [`crate::app`] where it can
//! be tested deterministically with an injected advertisement source and an
//! in-memory display.

pub mod advertisement;
pub mod alias;
pub mod app;
pub mod config;
pub mod decoder;
pub mod display;
pub mod filter;
pub mod mac_address;
pub mod registry;
pub mod render;
pub mod scanner;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::RawAdvertisement;
pub use alias::{Alias, AliasTable};
pub use app::{Options, RunError, observe, run_with_io};
pub use config::{Config, ConfigError};
pub use decoder::Reading;
pub use display::{DisplayError, DisplaySink, GridBuffer, TerminalDisplay};
pub use filter::{DecodeError, Observation, classify};
pub use mac_address::MacAddress;
pub use registry::{DeviceRecord, DeviceRegistry};
pub use render::Renderer;
pub use scanner::{AdvertisementSource, Backend, ScanError};
