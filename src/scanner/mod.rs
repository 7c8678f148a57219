//! Advertisement sources.
//!
//! A source delivers [`RawAdvertisement`]s between `start` and `stop`. All
//! vendor interpretation happens downstream in [`crate::filter`], so the
//! backends here only translate whatever the radio stack reports.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::advertisement::RawAdvertisement;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// The backend did not acknowledge `stop` in time
    #[error("timed out stopping the scanner")]
    StopTimedOut,
}

/// Channel buffer size for delivered advertisements.
pub const ADVERTISEMENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Boxed future returned by [`AdvertisementSource`] methods.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ScanError>> + Send + 'a>>;

/// Something that can listen for advertisements in bounded windows.
pub trait AdvertisementSource: Send {
    /// Begin delivering advertisements on the returned channel.
    ///
    /// The channel closes once the source is stopped.
    fn start(&mut self) -> SourceFuture<'_, mpsc::Receiver<RawAdvertisement>>;

    /// Stop delivering. Must succeed when already stopped or never started.
    fn stop(&mut self) -> SourceFuture<'_, ()>;
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

/// Construct the advertisement source for `backend`. Nothing touches the radio until `start`.
pub fn open(backend: Backend) -> Box<dyn AdvertisementSource> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => Box::new(bluer::BluerSource::new()),
        #[cfg(feature = "hci")]
        Backend::Hci => Box::new(hci::HciSource::new(0)),
    }
}

/// Extract a 16-bit service identifier from a 128-bit UUID built on the
/// Bluetooth base UUID (`0000xxxx-0000-1000-8000-00805F9B34FB`).
pub fn uuid16_from_u128(uuid: u128) -> Option<u16> {
    const BASE: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;
    const LOW_96: u128 = (1 << 96) - 1;

    let short = uuid >> 96;
    ((uuid & LOW_96) == BASE && short <= u128::from(u16::MAX)).then_some(short as u16)
}
