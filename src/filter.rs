//! Advertisement classification for Govee H5075 sensors.
//!
//! Two independent gates decide what an advertisement may touch:
//! - the vendor gate (address OUI) decides whether it is tracked at all;
//! - the sensor-update gate (service identifier) decides whether its
//!   manufacturer data carries a reading worth decoding.
//!
//! Manufacturer data layout when the sensor-update gate passes:
//!
//! | offset | size | content                                 |
//! |--------|------|-----------------------------------------|
//! | 0      | 2    | company identifier (0xEC88, little end) |
//! | 2      | 1    | unused                                  |
//! | 3      | 3    | packed temperature/humidity, big endian |
//! | 6      | 1    | battery percent                         |

use crate::advertisement::RawAdvertisement;
use crate::mac_address::MacAddress;
use log::debug;
use thiserror::Error;

/// Telink Semiconductor OUI, used by the Govee hygrometer family.
pub const GOVEE_OUI: [u8; 3] = [0xA4, 0xC1, 0x38];

/// 16-bit service identifier advertised alongside a sensor update.
pub const H5075_UPDATE_UUID16: u16 = 0xEC88;

/// Minimum manufacturer data length holding a complete update.
pub const MIN_PAYLOAD_LEN: usize = 7;

const READING_OFFSET: usize = 3;
const BATTERY_OFFSET: usize = 6;

/// Reasons a flagged sensor update could not be extracted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("manufacturer data too short: {len} bytes, need at least {MIN_PAYLOAD_LEN}")]
    PayloadTooShort { len: usize },
}

/// The sensor payload of one advertisement, still in encoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorUpdate {
    /// Broadcast name with the vendor's quoted suffix removed
    pub name: Option<String>,
    pub encoded_reading: u32,
    pub encoded_battery: u8,
}

/// What a tracked advertisement contributes to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub address: MacAddress,
    pub rssi: Option<i16>,
    pub update: Option<SensorUpdate>,
}

/// Cut a broadcast name at its first single quote.
///
/// Some firmware revisions append a quoted suffix to the local name.
pub fn strip_quote_suffix(name: &str) -> &str {
    name.split_once('\'').map_or(name, |(head, _)| head)
}

/// Pull the encoded reading and battery out of an H5075 advertisement.
///
/// Returns `Ok(None)` when the advertisement does not flag a sensor update.
pub fn extract_sensor_update(adv: &RawAdvertisement) -> Result<Option<SensorUpdate>, DecodeError> {
    if !adv.advertises_service(H5075_UPDATE_UUID16) {
        return Ok(None);
    }

    let data = &adv.manufacturer_data;
    if data.len() < MIN_PAYLOAD_LEN {
        return Err(DecodeError::PayloadTooShort { len: data.len() });
    }

    let encoded_reading = u32::from_be_bytes([
        0,
        data[READING_OFFSET],
        data[READING_OFFSET + 1],
        data[READING_OFFSET + 2],
    ]);

    Ok(Some(SensorUpdate {
        name: adv
            .name
            .as_deref()
            .map(|name| strip_quote_suffix(name).to_string()),
        encoded_reading,
        encoded_battery: data[BATTERY_OFFSET],
    }))
}

/// Classify an advertisement.
///
/// Returns `None` for devices outside the vendor OUI block; those must not
/// reach the registry. A malformed sensor payload is logged and dropped
/// while the signal strength is still kept.
pub fn classify(adv: &RawAdvertisement) -> Option<Observation> {
    if !adv.address.has_oui(GOVEE_OUI) {
        return None;
    }

    let update = match extract_sensor_update(adv) {
        Ok(update) => update,
        Err(e) => {
            debug!("{}: discarding sensor payload: {e}", adv.address);
            None
        }
    };

    Some(Observation {
        address: adv.address,
        rssi: adv.rssi,
        update,
    })
}
