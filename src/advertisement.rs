//! Raw advertisement records as delivered by a scanner backend.

use crate::mac_address::MacAddress;

/// One received BLE advertisement, before any vendor-specific interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawAdvertisement {
    /// Advertiser's hardware address
    pub address: MacAddress,
    /// Advertised local name, verbatim
    pub name: Option<String>,
    /// Manufacturer-specific data including the leading 16-bit company identifier
    pub manufacturer_data: Vec<u8>,
    /// Advertised 16-bit service identifiers
    pub service_uuids: Vec<u16>,
    /// Received signal strength in dBm; `None` or `Some(0)` when not reported
    pub rssi: Option<i16>,
}

impl RawAdvertisement {
    pub fn advertises_service(&self, uuid16: u16) -> bool {
        self.service_uuids.contains(&uuid16)
    }
}
