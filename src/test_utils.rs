use crate::advertisement::RawAdvertisement;
use crate::filter::H5075_UPDATE_UUID16;
use crate::mac_address::MacAddress;
use chrono::NaiveTime;

/// A stable in-family address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0xAA, 0xBB, 0xCC]);

/// A second in-family address.
pub const OTHER_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0x11, 0x22, 0x33]);

/// Manufacturer data as the H5075 sends it.
pub fn h5075_payload(encoded_reading: u32, battery: u8) -> Vec<u8> {
    let [_, hi, mid, lo] = encoded_reading.to_be_bytes();
    vec![0x88, 0xEC, 0x00, hi, mid, lo, battery, 0x00]
}

/// An advertisement carrying a sensor update and no signal strength.
pub fn h5075_advertisement(
    address: MacAddress,
    name: &str,
    encoded_reading: u32,
    battery: u8,
) -> RawAdvertisement {
    RawAdvertisement {
        address,
        name: Some(name.to_string()),
        manufacturer_data: h5075_payload(encoded_reading, battery),
        service_uuids: vec![H5075_UPDATE_UUID16],
        rssi: None,
    }
}

/// An advertisement that only reports signal strength.
pub fn rssi_advertisement(address: MacAddress, rssi: i16) -> RawAdvertisement {
    RawAdvertisement {
        address,
        rssi: Some(rssi),
        ..Default::default()
    }
}

pub fn hms(hour: u32, minute: u32, second: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, second).expect("valid time of day")
}
