//! Per-device state accumulated across scan windows.
//!
//! Records are kept in first-seen order so table rows stay put from one
//! frame to the next. Nothing is ever evicted.

use crate::decoder::{Reading, decode_battery_percent};
use crate::filter::Observation;
use crate::mac_address::MacAddress;
use chrono::NaiveTime;
use log::debug;
use std::collections::HashMap;

/// Everything one decoded sensor payload produces. Replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorState {
    pub reading: Reading,
    pub battery_pct: u8,
    /// Local time of day the update was received
    pub updated_at: NaiveTime,
}

/// Latest known state of one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub address: MacAddress,
    /// Broadcast name from the most recent sensor update
    pub name: Option<String>,
    /// `None` until the first sensor update is decoded
    pub sensors: Option<SensorState>,
    /// Last non-zero signal strength in dBm
    pub rssi: Option<i16>,
}

impl DeviceRecord {
    pub fn new(address: MacAddress) -> Self {
        Self {
            address,
            name: None,
            sensors: None,
            rssi: None,
        }
    }
}

/// Insertion-ordered map from address to [`DeviceRecord`].
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: Vec<DeviceRecord>,
    index: HashMap<MacAddress, usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the record for `address`, appending an empty one if unseen.
    pub fn ensure(&mut self, address: MacAddress) -> &mut DeviceRecord {
        let slot = *self.index.entry(address).or_insert_with(|| {
            self.records.push(DeviceRecord::new(address));
            self.records.len() - 1
        });
        &mut self.records[slot]
    }

    /// Replace the sensor group of `address` with a fresh decode.
    ///
    /// A missing `name` keeps whatever name was stored before.
    pub fn apply_sensor_update(
        &mut self,
        address: MacAddress,
        name: Option<&str>,
        encoded_reading: u32,
        encoded_battery: u8,
        now: NaiveTime,
    ) {
        let state = SensorState {
            reading: Reading::decode(encoded_reading),
            battery_pct: decode_battery_percent(encoded_battery),
            updated_at: now,
        };

        let record = self.ensure(address);
        if let Some(name) = name {
            record.name = Some(name.to_string());
        }
        record.sensors = Some(state);

        debug!(
            "{} ({address}) - temperature {:.2}C / {:.2}F - humidity {:.2}% - battery {}%",
            record.name.as_deref().unwrap_or("?"),
            state.reading.temperature_c,
            state.reading.temperature_f,
            state.reading.humidity_pct,
            state.battery_pct,
        );
    }

    /// Store a signal strength reading. Zero means "not reported" and is ignored.
    pub fn apply_signal_strength(&mut self, address: MacAddress, rssi: Option<i16>) {
        let record = self.ensure(address);
        if let Some(rssi) = rssi.filter(|&value| value != 0) {
            record.rssi = Some(rssi);
            debug!("{address} - rssi {rssi}");
        }
    }

    /// Fold one classified advertisement into the registry.
    pub fn apply(&mut self, observation: &Observation, now: NaiveTime) {
        self.ensure(observation.address);

        if let Some(update) = &observation.update {
            self.apply_sensor_update(
                observation.address,
                update.name.as_deref(),
                update.encoded_reading,
                update.encoded_battery,
                now,
            );
        }

        self.apply_signal_strength(observation.address, observation.rssi);
    }

    /// All records in first-seen order.
    pub fn snapshot(&self) -> &[DeviceRecord] {
        &self.records
    }

    pub fn get(&self, address: &MacAddress) -> Option<&DeviceRecord> {
        self.index.get(address).map(|&slot| &self.records[slot])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::format_fixed;
    use crate::filter::classify;
    use crate::test_utils::{OTHER_MAC, TEST_MAC, h5075_advertisement, hms, rssi_advertisement};

    #[test]
    fn ensure_creates_empty_record_once() {
        let mut registry = DeviceRegistry::new();
        assert_eq!(*registry.ensure(TEST_MAC), DeviceRecord::new(TEST_MAC));
        registry.ensure(TEST_MAC);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn sensor_update_fills_whole_group() {
        let mut registry = DeviceRegistry::new();
        registry.apply_sensor_update(TEST_MAC, Some("GVH5075_ABCD"), 219_800, 87, hms(12, 30, 5));

        let record = registry.get(&TEST_MAC).unwrap();
        assert_eq!(record.name.as_deref(), Some("GVH5075_ABCD"));
        let sensors = record.sensors.unwrap();
        assert_eq!(format_fixed(sensors.reading.temperature_c), "21.98");
        assert_eq!(format_fixed(sensors.reading.temperature_f), "71.56");
        assert_eq!(format_fixed(sensors.reading.humidity_pct), "80.00");
        assert_eq!(sensors.battery_pct, 87);
        assert_eq!(sensors.updated_at, hms(12, 30, 5));
        assert_eq!(record.rssi, None);
    }

    #[test]
    fn sensor_update_is_idempotent() {
        let mut registry = DeviceRegistry::new();
        registry.apply_sensor_update(TEST_MAC, Some("GVH5075_ABCD"), 219_800, 87, hms(1, 2, 3));
        let first = registry.get(&TEST_MAC).cloned();
        registry.apply_sensor_update(TEST_MAC, Some("GVH5075_ABCD"), 219_800, 87, hms(1, 2, 3));
        assert_eq!(registry.get(&TEST_MAC).cloned(), first);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_name_keeps_previous_name() {
        let mut registry = DeviceRegistry::new();
        registry.apply_sensor_update(TEST_MAC, Some("GVH5075_ABCD"), 1, 1, hms(0, 0, 0));
        registry.apply_sensor_update(TEST_MAC, None, 2, 2, hms(0, 0, 1));
        let record = registry.get(&TEST_MAC).unwrap();
        assert_eq!(record.name.as_deref(), Some("GVH5075_ABCD"));
        assert_eq!(record.sensors.unwrap().battery_pct, 2);
    }

    #[test]
    fn zero_rssi_never_overwrites() {
        let mut registry = DeviceRegistry::new();
        registry.apply_signal_strength(TEST_MAC, Some(-64));
        registry.apply_signal_strength(TEST_MAC, Some(0));
        registry.apply_signal_strength(TEST_MAC, None);
        assert_eq!(registry.get(&TEST_MAC).unwrap().rssi, Some(-64));
    }

    #[test]
    fn rssi_only_advertisement_leaves_sensors_unset() {
        let mut registry = DeviceRegistry::new();
        let observation = classify(&rssi_advertisement(TEST_MAC, -80)).unwrap();
        registry.apply(&observation, hms(9, 0, 0));

        let record = registry.get(&TEST_MAC).unwrap();
        assert_eq!(record.rssi, Some(-80));
        assert_eq!(record.sensors, None);
        assert_eq!(record.name, None);
    }

    #[test]
    fn short_payload_never_touches_sensors() {
        let mut registry = DeviceRegistry::new();
        let good = classify(&h5075_advertisement(TEST_MAC, "GVH5075_ABCD", 219_800, 87)).unwrap();
        registry.apply(&good, hms(9, 0, 0));

        let mut short = h5075_advertisement(TEST_MAC, "GVH5075_OTHER", 1, 1);
        short.manufacturer_data.truncate(6);
        registry.apply(&classify(&short).unwrap(), hms(9, 0, 5));

        let record = registry.get(&TEST_MAC).unwrap();
        assert_eq!(record.name.as_deref(), Some("GVH5075_ABCD"));
        assert_eq!(record.sensors.unwrap().updated_at, hms(9, 0, 0));
    }

    #[test]
    fn snapshot_preserves_first_seen_order() {
        let mut registry = DeviceRegistry::new();
        registry.apply_signal_strength(OTHER_MAC, Some(-50));
        registry.apply_sensor_update(TEST_MAC, Some("B"), 1, 1, hms(0, 0, 0));
        registry.apply_sensor_update(OTHER_MAC, Some("A"), 2, 2, hms(0, 0, 1));
        registry.apply_signal_strength(TEST_MAC, Some(-40));

        let order: Vec<MacAddress> = registry.snapshot().iter().map(|r| r.address).collect();
        assert_eq!(order, vec![OTHER_MAC, TEST_MAC]);
    }
}
