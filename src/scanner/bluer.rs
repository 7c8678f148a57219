//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ merges advertisements into cached device properties and replays
//! every cached device when discovery restarts, so cached properties are
//! never reported as a reading. Sensor payload is only forwarded when a
//! `ManufacturerData` change arrives; with duplicate data enabled in the
//! discovery filter BlueZ signals one for every received advertisement.

use super::{
    ADVERTISEMENT_CHANNEL_BUFFER_SIZE, AdvertisementSource, ScanError, SourceFuture,
    uuid16_from_u128,
};
use crate::advertisement::RawAdvertisement;
use crate::mac_address::MacAddress;
use bluer::{
    Adapter, AdapterEvent, Address, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport, Session, Uuid,
};
use futures::stream::{BoxStream, SelectAll};
use futures::{StreamExt, pin_mut};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Discovery on the default adapter, restarted for every scan window.
#[derive(Default)]
pub struct BluerSource {
    session: Option<Session>,
    adapter: Option<Adapter>,
    task: Option<JoinHandle<()>>,
}

impl BluerSource {
    pub fn new() -> Self {
        Self::default()
    }

    async fn adapter(&mut self) -> Result<Adapter, ScanError> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }

        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;

        let filter = DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        };
        if let Err(e) = adapter.set_discovery_filter(filter).await {
            warn!("failed to set discovery filter: {e}");
        }

        self.session = Some(session);
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    async fn start_discovery(&mut self) -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
        self.halt();
        let adapter = self.adapter().await?;
        let events = adapter.discover_devices_with_changes().await?;
        let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

        // The task owns the discovery stream; dropping it ends discovery.
        self.task = Some(tokio::spawn(forward_changes(adapter, events, tx)));

        Ok(rx)
    }

    fn halt(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl AdvertisementSource for BluerSource {
    fn start(&mut self) -> SourceFuture<'_, mpsc::Receiver<RawAdvertisement>> {
        Box::pin(self.start_discovery())
    }

    fn stop(&mut self) -> SourceFuture<'_, ()> {
        self.halt();
        Box::pin(async { Ok(()) })
    }
}

impl Drop for BluerSource {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Property changes of every watched device, tagged with its address.
type DeviceChanges = SelectAll<BoxStream<'static, (Address, DeviceProperty)>>;

/// Forward discovery and property changes until discovery ends or the
/// receiver goes away.
async fn forward_changes(
    adapter: Adapter,
    events: impl futures::Stream<Item = AdapterEvent>,
    tx: mpsc::Sender<RawAdvertisement>,
) {
    pin_mut!(events);
    let mut known: HashMap<Address, KnownDevice> = HashMap::new();
    let mut changes = DeviceChanges::new();

    loop {
        let adv = tokio::select! {
            event = events.next() => {
                let address = match event {
                    Some(AdapterEvent::DeviceAdded(address)) => address,
                    Some(AdapterEvent::DeviceRemoved(address)) => {
                        // Its change stream has ended; watch it again if it returns.
                        known.remove(&address);
                        continue;
                    }
                    Some(_) => continue,
                    None => break,
                };
                if known.contains_key(&address) {
                    continue;
                }
                match watch_device(&adapter, address).await {
                    Ok((device, rssi, stream)) => {
                        let adv = device.signal(address.into(), rssi);
                        known.insert(address, device);
                        changes.push(stream);
                        adv
                    }
                    Err(e) => {
                        debug!("{address}: {e}");
                        continue;
                    }
                }
            }
            Some((address, property)) = changes.next() => {
                let Some(device) = known.get_mut(&address) else { continue };
                match device.apply(address.into(), property) {
                    Some(adv) => adv,
                    None => continue,
                }
            }
        };

        if tx.send(adv).await.is_err() {
            break;
        }
    }
}

/// Subscribe to `address`'s property changes and read what is stable about it.
async fn watch_device(
    adapter: &Adapter,
    address: Address,
) -> Result<(KnownDevice, Option<i16>, BoxStream<'static, (Address, DeviceProperty)>), ScanError> {
    let device = adapter.device(address)?;

    // Subscribe first so nothing arriving while the properties are read is missed.
    let stream = device
        .events()
        .await?
        .filter_map(move |event| {
            futures::future::ready(match event {
                DeviceEvent::PropertyChanged(property) => Some((address, property)),
                #[allow(unreachable_patterns)]
                _ => None,
            })
        })
        .boxed();

    let known = KnownDevice {
        name: device.name().await?,
        service_uuids: short_uuids(&device.uuids().await?.unwrap_or_default()),
    };
    Ok((known, device.rssi().await?, stream))
}

/// The slowly changing part of a device's advertisement.
#[derive(Debug, Default, Clone, PartialEq)]
struct KnownDevice {
    name: Option<String>,
    service_uuids: Vec<u16>,
}

impl KnownDevice {
    /// A signal-strength observation carrying no sensor payload.
    fn signal(&self, address: MacAddress, rssi: Option<i16>) -> RawAdvertisement {
        RawAdvertisement {
            address,
            name: self.name.clone(),
            rssi,
            ..Default::default()
        }
    }

    /// Fold one property change in, returning the advertisement it represents.
    fn apply(&mut self, address: MacAddress, property: DeviceProperty) -> Option<RawAdvertisement> {
        match property {
            DeviceProperty::ManufacturerData(data) => Some(RawAdvertisement {
                address,
                name: self.name.clone(),
                manufacturer_data: manufacturer_blob(&data),
                service_uuids: self.service_uuids.clone(),
                rssi: None,
            }),
            DeviceProperty::Rssi(rssi) => Some(self.signal(address, Some(rssi))),
            DeviceProperty::Name(name) => {
                self.name = Some(name);
                None
            }
            DeviceProperty::Uuids(uuids) => {
                self.service_uuids = short_uuids(&uuids);
                None
            }
            _ => None,
        }
    }
}

fn short_uuids(uuids: &HashSet<Uuid>) -> Vec<u16> {
    let mut short: Vec<u16> = uuids
        .iter()
        .filter_map(|uuid| uuid16_from_u128(uuid.as_u128()))
        .collect();
    short.sort_unstable();
    short
}

/// Rebuild the manufacturer data blob with its company identifier prefix.
fn manufacturer_blob(data: &HashMap<u16, Vec<u8>>) -> Vec<u8> {
    data.iter()
        .min_by_key(|(company, _)| **company)
        .map(|(company, payload)| {
            let mut blob = company.to_le_bytes().to_vec();
            blob.extend_from_slice(payload);
            blob
        })
        .unwrap_or_default()
}
