//! Raw HCI socket backend.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, AdvertisementSource, ScanError, SourceFuture};
use crate::advertisement::RawAdvertisement;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use log::debug;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// AD types
const AD_TYPE_INCOMPLETE_UUID16: u8 = 0x02;
const AD_TYPE_COMPLETE_UUID16: u8 = 0x03;
const AD_TYPE_SHORT_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// RSSI value meaning "not available" in an advertising report.
const RSSI_UNAVAILABLE: i8 = 127;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// LE Set Scan Parameters: passive, 10ms interval and window, accept all.
fn scan_parameters_packet() -> Vec<u8> {
    let interval: u16 = 0x0010; // 10ms in 0.625ms units
    let window: u16 = 0x0010;

    let mut params = vec![LE_SCAN_PASSIVE];
    params.extend_from_slice(&interval.to_le_bytes());
    params.extend_from_slice(&window.to_le_bytes());
    params.push(LE_PUBLIC_ADDRESS);
    params.push(FILTER_POLICY_ACCEPT_ALL);
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params)
}

/// LE Set Scan Enable, never filtering duplicates.
fn scan_enable_packet(enable: bool) -> Vec<u8> {
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[u8::from(enable), 0x00])
}

fn os_error(context: &str) -> ScanError {
    ScanError::Bluetooth(format!("{context}: {}", io::Error::last_os_error()))
}

/// Open a raw HCI socket bound to device `dev_id`.
fn open_hci_socket(dev_id: u16) -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };
    if fd < 0 {
        return Err(os_error("Failed to create HCI socket"));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };
    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to bind HCI socket"));
    }

    Ok(fd)
}

/// Only let LE meta events through to `fd`.
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            0, // SOL_HCI
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to set HCI filter"));
    }
    Ok(())
}

fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to send HCI command"));
    }
    Ok(())
}

/// Walk the AD structures of one advertisement into `adv`.
fn parse_ad_structures(ad_data: &[u8], adv: &mut RawAdvertisement) {
    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        let value = &ad_data[offset + 2..offset + 1 + len];

        match ad_type {
            AD_TYPE_COMPLETE_NAME => {
                adv.name = Some(String::from_utf8_lossy(value).into_owned());
            }
            AD_TYPE_SHORT_NAME if adv.name.is_none() => {
                adv.name = Some(String::from_utf8_lossy(value).into_owned());
            }
            AD_TYPE_INCOMPLETE_UUID16 | AD_TYPE_COMPLETE_UUID16 => {
                adv.service_uuids.extend(
                    value
                        .chunks_exact(2)
                        .map(|pair| u16::from_le_bytes([pair[0], pair[1]])),
                );
            }
            AD_TYPE_MANUFACTURER_DATA if adv.manufacturer_data.is_empty() => {
                adv.manufacturer_data = value.to_vec();
            }
            _ => {}
        }

        offset += 1 + len;
    }
}

/// Length of the fixed fields of one report: event type, address type,
/// address, data length and RSSI.
const REPORT_FIXED_LEN: usize = 10;

/// Parse an LE advertising report event into advertisements, one per report.
///
/// `data` is the whole HCI packet, starting with the packet type byte. A
/// report that runs past the end of the packet ends parsing; the reports
/// before it are still returned.
fn parse_advertising_reports(data: &[u8]) -> Vec<RawAdvertisement> {
    // packet type, event code, parameter length, subevent, num_reports
    if data.len() < 5 || data[0] != HCI_EVENT_PKT || data[1] != EVT_LE_META_EVENT {
        return Vec::new();
    }
    if data[3] != EVT_LE_ADVERTISING_REPORT {
        return Vec::new();
    }

    let num_reports = usize::from(data[4]);
    let mut reports = Vec::with_capacity(num_reports);
    let mut rest = &data[5..];
    for _ in 0..num_reports {
        match parse_report(rest) {
            Some((adv, used)) => {
                reports.push(adv);
                rest = &rest[used..];
            }
            None => {
                debug!("truncated advertising report after {} of {num_reports}", reports.len());
                break;
            }
        }
    }
    reports
}

/// Parse one report from the front of `report`, returning it with the number
/// of bytes it occupied.
///
/// event_type(1) addr_type(1) addr(6) data_len(1) data(n) rssi(1)
fn parse_report(report: &[u8]) -> Option<(RawAdvertisement, usize)> {
    if report.len() < REPORT_FIXED_LEN {
        return None;
    }

    let mut addr = [0u8; 6];
    addr.copy_from_slice(&report[2..8]);
    addr.reverse(); // HCI uses little-endian address

    let data_len = usize::from(report[8]);
    let ad_data = report.get(9..9 + data_len)?;
    let raw_rssi = *report.get(9 + data_len)? as i8;

    let mut adv = RawAdvertisement {
        address: addr.into(),
        ..Default::default()
    };
    parse_ad_structures(ad_data, &mut adv);
    adv.rssi = (raw_rssi != RSSI_UNAVAILABLE).then_some(i16::from(raw_rssi));

    Some((adv, REPORT_FIXED_LEN + data_len))
}

/// Reads advertising reports from one raw socket into the channel.
async fn read_reports(fd: OwnedFd, tx: mpsc::Sender<RawAdvertisement>) {
    let async_fd = match AsyncFd::new(fd) {
        Ok(async_fd) => async_fd,
        Err(e) => {
            debug!("failed to register HCI socket: {e}");
            return;
        }
    };
    let mut buf = [0u8; 258]; // Max HCI event size

    loop {
        let mut guard = match async_fd.readable().await {
            Ok(guard) => guard,
            Err(_) => break,
        };

        // Drain all available packets before waiting again
        loop {
            let n = match guard.try_io(|inner| {
                let ret = unsafe {
                    libc::read(
                        inner.as_raw_fd(),
                        buf.as_mut_ptr() as *mut c_void,
                        buf.len(),
                    )
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            }) {
                Ok(Ok(n)) if n > 0 => n,
                Ok(Ok(_)) => break,  // EOF or empty read
                Ok(Err(_)) => break, // Read error
                Err(_) => break,     // WouldBlock - no more data
            };

            for adv in parse_advertising_reports(&buf[..n]) {
                if tx.send(adv).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Passive LE scanning on one HCI device.
pub struct HciSource {
    dev_id: u16,
    cmd_fd: Option<OwnedFd>,
    task: Option<JoinHandle<()>>,
}

impl HciSource {
    pub fn new(dev_id: u16) -> Self {
        Self {
            dev_id,
            cmd_fd: None,
            task: None,
        }
    }

    fn start_scan(&mut self) -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
        self.halt()?;

        let event_fd = open_hci_socket(self.dev_id)?;
        set_hci_filter(&event_fd)?;

        // Commands go through a separate socket
        let cmd_fd = open_hci_socket(self.dev_id)?;
        send_hci_command(&cmd_fd, &scan_parameters_packet())?;
        send_hci_command(&cmd_fd, &scan_enable_packet(true))?;

        let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);
        self.task = Some(tokio::spawn(read_reports(event_fd, tx)));
        self.cmd_fd = Some(cmd_fd);
        Ok(rx)
    }

    fn halt(&mut self) -> Result<(), ScanError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        match self.cmd_fd.take() {
            Some(cmd_fd) => send_hci_command(&cmd_fd, &scan_enable_packet(false)),
            None => Ok(()),
        }
    }
}

impl AdvertisementSource for HciSource {
    fn start(&mut self) -> SourceFuture<'_, mpsc::Receiver<RawAdvertisement>> {
        let result = self.start_scan();
        Box::pin(async move { result })
    }

    fn stop(&mut self) -> SourceFuture<'_, ()> {
        let result = self.halt();
        Box::pin(async move { result })
    }
}

impl Drop for HciSource {
    fn drop(&mut self) {
        let _ = self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H5075_ADDR: [u8; 6] = [0xCC, 0xBB, 0xAA, 0x38, 0xC1, 0xA4];
    const OTHER_ADDR: [u8; 6] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

    /// One report body: address as sent on the wire (little-endian).
    fn report(addr: [u8; 6], ad_data: &[u8], rssi: i8) -> Vec<u8> {
        let mut report = vec![0, 0]; // ADV_IND, public address
        report.extend_from_slice(&addr);
        report.push(ad_data.len() as u8);
        report.extend_from_slice(ad_data);
        report.push(rssi as u8);
        report
    }

    /// An LE advertising report event as read from the socket.
    fn event_packet(reports: &[Vec<u8>]) -> Vec<u8> {
        let mut packet = vec![HCI_EVENT_PKT, EVT_LE_META_EVENT, 0, EVT_LE_ADVERTISING_REPORT];
        packet.push(reports.len() as u8);
        for report in reports {
            packet.extend_from_slice(report);
        }
        packet[2] = (packet.len() - 3) as u8;
        packet
    }

    fn report_packet(ad_data: &[u8], rssi: i8) -> Vec<u8> {
        event_packet(&[report(H5075_ADDR, ad_data, rssi)])
    }

    fn h5075_ad_data() -> Vec<u8> {
        let mut ad = vec![0x02, 0x01, 0x06]; // flags
        ad.extend_from_slice(&[0x0D, AD_TYPE_COMPLETE_NAME]);
        ad.extend_from_slice(b"GVH5075_ABCD");
        ad.extend_from_slice(&[0x03, AD_TYPE_COMPLETE_UUID16, 0x88, 0xEC]);
        ad.extend_from_slice(&[0x09, AD_TYPE_MANUFACTURER_DATA, 0x88, 0xEC, 0x00, 0x03, 0x5A, 0x98, 0x64, 0x00]);
        ad
    }

    #[test]
    fn test_hci_filter_setup() {
        let mut filter = HciFilter::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_LE_META_EVENT);

        // HCI_EVENT_PKT (0x04) sets bit 4 in type_mask
        assert_eq!(filter.type_mask, 1 << HCI_EVENT_PKT);
        // EVT_LE_META_EVENT (0x3E = 62) sets bit 30 in event_mask[1]
        assert_eq!(filter.event_mask[1], 1 << (EVT_LE_META_EVENT % 32));
    }

    #[test]
    fn test_hci_command_packet() {
        let packet = scan_enable_packet(false);
        assert_eq!(packet, vec![HCI_COMMAND_PKT, 0x0C, 0x20, 0x02, 0x00, 0x00]);
        assert_eq!(scan_parameters_packet().len(), 4 + 7);
    }

    #[test]
    fn parses_h5075_report() {
        let reports = parse_advertising_reports(&report_packet(&h5075_ad_data(), -67));
        assert_eq!(reports.len(), 1);
        let adv = &reports[0];
        assert_eq!(adv.address.to_string(), "A4:C1:38:AA:BB:CC");
        assert_eq!(adv.name.as_deref(), Some("GVH5075_ABCD"));
        assert_eq!(adv.service_uuids, vec![0xEC88]);
        assert_eq!(adv.manufacturer_data, vec![0x88, 0xEC, 0x00, 0x03, 0x5A, 0x98, 0x64, 0x00]);
        assert_eq!(adv.rssi, Some(-67));
    }

    #[test]
    fn unavailable_rssi_is_none() {
        let reports = parse_advertising_reports(&report_packet(&[], RSSI_UNAVAILABLE));
        let adv = &reports[0];
        assert_eq!(adv.rssi, None);
        assert!(adv.manufacturer_data.is_empty());
    }

    #[test]
    fn truncated_report_is_ignored() {
        let mut packet = report_packet(&h5075_ad_data(), -50);
        packet.truncate(20);
        assert!(parse_advertising_reports(&packet).is_empty());
    }

    #[test]
    fn malformed_ad_length_stops_parsing() {
        let mut adv = RawAdvertisement::default();
        parse_ad_structures(&[0x03, AD_TYPE_COMPLETE_UUID16, 0x88, 0xEC, 0x09, 0xFF, 0x01], &mut adv);
        assert_eq!(adv.service_uuids, vec![0xEC88]);
        assert!(adv.manufacturer_data.is_empty());
    }

    #[test]
    fn other_events_are_ignored() {
        let mut packet = report_packet(&h5075_ad_data(), -50);
        packet[3] = 0x01; // connection complete
        assert!(parse_advertising_reports(&packet).is_empty());
    }

    #[test]
    fn every_report_in_an_event_is_parsed() {
        let packet = event_packet(&[
            report(OTHER_ADDR, &[0x02, 0x01, 0x06], -80),
            report(H5075_ADDR, &h5075_ad_data(), -61),
        ]);

        let reports = parse_advertising_reports(&packet);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].address.to_string(), "06:05:04:03:02:01");
        assert_eq!(reports[0].rssi, Some(-80));
        assert_eq!(reports[1].address.to_string(), "A4:C1:38:AA:BB:CC");
        assert_eq!(reports[1].service_uuids, vec![0xEC88]);
        assert_eq!(reports[1].manufacturer_data, vec![0x88, 0xEC, 0x00, 0x03, 0x5A, 0x98, 0x64, 0x00]);
        assert_eq!(reports[1].rssi, Some(-61));
    }

    #[test]
    fn reports_before_a_truncated_one_are_kept() {
        let mut packet = event_packet(&[
            report(H5075_ADDR, &h5075_ad_data(), -61),
            report(OTHER_ADDR, &[0x02, 0x01, 0x06], -80),
        ]);
        packet.truncate(packet.len() - 2);

        let reports = parse_advertising_reports(&packet);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].address.to_string(), "A4:C1:38:AA:BB:CC");
    }
}
