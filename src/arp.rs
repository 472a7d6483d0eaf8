//! Hardware-address table lookups used by the resolver's fast path.

use crate::device::identity::HardwareAddress;
use std::collections::HashMap;
use std::net::IpAddr;
use std::process::Command;
use std::sync::RwLock;

/// Maps between MAC and IP addresses without touching the network.
///
/// Implementations may block (file reads, subprocesses); callers run them
/// off the async executor.
pub trait HardwareAddressLookup: Send + Sync {
    fn lookup_ip_by_mac(&self, mac: &HardwareAddress) -> Option<IpAddr>;
    fn lookup_mac_by_ip(&self, ip: IpAddr) -> Option<HardwareAddress>;
}

/// The operating system's neighbour table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemArpTable;

impl SystemArpTable {
    fn entries(&self) -> Vec<(IpAddr, HardwareAddress)> {
        if cfg!(target_os = "linux") {
            match std::fs::read_to_string("/proc/net/arp") {
                Ok(text) => return parse_proc_arp(&text),
                Err(e) => log::debug!(target: "pixelair::arp", "/proc/net/arp unreadable: {}", e),
            }
        }
        match Command::new("arp").arg("-a").output() {
            Ok(out) if out.status.success() => parse_arp_a(&String::from_utf8_lossy(&out.stdout)),
            Ok(out) => {
                log::debug!(target: "pixelair::arp", "arp -a exited with {}", out.status);
                Vec::new()
            }
            Err(e) => {
                log::debug!(target: "pixelair::arp", "arp -a failed: {}", e);
                Vec::new()
            }
        }
    }
}

impl HardwareAddressLookup for SystemArpTable {
    fn lookup_ip_by_mac(&self, mac: &HardwareAddress) -> Option<IpAddr> {
        self.entries().into_iter().find(|(_, m)| m == mac).map(|(ip, _)| ip)
    }

    fn lookup_mac_by_ip(&self, ip: IpAddr) -> Option<HardwareAddress> {
        self.entries().into_iter().find(|(i, _)| *i == ip).map(|(_, mac)| mac)
    }
}

/// Parse the Linux `/proc/net/arp` table, skipping incomplete entries.
pub fn parse_proc_arp(text: &str) -> Vec<(IpAddr, HardwareAddress)> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 || cols[2] == "0x0" {
                return None;
            }
            let ip = cols[0].parse().ok()?;
            let mac = parse_table_mac(cols[3])?;
            Some((ip, mac))
        })
        .collect()
}

/// Parse `arp -a` output in either the BSD/macOS form
/// (`? (192.168.1.5) at a:b:c:d:e:f on en0`) or the Windows form
/// (`192.168.1.5   aa-bb-cc-dd-ee-ff   dynamic`).
pub fn parse_arp_a(text: &str) -> Vec<(IpAddr, HardwareAddress)> {
    text.lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let ip = tokens
                .iter()
                .find_map(|t| t.trim_start_matches('(').trim_end_matches(')').parse::<IpAddr>().ok())?;
            let mac = tokens.iter().find_map(|t| parse_table_mac(t))?;
            Some((ip, mac))
        })
        .collect()
}

/// Broadcast and empty entries are ignored.
fn parse_table_mac(text: &str) -> Option<HardwareAddress> {
    HardwareAddress::parse_loose(text).filter(|mac| !mac.is_zero() && !mac.is_broadcast())
}

/// In-memory table for embedders that already know their neighbours.
#[derive(Debug, Default)]
pub struct StaticArpTable {
    entries: RwLock<HashMap<HardwareAddress, IpAddr>>,
}

impl StaticArpTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, mac: HardwareAddress, ip: IpAddr) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).insert(mac, ip);
    }

    pub fn remove(&self, mac: &HardwareAddress) -> Option<IpAddr> {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).remove(mac)
    }
}

impl HardwareAddressLookup for StaticArpTable {
    fn lookup_ip_by_mac(&self, mac: &HardwareAddress) -> Option<IpAddr> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).get(mac).copied()
    }

    fn lookup_mac_by_ip(&self, ip: IpAddr) -> Option<HardwareAddress> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(_, v)| **v == ip)
            .map(|(k, _)| *k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_arp() {
        let text = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         aa:bb:cc:dd:ee:ff     *        eth0
192.168.1.9      0x1         0x0         00:00:00:00:00:00     *        eth0
192.168.1.40     0x1         0x2         0c:8b:95:01:02:03     *        wlan0
";
        let entries = parse_proc_arp(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].0, "192.168.1.40".parse::<IpAddr>().unwrap());
        assert_eq!(entries[1].1.to_string(), "0c:8b:95:01:02:03");
    }

    #[test]
    fn test_parse_arp_a_variants() {
        let bsd = "? (192.168.1.5) at a:b:c:d:e:f on en0 ifscope [ethernet]\n\
                   ? (192.168.1.255) at ff:ff:ff:ff:ff:ff on en0 ifscope [ethernet]\n\
                   ? (192.168.1.7) at (incomplete) on en0 ifscope [ethernet]";
        let entries = parse_arp_a(bsd);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.to_string(), "0a:0b:0c:0d:0e:0f");

        let windows = "Interface: 192.168.1.2 --- 0xb\n  Internet Address      Physical Address      Type\n  192.168.1.40          0c-8b-95-01-02-03     dynamic";
        let entries = parse_arp_a(windows);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "192.168.1.40".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_static_table() {
        let table = StaticArpTable::new();
        let mac = HardwareAddress::parse("aa:bb:cc:dd:ee:ff").unwrap();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        assert_eq!(table.lookup_ip_by_mac(&mac), None);
        table.insert(mac, ip);
        assert_eq!(table.lookup_ip_by_mac(&mac), Some(ip));
        assert_eq!(table.lookup_mac_by_ip(ip), Some(mac));
        assert_eq!(table.remove(&mac), Some(ip));
        assert_eq!(table.lookup_mac_by_ip(ip), None);
    }
}
