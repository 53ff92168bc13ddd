//! Liveness transport backed by the kernel neighbour table.
//!
//! A probe pokes every host of the interface's /24 with a one-byte UDP
//! datagram so the kernel resolves their macs, waits out the deadline, then
//! reads `/proc/net/arp`.

use async_trait::async_trait;
use if_addrs::{get_if_addrs, IfAddr};
use mac_address::MacAddress;
use netfleet_core::{format_mac, FleetError, LivenessTransport, Observation, Result};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

/// Narrower networks are not swept.
const MIN_PREFIX_LEN: u32 = 16;
const ATF_COMPLETE: u32 = 0x2;
const DISCARD_PORT: u16 = 9;

pub struct ArpTableProbe {
    arp_table: PathBuf,
}

impl Default for ArpTableProbe {
    fn default() -> Self {
        Self { arp_table: PathBuf::from("/proc/net/arp") }
    }
}

impl ArpTableProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Eligible IPv4 addresses by interface name.
    fn eligible() -> Result<BTreeMap<String, Ipv4Addr>> {
        let interfaces = get_if_addrs()?;
        let mut eligible = BTreeMap::new();
        for interface in interfaces {
            if interface.is_loopback() {
                continue;
            }
            let IfAddr::V4(v4) = &interface.addr else { continue };
            if u32::from(v4.netmask).count_ones() < MIN_PREFIX_LEN {
                continue;
            }
            eligible.entry(interface.name.clone()).or_insert(v4.ip);
        }
        Ok(eligible)
    }
}

/// Complete entries of `table` seen on `interface`.
pub fn parse_arp_table(table: &str, interface: &str) -> Vec<Observation> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [ip, _hw_type, flags, mac, _mask, device] = fields.as_slice() else {
                return None;
            };
            let flags = u32::from_str_radix(flags.trim_start_matches("0x"), 16).ok()?;
            if *device != interface || flags & ATF_COMPLETE == 0 {
                return None;
            }
            let mac = MacAddress::from_str(mac).ok()?;
            if mac.bytes() == [0; 6] {
                return None;
            }
            Some(Observation { mac: format_mac(&mac), ip: ip.to_string() })
        })
        .collect()
}

#[async_trait]
impl LivenessTransport for ArpTableProbe {
    async fn interfaces(&self) -> Result<Vec<String>> {
        Ok(Self::eligible()?.into_keys().collect())
    }

    async fn broadcast(&self, interface: &str) -> Result<()> {
        let ip = Self::eligible()?
            .remove(interface)
            .ok_or_else(|| FleetError::Transport(format!("interface {} has no usable address", interface)))?;
        let socket = UdpSocket::bind(SocketAddrV4::new(ip, 0)).await?;
        let [a, b, c, _] = ip.octets();
        let mut sent = 0;
        for host in 1..=254u8 {
            let target = Ipv4Addr::new(a, b, c, host);
            if target == ip {
                continue;
            }
            // unreachable hosts fail individually, that is the point
            if socket.send_to(&[0u8], SocketAddrV4::new(target, DISCARD_PORT)).await.is_ok() {
                sent += 1;
            }
        }
        debug!(%interface, sent, "liveness probe sent");
        Ok(())
    }

    async fn probe(&self, interface: &str, deadline: Duration) -> Result<Vec<Observation>> {
        tokio::time::sleep(deadline).await;
        let table = tokio::fs::read_to_string(&self.arp_table).await?;
        Ok(parse_arp_table(&table, interface))
    }
}
