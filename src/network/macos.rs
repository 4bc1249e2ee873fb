//! macOS backend. Interfaces are addressed by hardware port name ("AX88179A",
//! "Wi-Fi"); the BSD device (`en7`) is looked up whenever pf or netstat need it.

use std::net::Ipv4Addr;
use std::time::Duration;

use ipnet::Ipv4Net;
use tracing::{debug, info};

use crate::auth::Credential;
use crate::config::{AdapterConfig, Config};
use crate::error::ShareError;
use crate::network::command;
use crate::network::executor::{Elevation, PrivilegedExecutor};
use crate::network::script::{shell_quote, ConfigScript};
use crate::network::types::{NetworkInterface, SharingProbe, SharingResult};
use crate::network::NetworkBackend;

const NETWORKSETUP: &str = "/usr/sbin/networksetup";
const ADAPTER_DESCRIPTION: &str = "AX88179A USB Ethernet Adapter";
const WIFI_PORT: &str = "Wi-Fi";

const VIRTUAL_PREFIXES: &[&str] = &["utun", "ppp", "ipsec", "bridge", "lo", "gif", "stf", "awdl", "llw"];

/// One block of `networksetup -listallhardwareports`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwarePort {
    pub port: String,
    pub device: String,
    pub mac: Option<String>,
}

pub struct MacBackend {
    adapter: AdapterConfig,
    address: Ipv4Net,
    dns: Ipv4Addr,
    query_timeout: Duration,
    executor: PrivilegedExecutor,
}

impl MacBackend {
    pub fn new(config: &Config, executor: PrivilegedExecutor) -> Self {
        Self {
            adapter: config.adapter.clone(),
            address: config.network.static_address,
            dns: config.network.dns,
            query_timeout: config.query_timeout(),
            executor,
        }
    }

    async fn hardware_ports(&self) -> Vec<HardwarePort> {
        match command::stdout_of(NETWORKSETUP, &["-listallhardwareports"], self.query_timeout).await {
            Some(out) => parse_hardware_ports(&out),
            None => Vec::new(),
        }
    }

    /// BSD device for a port name; a name that is already a device passes through.
    async fn device_for(&self, name: &str) -> Option<String> {
        let ports = self.hardware_ports().await;
        if let Some(p) = ports.iter().find(|p| p.port == name) {
            return Some(p.device.clone());
        }
        ports.iter().find(|p| p.device == name).map(|p| p.device.clone())
    }

    async fn query(&self, program: &str, args: &[&str]) -> Option<String> {
        command::stdout_of(program, args, self.query_timeout).await
    }

    async fn run_script(&self, script: ConfigScript, credential: Option<&Credential>) -> SharingResult {
        self.executor
            .run(&script, credential)
            .await
            .into_sharing_result(self.executor.timeout())
    }
}

impl NetworkBackend for MacBackend {
    async fn detect_adapter(&self) -> Option<NetworkInterface> {
        let port = find_adapter_port(&self.hardware_ports().await, &self.adapter.name_patterns)?;
        info!("Detected RM-01 adapter {} ({})", port.port, port.device);
        Some(NetworkInterface::new(
            port.port,
            port.mac.unwrap_or_else(|| "N/A".into()),
            ADAPTER_DESCRIPTION,
        ))
    }

    async fn find_upstream_interface(&self, exclude: &str) -> Option<NetworkInterface> {
        let ports = self.hardware_ports().await;
        let excluded_device = ports
            .iter()
            .find(|p| p.port == exclude)
            .map(|p| p.device.as_str())
            .unwrap_or(exclude);

        if let Some(routes) = self.query("netstat", &["-rn", "-f", "inet"]).await {
            for device in parse_default_route_devices(&routes) {
                if device == excluded_device || VIRTUAL_PREFIXES.iter().any(|p| device.starts_with(p)) {
                    continue;
                }
                if let Some(port) = ports.iter().find(|p| p.device == device) {
                    return Some(NetworkInterface::new(
                        port.port.clone(),
                        port.mac.clone().unwrap_or_else(|| "N/A".into()),
                        "Upstream Network",
                    ));
                }
                debug!("Default route via {} has no hardware port", device);
            }
        }

        let wifi = ports.iter().find(|p| p.port == WIFI_PORT)?;
        debug!("No usable default route, falling back to {}", WIFI_PORT);
        Some(NetworkInterface::new(
            wifi.port.clone(),
            wifi.mac.clone().unwrap_or_else(|| "N/A".into()),
            WIFI_PORT,
        ))
    }

    async fn enable_sharing(
        &self,
        device: &NetworkInterface,
        upstream: &NetworkInterface,
        credential: Option<&Credential>,
    ) -> SharingResult {
        let Some(bsd_device) = self.device_for(&device.name).await else {
            return SharingResult::failed(ShareError::Other(format!(
                "Could not find device for interface: {}",
                device.name
            )));
        };
        let Some(inet_device) = self.device_for(&upstream.name).await else {
            return SharingResult::failed(ShareError::Other(format!(
                "Could not find device for interface: {}",
                upstream.name
            )));
        };
        let script = enable_script(&device.name, &bsd_device, &inet_device, self.address, self.dns);
        self.run_script(script, credential).await
    }

    async fn disable_sharing(
        &self,
        device: &NetworkInterface,
        _upstream: &NetworkInterface,
        credential: Option<&Credential>,
    ) -> SharingResult {
        let bsd_device = self.device_for(&device.name).await.unwrap_or_default();
        self.run_script(disable_script(&device.name, &bsd_device), credential)
            .await
    }

    async fn get_interface_stats(&self, name: &str) -> (u64, u64) {
        let Some(device) = self.device_for(name).await else {
            return (0, 0);
        };
        self.query("netstat", &["-I", device.as_str(), "-b"])
            .await
            .and_then(|out| parse_netstat_bytes(&out))
            .unwrap_or((0, 0))
    }

    async fn probe_sharing(&self, device: &NetworkInterface) -> SharingProbe {
        let bsd_device = self.device_for(&device.name).await.unwrap_or_default();
        let subnet = self.address.trunc().to_string();

        let mut nat_present = false;
        for (program, args) in [("sudo", &["-n", "pfctl", "-s", "nat"][..]), ("pfctl", &["-s", "nat"][..])] {
            if let Some(rules) = self.query(program, args).await {
                nat_present = pf_nat_listed(&rules, &bsd_device, &subnet);
                break;
            }
        }
        let forwarding_enabled = self
            .query("sysctl", &["-n", "net.inet.ip.forwarding"])
            .await
            .is_some_and(|v| v.trim() == "1");

        SharingProbe {
            nat_present,
            forwarding_enabled,
        }
    }

    async fn interface_address(&self, name: &str) -> Option<Ipv4Addr> {
        let device = self.device_for(name).await?;
        self.query("ipconfig", &["getifaddr", device.as_str()])
            .await?
            .trim()
            .parse()
            .ok()
    }

    fn needs_credential(&self) -> bool {
        self.executor.elevation() == Elevation::Sudo
    }
}

pub fn parse_hardware_ports(output: &str) -> Vec<HardwarePort> {
    type Partial = (String, Option<String>, Option<String>);

    // Ports without a device (VPN services, "Bluetooth PAN" on some
    // releases) cannot carry traffic and are dropped.
    fn flush(cur: Option<Partial>, ports: &mut Vec<HardwarePort>) {
        if let Some((port, Some(device), mac)) = cur {
            ports.push(HardwarePort { port, device, mac });
        }
    }

    let mut ports = Vec::new();
    let mut current: Option<Partial> = None;

    for line in output.lines().map(str::trim) {
        if let Some(port) = line.strip_prefix("Hardware Port:") {
            flush(current.take(), &mut ports);
            current = Some((port.trim().to_string(), None, None));
        } else if let Some(device) = line.strip_prefix("Device:") {
            if let Some(cur) = current.as_mut() {
                cur.1 = Some(device.trim().to_string());
            }
        } else if let Some(mac) = line.strip_prefix("Ethernet Address:") {
            if let Some(cur) = current.as_mut() {
                let mac = mac.trim();
                if !mac.is_empty() && mac != "N/A" {
                    cur.2 = Some(mac.to_string());
                }
            }
        }
    }
    flush(current, &mut ports);
    ports
}

pub fn find_adapter_port(ports: &[HardwarePort], patterns: &[String]) -> Option<HardwarePort> {
    ports
        .iter()
        .find(|p| {
            let port = p.port.to_lowercase();
            patterns.iter().any(|pat| port.contains(&pat.to_lowercase()))
        })
        .cloned()
}

/// Interfaces of the `default` rows of `netstat -rn`, in table order.
///
/// The Netif column moves depending on the macOS release (Refs/Use columns
/// come and go), so take the first non-numeric field after Flags.
pub fn parse_default_route_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.starts_with("default"))
        .filter_map(|line| {
            line.split_whitespace()
                .skip(3)
                .find(|f| f.chars().next().is_some_and(|c| c.is_ascii_alphabetic()))
                .map(str::to_string)
        })
        .collect()
}

/// `(Ibytes, Obytes)` from `netstat -I <dev> -b`, taken from the link-level row.
pub fn parse_netstat_bytes(output: &str) -> Option<(u64, u64)> {
    let rows: Vec<Vec<&str>> = output
        .lines()
        .skip(1)
        .map(|l| l.split_whitespace().collect::<Vec<_>>())
        .filter(|f| f.len() >= 10)
        .collect();
    let row = rows
        .iter()
        .find(|f| f[2].starts_with("<Link#"))
        .or_else(|| rows.first())?;
    Some((row[6].parse().ok()?, row[9].parse().ok()?))
}

fn pf_nat_listed(rules: &str, device: &str, subnet: &str) -> bool {
    let by_device = format!("from {}:network", device);
    rules.lines().any(|line| {
        line.contains("nat on")
            && ((!device.is_empty() && line.contains(&by_device)) || line.contains(subnet))
    })
}

/// Static address and DNS on the adapter's network service, forwarding on,
/// pf NAT out of the upstream device. pf's NAT table is flushed before the
/// rule is loaded, so re-running replaces rather than stacks.
pub fn enable_script(
    port: &str,
    device: &str,
    inet_device: &str,
    address: Ipv4Net,
    dns: Ipv4Addr,
) -> ConfigScript {
    ConfigScript::shell(format!(
        r#"#!/bin/bash
set -e

IFACE={port}
DEVICE={device}
INET_DEVICE={inet_device}
IP={ip}
MASK={mask}
DNS={dns}

if ! /usr/sbin/networksetup -listallnetworkservices | grep -qxF "$IFACE"; then
    /usr/sbin/networksetup -createnetworkservice "$IFACE" "$DEVICE"
fi

/usr/sbin/networksetup -setmanual "$IFACE" "$IP" "$MASK" "$IP"
/usr/sbin/networksetup -setdnsservers "$IFACE" "$DNS"

/usr/sbin/sysctl -w net.inet.ip.forwarding=1 > /dev/null

NAT_CONF=$(mktemp /tmp/rm01_nat.XXXXXX)
trap 'rm -f "$NAT_CONF"' EXIT
echo "nat on $INET_DEVICE from $DEVICE:network to any -> ($INET_DEVICE)" > "$NAT_CONF"

/sbin/pfctl -d 2>/dev/null || true
/sbin/pfctl -F nat 2>/dev/null || true
/sbin/pfctl -f "$NAT_CONF" -e 2>/dev/null

echo "Internet sharing enabled: $DEVICE -> $INET_DEVICE"
"#,
        port = shell_quote(port),
        device = shell_quote(device),
        inet_device = shell_quote(inet_device),
        ip = address.addr(),
        mask = address.netmask(),
        dns = dns,
    ))
}

/// Forwarding off, pf NAT flushed, DHCP restored, link bounced. Best effort.
pub fn disable_script(port: &str, device: &str) -> ConfigScript {
    ConfigScript::shell(format!(
        r#"#!/bin/bash

IFACE={port}
DEVICE={device}

/usr/sbin/sysctl -w net.inet.ip.forwarding=0 > /dev/null 2>&1 || true

/sbin/pfctl -d 2>/dev/null || true
/sbin/pfctl -F nat 2>/dev/null || true

/usr/sbin/networksetup -setdhcp "$IFACE" 2>/dev/null || true
/usr/sbin/networksetup -setdnsservers "$IFACE" empty 2>/dev/null || true

if [ -n "$DEVICE" ]; then
    /sbin/ifconfig "$DEVICE" down 2>/dev/null || true
    sleep 1
    /sbin/ifconfig "$DEVICE" up 2>/dev/null || true
fi

echo "Internet sharing disabled for: $IFACE"
exit 0
"#,
        port = shell_quote(port),
        device = shell_quote(device),
    ))
}
