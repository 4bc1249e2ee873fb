//! Linux backend: sysfs for detection and counters, `ip`/`iptables`/`sysctl`
//! in a sudo-run bash script for configuration.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipnet::Ipv4Net;
use tokio::fs;
use tracing::{debug, info};

use crate::auth::Credential;
use crate::config::{AdapterConfig, Config};
use crate::network::command;
use crate::network::executor::{Elevation, PrivilegedExecutor};
use crate::network::script::{shell_quote, ConfigScript};
use crate::network::types::{NetworkInterface, SharingProbe, SharingResult};
use crate::network::NetworkBackend;

const SYSFS_NET: &str = "/sys/class/net";
const PROC_IP_FORWARD: &str = "/proc/sys/net/ipv4/ip_forward";
const ADAPTER_DESCRIPTION: &str = "AX88179 Gigabit Ethernet";

/// Never the RM-01 adapter
const SKIP_PREFIXES: &[&str] = &["lo", "docker", "br-", "veth", "virbr"];
/// Never an upstream
const VIRTUAL_PREFIXES: &[&str] = &["lo", "docker", "br-", "veth", "virbr", "tun", "tap", "wg"];

pub struct LinuxBackend {
    adapter: AdapterConfig,
    address: Ipv4Net,
    query_timeout: Duration,
    executor: PrivilegedExecutor,
    sysfs_root: PathBuf,
    ip_forward_path: PathBuf,
}

impl LinuxBackend {
    pub fn new(config: &Config, executor: PrivilegedExecutor) -> Self {
        Self::with_roots(config, executor, SYSFS_NET, PROC_IP_FORWARD)
    }

    /// Point detection and counters at another sysfs tree.
    pub fn with_roots(
        config: &Config,
        executor: PrivilegedExecutor,
        sysfs_root: impl Into<PathBuf>,
        ip_forward_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            adapter: config.adapter.clone(),
            address: config.network.static_address,
            query_timeout: config.query_timeout(),
            executor,
            sysfs_root: sysfs_root.into(),
            ip_forward_path: ip_forward_path.into(),
        }
    }

    async fn list_interfaces(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&self.sysfs_root).await {
            Ok(e) => e,
            Err(e) => {
                debug!("Cannot list {}: {}", self.sysfs_root.display(), e);
                return names;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        names.sort();
        names
    }

    async fn mac_address(&self, iface: &str) -> String {
        match fs::read_to_string(self.sysfs_root.join(iface).join("address")).await {
            Ok(mac) if !mac.trim().is_empty() => mac.trim().to_string(),
            _ => "N/A".to_string(),
        }
    }

    async fn read_counter(&self, iface: &str, stat: &str) -> Option<u64> {
        let path = self.sysfs_root.join(iface).join("statistics").join(stat);
        fs::read_to_string(&path).await.ok()?.trim().parse().ok()
    }

    /// Last-resort match for `enx<mac>` interfaces whose uevent is unreadable:
    /// accept when an ASIX AX88179 shows up on the USB bus.
    async fn usb_bus_has_adapter(&self) -> bool {
        let Some(out) = command::stdout_of("lsusb", &[], self.query_timeout).await else {
            return false;
        };
        let out = out.to_lowercase();
        let usb_id = format!("{}:", self.adapter.vendor_id.to_lowercase());
        out.lines().any(|line| {
            line.contains(&usb_id)
                && (self.adapter.product_ids.iter().any(|p| line.contains(&p.to_lowercase()))
                    || self
                        .adapter
                        .name_patterns
                        .iter()
                        .any(|p| line.contains(&p.to_lowercase())))
        })
    }

    async fn nat_rule_present(&self) -> bool {
        let network = self.address.trunc().addr().to_string();
        let listings = [
            ("sudo", vec!["-n", "iptables", "-t", "nat", "-L", "POSTROUTING", "-n"]),
            ("iptables", vec!["-t", "nat", "-L", "POSTROUTING", "-n"]),
        ];
        for (program, args) in listings {
            if let Some(out) = command::stdout_of(program, &args, self.query_timeout).await {
                return masquerade_listed(&out, &network);
            }
        }
        false
    }
}

impl NetworkBackend for LinuxBackend {
    async fn detect_adapter(&self) -> Option<NetworkInterface> {
        let mut enx_candidate = None;

        for iface in self.list_interfaces().await {
            if SKIP_PREFIXES.iter().any(|p| iface.starts_with(p)) {
                continue;
            }
            let device = self.sysfs_root.join(&iface).join("device");
            if !device.exists() {
                continue;
            }

            match fs::read_to_string(device.join("uevent")).await {
                Ok(uevent) if uevent_matches(&uevent, &self.adapter) => {
                    let mac = self.mac_address(&iface).await;
                    info!("Detected RM-01 adapter {} ({})", iface, mac);
                    return Some(NetworkInterface::new(iface, mac, ADAPTER_DESCRIPTION));
                }
                Ok(_) => {}
                Err(e) => debug!("Skipping {}: uevent unreadable ({})", iface, e),
            }

            if enx_candidate.is_none() && iface.starts_with("enx") {
                enx_candidate = Some(iface);
            }
        }

        let iface = enx_candidate?;
        if !self.usb_bus_has_adapter().await {
            return None;
        }
        let mac = self.mac_address(&iface).await;
        info!("Assuming {} is the RM-01 adapter (USB bus match)", iface);
        Some(NetworkInterface::new(iface, mac, ADAPTER_DESCRIPTION))
    }

    async fn find_upstream_interface(&self, exclude: &str) -> Option<NetworkInterface> {
        let routes = command::stdout_of("ip", &["route", "show", "default"], self.query_timeout).await?;
        let name = pick_upstream(&parse_default_routes(&routes), exclude, VIRTUAL_PREFIXES)?;
        let mac = self.mac_address(&name).await;
        Some(NetworkInterface::new(name, mac, "Upstream Network"))
    }

    async fn enable_sharing(
        &self,
        device: &NetworkInterface,
        upstream: &NetworkInterface,
        credential: Option<&Credential>,
    ) -> SharingResult {
        let script = enable_script(&device.name, &upstream.name, self.address);
        self.executor
            .run(&script, credential)
            .await
            .into_sharing_result(self.executor.timeout())
    }

    async fn disable_sharing(
        &self,
        device: &NetworkInterface,
        upstream: &NetworkInterface,
        credential: Option<&Credential>,
    ) -> SharingResult {
        let script = disable_script(&device.name, &upstream.name, self.address);
        self.executor
            .run(&script, credential)
            .await
            .into_sharing_result(self.executor.timeout())
    }

    async fn get_interface_stats(&self, name: &str) -> (u64, u64) {
        match (
            self.read_counter(name, "rx_bytes").await,
            self.read_counter(name, "tx_bytes").await,
        ) {
            (Some(rx), Some(tx)) => (rx, tx),
            _ => (0, 0),
        }
    }

    async fn probe_sharing(&self, _device: &NetworkInterface) -> SharingProbe {
        let forwarding_enabled = read_flag(&self.ip_forward_path).await;
        SharingProbe {
            nat_present: self.nat_rule_present().await,
            forwarding_enabled,
        }
    }

    async fn interface_address(&self, name: &str) -> Option<Ipv4Addr> {
        let out = command::stdout_of("ip", &["-4", "-o", "addr", "show", "dev", name], self.query_timeout).await?;
        parse_inet_address(&out)
    }

    fn needs_credential(&self) -> bool {
        self.executor.elevation() == Elevation::Sudo
    }
}

/// First `inet a.b.c.d/len` in `ip -4 -o addr` output
pub fn parse_inet_address(output: &str) -> Option<Ipv4Addr> {
    let mut words = output.split_whitespace();
    while let Some(w) = words.next() {
        if w == "inet" {
            return words.next()?.split('/').next()?.parse().ok();
        }
    }
    None
}

async fn read_flag(path: &Path) -> bool {
    fs::read_to_string(path)
        .await
        .map(|v| v.trim() == "1")
        .unwrap_or(false)
}

/// Does a `device/uevent` describe the ASIX adapter?
///
/// USB interfaces report `PRODUCT=<vendor>/<product>/<bcd>` in hex without
/// leading zeros; the driver name carries the chip.
pub fn uevent_matches(uevent: &str, adapter: &AdapterConfig) -> bool {
    let lower = uevent.to_lowercase();
    let vendor = adapter.vendor_id.trim_start_matches('0').to_lowercase();

    if lower.contains(&format!("vendor={}", adapter.vendor_id.to_lowercase())) {
        return true;
    }
    if adapter.name_patterns.iter().any(|p| lower.contains(&p.to_lowercase())) {
        return true;
    }
    lower.lines().any(|line| {
        let Some(value) = line.trim().strip_prefix("product=") else {
            return false;
        };
        let mut parts = value.split('/');
        let (Some(v), Some(p)) = (parts.next(), parts.next()) else {
            return false;
        };
        v.trim_start_matches('0') == vendor
            && adapter
                .product_ids
                .iter()
                .any(|id| id.trim_start_matches('0').eq_ignore_ascii_case(p.trim_start_matches('0')))
    })
}

/// Interface names of `ip route show default`, in table order.
pub fn parse_default_routes(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            while let Some(w) = words.next() {
                if w == "dev" {
                    return words.next().map(str::to_string);
                }
            }
            None
        })
        .collect()
}

/// First route interface that is neither `exclude` nor virtual.
pub fn pick_upstream(routes: &[String], exclude: &str, virtual_prefixes: &[&str]) -> Option<String> {
    routes
        .iter()
        .find(|name| {
            name.as_str() != exclude && !virtual_prefixes.iter().any(|p| name.starts_with(p))
        })
        .cloned()
}

fn masquerade_listed(listing: &str, network: &str) -> bool {
    listing
        .lines()
        .any(|line| line.contains("MASQUERADE") && line.contains(network))
}

/// Static address, forwarding on, NAT out of `upstream`. Every rule is
/// deleted before it is added so re-running never stacks duplicates.
pub fn enable_script(device: &str, upstream: &str, address: Ipv4Net) -> ConfigScript {
    let network = address.trunc();
    ConfigScript::shell(format!(
        r#"#!/bin/bash
set -e

DEVICE={device}
UPSTREAM={upstream}
ADDRESS={address}
NETWORK={network}

ip addr flush dev "$DEVICE" 2>/dev/null || true
ip addr add "$ADDRESS" dev "$DEVICE" 2>/dev/null || true
ip link set "$DEVICE" up

sysctl -w net.ipv4.ip_forward=1 > /dev/null

iptables -t nat -D POSTROUTING -o "$UPSTREAM" -s "$NETWORK" -j MASQUERADE 2>/dev/null || true
iptables -D FORWARD -i "$DEVICE" -o "$UPSTREAM" -j ACCEPT 2>/dev/null || true
iptables -D FORWARD -i "$UPSTREAM" -o "$DEVICE" -m state --state RELATED,ESTABLISHED -j ACCEPT 2>/dev/null || true

iptables -t nat -A POSTROUTING -o "$UPSTREAM" -s "$NETWORK" -j MASQUERADE
iptables -A FORWARD -i "$DEVICE" -o "$UPSTREAM" -j ACCEPT
iptables -A FORWARD -i "$UPSTREAM" -o "$DEVICE" -m state --state RELATED,ESTABLISHED -j ACCEPT

echo "Internet sharing enabled: $DEVICE -> $UPSTREAM"
"#,
        device = shell_quote(device),
        upstream = shell_quote(upstream),
        address = address,
        network = network,
    ))
}

/// Remove the rules, drop the static address and bounce the link so the
/// RM-01's DHCP hands out a fresh lease. Every step tolerates failure.
/// `ip_forward` is left alone; other services may rely on it.
pub fn disable_script(device: &str, upstream: &str, address: Ipv4Net) -> ConfigScript {
    let network = address.trunc();
    ConfigScript::shell(format!(
        r#"#!/bin/bash

DEVICE={device}
UPSTREAM={upstream}
NETWORK={network}

iptables -t nat -D POSTROUTING -o "$UPSTREAM" -s "$NETWORK" -j MASQUERADE 2>/dev/null || true
iptables -D FORWARD -i "$DEVICE" -o "$UPSTREAM" -j ACCEPT 2>/dev/null || true
iptables -D FORWARD -i "$UPSTREAM" -o "$DEVICE" -m state --state RELATED,ESTABLISHED -j ACCEPT 2>/dev/null || true

ip addr flush dev "$DEVICE" 2>/dev/null || true
ip link set "$DEVICE" down 2>/dev/null || true
sleep 1
ip link set "$DEVICE" up 2>/dev/null || true

if command -v dhclient > /dev/null 2>&1; then
    dhclient "$DEVICE" 2>/dev/null || true
elif command -v dhcpcd > /dev/null 2>&1; then
    dhcpcd "$DEVICE" 2>/dev/null || true
fi

echo "Internet sharing disabled for: $DEVICE"
exit 0
"#,
        device = shell_quote(device),
        upstream = shell_quote(upstream),
        network = network,
    ))
}
