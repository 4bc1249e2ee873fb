//! Windows backend. Interfaces are addressed by connection name
//! ("Ethernet 2"); sharing is Internet Connection Sharing driven through the
//! `HNetCfg.HNetShare` COM object from PowerShell.

use std::net::Ipv4Addr;
use std::time::Duration;

use ipnet::Ipv4Net;
use tracing::info;

use crate::auth::Credential;
use crate::config::{AdapterConfig, Config};
use crate::network::command;
use crate::network::executor::PrivilegedExecutor;
use crate::network::script::{ps_quote, ConfigScript};
use crate::network::types::{NetworkInterface, SharingProbe, SharingResult};
use crate::network::NetworkBackend;

const ADAPTER_DESCRIPTION: &str = "AX88179A USB Ethernet Adapter";

/// Substrings (lowercase) that mark a connection as virtual or VPN
const VIRTUAL_MARKERS: &[&str] = &[
    "vpn", "virtual", "tap", "tun", "vmware", "virtualbox", "loopback", "hyper-v",
];

const LIST_ADAPTERS: &str =
    r#"Get-NetAdapter | ForEach-Object { "{0}|{1}|{2}" -f $_.Name, $_.InterfaceDescription, $_.MacAddress }"#;

const LIST_DEFAULT_ROUTES: &str = r#"Get-NetRoute -AddressFamily IPv4 -DestinationPrefix '0.0.0.0/0' -ErrorAction SilentlyContinue | Sort-Object RouteMetric | ForEach-Object { $_.InterfaceAlias }"#;

/// Registry values ICS reads for the private side's address; without them it
/// forces 192.168.137.1 onto the adapter.
const ICS_PARAMETERS: &str = r"HKLM:\SYSTEM\CurrentControlSet\Services\SharedAccess\Parameters";

/// One `Get-NetAdapter` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterRow {
    pub name: String,
    pub description: String,
    pub mac: String,
}

pub struct WindowsBackend {
    adapter: AdapterConfig,
    address: Ipv4Net,
    dns: Ipv4Addr,
    query_timeout: Duration,
    executor: PrivilegedExecutor,
}

impl WindowsBackend {
    pub fn new(config: &Config, executor: PrivilegedExecutor) -> Self {
        Self {
            adapter: config.adapter.clone(),
            address: config.network.static_address,
            dns: config.network.dns,
            query_timeout: config.query_timeout(),
            executor,
        }
    }

    async fn powershell(&self, script: &str) -> Option<String> {
        command::stdout_of(
            "powershell",
            &["-NoProfile", "-NonInteractive", "-Command", script],
            self.query_timeout,
        )
        .await
    }

    async fn adapters(&self) -> Vec<AdapterRow> {
        self.powershell(LIST_ADAPTERS)
            .await
            .map(|out| parse_adapter_rows(&out))
            .unwrap_or_default()
    }

    async fn run_script(&self, script: ConfigScript, credential: Option<&Credential>) -> SharingResult {
        self.executor
            .run(&script, credential)
            .await
            .into_sharing_result(self.executor.timeout())
    }
}

impl NetworkBackend for WindowsBackend {
    async fn detect_adapter(&self) -> Option<NetworkInterface> {
        let row = self
            .adapters()
            .await
            .into_iter()
            .find(|row| is_target_adapter(row, &self.adapter.name_patterns))?;
        info!("Detected RM-01 adapter {} ({})", row.name, row.description);
        Some(NetworkInterface::new(row.name, row.mac, ADAPTER_DESCRIPTION))
    }

    async fn find_upstream_interface(&self, exclude: &str) -> Option<NetworkInterface> {
        let routes = self.powershell(LIST_DEFAULT_ROUTES).await?;
        let name = pick_upstream(routes.lines().map(str::trim), exclude)?;
        let mac = self
            .adapters()
            .await
            .into_iter()
            .find(|row| row.name == name)
            .map(|row| row.mac)
            .unwrap_or_else(|| "N/A".into());
        Some(NetworkInterface::new(name, mac, "Upstream Network"))
    }

    async fn enable_sharing(
        &self,
        device: &NetworkInterface,
        upstream: &NetworkInterface,
        credential: Option<&Credential>,
    ) -> SharingResult {
        let script = enable_script(&device.name, &upstream.name, self.address, self.dns);
        self.run_script(script, credential).await
    }

    async fn disable_sharing(
        &self,
        device: &NetworkInterface,
        upstream: &NetworkInterface,
        credential: Option<&Credential>,
    ) -> SharingResult {
        self.run_script(disable_script(&device.name, &upstream.name), credential)
            .await
    }

    async fn get_interface_stats(&self, name: &str) -> (u64, u64) {
        let query = format!(
            r#"Get-NetAdapterStatistics -Name {} | ForEach-Object {{ "{{0}} {{1}}" -f $_.ReceivedBytes, $_.SentBytes }}"#,
            ps_quote(name)
        );
        self.powershell(&query)
            .await
            .and_then(|out| parse_counters(&out))
            .unwrap_or((0, 0))
    }

    async fn probe_sharing(&self, device: &NetworkInterface) -> SharingProbe {
        self.powershell(&probe_script(&device.name))
            .await
            .map(|out| parse_probe(&out))
            .unwrap_or_default()
    }

    async fn interface_address(&self, name: &str) -> Option<Ipv4Addr> {
        let query = format!(
            "Get-NetIPAddress -InterfaceAlias {} -AddressFamily IPv4 -ErrorAction SilentlyContinue | Select-Object -First 1 -ExpandProperty IPAddress",
            ps_quote(name)
        );
        self.powershell(&query).await?.trim().parse().ok()
    }

    fn needs_credential(&self) -> bool {
        false
    }
}

pub fn parse_adapter_rows(output: &str) -> Vec<AdapterRow> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim().splitn(3, '|');
            let name = fields.next()?.trim();
            let description = fields.next()?.trim();
            let mac = fields.next()?.trim();
            if name.is_empty() {
                return None;
            }
            Some(AdapterRow {
                name: name.to_string(),
                description: description.to_string(),
                mac: normalize_mac(mac),
            })
        })
        .collect()
}

/// `C8-A3-62-7E-8D-4D` -> `c8:a3:62:7e:8d:4d`
fn normalize_mac(mac: &str) -> String {
    if mac.is_empty() {
        "N/A".into()
    } else {
        mac.replace('-', ":").to_lowercase()
    }
}

fn is_target_adapter(row: &AdapterRow, patterns: &[String]) -> bool {
    let haystack = format!("{} {}", row.name, row.description).to_lowercase();
    patterns.iter().any(|p| haystack.contains(&p.to_lowercase()))
}

/// First route alias that is neither `exclude` nor a virtual/VPN connection.
pub fn pick_upstream<'a>(aliases: impl Iterator<Item = &'a str>, exclude: &str) -> Option<String> {
    aliases
        .filter(|a| !a.is_empty() && *a != exclude)
        .find(|a| {
            let lower = a.to_lowercase();
            !VIRTUAL_MARKERS.iter().any(|m| lower.contains(m))
        })
        .map(str::to_string)
}

fn parse_counters(output: &str) -> Option<(u64, u64)> {
    let mut fields = output.split_whitespace();
    Some((fields.next()?.parse().ok()?, fields.next()?.parse().ok()?))
}

fn parse_probe(output: &str) -> SharingProbe {
    let lower = output.to_lowercase();
    SharingProbe {
        nat_present: lower.contains("nat=true"),
        forwarding_enabled: lower.contains("forwarding=true"),
    }
}

/// Shared PowerShell prelude: `Get-SharingConfig <name>` resolves a
/// connection name to its ICS configuration object.
fn ics_prelude() -> &'static str {
    r#"$share = New-Object -ComObject HNetCfg.HNetShare
function Get-SharingConfig([string]$name) {
    foreach ($conn in $share.EnumEveryConnection) {
        $props = $share.NetConnectionProps.Invoke($conn)
        if ($props.Name -eq $name) {
            return $share.INetSharingConfigurationForINetConnection.Invoke($conn)
        }
    }
    return $null
}
"#
}

fn probe_script(device: &str) -> String {
    format!(
        r#"{prelude}
$nat = $false
$forwarding = $false
foreach ($conn in $share.EnumEveryConnection) {{
    $props = $share.NetConnectionProps.Invoke($conn)
    $cfg = $share.INetSharingConfigurationForINetConnection.Invoke($conn)
    if ($cfg.SharingEnabled) {{
        if ($cfg.SharingConnectionType -eq 1 -and $props.Name -eq {device}) {{ $nat = $true }}
        if ($cfg.SharingConnectionType -eq 0) {{ $forwarding = $true }}
    }}
}}
"nat=$nat forwarding=$forwarding"
"#,
        prelude = ics_prelude(),
        device = ps_quote(device),
    )
}

/// ICS allows a single public/private pair, so any existing sharing is
/// switched off before the new pair is enabled.
pub fn enable_script(device: &str, upstream: &str, address: Ipv4Net, dns: Ipv4Addr) -> ConfigScript {
    ConfigScript::powershell(format!(
        r#"$ErrorActionPreference = 'Stop'
$Device = {device}
$Upstream = {upstream}

Set-ItemProperty -Path '{params}' -Name ScopeAddress -Value '{ip}'
Set-ItemProperty -Path '{params}' -Name StandaloneDhcpAddress -Value '{ip}'

{prelude}
foreach ($conn in $share.EnumEveryConnection) {{
    $cfg = $share.INetSharingConfigurationForINetConnection.Invoke($conn)
    if ($cfg.SharingEnabled) {{ $cfg.DisableSharing() }}
}}

$public = Get-SharingConfig $Upstream
if ($null -eq $public) {{ throw "Upstream connection not found: $Upstream" }}
$private = Get-SharingConfig $Device
if ($null -eq $private) {{ throw "RM-01 connection not found: $Device" }}

$public.EnableSharing(0)
$private.EnableSharing(1)

netsh interface ip set address name="$Device" source=static addr={ip} mask={mask} gateway=none | Out-Null
if ($LASTEXITCODE -ne 0) {{ throw "Failed to set static IP on $Device" }}
netsh interface ip set dns name="$Device" source=static addr={dns} | Out-Null

Write-Output "Internet sharing enabled: $Device -> $Upstream"
"#,
        device = ps_quote(device),
        upstream = ps_quote(upstream),
        params = ICS_PARAMETERS,
        prelude = ics_prelude(),
        ip = address.addr(),
        mask = address.netmask(),
        dns = dns,
    ))
}

/// Sharing off on both sides, DHCP back, adapter restarted. Best effort.
pub fn disable_script(device: &str, upstream: &str) -> ConfigScript {
    ConfigScript::powershell(format!(
        r#"$ErrorActionPreference = 'Continue'
$Device = {device}
$Upstream = {upstream}

{prelude}
foreach ($name in @($Device, $Upstream)) {{
    $cfg = Get-SharingConfig $name
    if ($null -ne $cfg -and $cfg.SharingEnabled) {{ $cfg.DisableSharing() }}
}}

netsh interface ip set address name="$Device" source=dhcp | Out-Null
netsh interface ip set dns name="$Device" source=dhcp | Out-Null
Restart-NetAdapter -Name $Device -Confirm:$false -ErrorAction SilentlyContinue

Write-Output "Internet sharing disabled for: $Device"
exit 0
"#,
        device = ps_quote(device),
        upstream = ps_quote(upstream),
        prelude = ics_prelude(),
    ))
}
