//! The `status`, `detect`, `connect`, `disconnect` and `help` commands.
//!
//! Each returns the process exit code: 0 for success or a neutral outcome,
//! 1 for no adapter, no upstream, auth failure, cancellation or any other
//! failure.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info};

use super::i18n::Strings;
use super::output::Output;
use super::state_file;
use super::Command;
use crate::app::App;
use crate::auth::CredentialPrompt;
use crate::config::Config;
use crate::error::ShareError;
use crate::event::StateEvent;
use crate::network::types::{format_bytes, ConnectionStatus, NetworkInterface};
use crate::network::NetworkBackend;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

// ── JSON shapes ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatusReport<'a> {
    adapter: Option<&'a NetworkInterface>,
    /// "connected", "partial" or "not_connected"
    status: &'static str,
    upstream: Option<&'a NetworkInterface>,
    ip: Option<String>,
    rx_bytes: u64,
    tx_bytes: u64,
}

#[derive(Serialize)]
struct DetectReport<'a> {
    adapter: Option<&'a NetworkInterface>,
    upstream: Option<&'a NetworkInterface>,
}

// ── Runner ────────────────────────────────────────────────────────────

pub struct Runner<'a, B: NetworkBackend, P: CredentialPrompt> {
    app: &'a App<B, P>,
    text: &'static Strings,
    out: Output,
    state_file: PathBuf,
    static_address: String,
    json: bool,
}

impl<'a, B: NetworkBackend, P: CredentialPrompt> Runner<'a, B, P> {
    pub fn new(app: &'a App<B, P>, config: &Config, text: &'static Strings, out: Output, json: bool) -> Self {
        Self {
            app,
            text,
            out,
            state_file: config.state_file(),
            static_address: config.static_ip().to_string(),
            json,
        }
    }

    pub async fn run(&self, command: Command) -> i32 {
        debug!("Running {:?}", command);
        let code = match command {
            Command::Status => self.status().await,
            Command::Detect => self.detect().await,
            Command::Connect => self.connect().await,
            Command::Disconnect => self.disconnect().await,
            Command::Help => {
                self.help();
                EXIT_OK
            }
        };
        self.app.shutdown().await;
        code
    }

    // ── status ────────────────────────────────────────────────────────

    async fn status(&self) -> i32 {
        let status = self.app.refresh().await;
        let Some(device) = self.app.current_interface() else {
            if self.json {
                self.print_json(&StatusReport {
                    adapter: None,
                    status: "not_connected",
                    upstream: None,
                    ip: None,
                    rx_bytes: 0,
                    tx_bytes: 0,
                });
            } else {
                self.out.error(self.text.no_adapter);
                self.out.info(self.text.please_connect);
            }
            return EXIT_FAILURE;
        };

        let upstream = if status.is_connected() {
            self.app.upstream_interface()
        } else {
            None
        };
        let backend = self.app.backend();
        let ip = backend.interface_address(&device.name).await;
        let (rx, tx) = backend.get_interface_stats(&device.name).await;

        if self.json {
            self.print_json(&StatusReport {
                adapter: Some(&device),
                status: match status {
                    ConnectionStatus::Connected => "connected",
                    ConnectionStatus::Failed => "partial",
                    _ => "not_connected",
                },
                upstream: upstream.as_ref(),
                ip: ip.map(|a| a.to_string()),
                rx_bytes: rx,
                tx_bytes: tx,
            });
            return EXIT_OK;
        }

        let t = self.text;
        self.out.header(t.header);
        self.out.section(t.adapter);
        println!("  {}: {}", t.name, device.name);
        println!("  {}: {}", t.mac, device.mac);
        println!("  {}: {}", t.kind, device.description);
        println!();

        match status {
            ConnectionStatus::Connected => self.out.status_line(t.status_label, t.connected, true),
            ConnectionStatus::Failed => {
                self.out.status_line(t.status_label, t.partially_connected, false);
                self.out.warning(t.ip_forwarding_disabled);
            }
            _ => self.out.status_line(t.status_label, t.not_connected, false),
        }
        if let Some(up) = &upstream {
            println!("  {}: {}", t.upstream, up.name);
        }
        if let Some(addr) = ip {
            println!("  IP: {}", addr);
        }
        println!("  {}: RX {} / TX {}", t.traffic, format_bytes(rx), format_bytes(tx));
        println!();
        EXIT_OK
    }

    // ── detect ────────────────────────────────────────────────────────

    async fn detect(&self) -> i32 {
        let t = self.text;
        if !self.json {
            self.out.header(t.header);
            self.out.info(t.scanning);
        }

        let backend = self.app.backend();
        let adapter = backend.detect_adapter().await;
        let upstream = match &adapter {
            Some(a) => backend.find_upstream_interface(&a.name).await,
            None => None,
        };

        if self.json {
            self.print_json(&DetectReport {
                adapter: adapter.as_ref(),
                upstream: upstream.as_ref(),
            });
            return if adapter.is_some() { EXIT_OK } else { EXIT_FAILURE };
        }

        let Some(adapter) = adapter else {
            println!();
            self.out.error(t.no_adapter);
            println!();
            self.out.section(t.troubleshooting);
            for (i, step) in t.troubleshooting_steps.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
            println!();
            return EXIT_FAILURE;
        };

        println!();
        self.out.success(t.adapter_found);
        println!();
        self.out.section(t.details);
        println!("  {}: {}", t.interface, adapter.name);
        println!("  {}: {}", t.mac, adapter.mac);
        println!("  {}: {}", t.chip, adapter.description);
        println!();
        match upstream {
            Some(up) => {
                self.out.section(t.upstream_network);
                println!("  {}: {}", t.interface, up.name);
            }
            None => self.out.warning(t.no_upstream),
        }
        println!();
        EXIT_OK
    }

    // ── connect ───────────────────────────────────────────────────────

    async fn connect(&self) -> i32 {
        let t = self.text;
        self.out.header(t.header);
        self.out.info(t.detecting_adapter);

        let out = self.out;
        let address = self.static_address.clone();
        // (adapter announced, upstream announced)
        let seen = Mutex::new((false, false));
        let sub = self.app.events().subscribe(move |event| {
            let StateEvent::InterfaceChanged { device, upstream } = event else {
                return;
            };
            let mut seen = seen.lock().unwrap_or_else(PoisonError::into_inner);
            if let (Some(d), false) = (device, seen.0) {
                out.success(&format!("{}: {}", t.found_adapter, d.name));
                seen.0 = true;
            }
            if let (Some(u), false) = (upstream, seen.1) {
                out.success(&format!("{}: {}", t.found_upstream, u.name));
                out.info(&format!("{} {}", t.setting_static_ip, address));
                out.info(t.configuring_network);
                seen.1 = true;
            }
        });

        let result = self.app.connect().await;
        self.app.events().unsubscribe(sub);

        match result {
            Ok(()) => {
                if let (Some(device), Some(upstream)) =
                    (self.app.current_interface(), self.app.upstream_interface())
                {
                    state_file::save(&self.state_file, &device.name, &upstream.name);
                }
                println!();
                self.out.success(t.sharing_enabled);
                self.out.highlight(t.rm01_can_access);
                println!();
                EXIT_OK
            }
            Err(e) => {
                info!("connect failed: {}", e.kind());
                self.report_connect_error(&e);
                EXIT_FAILURE
            }
        }
    }

    fn report_connect_error(&self, e: &ShareError) {
        let t = self.text;
        match e {
            ShareError::NoAdapter => {
                self.out.error(t.no_adapter);
                self.out.info(t.please_connect);
            }
            ShareError::NoUpstream => {
                self.out.error(t.no_upstream);
                self.out.info(t.ensure_internet);
            }
            ShareError::UserCancelled => self.out.warning(t.cancelled),
            ShareError::AuthFailure(_) => self.out.error(t.auth_failed),
            ShareError::Timeout(_) => self.out.error(t.timed_out),
            other => self.out.error(&format!("{}: {}", t.failed_to_enable, other)),
        }
    }

    // ── disconnect ────────────────────────────────────────────────────

    async fn disconnect(&self) -> i32 {
        let t = self.text;
        self.out.header(t.header);

        let Some((device, upstream)) = self.locate_shared().await else {
            self.out.info(t.no_active_connection);
            return EXIT_OK;
        };
        self.out.info(&format!("{} {}...", t.disconnecting, device.name));
        self.app.assume_interfaces(device, upstream);

        match self.app.disconnect().await {
            Ok(()) => {
                state_file::clear(&self.state_file);
                self.out.success(t.sharing_disabled);
                EXIT_OK
            }
            Err(ShareError::UserCancelled) => {
                self.out.warning(t.cancelled);
                EXIT_FAILURE
            }
            Err(e) if e.is_auth() => {
                self.out.error(t.auth_failed);
                EXIT_FAILURE
            }
            Err(e) => {
                self.out.error(&format!("{}: {}", t.failed_to_disable, e));
                EXIT_FAILURE
            }
        }
    }

    /// The pair a previous `connect` saved, or whatever is detectable now.
    async fn locate_shared(&self) -> Option<(NetworkInterface, NetworkInterface)> {
        if let Some(saved) = state_file::load(&self.state_file) {
            debug!("Using saved interfaces {} / {}", saved.device, saved.upstream);
            return Some((
                NetworkInterface::new(saved.device, "N/A", ""),
                NetworkInterface::new(saved.upstream, "N/A", ""),
            ));
        }
        let backend = self.app.backend();
        let device = backend.detect_adapter().await?;
        let upstream = backend.find_upstream_interface(&device.name).await?;
        Some((device, upstream))
    }

    // ── help ──────────────────────────────────────────────────────────

    fn help(&self) {
        let t = self.text;
        self.out.header(t.header);
        println!("Usage: rm01 [command] [options]\n");
        self.out.section(t.commands);
        for (name, desc) in [
            ("status", t.cmd_status),
            ("detect", t.cmd_detect),
            ("connect", t.cmd_connect),
            ("disconnect", t.cmd_disconnect),
            ("help", t.cmd_help),
        ] {
            println!("  {:<12}{}", name, desc);
        }
        println!();
        self.out.section(t.options);
        println!("  {:<24}{}", "-p, --password <PW>", t.opt_password);
        println!("  {:<24}{}", "-l, --lang <en|zh>", t.opt_lang);
        println!();
        self.out.section(t.examples);
        println!("  rm01 status");
        println!("  rm01 connect -p <password>");
        println!("  rm01 disconnect");
        println!("  rm01 status --lang zh");
        println!();
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => self.out.error(&e.to_string()),
        }
    }
}
