use std::future::Future;
use std::net::Ipv4Addr;

use crate::auth::Credential;

pub mod command;
pub mod executor;
pub mod sampler;
pub mod script;
pub mod types;

// Backends are plain command builders and parsers, so every one of them
// compiles (and is tested) on any host.
#[cfg(any(target_os = "linux", test))]
pub mod linux;
#[cfg(any(target_os = "macos", test))]
pub mod macos;
#[cfg(any(target_os = "windows", test))]
pub mod windows;

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
compile_error!("rm01 supports Linux, macOS and Windows only");

pub use types::*;

/// Per-OS network plumbing: find the adapter and an upstream, toggle sharing
/// between them, read counters and the live sharing state.
///
/// Implementations never panic and never return `Err`; failures are folded
/// into `None`, `(0, 0)`, an all-false probe or a failed `SharingResult`.
pub trait NetworkBackend: Send + Sync + 'static {
    fn detect_adapter(&self) -> impl Future<Output = Option<NetworkInterface>> + Send;

    fn find_upstream_interface(
        &self,
        exclude: &str,
    ) -> impl Future<Output = Option<NetworkInterface>> + Send;

    fn enable_sharing(
        &self,
        device: &NetworkInterface,
        upstream: &NetworkInterface,
        credential: Option<&Credential>,
    ) -> impl Future<Output = SharingResult> + Send;

    fn disable_sharing(
        &self,
        device: &NetworkInterface,
        upstream: &NetworkInterface,
        credential: Option<&Credential>,
    ) -> impl Future<Output = SharingResult> + Send;

    /// Cumulative `(rx_bytes, tx_bytes)` as the computer sees them
    fn get_interface_stats(&self, name: &str) -> impl Future<Output = (u64, u64)> + Send;

    fn probe_sharing(&self, device: &NetworkInterface) -> impl Future<Output = SharingProbe> + Send;

    /// First IPv4 address currently on the interface
    fn interface_address(&self, _name: &str) -> impl Future<Output = Option<Ipv4Addr>> + Send {
        async { None }
    }

    /// Whether enable/disable need an administrator password
    fn needs_credential(&self) -> bool;
}

#[cfg(target_os = "linux")]
pub type NativeBackend = linux::LinuxBackend;
#[cfg(target_os = "macos")]
pub type NativeBackend = macos::MacBackend;
#[cfg(target_os = "windows")]
pub type NativeBackend = windows::WindowsBackend;
