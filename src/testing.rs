//! In-memory backend and prompt for state machine and sampler tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::{Credential, CredentialPrompt};
use crate::event::{EventBus, StateEvent};
use crate::network::types::{NetworkInterface, SharingProbe, SharingResult};
use crate::network::NetworkBackend;

pub fn adapter() -> NetworkInterface {
    NetworkInterface::new("enxc8a3627e8d4d", "c8:a3:62:7e:8d:4d", "AX88179 Gigabit Ethernet")
}

pub fn upstream() -> NetworkInterface {
    NetworkInterface::new("wlp2s0", "a4:c3:f0:11:22:33", "Upstream Network")
}

pub struct FakeBackend {
    pub adapter: Mutex<Option<NetworkInterface>>,
    pub upstream: Mutex<Option<NetworkInterface>>,
    pub probe: Mutex<SharingProbe>,
    pub needs_credential: AtomicBool,
    enable_results: Mutex<VecDeque<SharingResult>>,
    disable_results: Mutex<VecDeque<SharingResult>>,
    counters: Mutex<VecDeque<(u64, u64)>>,
    enable_delay: Mutex<Duration>,
    stats_delay: Mutex<Duration>,
    pub panic_on_enable: AtomicBool,
    pub enable_calls: AtomicUsize,
    pub disable_calls: AtomicUsize,
    /// Password each enable/disable call was handed
    pub credentials_seen: Mutex<Vec<Option<String>>>,
}

impl FakeBackend {
    /// Adapter and upstream present, every call succeeds
    pub fn new() -> Self {
        Self {
            adapter: Mutex::new(Some(adapter())),
            upstream: Mutex::new(Some(upstream())),
            probe: Mutex::new(SharingProbe::default()),
            needs_credential: AtomicBool::new(false),
            enable_results: Mutex::new(VecDeque::new()),
            disable_results: Mutex::new(VecDeque::new()),
            counters: Mutex::new(VecDeque::new()),
            enable_delay: Mutex::new(Duration::ZERO),
            stats_delay: Mutex::new(Duration::ZERO),
            panic_on_enable: AtomicBool::new(false),
            enable_calls: AtomicUsize::new(0),
            disable_calls: AtomicUsize::new(0),
            credentials_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn without_adapter(self) -> Self {
        *self.adapter.lock().unwrap() = None;
        self
    }

    pub fn without_upstream(self) -> Self {
        *self.upstream.lock().unwrap() = None;
        self
    }

    pub fn requiring_credential(self) -> Self {
        self.needs_credential.store(true, Ordering::SeqCst);
        self
    }

    pub fn queue_enable(&self, result: SharingResult) {
        self.enable_results.lock().unwrap().push_back(result);
    }

    pub fn queue_disable(&self, result: SharingResult) {
        self.disable_results.lock().unwrap().push_back(result);
    }

    /// Counter snapshots returned in order; the last one repeats.
    pub fn push_counters(&self, values: impl IntoIterator<Item = (u64, u64)>) {
        self.counters.lock().unwrap().extend(values);
    }

    pub fn set_enable_delay(&self, delay: Duration) {
        *self.enable_delay.lock().unwrap() = delay;
    }

    pub fn set_stats_delay(&self, delay: Duration) {
        *self.stats_delay.lock().unwrap() = delay;
    }

    pub fn set_probe(&self, nat_present: bool, forwarding_enabled: bool) {
        *self.probe.lock().unwrap() = SharingProbe {
            nat_present,
            forwarding_enabled,
        };
    }

    fn record_credential(&self, credential: Option<&Credential>) {
        self.credentials_seen
            .lock()
            .unwrap()
            .push(credential.map(|c| c.expose().to_string()));
    }
}

impl NetworkBackend for FakeBackend {
    async fn detect_adapter(&self) -> Option<NetworkInterface> {
        self.adapter.lock().unwrap().clone()
    }

    async fn find_upstream_interface(&self, exclude: &str) -> Option<NetworkInterface> {
        self.upstream
            .lock()
            .unwrap()
            .clone()
            .filter(|u| u.name != exclude)
    }

    async fn enable_sharing(
        &self,
        _device: &NetworkInterface,
        _upstream: &NetworkInterface,
        credential: Option<&Credential>,
    ) -> SharingResult {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        self.record_credential(credential);
        let delay = *self.enable_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on_enable.load(Ordering::SeqCst) {
            panic!("backend exploded");
        }
        let result = self.enable_results.lock().unwrap().pop_front();
        result.unwrap_or_else(SharingResult::ok)
    }

    async fn disable_sharing(
        &self,
        _device: &NetworkInterface,
        _upstream: &NetworkInterface,
        credential: Option<&Credential>,
    ) -> SharingResult {
        self.disable_calls.fetch_add(1, Ordering::SeqCst);
        self.record_credential(credential);
        let result = self.disable_results.lock().unwrap().pop_front();
        result.unwrap_or_else(SharingResult::ok)
    }

    async fn get_interface_stats(&self, _name: &str) -> (u64, u64) {
        let delay = *self.stats_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut counters = self.counters.lock().unwrap();
        if counters.len() > 1 {
            counters.pop_front().unwrap_or_default()
        } else {
            counters.front().copied().unwrap_or_default()
        }
    }

    async fn probe_sharing(&self, _device: &NetworkInterface) -> SharingProbe {
        *self.probe.lock().unwrap()
    }

    fn needs_credential(&self) -> bool {
        self.needs_credential.load(Ordering::SeqCst)
    }
}

/// Answers prompts from a script; `None` entries (or running out) mean the
/// user cancelled.
#[derive(Default)]
pub struct FakePrompt {
    answers: Mutex<VecDeque<Option<String>>>,
    pub calls: AtomicUsize,
}

impl FakePrompt {
    pub fn answering<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(|a| a.map(Into::into)).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CredentialPrompt for FakePrompt {
    async fn request(&self) -> Option<Credential> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answers.lock().unwrap().pop_front().flatten();
        answer.map(Credential::new)
    }
}

/// Subscribe a listener that records every event.
pub fn record(bus: &EventBus) -> Arc<Mutex<Vec<StateEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
    seen
}
