use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, error, info, trace, warn};

use crate::auth::{Credential, CredentialPrompt};
use crate::config::Config;
use crate::error::{ShareError, ShareResult};
use crate::event::{EventBus, StateEvent};
use crate::network::sampler::SpeedSampler;
use crate::network::types::{format_rate, ConnectionStatus, NetworkInterface, RateSample};
use crate::network::NetworkBackend;

// ── Connection State ──────────────────────────────────────────────────

#[derive(Default)]
struct ConnectionState {
    status: ConnectionStatus,
    device: Option<NetworkInterface>,
    upstream: Option<NetworkInterface>,
    /// Cleared on auth failure and on shutdown
    credential: Option<Arc<Credential>>,
}

/// Holds the busy flag for one connect/disconnect; clears it on every exit path.
struct BusyGuard<'a> {
    busy: &'a AtomicBool,
    events: &'a EventBus,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
        self.events.emit(StateEvent::BusyChanged(false));
    }
}

// ── Application State ─────────────────────────────────────────────────

/// The connection state machine.
///
/// Intents (`connect`, `disconnect`, `refresh`) take `&self`; state sits
/// behind a mutex that is never held across an await, so observers can read
/// it while an intent is in flight.
pub struct App<B: NetworkBackend, P: CredentialPrompt> {
    backend: Arc<B>,
    prompt: P,
    events: Arc<EventBus>,
    state: Mutex<ConnectionState>,
    rate: Arc<Mutex<RateSample>>,
    busy: AtomicBool,
    sampler: Mutex<Option<SpeedSampler>>,
    sample_interval: Duration,
    stop_grace: Duration,
}

impl<B: NetworkBackend, P: CredentialPrompt> App<B, P> {
    pub fn new(backend: B, prompt: P, config: &Config) -> Self {
        Self {
            backend: Arc::new(backend),
            prompt,
            events: Arc::new(EventBus::new()),
            state: Mutex::new(ConnectionState::default()),
            rate: Arc::new(Mutex::new(RateSample::ZERO)),
            busy: AtomicBool::new(false),
            sampler: Mutex::new(None),
            sample_interval: config.sample_interval(),
            stop_grace: config.stop_grace(),
        }
    }

    // ── Observers ─────────────────────────────────────────────────────

    pub fn status(&self) -> ConnectionStatus {
        self.state().status
    }

    pub fn current_interface(&self) -> Option<NetworkInterface> {
        self.state().device.clone()
    }

    pub fn upstream_interface(&self) -> Option<NetworkInterface> {
        self.state().upstream.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn rate(&self) -> RateSample {
        *lock(&self.rate)
    }

    pub fn is_sampling(&self) -> bool {
        lock(&self.sampler).is_some()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    // ── Intents ───────────────────────────────────────────────────────

    /// Detect, prompt if needed, enable sharing, start sampling.
    ///
    /// `Err(Busy)` means another connect/disconnect is running and nothing
    /// happened. Every other error has already been published as an event
    /// (except `UserCancelled`, which is silent).
    pub async fn connect(&self) -> ShareResult<()> {
        let Some(_busy) = self.begin() else {
            debug!("connect ignored: operation already in progress");
            return Err(ShareError::Busy);
        };
        self.set_status(ConnectionStatus::Connecting);

        match AssertUnwindSafe(self.run_connect()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(self.fault(panic)),
        }
    }

    async fn run_connect(&self) -> ShareResult<()> {
        // Re-connecting from Connected: the old sampler must not outlive the
        // status it belongs to.
        self.stop_sampler().await;

        let Some(device) = self.backend.detect_adapter().await else {
            return Err(self.fail(ShareError::NoAdapter));
        };
        self.set_interfaces(Some(device.clone()), self.upstream_interface());

        let Some(upstream) = self.backend.find_upstream_interface(&device.name).await else {
            return Err(self.fail(ShareError::NoUpstream));
        };
        self.set_interfaces(Some(device.clone()), Some(upstream.clone()));
        info!("Sharing {} -> {}", upstream.name, device.name);

        let credential = match self.obtain_credential().await {
            Ok(c) => c,
            Err(e) => {
                info!("Connect cancelled at password prompt");
                self.set_status(ConnectionStatus::Idle);
                return Err(e);
            }
        };

        let result = self
            .backend
            .enable_sharing(&device, &upstream, credential.as_deref())
            .await;
        match result.into_error() {
            None => {
                self.set_status(ConnectionStatus::Connected);
                self.start_sampler(&device).await;
                Ok(())
            }
            Some(e) => Err(self.fail_operation(e)),
        }
    }

    /// Stop sampling, prompt if needed, tear sharing down, forget interfaces.
    pub async fn disconnect(&self) -> ShareResult<()> {
        let Some(_busy) = self.begin() else {
            debug!("disconnect ignored: operation already in progress");
            return Err(ShareError::Busy);
        };
        let previous = self.status();
        self.stop_sampler().await;

        match AssertUnwindSafe(self.run_disconnect(previous)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(self.fault(panic)),
        }
    }

    async fn run_disconnect(&self, previous: ConnectionStatus) -> ShareResult<()> {
        let (device, upstream) = {
            let state = self.state();
            (state.device.clone(), state.upstream.clone())
        };
        let (Some(device), Some(upstream)) = (device, upstream) else {
            debug!("No known interfaces, nothing to tear down");
            self.set_status(ConnectionStatus::Idle);
            return Ok(());
        };

        self.set_status(ConnectionStatus::Connecting);
        let credential = match self.obtain_credential().await {
            Ok(c) => c,
            Err(e) => {
                info!("Disconnect cancelled at password prompt");
                self.set_status(previous);
                if previous.is_connected() {
                    self.start_sampler(&device).await;
                }
                return Err(e);
            }
        };

        let result = self
            .backend
            .disable_sharing(&device, &upstream, credential.as_deref())
            .await;
        match result.into_error() {
            None => {
                self.set_interfaces(None, None);
                self.set_status(ConnectionStatus::Idle);
                info!("Sharing disabled for {}", device.name);
                Ok(())
            }
            Some(e) => Err(self.fail_operation(e)),
        }
    }

    /// Re-derive status from the live OS state. Skipped while an intent is
    /// running; never touches `busy`.
    pub async fn refresh(&self) -> ConnectionStatus {
        if self.is_busy() {
            debug!("refresh skipped: operation in progress");
            return self.status();
        }
        if let Err(panic) = AssertUnwindSafe(self.run_refresh()).catch_unwind().await {
            self.fault(panic);
        }
        self.status()
    }

    async fn run_refresh(&self) {
        let Some(device) = self.backend.detect_adapter().await else {
            self.stop_sampler().await;
            self.set_interfaces(None, None);
            self.set_status(ConnectionStatus::Idle);
            return;
        };

        let probe = self.backend.probe_sharing(&device).await;
        debug!("Probe for {}: {:?}", device.name, probe);
        match probe.status() {
            ConnectionStatus::Connected => {
                let upstream = self.backend.find_upstream_interface(&device.name).await;
                self.set_interfaces(Some(device.clone()), upstream);
                self.set_status(ConnectionStatus::Connected);
                self.start_sampler(&device).await;
            }
            ConnectionStatus::Failed => {
                self.stop_sampler().await;
                self.set_interfaces(Some(device), self.upstream_interface());
                warn!("NAT rule present but forwarding is off");
                self.set_status(ConnectionStatus::Failed);
                self.events
                    .emit(StateEvent::Error(ShareError::PartialConfiguration));
            }
            _ => {
                self.stop_sampler().await;
                self.set_interfaces(Some(device), self.upstream_interface());
                self.set_status(ConnectionStatus::Idle);
            }
        }
    }

    /// Seed the interfaces a previous run shared, so `disconnect` can tear
    /// them down. Status is left alone.
    pub fn assume_interfaces(&self, device: NetworkInterface, upstream: NetworkInterface) {
        self.set_interfaces(Some(device), Some(upstream));
    }

    /// Stop sampling and drop the cached credential.
    pub async fn shutdown(&self) {
        self.stop_sampler().await;
        self.state().credential = None;
        debug!("State machine shut down");
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        lock(&self.state)
    }

    fn begin(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.events.emit(StateEvent::BusyChanged(true));
        Some(BusyGuard {
            busy: &self.busy,
            events: &self.events,
        })
    }

    fn set_status(&self, status: ConnectionStatus) {
        let changed = {
            let mut state = self.state();
            let changed = state.status != status;
            state.status = status;
            changed
        };
        if changed {
            debug!("Status -> {}", status);
            self.events.emit(StateEvent::StatusChanged(status));
        }
    }

    fn set_interfaces(&self, device: Option<NetworkInterface>, upstream: Option<NetworkInterface>) {
        let changed = {
            let mut state = self.state();
            let changed = state.device != device || state.upstream != upstream;
            state.device = device.clone();
            state.upstream = upstream.clone();
            changed
        };
        if changed {
            self.events
                .emit(StateEvent::InterfaceChanged { device, upstream });
        }
    }

    /// Cached credential, or a fresh one from the prompt. `Ok(None)` when the
    /// backend needs none.
    async fn obtain_credential(&self) -> ShareResult<Option<Arc<Credential>>> {
        if !self.backend.needs_credential() {
            return Ok(None);
        }
        let cached = self.state().credential.clone();
        if cached.is_some() {
            return Ok(cached);
        }
        match self.prompt.request().await {
            Some(c) if !c.is_empty() => {
                let c = Arc::new(c);
                self.state().credential = Some(c.clone());
                Ok(Some(c))
            }
            _ => Err(ShareError::UserCancelled),
        }
    }

    /// Publish a failed enable/disable. Auth failures invalidate the cached
    /// credential so the next attempt prompts again.
    fn fail_operation(&self, e: ShareError) -> ShareError {
        if e.is_auth() {
            info!("Authentication rejected, discarding cached password");
            self.state().credential = None;
        }
        self.fail(e)
    }

    fn fail(&self, e: ShareError) -> ShareError {
        error!("{}", e);
        self.set_status(ConnectionStatus::Failed);
        self.events.emit(StateEvent::Error(e.clone()));
        e
    }

    fn fault(&self, panic: Box<dyn Any + Send>) -> ShareError {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unexpected internal error".into());
        self.fail(ShareError::Other(message))
    }

    async fn start_sampler(&self, device: &NetworkInterface) {
        let previous = {
            let mut slot = lock(&self.sampler);
            if slot.as_ref().is_some_and(|s| s.interface() == device.name) {
                return;
            }
            slot.take()
        };
        if let Some(old) = previous {
            old.stop().await;
        }

        let rate = self.rate.clone();
        let events = self.events.clone();
        let sampler = SpeedSampler::start(
            self.backend.clone(),
            device.name.clone(),
            self.sample_interval,
            self.stop_grace,
            move |sample| {
                trace!(
                    "up {} / down {}",
                    format_rate(sample.upload),
                    format_rate(sample.download)
                );
                *lock(&rate) = sample;
                events.emit(StateEvent::RateChanged(sample));
            },
        );
        // A concurrent start may have won the slot; dropping ours aborts it.
        let mut slot = lock(&self.sampler);
        if slot.is_none() {
            *slot = Some(sampler);
        }
    }

    async fn stop_sampler(&self) {
        let sampler = lock(&self.sampler).take();
        if let Some(sampler) = sampler {
            sampler.stop().await;
        }
        let was_moving = {
            let mut rate = lock(&self.rate);
            let was = *rate != RateSample::ZERO;
            *rate = RateSample::ZERO;
            was
        };
        if was_moving {
            self.events.emit(StateEvent::RateChanged(RateSample::ZERO));
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::types::SharingResult;
    use crate::testing::{self, record, FakeBackend, FakePrompt};
    use pretty_assertions::assert_eq;

    type TestApp = App<FakeBackend, Arc<FakePrompt>>;

    fn app(backend: FakeBackend, prompt: Arc<FakePrompt>) -> TestApp {
        App::new(backend, prompt, &Config::default())
    }

    fn no_prompt() -> Arc<FakePrompt> {
        Arc::new(FakePrompt::default())
    }

    fn statuses(events: &[StateEvent]) -> Vec<ConnectionStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                StateEvent::StatusChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn errors(events: &[StateEvent]) -> Vec<ShareError> {
        events
            .iter()
            .filter_map(|e| match e {
                StateEvent::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_connect_without_adapter_fails() {
        let app = app(FakeBackend::new().without_adapter(), no_prompt());
        let seen = record(app.events());

        assert_eq!(app.connect().await, Err(ShareError::NoAdapter));
        assert_eq!(app.status(), ConnectionStatus::Failed);
        assert!(!app.is_busy());
        assert!(!app.is_sampling());

        let seen = seen.lock().unwrap();
        assert_eq!(errors(&seen), vec![ShareError::NoAdapter]);
        assert_eq!(
            statuses(&seen),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Failed]
        );
        assert_eq!(seen.first(), Some(&StateEvent::BusyChanged(true)));
        assert_eq!(seen.last(), Some(&StateEvent::BusyChanged(false)));
    }

    #[tokio::test]
    async fn test_connect_without_upstream_fails() {
        let app = app(FakeBackend::new().without_upstream(), no_prompt());
        assert_eq!(app.connect().await, Err(ShareError::NoUpstream));
        assert_eq!(app.status(), ConnectionStatus::Failed);
        assert_eq!(app.current_interface(), Some(testing::adapter()));
        assert_eq!(app.backend().enable_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_then_disconnect() {
        let backend = FakeBackend::new();
        backend.push_counters([(1000, 1000), (1500, 1300)]);
        let app = app(backend, no_prompt());

        app.connect().await.unwrap();
        assert_eq!(app.status(), ConnectionStatus::Connected);
        assert_eq!(app.current_interface(), Some(testing::adapter()));
        assert_eq!(app.upstream_interface(), Some(testing::upstream()));
        assert!(app.is_sampling());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(app.rate(), RateSample { upload: 500.0, download: 300.0 });

        app.disconnect().await.unwrap();
        assert_eq!(app.status(), ConnectionStatus::Idle);
        assert_eq!(app.current_interface(), None);
        assert_eq!(app.upstream_interface(), None);
        assert!(!app.is_sampling());
        assert_eq!(app.rate(), RateSample::ZERO);
        assert_eq!(app.backend().disable_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_events_only_on_change() {
        let backend = FakeBackend::new();
        backend.set_probe(true, true);
        let app = app(backend, no_prompt());
        let seen = record(app.events());
        app.connect().await.unwrap();
        app.refresh().await;
        assert_eq!(
            statuses(&seen.lock().unwrap()),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
        );
        app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_intent_while_busy_is_a_no_op() {
        let backend = FakeBackend::new();
        backend.set_enable_delay(Duration::from_secs(1));
        let app = Arc::new(app(backend, no_prompt()));

        let first = {
            let app = app.clone();
            tokio::spawn(async move { app.connect().await })
        };
        while !app.is_busy() {
            tokio::task::yield_now().await;
        }

        let seen = record(app.events());
        assert_eq!(app.connect().await, Err(ShareError::Busy));
        assert_eq!(app.disconnect().await, Err(ShareError::Busy));
        assert!(seen.lock().unwrap().is_empty());

        first.await.unwrap().unwrap();
        assert_eq!(app.backend().enable_calls.load(Ordering::SeqCst), 1);
        assert_eq!(app.status(), ConnectionStatus::Connected);
        assert!(!app.is_busy());
        app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_skipped_while_busy() {
        let backend = FakeBackend::new();
        backend.set_enable_delay(Duration::from_secs(1));
        backend.set_probe(true, false);
        let app = Arc::new(app(backend, no_prompt()));

        let first = {
            let app = app.clone();
            tokio::spawn(async move { app.connect().await })
        };
        while !app.is_busy() {
            tokio::task::yield_now().await;
        }
        assert_eq!(app.refresh().await, ConnectionStatus::Connecting);

        first.await.unwrap().unwrap();
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancelled_prompt_returns_to_idle_silently() {
        let prompt = Arc::new(FakePrompt::answering([None::<String>]));
        let app = app(FakeBackend::new().requiring_credential(), prompt.clone());
        let seen = record(app.events());

        assert_eq!(app.connect().await, Err(ShareError::UserCancelled));
        assert_eq!(app.status(), ConnectionStatus::Idle);
        assert!(errors(&seen.lock().unwrap()).is_empty());
        assert_eq!(app.backend().enable_calls.load(Ordering::SeqCst), 0);
        assert_eq!(prompt.calls(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_discards_credential_and_reprompts() {
        let prompt = Arc::new(FakePrompt::answering([Some("wrong"), Some("right")]));
        let backend = FakeBackend::new().requiring_credential();
        backend.queue_enable(SharingResult::failed(ShareError::AuthFailure(
            "Sorry, try again.".into(),
        )));
        let app = app(backend, prompt.clone());

        let err = app.connect().await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(app.status(), ConnectionStatus::Failed);

        app.connect().await.unwrap();
        assert_eq!(app.status(), ConnectionStatus::Connected);
        assert_eq!(prompt.calls(), 2);

        // The accepted password is cached for the teardown.
        app.disconnect().await.unwrap();
        assert_eq!(prompt.calls(), 2);
        assert_eq!(
            *app.backend().credentials_seen.lock().unwrap(),
            vec![
                Some("wrong".to_string()),
                Some("right".to_string()),
                Some("right".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_non_auth_failure_keeps_credential() {
        let prompt = Arc::new(FakePrompt::answering([Some("pw")]));
        let backend = FakeBackend::new().requiring_credential();
        backend.queue_enable(SharingResult::failed(ShareError::Timeout("30s".into())));
        let app = app(backend, prompt.clone());

        assert_eq!(app.connect().await.unwrap_err().kind(), "Timeout");
        app.connect().await.unwrap();
        assert_eq!(prompt.calls(), 1);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_backend_becomes_failed() {
        let backend = FakeBackend::new();
        backend.panic_on_enable.store(true, Ordering::SeqCst);
        let app = app(backend, no_prompt());
        let seen = record(app.events());

        let err = app.connect().await.unwrap_err();
        assert_eq!(err, ShareError::Other("backend exploded".into()));
        assert_eq!(app.status(), ConnectionStatus::Failed);
        assert!(!app.is_busy());
        assert_eq!(errors(&seen.lock().unwrap()), vec![err]);
    }

    #[tokio::test]
    async fn test_disconnect_without_known_interfaces_is_idle() {
        let app = app(FakeBackend::new(), no_prompt());
        app.disconnect().await.unwrap();
        assert_eq!(app.status(), ConnectionStatus::Idle);
        assert_eq!(app.backend().disable_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnect_uses_assumed_interfaces() {
        let app = app(FakeBackend::new(), no_prompt());
        app.assume_interfaces(testing::adapter(), testing::upstream());
        assert_eq!(app.status(), ConnectionStatus::Idle);

        app.disconnect().await.unwrap();
        assert_eq!(app.backend().disable_calls.load(Ordering::SeqCst), 1);
        assert_eq!(app.current_interface(), None);
    }

    #[tokio::test]
    async fn test_cancelled_disconnect_restores_connected_and_sampler() {
        let prompt = Arc::new(FakePrompt::answering([None::<String>]));
        let app = app(FakeBackend::new(), prompt.clone());
        app.connect().await.unwrap();
        assert!(app.is_sampling());

        app.backend().needs_credential.store(true, Ordering::SeqCst);
        assert_eq!(app.disconnect().await, Err(ShareError::UserCancelled));
        assert_eq!(app.status(), ConnectionStatus::Connected);
        assert!(app.is_sampling());
        assert_eq!(app.current_interface(), Some(testing::adapter()));
        assert_eq!(app.backend().disable_calls.load(Ordering::SeqCst), 0);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_disconnect_is_failed() {
        let backend = FakeBackend::new();
        backend.queue_disable(SharingResult::failed(ShareError::Other("pfctl: busy".into())));
        let app = app(backend, no_prompt());
        app.connect().await.unwrap();

        assert_eq!(
            app.disconnect().await,
            Err(ShareError::Other("pfctl: busy".into()))
        );
        assert_eq!(app.status(), ConnectionStatus::Failed);
        assert!(!app.is_sampling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconnect_stops_sampler() {
        let backend = FakeBackend::new();
        backend.push_counters([(1000, 1000), (1500, 1300)]);
        let app = app(backend, no_prompt());
        app.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_ne!(app.rate(), RateSample::ZERO);

        app.backend()
            .queue_enable(SharingResult::failed(ShareError::Other("boom".into())));
        assert_eq!(app.connect().await, Err(ShareError::Other("boom".into())));
        assert_eq!(app.status(), ConnectionStatus::Failed);
        assert!(!app.is_sampling());
        assert_eq!(app.rate(), RateSample::ZERO);

        app.connect().await.unwrap();
        assert!(app.is_sampling());
        *app.backend().adapter.lock().unwrap() = None;
        assert_eq!(app.connect().await, Err(ShareError::NoAdapter));
        assert_eq!(app.status(), ConnectionStatus::Failed);
        assert!(!app.is_sampling());
    }

    #[tokio::test]
    async fn test_refresh_matrix() {
        let cases = [
            (true, true, ConnectionStatus::Connected),
            (true, false, ConnectionStatus::Failed),
            (false, true, ConnectionStatus::Idle),
            (false, false, ConnectionStatus::Idle),
        ];
        for (nat, fwd, expected) in cases {
            let backend = FakeBackend::new();
            backend.set_probe(nat, fwd);
            let app = app(backend, no_prompt());
            let seen = record(app.events());

            assert_eq!(app.refresh().await, expected, "nat={nat} fwd={fwd}");
            assert_eq!(app.is_sampling(), expected.is_connected());
            assert!(!app.is_busy());

            let partial = errors(&seen.lock().unwrap()) == vec![ShareError::PartialConfiguration];
            assert_eq!(partial, expected == ConnectionStatus::Failed);
            if expected.is_connected() {
                assert_eq!(app.upstream_interface(), Some(testing::upstream()));
            }
            app.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_refresh_without_adapter_stops_sampling() {
        let app = app(FakeBackend::new(), no_prompt());
        app.connect().await.unwrap();
        assert!(app.is_sampling());

        *app.backend().adapter.lock().unwrap() = None;
        assert_eq!(app.refresh().await, ConnectionStatus::Idle);
        assert!(!app.is_sampling());
        assert_eq!(app.current_interface(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_is_idempotent() {
        let backend = FakeBackend::new();
        backend.set_probe(true, true);
        let app = app(backend, no_prompt());
        let seen = record(app.events());

        app.refresh().await;
        let after_first = seen.lock().unwrap().len();
        app.refresh().await;
        assert_eq!(seen.lock().unwrap().len(), after_first);
        assert_eq!(app.status(), ConnectionStatus::Connected);
        app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_resets_rate_within_grace() {
        let backend = FakeBackend::new();
        backend.push_counters([(0, 0), (4096, 2048)]);
        let app = app(backend, no_prompt());
        app.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_ne!(app.rate(), RateSample::ZERO);

        let started = tokio::time::Instant::now();
        app.shutdown().await;
        assert!(started.elapsed() <= Duration::from_secs(2));
        assert_eq!(app.rate(), RateSample::ZERO);
        assert!(!app.is_sampling());
    }
}
