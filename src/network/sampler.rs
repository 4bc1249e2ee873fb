use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::network::types::RateSample;
use crate::network::NetworkBackend;

/// Rate between two counter snapshots.
///
/// The computer's RX is what the RM-01 sent, so it is reported as the
/// device's upload; TX becomes download. Counters that went backwards
/// (adapter reset, replug) count as zero.
pub fn compute_rate(prev: (u64, u64), cur: (u64, u64), elapsed: Duration) -> RateSample {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return RateSample::ZERO;
    }
    RateSample {
        upload: cur.0.saturating_sub(prev.0) as f64 / secs,
        download: cur.1.saturating_sub(prev.1) as f64 / secs,
    }
}

/// Polls one interface's byte counters on a fixed period and hands every
/// rate to a callback. Keeps no history.
pub struct SpeedSampler {
    interface: String,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    grace: Duration,
}

impl SpeedSampler {
    pub fn start<B, F>(
        backend: Arc<B>,
        interface: String,
        period: Duration,
        grace: Duration,
        on_sample: F,
    ) -> Self
    where
        B: NetworkBackend,
        F: Fn(RateSample) + Send + Sync + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let iface = interface.clone();

        let handle = tokio::spawn(async move {
            let mut prev = tokio::select! {
                biased;
                _ = stop_rx.changed() => return,
                cur = backend.get_interface_stats(&iface) => cur,
            };
            let mut prev_at = Instant::now();
            let mut ticker = tokio::time::interval_at(prev_at + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // A stop request interrupts both the wait and a slow counter read.
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                let cur = tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    cur = backend.get_interface_stats(&iface) => cur,
                };
                let now = Instant::now();
                on_sample(compute_rate(prev, cur, now - prev_at));
                prev = cur;
                prev_at = now;
            }
            debug!("Speed sampler for {} stopped", iface);
        });

        debug!("Speed sampler started for {}", interface);
        Self {
            interface,
            stop_tx,
            handle: Some(handle),
            grace,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Signal the task and wait for it, at most `grace`; past that it is aborted.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        match tokio::time::timeout(self.grace, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_panic() => warn!("Speed sampler for {} panicked", self.interface),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(
                    "Speed sampler for {} did not stop within {:?}, aborting",
                    self.interface, self.grace
                );
                handle.abort();
            }
        }
    }
}

impl Drop for SpeedSampler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
