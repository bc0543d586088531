//! ==============================================================================
//! transmitter.rs - the periodic sample-and-transmit loop
//! ==============================================================================
//!
//! purpose:
//!     owns the repeating timer and the loop state. one cycle = poll both
//!     sensors, fold the results into the snapshot, and, when a position
//!     fix was obtained, ship one record to the store.
//!
//!     phase transitions (attributes of the snapshot, not of the timer):
//!
//!         idle ──send──> sending ──accept──> success
//!                           │
//!                           └────reject────> error
//!
//! responsibilities:
//!     - immediate first cycle on start, then one per fixed period
//!     - start is idempotent: a second start supersedes the first timer
//!     - stop cancels the timer only; an in-flight cycle completes and
//!       still updates state
//!     - counters: poll_count once per completed cycle, success count only
//!       on confirmed remote acceptance
//!
//! relationships:
//!     - uses: sensors.rs (one reading + one power query per cycle)
//!     - uses: store.rs (send sub-cycle), domain.rs (state + record)
//!     - read by: main.rs status surface via snapshot()
//!
//! cycles are serialized: the loop task awaits each cycle before sleeping
//! for the next period, so a slow sensor or network call delays the next
//! tick instead of overlapping it.
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::domain::{LoopState, PowerState, Reading, TransmissionPhase, TransmissionRecord};
use crate::identity::DeviceIdentity;
use crate::sensors::SensorSource;
use crate::store::RecordSink;

/// cloneable handle to the loop; all clones share one state and one timer
pub struct Transmitter<S, K> {
    inner: Arc<Inner<S, K>>,
}

impl<S, K> Clone for Transmitter<S, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<S, K> {
    sensors: S,
    sink: K,
    identity: DeviceIdentity,
    period: Duration,
    position_granted: bool,
    /// single writer: the loop task. readers clone the snapshot.
    state: RwLock<LoopState>,
    /// shutdown signal of the currently scheduled timer task, if any
    task: Mutex<Option<Arc<Notify>>>,
}

impl<S, K> Transmitter<S, K>
where
    S: SensorSource,
    K: RecordSink,
{
    pub fn new(
        sensors: S,
        sink: K,
        identity: DeviceIdentity,
        period: Duration,
        position_granted: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sensors,
                sink,
                identity,
                period,
                position_granted,
                state: RwLock::new(LoopState::default()),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    pub fn period(&self) -> Duration {
        self.inner.period
    }

    pub fn position_granted(&self) -> bool {
        self.inner.position_granted
    }

    pub async fn snapshot(&self) -> LoopState {
        self.inner.state.read().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.task.lock().await.is_some()
    }

    /// start the repeating timer; runs one cycle immediately, then one per
    /// period. refuses to start without position permission. calling start
    /// again supersedes the previous timer without aborting a cycle it may
    /// have in flight.
    pub async fn start(&self) -> bool {
        if !self.inner.position_granted {
            tracing::warn!("position permission denied, transmit loop will not start");
            return false;
        }

        let mut slot = self.inner.task.lock().await;
        if let Some(previous) = slot.take() {
            previous.notify_one();
            tracing::debug!("superseding previously scheduled timer");
        }

        let shutdown = Arc::new(Notify::new());
        let task_shutdown = shutdown.clone();
        let this = self.clone();
        let period = self.inner.period;

        tokio::spawn(async move {
            loop {
                this.run_cycle().await;
                tokio::select! {
                    _ = task_shutdown.notified() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
            tracing::debug!("transmit loop stopped");
        });

        *slot = Some(shutdown);
        true
    }

    /// cancel the scheduled timer; no further cycles begin. a cycle already
    /// in flight completes and still updates state.
    pub async fn stop(&self) {
        if let Some(shutdown) = self.inner.task.lock().await.take() {
            shutdown.notify_one();
            tracing::info!("transmit loop stop requested");
        }
    }

    /// one poll-and-send cycle: both sensor queries run concurrently so a
    /// position timeout cannot hold up the battery reading
    async fn run_cycle(&self) {
        let inner = &self.inner;

        let (reading, power) = tokio::join!(
            inner.sensors.current_reading(),
            inner.sensors.current_power_state()
        );

        let reading = match reading {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!("no reading this cycle: {}", e);
                None
            }
        };
        let power = match power {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("battery query failed, using fallback: {}", e);
                PowerState::fallback()
            }
        };

        // the snapshot advances whether or not a fix was obtained
        {
            let mut state = inner.state.write().await;
            state.last_reading = reading.clone();
            state.last_power = Some(power.clone());
            state.last_update_at = Some(Utc::now());
            state.poll_count += 1;
        }

        if let Some(reading) = reading {
            if inner.position_granted {
                self.send(reading, &power).await;
            }
        }
    }

    /// send sub-cycle: at most one transmission is outstanding because the
    /// insert is awaited before the cycle ends
    async fn send(&self, reading: Reading, power: &PowerState) {
        let inner = &self.inner;

        inner.state.write().await.phase = TransmissionPhase::Sending;

        let record = TransmissionRecord::new(&inner.identity, &reading, power);
        match inner.sink.insert(record).await {
            Ok(()) => {
                let mut state = inner.state.write().await;
                state.phase = TransmissionPhase::Success;
                state.transmission_success_count += 1;
                state.last_transmission_error = None;
                tracing::info!(
                    "record accepted ({} transmitted so far)",
                    state.transmission_success_count
                );
            }
            Err(e) => {
                let mut state = inner.state.write().await;
                state.phase = TransmissionPhase::Error;
                state.last_transmission_error = Some(e.message.clone());
                tracing::warn!("transmission failed: {}", e);
            }
        }
    }
}
