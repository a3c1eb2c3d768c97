//! Close-table flow controller.
//!
//! Owns the state machine that walks a table from "diners asked for the
//! bill" to "table paid": request the close against the backend, wait for
//! the waiter, receive the bill, collect the payment. Every timed step is a
//! tracked tokio task; tearing the controller down cancels all of them and
//! turns any continuation still in flight into a no-op.
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::api::CloseTableApi;

/// Shown when the backend rejects the close without giving a reason.
pub const DEFAULT_CLOSE_ERROR: &str = "Error closing table";

/// Where the close flow currently stands. `Paid` is terminal: a new flow
/// needs a fresh controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Requesting,
    Waiting,
    WaiterComing,
    BillReady,
    ProcessingPayment,
    Paid,
}

impl Phase {
    /// True for every phase between flow start and settlement.
    pub fn is_processing(self) -> bool {
        !matches!(self, Phase::Idle | Phase::Paid)
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Phase::Idle => "idle",
                Phase::Requesting => "requesting",
                Phase::Waiting => "waiting",
                Phase::WaiterComing => "waiter_coming",
                Phase::BillReady => "bill_ready",
                Phase::ProcessingPayment => "processing_payment",
                Phase::Paid => "paid",
            }
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentMethod {
    Card,
    Cash,
    /// Redirect checkout handled by the caller; confirming with it leaves
    /// the bill open.
    MercadoPago,
}

impl Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                PaymentMethod::Card => "card",
                PaymentMethod::Cash => "cash",
                PaymentMethod::MercadoPago => "mercadopago",
            }
        )
    }
}

/// Populated once, at the waiting -> waiter_coming transition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WaiterInfo {
    pub name: String,
    pub estimated_time_minutes: u8,
}

/// Timing and roster knobs. Two-element ranges are half-open [min, max)
/// milliseconds, sampled uniformly. Defaults match the shipped
/// `settings.toml`.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowConfig {
    pub submission_delay: Duration,
    pub waiter_delay_ms: (u64, u64),
    pub bill_delay_ms: (u64, u64),
    pub payment_delay: Duration,
    pub waiter_roster: Vec<String>,
    pub eta_minutes: Vec<u8>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            submission_delay: Duration::from_millis(1500),
            waiter_delay_ms: (2000, 4000),
            bill_delay_ms: (3000, 5000),
            payment_delay: Duration::from_millis(1500),
            waiter_roster: ["Carla", "Julián", "Marta", "Sofía", "Pedro"]
                .map(String::from)
                .to_vec(),
            eta_minutes: vec![1, 2],
        }
    }
}

/// Snapshot the UI reads on every frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowView {
    pub phase: Phase,
    pub waiter_name: String,
    pub estimated_time_minutes: u8,
    pub error_text: Option<String>,
    pub is_processing: bool,
}

struct FlowState {
    phase: Phase,
    waiter: WaiterInfo,
    error_text: Option<String>,
    /// Timer id driving the next automatic phase transition, if any.
    phase_timer: Option<u64>,
}

struct Shared {
    state: Mutex<FlowState>,
    /// Every scheduled task, by id. Entries remove themselves on normal
    /// completion; teardown aborts and drains whatever is left.
    timers: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_timer_id: AtomicU64,
    alive: AtomicBool,
    config: FlowConfig,
}

impl Shared {
    fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Cancels the pending phase timer, if one is still scheduled.
    fn cancel_phase_timer(&self) {
        let stale = self.state.lock().unwrap().phase_timer.take();
        if let Some(id) = stale {
            if let Some(handle) = self.timers.lock().unwrap().remove(&id) {
                handle.abort();
            }
        }
    }

    fn teardown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut timers = self.timers.lock().unwrap();
        let cancelled = timers.len();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        drop(timers);
        self.state.lock().unwrap().phase_timer = None;
        if cancelled > 0 {
            log::debug!("close flow torn down, {cancelled} timer(s) cancelled");
        }
    }

    fn pick_waiter(&self) -> WaiterInfo {
        let mut rng = rand::rng();
        let roster = &self.config.waiter_roster;
        let name = if roster.is_empty() {
            String::new()
        } else {
            roster[rng.random_range(0..roster.len())].clone()
        };
        let etas = &self.config.eta_minutes;
        let estimated_time_minutes = if etas.is_empty() {
            0
        } else {
            etas[rng.random_range(0..etas.len())]
        };
        WaiterInfo {
            name,
            estimated_time_minutes,
        }
    }
}

fn random_ms((lo, hi): (u64, u64)) -> Duration {
    let ms = if hi > lo {
        rand::rng().random_range(lo..hi)
    } else {
        lo
    };
    Duration::from_millis(ms)
}

/// Spawns a task and records its handle in the pending-timer set. The task
/// is gated on the insert so it can never run before it is bookkept, and it
/// removes its own entry when it completes normally.
fn spawn_tracked<F>(shared: &Arc<Shared>, fut: F) -> u64
where
    F: Future<Output = ()> + Send + 'static,
{
    let id = shared.next_timer_id.fetch_add(1, Ordering::Relaxed);
    let (registered_tx, registered_rx) = oneshot::channel::<()>();
    let task_shared = Arc::clone(shared);
    let handle = tokio::spawn(async move {
        let _ = registered_rx.await;
        fut.await;
        task_shared.timers.lock().unwrap().remove(&id);
    });
    shared.timers.lock().unwrap().insert(id, handle);
    let _ = registered_tx.send(());
    id
}

/// Sleeps through a tracked timer. Returns true only if the timer fired and
/// the controller is still alive; teardown aborts the timer, which resolves
/// this as false.
async fn tracked_delay(shared: &Arc<Shared>, dur: Duration) -> bool {
    let (done_tx, done_rx) = oneshot::channel::<()>();
    spawn_tracked(shared, async move {
        tokio::time::sleep(dur).await;
        let _ = done_tx.send(());
    });
    done_rx.await.is_ok() && shared.alive()
}

/// Entering `Waiting` schedules the waiter's arrival after a random delay.
fn schedule_waiter_arrival(shared: &Arc<Shared>) {
    shared.cancel_phase_timer();
    let dur = random_ms(shared.config.waiter_delay_ms);
    let task_shared = Arc::clone(shared);
    let id = spawn_tracked(shared, async move {
        tokio::time::sleep(dur).await;
        if !task_shared.alive() {
            return;
        }
        {
            let mut st = task_shared.state.lock().unwrap();
            if st.phase != Phase::Waiting {
                return;
            }
            st.waiter = task_shared.pick_waiter();
            st.phase = Phase::WaiterComing;
            st.phase_timer = None;
            log::info!(
                "{} is coming to the table, eta {} min",
                st.waiter.name,
                st.waiter.estimated_time_minutes
            );
        }
        schedule_bill_delivery(&task_shared);
    });
    shared.state.lock().unwrap().phase_timer = Some(id);
}

/// Entering `WaiterComing` schedules the bill landing on the table.
fn schedule_bill_delivery(shared: &Arc<Shared>) {
    shared.cancel_phase_timer();
    let dur = random_ms(shared.config.bill_delay_ms);
    let task_shared = Arc::clone(shared);
    let id = spawn_tracked(shared, async move {
        tokio::time::sleep(dur).await;
        if !task_shared.alive() {
            return;
        }
        let mut st = task_shared.state.lock().unwrap();
        if st.phase != Phase::WaiterComing {
            return;
        }
        st.phase = Phase::BillReady;
        st.phase_timer = None;
        log::info!("bill is on the table");
    });
    shared.state.lock().unwrap().phase_timer = Some(id);
}

/// Drives one close-table flow from `Idle` through to `Paid`.
///
/// State is owned here and only read by callers; clones share the same
/// underlying flow. The owner must call [`teardown`](Self::teardown) when
/// the session ends so pending timers are cancelled.
#[derive(Clone)]
pub struct CloseFlowController {
    api: Arc<dyn CloseTableApi>,
    shared: Arc<Shared>,
}

impl CloseFlowController {
    pub fn new(api: Arc<dyn CloseTableApi>, config: FlowConfig) -> Self {
        Self {
            api,
            shared: Arc::new(Shared {
                state: Mutex::new(FlowState {
                    phase: Phase::Idle,
                    waiter: WaiterInfo::default(),
                    error_text: None,
                    phase_timer: None,
                }),
                timers: Mutex::new(HashMap::new()),
                next_timer_id: AtomicU64::new(0),
                alive: AtomicBool::new(true),
                config,
            }),
        }
    }

    /// Starts the close flow. Legal from `Idle` only; a call from any other
    /// phase is refused and logged. Returns true once the backend accepted
    /// the close and the flow reached `Waiting`; false on backend failure
    /// (error text populated) or when the controller was torn down while the
    /// request was in flight (no state is touched in that case).
    pub async fn start_close_flow(&self) -> bool {
        {
            let mut st = self.shared.state.lock().unwrap();
            if st.phase != Phase::Idle {
                log::warn!("start_close_flow called in phase {}, refusing", st.phase);
                return false;
            }
            st.phase = Phase::Requesting;
            st.error_text = None;
        }
        log::info!("close flow started, submitting table close");
        if !tracked_delay(&self.shared, self.shared.config.submission_delay).await {
            return false;
        }
        let outcome = self.api.close_table().await;
        if !self.shared.alive() {
            // Session ended while the request was in flight; drop the result.
            return false;
        }
        match outcome {
            Ok(res) if res.success => {
                self.shared.state.lock().unwrap().phase = Phase::Waiting;
                log::info!("table close accepted, waiting for the waiter");
                schedule_waiter_arrival(&self.shared);
                true
            }
            Ok(res) => {
                let reason = res
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| DEFAULT_CLOSE_ERROR.to_string());
                self.fail_close(reason);
                false
            }
            Err(e) => {
                self.fail_close(e.to_string());
                false
            }
        }
    }

    fn fail_close(&self, reason: String) {
        log::warn!("close table request failed: {reason}");
        let mut st = self.shared.state.lock().unwrap();
        st.phase = Phase::Idle;
        st.error_text = Some(reason);
    }

    /// Confirms the payment for the bill on the table. Legal from
    /// `BillReady` only; anywhere else the call is ignored and logged.
    /// MercadoPago returns immediately without moving the phase, the caller
    /// runs the redirect checkout. Cash and card go through
    /// `ProcessingPayment` and settle at `Paid` unless the controller is
    /// torn down during the wait.
    pub async fn confirm_payment(&self, method: PaymentMethod) {
        {
            let mut st = self.shared.state.lock().unwrap();
            if st.phase != Phase::BillReady {
                log::warn!("confirm_payment called in phase {}, ignoring", st.phase);
                return;
            }
            if method == PaymentMethod::MercadoPago {
                return;
            }
            st.phase = Phase::ProcessingPayment;
        }
        log::info!("processing {method} payment");
        if tracked_delay(&self.shared, self.shared.config.payment_delay).await {
            self.shared.state.lock().unwrap().phase = Phase::Paid;
            log::info!("table paid");
        }
    }

    /// Overrides the displayed error text, typically to clear it.
    pub fn set_error(&self, text: Option<String>) {
        self.shared.state.lock().unwrap().error_text = text;
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().unwrap().phase
    }

    /// Snapshot of everything the UI renders.
    pub fn view(&self) -> FlowView {
        let st = self.shared.state.lock().unwrap();
        FlowView {
            phase: st.phase,
            waiter_name: st.waiter.name.clone(),
            estimated_time_minutes: st.waiter.estimated_time_minutes,
            error_text: st.error_text.clone(),
            is_processing: st.phase.is_processing(),
        }
    }

    /// Number of scheduled tasks currently outstanding.
    pub fn pending_timer_count(&self) -> usize {
        self.shared.timers.lock().unwrap().len()
    }

    /// Cancels every pending timer and turns any in-flight continuation into
    /// a no-op. Call when the owning session ends.
    pub fn teardown(&self) {
        self.shared.teardown();
    }
}
