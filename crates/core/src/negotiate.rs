//! Raw-mode negotiation.
//!
//! The handshake issues blocking HID++ commands, so it never runs on the
//! report path: every attempt is a job on a [`Scheduler`]. A failed attempt
//! schedules exactly one retry; further attempts need a new trigger such as
//! a reconnect.
//!
//! Attempt sequence: root version (logged only) → resolve touch feature →
//! resolve auxiliary button feature (touch mice) → geometry → enable raw mode.

use crate::device::{DeviceKind, Variant, TOUCHPAD_EXPECTED_SIZE, TOUCHPAD_SLOTS};
use crate::directory::{FeatureDirectory, FeatureTable, ProtocolVersion};
use crate::error::{Error, ErrorClass, Result};
use crate::event::SharedSink;
use crate::geometry::{Capabilities, TouchpadGeometry};
use crate::transport::CommandTransport;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A deferred unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Executor for deferred negotiation jobs.
pub trait Scheduler: Send + Sync {
    /// Run `job` once after `delay`, off the caller's thread.
    fn schedule(&self, delay: Duration, job: Job);

    /// Drop jobs that have not started and block until running ones finish.
    /// Later `schedule` calls are ignored.
    fn cancel_and_wait(&self);
}

/// Scheduler running jobs on a tokio runtime's blocking pool.
pub struct TokioScheduler {
    handle: Handle,
    cancel: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            handle,
            cancel,
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn wait(&self, task: JoinHandle<()>) {
        let result = if Handle::try_current().is_ok() {
            tokio::task::block_in_place(|| self.handle.block_on(task))
        } else {
            self.handle.block_on(task)
        };
        if let Err(e) = result {
            warn!(error = %e, "Negotiation task ended abnormally");
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, job: Job) {
        let mut cancelled = self.cancel.subscribe();
        if *cancelled.borrow() {
            debug!("Scheduler cancelled, dropping job");
            return;
        }
        let task = self.handle.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = async { let _ = cancelled.wait_for(|c| *c).await; } => return,
            }
            if let Err(e) = tokio::task::spawn_blocking(job).await {
                warn!(error = %e, "Negotiation job panicked");
            }
        });
        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn cancel_and_wait(&self) {
        self.cancel.send_replace(true);
        loop {
            let tasks = std::mem::take(&mut *lock(&self.tasks));
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                self.wait(task);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Negotiation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NegotiationState {
    NotStarted,
    InProgress,
    Succeeded,
    Failed { retry_pending: bool },
}

/// Reporting mode the device is believed to be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Legacy,
    Raw,
}

/// Coarse readiness for user-facing display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    NotStarted,
    Negotiating,
    Ready,
    /// Last attempt failed; usually the device is out of range.
    NotReady,
}

/// What triggered an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Start,
    Reconnect,
    Retry,
}

/// What an attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Full,
    ReEnable,
}

/// Result of a full handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NegotiatedDevice {
    pub version: ProtocolVersion,
    pub geometry: TouchpadGeometry,
    pub features: FeatureTable,
}

/// Snapshot the report path needs to decode raw reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportContext {
    pub geometry: TouchpadGeometry,
    pub touch_index: u8,
    pub aux_index: Option<u8>,
    pub slots: u8,
}

#[derive(Debug)]
struct Shared {
    state: NegotiationState,
    mode: Mode,
    geometry: Option<TouchpadGeometry>,
    features: FeatureTable,
    /// Capabilities the sink was started or last updated with.
    announced: Option<Capabilities>,
    last_error: Option<ErrorClass>,
    torn_down: bool,
}

/// Number of touch slots for a kind, given its geometry.
pub fn slot_count(kind: DeviceKind, geometry: &TouchpadGeometry) -> u8 {
    match kind.variant() {
        Variant::TouchMouse => geometry
            .max_fingers
            .clamp(2, crate::device::TOUCH_MOUSE_MAX_RECORDS),
        Variant::Touchpad => TOUCHPAD_SLOTS,
    }
}

/// Run the full raw-mode command sequence once against `transport`.
///
/// Sequence: root version → touch feature → auxiliary button feature (touch
/// mice, optional) → geometry → enable raw mode.
pub fn handshake(
    transport: &dyn CommandTransport,
    device_index: u8,
    kind: DeviceKind,
) -> Result<NegotiatedDevice> {
    let directory = FeatureDirectory::new(transport, device_index);

    let version = directory.query_root_version()?;
    debug!(major = version.major, minor = version.minor, "HID++ version");

    let mut features = FeatureTable::new();
    let touch_feature = kind.touch_feature();
    let touch_index = directory.resolve_feature(touch_feature)?;
    features.insert(touch_feature, touch_index);

    if let Some(aux) = kind.aux_button_feature() {
        match directory.resolve_feature(aux) {
            Ok(index) => features.insert(aux, index),
            Err(Error::FeatureNotFound(_)) => {
                debug!(
                    feature_id = format_args!("0x{aux:04X}"),
                    "Auxiliary button feature absent"
                );
            }
            Err(e) => return Err(e),
        }
    }

    let geometry = directory.query_geometry(touch_index, kind.variant(), TOUCHPAD_SLOTS)?;
    if let Some(expected) = kind.expected_size() {
        if let Err(e) = geometry.check_expected_size(expected) {
            warn!(error = %e, "Using device-reported size");
        }
    }

    directory.enable_raw_mode(touch_index, kind.raw_mode_flags())?;

    Ok(NegotiatedDevice {
        version,
        geometry,
        features,
    })
}

/// Sink ranges for a kind once its geometry is known.
pub fn capabilities_for(kind: DeviceKind, geometry: &TouchpadGeometry) -> Capabilities {
    match kind.variant() {
        Variant::TouchMouse => Capabilities::for_touch_mouse(geometry, slot_count(kind, geometry)),
        Variant::Touchpad => {
            Capabilities::for_touchpad((geometry.x_size, geometry.y_size), TOUCHPAD_SLOTS)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SinkAction {
    Start(Capabilities),
    Update(Capabilities),
}

/// Drives a device from legacy into raw reporting and keeps it there.
pub struct ModeNegotiator {
    kind: DeviceKind,
    device_index: u8,
    retry_delay: Duration,
    transport: Arc<dyn CommandTransport>,
    scheduler: Arc<dyn Scheduler>,
    sink: SharedSink,
    shared: Mutex<Shared>,
}

impl ModeNegotiator {
    pub fn new(
        kind: DeviceKind,
        device_index: u8,
        retry_delay: Duration,
        transport: Arc<dyn CommandTransport>,
        scheduler: Arc<dyn Scheduler>,
        sink: SharedSink,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            device_index,
            retry_delay,
            transport,
            scheduler,
            sink,
            shared: Mutex::new(Shared {
                state: NegotiationState::NotStarted,
                mode: Mode::Legacy,
                geometry: None,
                features: FeatureTable::new(),
                announced: None,
                last_error: None,
                torn_down: false,
            }),
        })
    }

    pub fn state(&self) -> NegotiationState {
        lock(&self.shared).state
    }

    pub fn mode(&self) -> Mode {
        lock(&self.shared).mode
    }

    /// Geometry, once a handshake has succeeded.
    pub fn geometry(&self) -> Option<TouchpadGeometry> {
        lock(&self.shared).geometry
    }

    pub fn features(&self) -> FeatureTable {
        lock(&self.shared).features.clone()
    }

    pub fn sink_started(&self) -> bool {
        lock(&self.shared).announced.is_some()
    }

    pub fn status(&self) -> DeviceStatus {
        let shared = lock(&self.shared);
        match shared.state {
            NegotiationState::NotStarted => DeviceStatus::NotStarted,
            NegotiationState::InProgress => DeviceStatus::Negotiating,
            NegotiationState::Succeeded if shared.mode == Mode::Raw => DeviceStatus::Ready,
            NegotiationState::Succeeded | NegotiationState::Failed { .. } => DeviceStatus::NotReady,
        }
    }

    /// Class of the last failure, if the last attempt failed.
    pub fn last_error(&self) -> Option<ErrorClass> {
        lock(&self.shared).last_error
    }

    /// Everything the report path needs, or `None` while raw reports must be dropped.
    pub fn report_context(&self) -> Option<ReportContext> {
        let shared = lock(&self.shared);
        if shared.announced.is_none() {
            return None;
        }
        let geometry = shared.geometry?;
        let touch_index = shared.features.index_of(self.kind.touch_feature())?;
        let aux_index = self
            .kind
            .aux_button_feature()
            .and_then(|id| shared.features.index_of(id));
        Some(ReportContext {
            geometry,
            touch_index,
            aux_index,
            slots: slot_count(self.kind, &geometry),
        })
    }

    /// Begin negotiating. Only the first call has an effect.
    pub fn start(self: &Arc<Self>) {
        {
            let mut shared = lock(&self.shared);
            if shared.state != NegotiationState::NotStarted || shared.torn_down {
                debug!(state = ?shared.state, "Negotiation already started");
                return;
            }
            shared.state = NegotiationState::InProgress;
        }
        info!(kind = %self.kind, "Starting raw mode negotiation");

        if !self.kind.defers_sink_start() {
            self.start_sink(Capabilities::for_touchpad(
                TOUCHPAD_EXPECTED_SIZE,
                TOUCHPAD_SLOTS,
            ));
        }
        self.schedule(Duration::ZERO, Plan::Full, Trigger::Start);
    }

    /// React to the device entering or leaving RF range.
    pub fn connect_change(self: &Arc<Self>, connected: bool) {
        let plan = {
            let mut shared = lock(&self.shared);
            if !connected {
                // The device forgets raw mode while away.
                shared.mode = Mode::Legacy;
                None
            } else {
                match shared.state {
                    NegotiationState::Succeeded if shared.announced.is_some() => {
                        shared.state = NegotiationState::InProgress;
                        Some(Plan::ReEnable)
                    }
                    NegotiationState::Failed {
                        retry_pending: false,
                    } => {
                        shared.state = NegotiationState::InProgress;
                        Some(Plan::Full)
                    }
                    _ => None,
                }
            }
        };
        debug!(connected, ?plan, "Connection change");
        if let Some(plan) = plan {
            self.schedule(Duration::ZERO, plan, Trigger::Reconnect);
        }
    }

    /// Schedule the single retry after a failure. No-op unless the last
    /// attempt failed and no retry is pending.
    pub fn request_retry(self: &Arc<Self>) -> bool {
        {
            let mut shared = lock(&self.shared);
            if shared.torn_down
                || shared.state
                    != (NegotiationState::Failed {
                        retry_pending: false,
                    })
            {
                return false;
            }
            shared.state = NegotiationState::Failed {
                retry_pending: true,
            };
        }
        debug!(delay_ms = self.retry_delay.as_millis() as u64, "Retry scheduled");
        self.schedule(self.retry_delay, Plan::Full, Trigger::Retry);
        true
    }

    /// Stop scheduling and wait for any in-flight attempt.
    pub fn shutdown(&self) {
        lock(&self.shared).torn_down = true;
        self.scheduler.cancel_and_wait();
        debug!("Negotiator shut down");
    }

    fn schedule(self: &Arc<Self>, delay: Duration, plan: Plan, trigger: Trigger) {
        let this = Arc::clone(self);
        self.scheduler
            .schedule(delay, Box::new(move || this.run(plan, trigger)));
    }

    fn run(self: &Arc<Self>, plan: Plan, trigger: Trigger) {
        {
            let mut shared = lock(&self.shared);
            if shared.torn_down {
                return;
            }
            shared.state = NegotiationState::InProgress;
        }
        debug!(?plan, ?trigger, "Negotiation attempt");

        let result = match plan {
            Plan::Full => self.handshake().map(Some),
            Plan::ReEnable => self.reenable_raw_mode().map(|_| None),
        };
        match result {
            Ok(negotiated) => self.succeed(negotiated),
            Err(e) => self.fail(e, trigger),
        }
    }

    /// Run the full command sequence. Blocks on the transport; holds no lock.
    pub fn handshake(&self) -> Result<NegotiatedDevice> {
        handshake(self.transport.as_ref(), self.device_index, self.kind)
    }

    /// Re-send the raw-mode enable command using the known feature index.
    pub fn reenable_raw_mode(&self) -> Result<()> {
        let touch_feature = self.kind.touch_feature();
        let touch_index = lock(&self.shared)
            .features
            .index_of(touch_feature)
            .ok_or(Error::FeatureNotFound(touch_feature))?;

        FeatureDirectory::new(self.transport.as_ref(), self.device_index)
            .enable_raw_mode(touch_index, self.kind.raw_mode_flags())?;
        lock(&self.shared).mode = Mode::Raw;
        Ok(())
    }

    fn succeed(&self, negotiated: Option<NegotiatedDevice>) {
        let action = {
            let mut shared = lock(&self.shared);
            if let Some(negotiated) = negotiated {
                shared.geometry = Some(negotiated.geometry);
                shared.features = negotiated.features;
            }
            shared.state = NegotiationState::Succeeded;
            shared.mode = Mode::Raw;
            shared.last_error = None;
            let wanted = shared.geometry.map(|g| capabilities_for(self.kind, &g));
            match (wanted, shared.announced) {
                (Some(caps), None) if self.kind.defers_sink_start() => {
                    Some(SinkAction::Start(caps))
                }
                (Some(caps), Some(current)) if caps != current => Some(SinkAction::Update(caps)),
                _ => None,
            }
        };
        info!(kind = %self.kind, "Raw mode enabled");

        match action {
            Some(SinkAction::Start(caps)) => self.start_sink(caps),
            Some(SinkAction::Update(caps)) => self.update_sink(caps),
            None => {}
        }
    }

    fn fail(self: &Arc<Self>, err: Error, trigger: Trigger) {
        let class = ErrorClass::classify(&err);
        {
            let mut shared = lock(&self.shared);
            shared.state = NegotiationState::Failed {
                retry_pending: false,
            };
            shared.mode = Mode::Legacy;
            shared.last_error = Some(class);
        }
        if err.is_transport_failure() {
            warn!(
                error = %err,
                out_of_range = class.is_out_of_range(),
                "Unable to set raw report mode; the device may not be in range"
            );
        } else {
            error!(error = %err, class = ?class, "Raw mode negotiation got an unusable reply");
        }

        if trigger != Trigger::Retry {
            self.request_retry();
        }
    }

    fn start_sink(&self, caps: Capabilities) {
        let result = lock(&self.sink).start(&caps);
        match result {
            Ok(()) => {
                lock(&self.shared).announced = Some(caps);
                info!(slots = caps.slots, x_max = caps.x_max, y_max = caps.y_max, "Input sink started");
            }
            Err(e) => error!(error = %e, "Input sink failed to start"),
        }
    }

    fn update_sink(&self, caps: Capabilities) {
        let result = lock(&self.sink).update(&caps);
        match result {
            Ok(()) => {
                lock(&self.shared).announced = Some(caps);
                info!(x_max = caps.x_max, y_max = caps.y_max, "Input sink ranges updated");
            }
            Err(e) => warn!(error = %e, "Input sink kept its previous ranges"),
        }
    }
}

/// A scheduler whose jobs run only when the test says so.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct ManualScheduler {
        queue: Mutex<VecDeque<(Duration, Job)>>,
        cancelled: Mutex<bool>,
    }

    impl ManualScheduler {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn pending(&self) -> usize {
            self.queue.lock().unwrap().len()
        }

        /// Delay of the next queued job.
        pub fn next_delay(&self) -> Option<Duration> {
            self.queue.lock().unwrap().front().map(|(d, _)| *d)
        }

        /// Run the oldest queued job. The queue lock is released first so the
        /// job may schedule more work.
        pub fn run_next(&self) -> bool {
            let job = self.queue.lock().unwrap().pop_front();
            match job {
                Some((_, job)) => {
                    job();
                    true
                }
                None => false,
            }
        }
    }

    impl Scheduler for ManualScheduler {
        fn schedule(&self, delay: Duration, job: Job) {
            if *self.cancelled.lock().unwrap() {
                return;
            }
            self.queue.lock().unwrap().push_back((delay, job));
        }

        fn cancel_and_wait(&self) {
            *self.cancelled.lock().unwrap() = true;
            self.queue.lock().unwrap().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::ManualScheduler;
    use super::*;
    use crate::event::mock::RecordingSink;
    use crate::event::shared_sink;
    use crate::geometry::Origin;
    use crate::hidpp::features;
    use crate::transport::mock::MockTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DEV: u8 = 0x01;
    const RAW_IDX: u8 = 0x0B;
    const AUX_IDX: u8 = 0x0C;
    const MOUSE_GEOMETRY: [u8; 9] = [0x04, 0xB0, 0x03, 0x20, 0x01, 0x90, 0x02, 0x04, 0x0F];

    fn mouse_device(mock: &MockTransport) {
        mock.on_command(DEV, 0x00, 0x01, &[], &[0x04, 0x02]);
        mock.on_command(DEV, 0x00, 0x00, &[0x61, 0x10], &[RAW_IDX]);
        mock.on_command(DEV, 0x00, 0x00, &[0x1B, 0x03], &[AUX_IDX]);
        mock.on_command(DEV, RAW_IDX, 0x00, &[], &MOUSE_GEOMETRY);
        mock.on_command(DEV, RAW_IDX, 0x02, &[0x03], &[]);
    }

    fn negotiator(
        kind: DeviceKind,
        mock: Arc<MockTransport>,
        scheduler: Arc<ManualScheduler>,
        sink: &RecordingSink,
    ) -> Arc<ModeNegotiator> {
        ModeNegotiator::new(
            kind,
            DEV,
            Duration::from_millis(250),
            mock,
            scheduler,
            shared_sink(sink.clone()),
        )
    }

    #[test]
    fn mouse_handshake_success_starts_sink() {
        let mock = Arc::new(MockTransport::new());
        mouse_device(&mock);
        let scheduler = ManualScheduler::new();
        let sink = RecordingSink::new();
        let neg = negotiator(DeviceKind::ZoneTouchMouseT400, mock, scheduler.clone(), &sink);

        neg.start();
        assert_eq!(neg.state(), NegotiationState::InProgress);
        assert_eq!(sink.start_count(), 0);
        assert!(neg.report_context().is_none());

        assert!(scheduler.run_next());
        assert_eq!(neg.state(), NegotiationState::Succeeded);
        assert_eq!(neg.mode(), Mode::Raw);
        assert_eq!(neg.status(), DeviceStatus::Ready);
        assert_eq!(sink.start_count(), 1);
        let caps = sink.last_caps().unwrap();
        assert_eq!((caps.x_max, caps.y_max, caps.slots), (1200, 800, 4));

        let ctx = neg.report_context().unwrap();
        assert_eq!(ctx.touch_index, RAW_IDX);
        assert_eq!(ctx.aux_index, Some(AUX_IDX));
        assert_eq!(ctx.geometry.origin, Origin::LowerRight);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn standalone_handshake_reports_device() {
        let mock = MockTransport::new();
        mouse_device(&mock);
        let negotiated = handshake(&mock, DEV, DeviceKind::ZoneTouchMouseT400).unwrap();
        assert_eq!((negotiated.version.major, negotiated.version.minor), (4, 2));
        assert_eq!(negotiated.features.index_of(features::TOUCH_MOUSE_RAW_POINTS), Some(RAW_IDX));
        assert_eq!(negotiated.features.index_of(features::TOUCH_MOUSE_AUX_BUTTONS), Some(AUX_IDX));
        assert_eq!(negotiated.geometry.x_size, 1200);
        assert_eq!(mock.total_sent(), 5);
    }

    #[test]
    fn truncated_geometry_reply_fails_as_malformed() {
        let mock = Arc::new(MockTransport::new());
        mouse_device(&mock);
        mock.on_request(
            vec![0x10, DEV, RAW_IDX, 0x0B, 0x00, 0x00, 0x00],
            vec![0x10, DEV, RAW_IDX, 0x0B, 0x04, 0xB0, 0x03],
        );
        let scheduler = ManualScheduler::new();
        let sink = RecordingSink::new();
        let neg = negotiator(DeviceKind::ZoneTouchMouseT400, mock, scheduler.clone(), &sink);

        neg.start();
        scheduler.run_next();
        assert_eq!(
            neg.state(),
            NegotiationState::Failed {
                retry_pending: true
            }
        );
        assert_eq!(neg.last_error(), Some(ErrorClass::Malformed));
        assert_eq!(neg.mode(), Mode::Legacy);
        assert_eq!(sink.start_count(), 0);
    }

    #[test]
    fn start_is_only_honored_once() {
        let mock = Arc::new(MockTransport::new());
        mouse_device(&mock);
        let scheduler = ManualScheduler::new();
        let sink = RecordingSink::new();
        let neg = negotiator(DeviceKind::ZoneTouchMouseT400, mock, scheduler.clone(), &sink);
        neg.start();
        neg.start();
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn missing_aux_feature_is_tolerated() {
        let mock = Arc::new(MockTransport::new());
        mouse_device(&mock);
        mock.on_command(DEV, 0x00, 0x00, &[0x1B, 0x03], &[0x00]);
        let scheduler = ManualScheduler::new();
        let sink = RecordingSink::new();
        let neg = negotiator(DeviceKind::TouchMouseT620, mock, scheduler.clone(), &sink);
        neg.start();
        scheduler.run_next();
        assert_eq!(neg.state(), NegotiationState::Succeeded);
        assert_eq!(neg.report_context().unwrap().aux_index, None);
    }

    #[test]
    fn failure_schedules_exactly_one_retry() {
        let mock = Arc::new(MockTransport::new());
        mouse_device(&mock);
        mock.timeout_on_command(DEV, RAW_IDX, 0x02, &[0x03]);
        let scheduler = ManualScheduler::new();
        let sink = RecordingSink::new();
        let neg = negotiator(DeviceKind::ZoneTouchMouseT400, mock.clone(), scheduler.clone(), &sink);

        neg.start();
        scheduler.run_next();
        assert_eq!(
            neg.state(),
            NegotiationState::Failed {
                retry_pending: true
            }
        );
        assert_eq!(neg.mode(), Mode::Legacy);
        assert_eq!(neg.last_error(), Some(ErrorClass::Transient));
        assert_eq!(neg.status(), DeviceStatus::NotReady);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.next_delay(), Some(Duration::from_millis(250)));
        assert_eq!(sink.start_count(), 0);

        // another retry request while one is pending is a no-op
        assert!(!neg.request_retry());
        assert_eq!(scheduler.pending(), 1);

        // the retry fails too: no further automatic retry
        scheduler.run_next();
        assert_eq!(
            neg.state(),
            NegotiationState::Failed {
                retry_pending: false
            }
        );
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn reconnect_after_exhausted_retry_runs_full_attempt() {
        let mock = Arc::new(MockTransport::new());
        mouse_device(&mock);
        mock.timeout_on_command(DEV, 0x00, 0x01, &[]);
        let scheduler = ManualScheduler::new();
        let sink = RecordingSink::new();
        let neg = negotiator(DeviceKind::ZoneTouchMouseT400, mock.clone(), scheduler.clone(), &sink);

        neg.start();
        scheduler.run_next();
        scheduler.run_next();
        assert_eq!(scheduler.pending(), 0);

        mock.on_command(DEV, 0x00, 0x01, &[], &[0x04, 0x02]);
        neg.connect_change(true);
        assert_eq!(neg.state(), NegotiationState::InProgress);
        scheduler.run_next();
        assert_eq!(neg.state(), NegotiationState::Succeeded);
        assert_eq!(sink.start_count(), 1);
    }

    #[test]
    fn reconnect_reenables_only() {
        let mock = Arc::new(MockTransport::new());
        mouse_device(&mock);
        let scheduler = ManualScheduler::new();
        let sink = RecordingSink::new();
        let neg = negotiator(DeviceKind::ZoneTouchMouseT400, mock.clone(), scheduler.clone(), &sink);
        neg.start();
        scheduler.run_next();
        let sent_before = mock.total_sent();

        neg.connect_change(false);
        assert_eq!(neg.mode(), Mode::Legacy);
        assert_eq!(neg.state(), NegotiationState::Succeeded);

        neg.connect_change(true);
        scheduler.run_next();
        assert_eq!(mock.total_sent(), sent_before + 1);
        assert_eq!(mock.sent_count(DEV, RAW_IDX, 0x02, &[0x03]), 2);
        assert_eq!(neg.mode(), Mode::Raw);
        assert_eq!(neg.state(), NegotiationState::Succeeded);
        assert_eq!(sink.start_count(), 1);
    }

    #[test]
    fn reenable_is_idempotent() {
        let mock = Arc::new(MockTransport::new());
        mouse_device(&mock);
        let scheduler = ManualScheduler::new();
        let sink = RecordingSink::new();
        let neg = negotiator(DeviceKind::ZoneTouchMouseT400, mock, scheduler.clone(), &sink);
        neg.start();
        scheduler.run_next();
        let features = neg.features();
        let geometry = neg.geometry();

        neg.reenable_raw_mode().unwrap();
        neg.reenable_raw_mode().unwrap();
        assert_eq!(neg.features(), features);
        assert_eq!(neg.geometry(), geometry);
        assert_eq!(
            neg.features().index_of(features::TOUCH_MOUSE_RAW_POINTS),
            Some(RAW_IDX)
        );
    }

    #[test]
    fn reenable_before_negotiation_fails() {
        let mock = Arc::new(MockTransport::new());
        let sink = RecordingSink::new();
        let neg = negotiator(DeviceKind::WirelessTouchpad, mock, ManualScheduler::new(), &sink);
        assert!(matches!(
            neg.reenable_raw_mode(),
            Err(Error::FeatureNotFound(features::TOUCHPAD_RAW_XY))
        ));
    }

    #[test]
    fn touchpad_starts_sink_immediately() {
        let mock = Arc::new(MockTransport::new());
        let scheduler = ManualScheduler::new();
        let sink = RecordingSink::new();
        let neg = negotiator(DeviceKind::TouchpadT650, mock, scheduler.clone(), &sink);
        neg.start();
        assert_eq!(sink.start_count(), 1);
        let caps = sink.last_caps().unwrap();
        assert_eq!((caps.x_max, caps.y_max, caps.slots), (3700, 2480, 5));
        assert!(!caps.relative);
        // geometry not known yet
        assert!(neg.report_context().is_none());
    }

    #[test]
    fn shutdown_drops_pending_jobs() {
        let mock = Arc::new(MockTransport::new());
        mouse_device(&mock);
        let scheduler = ManualScheduler::new();
        let sink = RecordingSink::new();
        let neg = negotiator(DeviceKind::ZoneTouchMouseT400, mock.clone(), scheduler.clone(), &sink);
        neg.start();
        neg.shutdown();
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(mock.total_sent(), 0);
        neg.connect_change(true);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn tokio_scheduler_runs_and_waits() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .build()
            .unwrap();
        let scheduler = TokioScheduler::new(runtime.handle().clone());
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        scheduler.schedule(
            Duration::from_millis(5),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let counter = runs.clone();
        scheduler.schedule(
            Duration::from_secs(60),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        std::thread::sleep(Duration::from_millis(100));
        scheduler.cancel_and_wait();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let counter = runs.clone();
        scheduler.schedule(
            Duration::ZERO,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        scheduler.cancel_and_wait();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
