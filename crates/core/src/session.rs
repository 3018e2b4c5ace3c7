//! Device session: composition root for one attached device.
//!
//! Reports are decoded synchronously on the caller's thread and never touch
//! the command transport. Negotiation runs on the scheduler.

use crate::buttons::{ButtonArbiter, ButtonSource};
use crate::codec::{
    decode_dual_touch, decode_touch_records, parse_report, FeatureEvent, PointerReport, Report,
};
use crate::config::SessionConfig;
use crate::device::{DeviceKind, Variant, TOUCHPAD_SLOTS, TOUCH_MOUSE_MAX_RECORDS};
use crate::error::Result;
use crate::event::{Button, InputEvent, SharedSink};
use crate::geometry::{Capabilities, TouchpadGeometry};
use crate::negotiate::{
    DeviceStatus, Mode, ModeNegotiator, NegotiationState, ReportContext, Scheduler,
};
use crate::tracker::ContactTracker;
use crate::transport::CommandTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, trace};

const RAW_POINTS_TOUCH_EVENT: u8 = 0;
const RAW_POINTS_BUTTON_EVENT: u8 = 1;
const RAW_XY_TOUCH_EVENT: u8 = 0;
const RAW_XY_BROADCAST_EVENT: u8 = 3;

/// Raw-points button sub-event: left button bit in byte 4.
const RAW_POINTS_LEFT_MASK: u8 = 0x02;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-variant report decoding.
pub trait ReportHandler: Send {
    /// Decode one report into `out`. `ctx` is `None` only in legacy mode.
    /// On error `out` is left untouched.
    fn handle(
        &mut self,
        report: Report<'_>,
        ctx: Option<&ReportContext>,
        out: &mut Vec<InputEvent>,
    ) -> Result<()>;
}

fn emit_pointer(
    pointer: &PointerReport,
    arbiter: &mut ButtonArbiter,
    out: &mut Vec<InputEvent>,
) {
    out.push(InputEvent::RelativeMotion {
        dx: pointer.dx,
        dy: pointer.dy,
    });
    arbiter.observe_bits(pointer.buttons, ButtonSource::PrimaryReport);
}

/// Legacy pointer mode: relative motion and primary buttons only.
#[derive(Debug, Default)]
pub struct PointerHandler {
    arbiter: ButtonArbiter,
}

impl ReportHandler for PointerHandler {
    fn handle(
        &mut self,
        report: Report<'_>,
        _ctx: Option<&ReportContext>,
        out: &mut Vec<InputEvent>,
    ) -> Result<()> {
        if let Report::Pointer(pointer) = report {
            emit_pointer(&pointer, &mut self.arbiter, out);
            self.arbiter.emit_state(out);
            out.push(InputEvent::Sync);
        }
        Ok(())
    }
}

/// Touch mice in raw mode.
#[derive(Debug)]
pub struct TouchMouseHandler {
    arbiter: ButtonArbiter,
    tracker: Option<ContactTracker>,
}

impl TouchMouseHandler {
    pub fn new(kind: DeviceKind) -> Self {
        let mut arbiter = ButtonArbiter::new();
        if kind.ignores_pointer_buttons() {
            arbiter = arbiter.ignore_source(ButtonSource::PrimaryReport);
        }
        Self {
            arbiter,
            tracker: None,
        }
    }

    fn tracker(&mut self, slots: u8) -> &mut ContactTracker {
        let slots = slots as usize;
        let tracker = self
            .tracker
            .take()
            .filter(|t| t.slots().len() == slots)
            .unwrap_or_else(|| ContactTracker::new(slots));
        self.tracker.insert(tracker)
    }

    fn touch_frame(
        &mut self,
        event: &FeatureEvent<'_>,
        ctx: &ReportContext,
        out: &mut Vec<InputEvent>,
    ) -> Result<()> {
        let count = ctx
            .geometry
            .max_fingers
            .min(ctx.slots)
            .min(TOUCH_MOUSE_MAX_RECORDS);
        let records = decode_touch_records(event.params(), count as usize)?;
        self.tracker(ctx.slots)
            .process_fixed_slots(&records, &ctx.geometry, out);
        Ok(())
    }
}

impl ReportHandler for TouchMouseHandler {
    fn handle(
        &mut self,
        report: Report<'_>,
        ctx: Option<&ReportContext>,
        out: &mut Vec<InputEvent>,
    ) -> Result<()> {
        let Some(ctx) = ctx else {
            return Ok(());
        };
        match report {
            Report::Pointer(pointer) => emit_pointer(&pointer, &mut self.arbiter, out),
            Report::Feature(event) if event.feature_index == ctx.touch_index => {
                match event.sub_event {
                    RAW_POINTS_TOUCH_EVENT => self.touch_frame(&event, ctx, out)?,
                    RAW_POINTS_BUTTON_EVENT => {
                        let pressed = event.bytes[4] & RAW_POINTS_LEFT_MASK != 0;
                        self.arbiter
                            .observe(Button::Left, ButtonSource::RawPointsReport, pressed);
                    }
                    other => trace!(sub_event = other, "Ignoring raw points sub-event"),
                }
            }
            Report::Feature(event) if Some(event.feature_index) == ctx.aux_index => {
                let pressed = event.bytes[5] != 0;
                self.arbiter
                    .observe(Button::Middle, ButtonSource::AuxReport, pressed);
            }
            Report::Feature(event) => {
                trace!(feature_index = event.feature_index, "Unhandled feature event");
            }
            Report::Other(id) => {
                trace!(report_id = id, "Unhandled report");
                return Ok(());
            }
        }
        self.arbiter.emit_state(out);
        out.push(InputEvent::Sync);
        Ok(())
    }
}

/// Wireless touchpads in raw mode.
#[derive(Debug)]
pub struct TouchpadHandler {
    tracker: ContactTracker,
}

impl Default for TouchpadHandler {
    fn default() -> Self {
        Self {
            tracker: ContactTracker::new(TOUCHPAD_SLOTS as usize),
        }
    }
}

impl ReportHandler for TouchpadHandler {
    fn handle(
        &mut self,
        report: Report<'_>,
        ctx: Option<&ReportContext>,
        out: &mut Vec<InputEvent>,
    ) -> Result<()> {
        let Some(ctx) = ctx else {
            return Ok(());
        };
        let Report::Feature(event) = report else {
            return Ok(());
        };
        if event.feature_index != ctx.touch_index
            || !matches!(
                event.sub_event,
                RAW_XY_TOUCH_EVENT | RAW_XY_BROADCAST_EVENT
            )
        {
            return Ok(());
        }
        let dual = decode_dual_touch(event.bytes)?;
        if self.tracker.process_dual_touch(&dual, &ctx.geometry, out) {
            out.push(InputEvent::Sync);
        }
        Ok(())
    }
}

/// One attached device: negotiator, decoder state and sink.
pub struct DeviceSession {
    kind: DeviceKind,
    config: SessionConfig,
    negotiator: Option<Arc<ModeNegotiator>>,
    handler: Mutex<Box<dyn ReportHandler>>,
    sink: SharedSink,
    pointer_sink_started: AtomicBool,
}

impl DeviceSession {
    pub fn new(
        kind: DeviceKind,
        config: SessionConfig,
        transport: Arc<dyn CommandTransport>,
        scheduler: Arc<dyn Scheduler>,
        sink: SharedSink,
    ) -> Self {
        let (negotiator, handler): (_, Box<dyn ReportHandler>) = if config.use_raw_mode {
            let negotiator = ModeNegotiator::new(
                kind,
                config.device_index,
                config.retry_delay(),
                transport,
                scheduler,
                Arc::clone(&sink),
            );
            let handler: Box<dyn ReportHandler> = match kind.variant() {
                Variant::TouchMouse => Box::new(TouchMouseHandler::new(kind)),
                Variant::Touchpad => Box::new(TouchpadHandler::default()),
            };
            (Some(negotiator), handler)
        } else {
            (None, Box::new(PointerHandler::default()))
        };

        Self {
            kind,
            config,
            negotiator,
            handler: Mutex::new(handler),
            sink,
            pointer_sink_started: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Begin operation: negotiate raw mode, or expose the pointer sink in legacy mode.
    pub fn start(&self) {
        match &self.negotiator {
            Some(negotiator) => negotiator.start(),
            None => {
                if self.pointer_sink_started.load(Ordering::SeqCst) {
                    return;
                }
                match lock(&self.sink).start(&Capabilities::pointer_only()) {
                    Ok(()) => {
                        self.pointer_sink_started.store(true, Ordering::SeqCst);
                        info!(kind = %self.kind, "Legacy pointer mode");
                    }
                    Err(e) => error!(error = %e, "Input sink failed to start"),
                }
            }
        }
    }

    /// Decode one incoming report and forward the resulting events.
    ///
    /// Malformed reports are dropped and returned as errors; nothing from
    /// them reaches the sink.
    pub fn handle_report(&self, bytes: &[u8]) -> Result<()> {
        let ctx = match &self.negotiator {
            Some(negotiator) => match negotiator.report_context() {
                Some(ctx) => Some(ctx),
                None => {
                    trace!("Dropping report before raw mode is ready");
                    return Ok(());
                }
            },
            None if self.pointer_sink_started.load(Ordering::SeqCst) => None,
            None => return Ok(()),
        };

        let report = parse_report(bytes).inspect_err(|e| debug!(error = %e, "Dropping report"))?;
        let mut out = Vec::new();
        lock(&self.handler)
            .handle(report, ctx.as_ref(), &mut out)
            .inspect_err(|e| debug!(error = %e, "Dropping report"))?;

        if !out.is_empty() {
            let mut sink = lock(&self.sink);
            for event in out {
                sink.emit(event);
            }
        }
        Ok(())
    }

    /// The device entered (`true`) or left RF range.
    pub fn connect_change(&self, connected: bool) {
        info!(kind = %self.kind, connected, "Connection changed");
        if let Some(negotiator) = &self.negotiator {
            negotiator.connect_change(connected);
        }
    }

    pub fn geometry(&self) -> Option<TouchpadGeometry> {
        self.negotiator.as_ref().and_then(|n| n.geometry())
    }

    pub fn state(&self) -> NegotiationState {
        self.negotiator
            .as_ref()
            .map_or(NegotiationState::NotStarted, |n| n.state())
    }

    pub fn mode(&self) -> Mode {
        self.negotiator.as_ref().map_or(Mode::Legacy, |n| n.mode())
    }

    pub fn status(&self) -> DeviceStatus {
        match &self.negotiator {
            Some(negotiator) => negotiator.status(),
            None if self.pointer_sink_started.load(Ordering::SeqCst) => DeviceStatus::Ready,
            None => DeviceStatus::NotStarted,
        }
    }

    /// The negotiator, when raw mode is configured.
    pub fn negotiator(&self) -> Option<&Arc<ModeNegotiator>> {
        self.negotiator.as_ref()
    }

    /// Cancel pending work and wait for any in-flight negotiation.
    ///
    /// Dropping the session does the same; this names the intent at call sites.
    pub fn teardown(self) {
        drop(self);
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(negotiator) = &self.negotiator {
            negotiator.shutdown();
        }
        debug!(kind = %self.kind, "Session torn down");
    }
}
