//! hidpp-touch CLI: negotiate raw mode and stream decoded touch events.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hidpp_touch_core::config::SessionConfig;
use hidpp_touch_core::device::DeviceKind;
use hidpp_touch_core::error::Error as CoreError;
use hidpp_touch_core::event::{shared_sink, InputEvent, InputSink};
use hidpp_touch_core::geometry::Capabilities;
use hidpp_touch_core::hidpp::{HidppRequest, HidppResponse, ReportKind, LONG_REPORT_ID};
use hidpp_touch_core::negotiate::{handshake, TokioScheduler};
use hidpp_touch_core::session::DeviceSession;
use hidpp_touch_core::transport::CommandTransport;
use std::collections::VecDeque;
use std::ffi::CString;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Poll interval of the listen loop.
const LISTEN_POLL_MS: i32 = 10;

/// Longest single read while a command waits for its answer.
const COMMAND_POLL_MS: i32 = 10;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Routes incoming reports to the command awaiting them or to the listen
/// backlog.
#[derive(Default)]
struct ReportRouter {
    pending: Option<HidppRequest>,
    reply: Option<Vec<u8>>,
    backlog: VecDeque<Vec<u8>>,
}

impl ReportRouter {
    fn register(&mut self, request: HidppRequest) {
        self.pending = Some(request);
        self.reply = None;
    }

    fn route(&mut self, report: Vec<u8>) {
        let answers = self.pending.as_ref().is_some_and(|request| {
            HidppResponse::decode(&report).is_ok_and(|resp| resp.answers(request))
        });
        if answers {
            self.pending = None;
            self.reply = Some(report);
        } else {
            self.backlog.push_back(report);
        }
    }

    fn take_reply(&mut self) -> Option<Vec<u8>> {
        self.reply.take()
    }

    fn abandon(&mut self) {
        self.pending = None;
        self.reply = None;
    }

    fn next_unsolicited(&mut self) -> Option<Vec<u8>> {
        self.backlog.pop_front()
    }
}

/// hidraw-backed transport.
///
/// Commands and the listen loop share one device handle. The handle is
/// locked for one short read at a time, so either side may read the answer
/// to a command; the router hands it to the waiting command.
struct CliHidTransport {
    device: Mutex<hidapi::HidDevice>,
    router: Mutex<ReportRouter>,
    /// Serializes commands; one answer is awaited at a time.
    command: Mutex<()>,
    timeout: Duration,
}

impl CliHidTransport {
    fn open(path: &str, timeout: Duration) -> Result<Self> {
        let api = hidapi::HidApi::new().map_err(|e| anyhow::anyhow!("hidapi init: {e}"))?;
        let c_path = CString::new(path).context("device path contains a NUL byte")?;
        let device = api.open_path(&c_path).map_err(|e| {
            let msg = format!("{path}: {e}");
            if msg.to_lowercase().contains("permission") {
                CoreError::PermissionDenied(msg)
            } else {
                CoreError::DeviceNotFound(msg)
            }
        })?;
        Ok(Self {
            device: Mutex::new(device),
            router: Mutex::new(ReportRouter::default()),
            command: Mutex::new(()),
            timeout,
        })
    }

    /// Read at most one report and route it.
    fn poll(&self, timeout_ms: i32) -> hidpp_touch_core::error::Result<()> {
        let mut buf = [0u8; 64];
        let n = lock(&self.device)
            .read_timeout(&mut buf, timeout_ms)
            .map_err(|e| CoreError::Hid(format!("read_timeout: {e}")))?;
        if n > 0 {
            lock(&self.router).route(buf[..n].to_vec());
        }
        Ok(())
    }

    /// Next report no command is waiting for.
    fn read_report(&self, timeout_ms: i32) -> hidpp_touch_core::error::Result<Option<Vec<u8>>> {
        if let Some(report) = lock(&self.router).next_unsolicited() {
            return Ok(Some(report));
        }
        self.poll(timeout_ms)?;
        Ok(lock(&self.router).next_unsolicited())
    }

    fn await_reply(&self) -> hidpp_touch_core::error::Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(reply) = lock(&self.router).take_reply() {
                return Ok(reply);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CoreError::Timeout(format!(
                    "no response after {}ms",
                    self.timeout.as_millis()
                )));
            }
            let wait_ms = remaining.as_millis().clamp(1, COMMAND_POLL_MS as u128) as i32;
            self.poll(wait_ms)?;
        }
    }
}

fn request_from_bytes(data: &[u8]) -> Option<HidppRequest> {
    if data.len() < 4 {
        return None;
    }
    Some(HidppRequest {
        report_kind: if data[0] == LONG_REPORT_ID {
            ReportKind::Long
        } else {
            ReportKind::Short
        },
        device_index: data[1],
        feature_index: data[2],
        function_sw: data[3],
        params: data[4..].to_vec(),
    })
}

impl CommandTransport for CliHidTransport {
    fn send_report(&self, data: &[u8]) -> hidpp_touch_core::error::Result<Vec<u8>> {
        let request = request_from_bytes(data)
            .ok_or_else(|| CoreError::Hid(format!("request too short: {data:02X?}")))?;
        let _command = lock(&self.command);
        lock(&self.router).register(request);

        let result = lock(&self.device)
            .write(data)
            .map_err(|e| CoreError::Hid(format!("write: {e}")))
            .and_then(|_| self.await_reply());
        if result.is_err() {
            lock(&self.router).abandon();
        }
        result
    }
}

/// Prints events as JSON lines on stdout.
struct JsonLinesSink;

impl InputSink for JsonLinesSink {
    fn start(&mut self, caps: &Capabilities) -> hidpp_touch_core::error::Result<()> {
        let line = serde_json::to_string(caps).map_err(|e| CoreError::Sink(e.to_string()))?;
        println!("{{\"type\":\"start\",\"capabilities\":{line}}}");
        Ok(())
    }

    fn update(&mut self, caps: &Capabilities) -> hidpp_touch_core::error::Result<()> {
        let line = serde_json::to_string(caps).map_err(|e| CoreError::Sink(e.to_string()))?;
        println!("{{\"type\":\"update\",\"capabilities\":{line}}}");
        Ok(())
    }

    fn emit(&mut self, event: InputEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Unable to serialize event"),
        }
    }
}

#[derive(Parser)]
#[command(
    name = "hidpp-touch",
    version,
    about = "Raw multi-touch for Logitech touch mice and touchpads"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported models.
    Models,
    /// Run one raw-mode handshake and print geometry and features.
    Negotiate {
        /// hidraw node, e.g. /dev/hidraw3.
        #[arg(long)]
        path: String,
        /// Model: t400, t620, wtp, t650.
        #[arg(long)]
        model: String,
        /// JSON session configuration.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Start a session and print decoded events as JSON lines.
    Listen {
        /// hidraw node, e.g. /dev/hidraw3.
        #[arg(long)]
        path: String,
        /// Model: t400, t620, wtp, t650.
        #[arg(long)]
        model: String,
        /// JSON session configuration.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Stop after this many reports.
        #[arg(long)]
        reports: Option<u64>,
    },
}

fn parse_model(name: &str) -> Result<DeviceKind> {
    DeviceKind::from_name(name).ok_or_else(|| anyhow::anyhow!("unknown model: {name}"))
}

fn load_config(path: Option<&PathBuf>) -> Result<SessionConfig> {
    Ok(match path {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    })
}

fn negotiate(path: &str, kind: DeviceKind, config: &SessionConfig) -> Result<()> {
    let transport = CliHidTransport::open(path, config.command_timeout())?;
    let negotiated = handshake(&transport, config.device_index, kind)
        .with_context(|| format!("raw mode negotiation with {kind} failed"))?;
    println!("{}", serde_json::to_string_pretty(&negotiated)?);
    Ok(())
}

fn listen(path: &str, kind: DeviceKind, config: SessionConfig, limit: Option<u64>) -> Result<()> {
    let transport = Arc::new(CliHidTransport::open(path, config.command_timeout())?);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()?;
    let session = DeviceSession::new(
        kind,
        config,
        transport.clone(),
        Arc::new(TokioScheduler::new(runtime.handle().clone())),
        shared_sink(JsonLinesSink),
    );
    session.start();

    let mut delivered = 0u64;
    while limit.map_or(true, |limit| delivered < limit) {
        let Some(report) = transport.read_report(LISTEN_POLL_MS)? else {
            continue;
        };
        delivered += 1;
        if let Err(e) = session.handle_report(&report) {
            tracing::debug!(error = %e, "Report dropped");
        }
    }

    tracing::info!(delivered, status = ?session.status(), "Stopping");
    session.teardown();
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Models => {
            for kind in DeviceKind::ALL {
                println!(
                    "{} (VID: 0x{:04X}, PID: 0x{:04X})",
                    kind.name(),
                    hidpp_touch_core::LOGITECH_VID,
                    kind.pid()
                );
            }
        }
        Commands::Negotiate {
            path,
            model,
            config,
        } => {
            let kind = parse_model(&model)?;
            let config = load_config(config.as_ref())?;
            negotiate(&path, kind, &config)?;
        }
        Commands::Listen {
            path,
            model,
            config,
            reports,
        } => {
            let kind = parse_model(&model)?;
            let config = load_config(config.as_ref())?;
            listen(&path, kind, config, reports)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_listen() {
        let cli = Cli::try_parse_from([
            "hidpp-touch",
            "listen",
            "--path",
            "/dev/hidraw3",
            "--model",
            "t650",
            "--reports",
            "10",
        ])
        .unwrap();
        match cli.command {
            Commands::Listen { path, reports, .. } => {
                assert_eq!(path, "/dev/hidraw3");
                assert_eq!(reports, Some(10));
            }
            _ => panic!("expected listen"),
        }
    }

    #[test]
    fn unknown_model_rejected() {
        assert!(parse_model("g502").is_err());
        assert_eq!(parse_model("T400").unwrap(), DeviceKind::ZoneTouchMouseT400);
    }

    #[test]
    fn request_fields_recovered_from_bytes() {
        let req = HidppRequest::new(0x01, 0x0B, 0x02, vec![0x03]);
        let bytes = req.encode().unwrap();
        let parsed = request_from_bytes(&bytes).unwrap();
        assert_eq!(parsed.device_index, 0x01);
        assert_eq!(parsed.feature_index, 0x0B);
        assert_eq!(parsed.function_sw, req.function_sw);
        assert!(request_from_bytes(&[0x10]).is_none());
    }

    fn long_reply(device: u8, feature: u8, function_sw: u8) -> Vec<u8> {
        let mut bytes = vec![LONG_REPORT_ID, device, feature, function_sw];
        bytes.resize(20, 0);
        bytes
    }

    #[test]
    fn router_hands_answer_to_waiting_command() {
        let req = HidppRequest::new(0x01, 0x0B, 0x02, vec![0x03]);
        let mut router = ReportRouter::default();
        router.register(req.clone());

        let touch_event = long_reply(0x01, 0x0B, 0x00);
        router.route(touch_event.clone());
        assert!(router.take_reply().is_none());

        let answer = long_reply(0x01, 0x0B, req.function_sw);
        router.route(answer.clone());
        assert_eq!(router.take_reply(), Some(answer.clone()));
        assert_eq!(router.next_unsolicited(), Some(touch_event));
        assert!(router.next_unsolicited().is_none());

        // with nothing pending, the same bytes are an ordinary report
        router.route(answer.clone());
        assert!(router.take_reply().is_none());
        assert_eq!(router.next_unsolicited(), Some(answer));
    }

    #[test]
    fn abandoned_command_leaves_late_answer_to_listener() {
        let req = HidppRequest::new(0x01, 0x05, 0x00, vec![]);
        let mut router = ReportRouter::default();
        router.register(req.clone());
        router.abandon();

        router.route(long_reply(0x01, 0x05, req.function_sw));
        assert!(router.take_reply().is_none());
        assert!(router.next_unsolicited().is_some());
    }
}
