//! Decoded input events and the sink that consumes them.

use crate::error::Result;
use crate::geometry::Capabilities;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Physical buttons tracked by the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
    Left,
    Right,
    Middle,
}

impl Button {
    /// All buttons, in report bit order.
    pub const ALL: [Button; 3] = [Button::Left, Button::Right, Button::Middle];

    /// Bit in the pointer report's button byte.
    pub fn mask(&self) -> u8 {
        1 << self.index()
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
            Self::Middle => 2,
        }
    }
}

/// Finger-count tool classification; at most one flag is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ToolState {
    pub one: bool,
    pub two: bool,
    pub three: bool,
    pub four: bool,
}

impl ToolState {
    /// Classification for a number of active contacts.
    pub fn from_count(count: usize) -> Self {
        Self {
            one: count == 1,
            two: count == 2,
            three: count == 3,
            four: count == 4,
        }
    }
}

/// Everything the core can tell an input sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    /// A new contact appeared in `slot`.
    TrackingId { slot: u8, id: u16 },
    /// `slot` holds no contact.
    ClearTrackingId { slot: u8 },
    Position { slot: u8, x: i32, y: i32 },
    Pressure { slot: u8, value: u8 },
    ContactSize { slot: u8, major: u8, minor: u8 },
    Tool(ToolState),
    Button { button: Button, pressed: bool },
    RelativeMotion { dx: i16, dy: i16 },
    /// End of one processed frame.
    Sync,
}

/// Consumer of decoded events (an evdev device, a logger, a test recorder).
pub trait InputSink: Send {
    /// Register capabilities and expose the device. Called at most once per success.
    fn start(&mut self, caps: &Capabilities) -> Result<()>;

    /// Replace the ranges of an already started sink once the device reports
    /// its own. Sinks that cannot change ranges keep the default no-op.
    fn update(&mut self, caps: &Capabilities) -> Result<()> {
        let _ = caps;
        Ok(())
    }

    /// Deliver one event.
    fn emit(&mut self, event: InputEvent);
}

/// Sink shared between the report path and the negotiation task.
pub type SharedSink = Arc<Mutex<Box<dyn InputSink>>>;

/// Wrap a sink for sharing.
pub fn shared_sink(sink: impl InputSink + 'static) -> SharedSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// A recording sink for testing.
#[cfg(test)]
pub mod mock {
    use super::*;

    #[derive(Debug, Default)]
    pub struct Recording {
        pub starts: Vec<Capabilities>,
        pub updates: Vec<Capabilities>,
        pub events: Vec<InputEvent>,
    }

    /// Sink that records everything into a shared buffer.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub log: Arc<Mutex<Recording>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Drain recorded events.
        pub fn take_events(&self) -> Vec<InputEvent> {
            std::mem::take(&mut self.log.lock().unwrap().events)
        }

        pub fn start_count(&self) -> usize {
            self.log.lock().unwrap().starts.len()
        }

        pub fn last_caps(&self) -> Option<Capabilities> {
            self.log.lock().unwrap().starts.last().copied()
        }

        pub fn updates(&self) -> Vec<Capabilities> {
            self.log.lock().unwrap().updates.clone()
        }
    }

    impl InputSink for RecordingSink {
        fn start(&mut self, caps: &Capabilities) -> Result<()> {
            self.log.lock().unwrap().starts.push(*caps);
            Ok(())
        }

        fn update(&mut self, caps: &Capabilities) -> Result<()> {
            self.log.lock().unwrap().updates.push(*caps);
            Ok(())
        }

        fn emit(&mut self, event: InputEvent) {
            self.log.lock().unwrap().events.push(event);
        }
    }
}
