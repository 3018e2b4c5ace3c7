//! Multi-touch contact tracking.
//!
//! Turns decoded touch records into slot lifecycle events. Two protocols
//! feed it: touch mice report every slot in every frame (slot = record
//! position), touchpads report up to two fingers per report keyed by a
//! 1-based finger id and close frames with an end-of-frame marker.

use crate::codec::{DualTouchReport, TouchRecord};
use crate::event::{InputEvent, ToolState};
use crate::geometry::TouchpadGeometry;
use tracing::debug;

/// Tracking id meaning "no contact".
pub const NO_TRACKING_ID: u16 = 0;
/// Reserved value at which the allocator wraps.
pub const TRACKING_ID_WRAP: u16 = 0xFFFF;

/// Hands out tracking ids in `1..=0xFFFE`, wrapping back to 1.
#[derive(Debug, Clone)]
pub struct TrackingIdAllocator {
    next: u16,
}

impl Default for TrackingIdAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl TrackingIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id; never 0 or 0xFFFF.
    pub fn allocate(&mut self) -> u16 {
        let id = self.next;
        self.next += 1;
        if self.next == TRACKING_ID_WRAP {
            self.next = 1;
        }
        id
    }
}

/// State of one multi-touch slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContactSlot {
    pub active: bool,
    pub tracking_id: u16,
    pub seen_this_frame: bool,
}

/// Fixed array of slots plus the id allocator.
#[derive(Debug, Clone)]
pub struct ContactTracker {
    slots: Vec<ContactSlot>,
    ids: TrackingIdAllocator,
}

impl ContactTracker {
    pub fn new(max_slots: usize) -> Self {
        Self {
            slots: vec![ContactSlot::default(); max_slots],
            ids: TrackingIdAllocator::new(),
        }
    }

    pub fn slots(&self) -> &[ContactSlot] {
        &self.slots
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }

    /// Activate `index` with a fresh id that no active slot holds.
    fn activate(&mut self, index: usize, out: &mut Vec<InputEvent>) {
        let id = loop {
            let candidate = self.ids.allocate();
            if !self
                .slots
                .iter()
                .any(|s| s.active && s.tracking_id == candidate)
            {
                break candidate;
            }
        };
        let slot = &mut self.slots[index];
        slot.active = true;
        slot.tracking_id = id;
        out.push(InputEvent::TrackingId {
            slot: index as u8,
            id,
        });
    }

    fn retire(&mut self, index: usize, out: &mut Vec<InputEvent>) {
        let slot = &mut self.slots[index];
        slot.active = false;
        slot.tracking_id = NO_TRACKING_ID;
        out.push(InputEvent::ClearTrackingId { slot: index as u8 });
    }

    /// Process one touch mouse frame: record `i` describes slot `i`.
    ///
    /// Records beyond the slot array are ignored.
    pub fn process_fixed_slots(
        &mut self,
        records: &[TouchRecord],
        geometry: &TouchpadGeometry,
        out: &mut Vec<InputEvent>,
    ) {
        if records.len() > self.slots.len() {
            debug!(
                records = records.len(),
                slots = self.slots.len(),
                "Ignoring touch records beyond slot array"
            );
        }
        for (index, record) in records.iter().enumerate().take(self.slots.len()) {
            match *record {
                TouchRecord::NoContact => {
                    self.slots[index].seen_this_frame = false;
                    self.retire(index, out);
                }
                TouchRecord::Contact {
                    x,
                    y,
                    width_x,
                    width_y,
                } => {
                    self.slots[index].seen_this_frame = true;
                    if !self.slots[index].active {
                        self.activate(index, out);
                    }
                    let (x, y) = geometry.transform(x, y);
                    let slot = index as u8;
                    out.push(InputEvent::Position { slot, x, y });
                    out.push(InputEvent::Pressure {
                        slot,
                        value: record.pressure(),
                    });
                    out.push(InputEvent::ContactSize {
                        slot,
                        major: width_x.max(width_y),
                        minor: width_x.min(width_y),
                    });
                }
            }
        }
        out.push(InputEvent::Tool(ToolState::from_count(self.active_count())));
    }

    /// Process one dual-touch report. Returns true when it closed a frame.
    ///
    /// Slots that were not refreshed are retired only at a frame boundary, so
    /// a contact survives the partial reports of a multi-report frame.
    pub fn process_dual_touch(
        &mut self,
        report: &DualTouchReport,
        geometry: &TouchpadGeometry,
        out: &mut Vec<InputEvent>,
    ) -> bool {
        for finger in report.fingers.iter().flatten() {
            let Some(index) = (finger.finger_id as usize)
                .checked_sub(1)
                .filter(|i| *i < self.slots.len())
            else {
                debug!(finger_id = finger.finger_id, "Finger id outside slot array");
                continue;
            };

            self.slots[index].seen_this_frame = true;
            if !finger.touching {
                self.retire(index, out);
                continue;
            }
            if !self.slots[index].active {
                self.activate(index, out);
            }
            let (x, y) = geometry.transform(finger.x, finger.y);
            let slot = index as u8;
            out.push(InputEvent::Position { slot, x, y });
            out.push(InputEvent::Pressure {
                slot,
                value: finger.area,
            });
        }

        if !report.is_frame_boundary() {
            return false;
        }

        for index in 0..self.slots.len() {
            if !self.slots[index].seen_this_frame && self.slots[index].active {
                self.retire(index, out);
            }
            self.slots[index].seen_this_frame = false;
        }
        out.push(InputEvent::Tool(ToolState::from_count(self.active_count())));
        true
    }
}
