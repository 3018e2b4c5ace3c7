//! Wire codec: bounds-checked field extraction from incoming reports.
//!
//! Every function here is pure. A slice shorter than its record layout
//! yields `Error::MalformedRecord` and nothing is partially decoded.

use crate::error::{Error, Result};
use crate::hidpp::LONG_REPORT_LEN;

/// Report ID of the pointer (relative motion) report.
pub const MOUSE_REPORT_ID: u8 = 0x02;
/// Report ID of HID++ long feature events.
pub const FEATURE_EVENT_REPORT_ID: u8 = 0x11;

/// Bytes in the relative-motion report up to the last motion byte.
pub const RELATIVE_REPORT_LEN: usize = 6;
/// Bytes per touch mouse finger record.
pub const TOUCH_RECORD_LEN: usize = 4;
/// Bytes per dual-touch sub-record.
pub const DUAL_TOUCH_RECORD_LEN: usize = 7;
/// Offset of the first parameter byte in a feature event.
pub const FEATURE_PARAMS_OFFSET: usize = 4;

const SENTINEL_RECORD: [u8; TOUCH_RECORD_LEN] = [0xFF; TOUCH_RECORD_LEN];

fn require(record: &'static str, bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() < expected {
        return Err(Error::MalformedRecord {
            record,
            len: bytes.len(),
            expected,
        });
    }
    Ok(())
}

/// An incoming report, classified by its leading report ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report<'a> {
    /// Pointer report with button bits and relative motion.
    Pointer(PointerReport),
    /// HID++ feature event.
    Feature(FeatureEvent<'a>),
    /// Any other report ID; not interpreted here.
    Other(u8),
}

/// Decoded pointer report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerReport {
    /// Bit 0 left, bit 1 right, bit 2 middle.
    pub buttons: u8,
    pub dx: i16,
    pub dy: i16,
}

/// A HID++ feature event: `0x11, device index, feature index, sub-event | sw, params...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureEvent<'a> {
    pub feature_index: u8,
    /// High nibble of byte 3.
    pub sub_event: u8,
    /// The whole report, so sub-decoders can address absolute offsets.
    pub bytes: &'a [u8],
}

impl<'a> FeatureEvent<'a> {
    /// Parameter bytes following the 4-byte header.
    pub fn params(&self) -> &'a [u8] {
        &self.bytes[FEATURE_PARAMS_OFFSET..]
    }
}

/// Classify a report and decode its header.
pub fn parse_report(bytes: &[u8]) -> Result<Report<'_>> {
    let Some(&report_id) = bytes.first() else {
        return Err(Error::MalformedRecord {
            record: "report",
            len: 0,
            expected: 1,
        });
    };
    match report_id {
        MOUSE_REPORT_ID => decode_pointer_report(bytes).map(Report::Pointer),
        FEATURE_EVENT_REPORT_ID => {
            require("feature event", bytes, LONG_REPORT_LEN)?;
            Ok(Report::Feature(FeatureEvent {
                feature_index: bytes[2],
                sub_event: bytes[3] >> 4,
                bytes: &bytes[..LONG_REPORT_LEN],
            }))
        }
        other => Ok(Report::Other(other)),
    }
}

/// Sign-extend a 12-bit two's-complement value.
fn sign_extend_12(raw: u16) -> i16 {
    ((raw << 4) as i16) >> 4
}

/// Decode the pointer report: buttons in byte 1, two 12-bit deltas in bytes 3..6.
pub fn decode_pointer_report(bytes: &[u8]) -> Result<PointerReport> {
    require("pointer", bytes, RELATIVE_REPORT_LEN)?;
    let raw_x = bytes[3] as u16 | ((bytes[4] & 0x0F) as u16) << 8;
    let raw_y = (bytes[5] as u16) << 4 | (bytes[4] >> 4) as u16;
    Ok(PointerReport {
        buttons: bytes[1],
        dx: sign_extend_12(raw_x),
        dy: sign_extend_12(raw_y),
    })
}

/// One touch mouse finger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchRecord {
    /// Sentinel record: the slot holds no finger.
    NoContact,
    Contact {
        x: u16,
        y: u16,
        width_x: u8,
        width_y: u8,
    },
}

impl TouchRecord {
    /// Pressure synthesized from the contact area.
    pub fn pressure(&self) -> u8 {
        match self {
            Self::NoContact => 0,
            Self::Contact {
                width_x, width_y, ..
            } => (*width_x as u16 * *width_y as u16 * 3).clamp(30, 255) as u8,
        }
    }
}

/// Decode a 4-byte `{x_hi, y_hi, xy_lo, wh}` finger record.
pub fn decode_touch_record(bytes: &[u8]) -> Result<TouchRecord> {
    require("touch", bytes, TOUCH_RECORD_LEN)?;
    let rec = &bytes[..TOUCH_RECORD_LEN];
    if rec == SENTINEL_RECORD {
        return Ok(TouchRecord::NoContact);
    }
    Ok(TouchRecord::Contact {
        x: (rec[0] as u16) << 4 | (rec[2] & 0x0F) as u16,
        y: (rec[1] as u16) << 4 | (rec[2] >> 4) as u16,
        width_x: (rec[3] >> 4) + 1,
        width_y: (rec[3] & 0x0F) + 1,
    })
}

/// Decode `count` consecutive finger records from a raw-points event's params.
pub fn decode_touch_records(params: &[u8], count: usize) -> Result<Vec<TouchRecord>> {
    require("touch frame", params, count * TOUCH_RECORD_LEN)?;
    params
        .chunks_exact(TOUCH_RECORD_LEN)
        .take(count)
        .map(decode_touch_record)
        .collect()
}

/// One finger from a dual-touch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerTouch {
    /// 1-based finger identifier.
    pub finger_id: u8,
    pub contact_type: u8,
    /// Finger is on the surface.
    pub touching: bool,
    pub x: u16,
    pub y: u16,
    pub z: u8,
    pub area: u8,
}

/// A decoded dual-touch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DualTouchReport {
    pub timestamp: u16,
    pub end_of_frame: bool,
    pub spurious: bool,
    /// Total fingers in the logical frame.
    pub finger_count: u8,
    /// Valid sub-records, in report order.
    pub fingers: [Option<FingerTouch>; 2],
}

impl DualTouchReport {
    /// Whether this report closes a frame.
    pub fn is_frame_boundary(&self) -> bool {
        self.end_of_frame || self.finger_count <= 2
    }
}

fn decode_finger(rec: &[u8]) -> FingerTouch {
    let x_m = rec[0] << 2;
    let y_m = rec[2] << 2;
    FingerTouch {
        finger_id: rec[6] >> 4,
        contact_type: rec[0] >> 6,
        touching: rec[2] >> 6 != 0,
        x: (x_m as u16) << 6 | rec[1] as u16,
        y: (y_m as u16) << 6 | rec[3] as u16,
        z: rec[4],
        area: rec[5],
    }
}

/// Decode a 20-byte dual-touch feature event.
///
/// Frame flags sit in the low nibbles of the two id bytes: bit 0 of the
/// first is end-of-frame, bit 1 is spurious, the second carries the count.
pub fn decode_dual_touch(bytes: &[u8]) -> Result<DualTouchReport> {
    require("dual touch", bytes, LONG_REPORT_LEN)?;
    let first = &bytes[6..6 + DUAL_TOUCH_RECORD_LEN];
    let second = &bytes[13..13 + DUAL_TOUCH_RECORD_LEN];

    let end_of_frame = first[6] & 0x01 != 0;
    let spurious = (first[6] >> 1) & 0x01 != 0;
    let finger_count = second[6] & 0x0F;

    let mut fingers = [None, None];
    if finger_count > 0 {
        fingers[0] = Some(decode_finger(first));
        if (end_of_frame && finger_count == 4) || (!end_of_frame && finger_count >= 2) {
            fingers[1] = Some(decode_finger(second));
        }
    }

    Ok(DualTouchReport {
        timestamp: u16::from_be_bytes([bytes[4], bytes[5]]),
        end_of_frame,
        spurious,
        finger_count,
        fingers,
    })
}
