//! HID++ command envelope encoding and decoding.
//!
//! HID++ uses two report formats:
//! - Short reports: 7 bytes (report ID 0x10)
//! - Long reports: 20 bytes (report ID 0x11)
//!
//! Every command carries the target feature index, a function nibble and the
//! software ID nibble that tells the device which host stack issued it.

use crate::error::{Error, Result};

/// HID++ report ID for short messages (7 bytes total).
pub const SHORT_REPORT_ID: u8 = 0x10;
/// HID++ report ID for long messages (20 bytes total).
pub const LONG_REPORT_ID: u8 = 0x11;

/// Short report length (including report ID).
pub const SHORT_REPORT_LEN: usize = 7;
/// Long report length (including report ID).
pub const LONG_REPORT_LEN: usize = 20;

/// Maximum number of parameter bytes in a short report.
pub const SHORT_PARAMS_LEN: usize = SHORT_REPORT_LEN - 4;
/// Maximum number of parameter bytes in a long report.
pub const LONG_PARAMS_LEN: usize = LONG_REPORT_LEN - 4;

/// Software ID placed in the low nibble of every request.
pub const SOFTWARE_ID: u8 = 0x0B;

/// Feature index byte of a HID++ 2.0 error report.
pub const ERROR_FEATURE_INDEX: u8 = 0xFF;
/// Sub ID byte of a HID++ 1.0 error report.
pub const ERROR_SUB_ID_V10: u8 = 0x8F;

/// HID++ 2.0 logical feature IDs used by touch devices.
pub mod features {
    /// Root feature: protocol version and feature index lookup.
    pub const ROOT: u16 = 0x0000;
    /// Auxiliary button reporting on touch mice.
    pub const TOUCH_MOUSE_AUX_BUTTONS: u16 = 0x1B03;
    /// Raw touch points on touch mice.
    pub const TOUCH_MOUSE_RAW_POINTS: u16 = 0x6110;
    /// Raw XY reporting on touchpads.
    pub const TOUCHPAD_RAW_XY: u16 = 0x6100;
}

/// Which HID++ report format carries a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Short,
    Long,
}

impl ReportKind {
    /// Leading report ID byte.
    pub fn report_id(&self) -> u8 {
        match self {
            Self::Short => SHORT_REPORT_ID,
            Self::Long => LONG_REPORT_ID,
        }
    }

    /// Total report length including the report ID.
    pub fn len(&self) -> usize {
        match self {
            Self::Short => SHORT_REPORT_LEN,
            Self::Long => LONG_REPORT_LEN,
        }
    }

    fn max_params(&self) -> usize {
        self.len() - 4
    }
}

/// A HID++ request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidppRequest {
    /// Report format used on the wire.
    pub report_kind: ReportKind,
    /// Device index on the receiver (0x01..0x06 for paired devices).
    pub device_index: u8,
    /// Feature index (looked up from feature ID via ROOT feature).
    pub feature_index: u8,
    /// Function ID within the feature (bits 7:4) and software ID (bits 3:0).
    pub function_sw: u8,
    /// Parameter bytes (up to 3 for short, up to 16 for long).
    pub params: Vec<u8>,
}

impl HidppRequest {
    /// Create a new request, choosing the short format when the params fit.
    pub fn new(device_index: u8, feature_index: u8, function: u8, params: Vec<u8>) -> Self {
        let report_kind = if params.len() <= SHORT_PARAMS_LEN {
            ReportKind::Short
        } else {
            ReportKind::Long
        };
        Self {
            report_kind,
            device_index,
            feature_index,
            function_sw: pack_function_sw(function),
            params,
        }
    }

    /// Function nibble of this request.
    pub fn function(&self) -> u8 {
        self.function_sw >> 4
    }

    /// Encode into a HID report byte array, zero padded to the report length.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let max = self.report_kind.max_params();
        if self.params.len() > max {
            return Err(Error::MalformedRecord {
                record: "request params",
                len: self.params.len(),
                expected: max,
            });
        }

        let mut buf = vec![0u8; self.report_kind.len()];
        buf[0] = self.report_kind.report_id();
        buf[1] = self.device_index;
        buf[2] = self.feature_index;
        buf[3] = self.function_sw;
        buf[4..4 + self.params.len()].copy_from_slice(&self.params);
        Ok(buf)
    }
}

/// Pack a function nibble with this stack's software ID.
pub fn pack_function_sw(function: u8) -> u8 {
    ((function & 0x0F) << 4) | SOFTWARE_ID
}

/// A decoded HID++ response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidppResponse {
    /// Whether this is a long report.
    pub is_long: bool,
    /// Device index.
    pub device_index: u8,
    /// Feature index (or an error marker).
    pub feature_index: u8,
    /// Function and software ID byte.
    pub function_sw: u8,
    /// Response payload bytes.
    pub params: Vec<u8>,
}

impl HidppResponse {
    /// Decode a raw HID report into a structured response.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < SHORT_REPORT_LEN {
            return Err(Error::MalformedRecord {
                record: "response",
                len: data.len(),
                expected: SHORT_REPORT_LEN,
            });
        }

        let (is_long, expected_len) = match data[0] {
            SHORT_REPORT_ID => (false, SHORT_REPORT_LEN),
            LONG_REPORT_ID => (true, LONG_REPORT_LEN),
            other => {
                return Err(Error::Hid(format!("unknown report ID: 0x{other:02X}")));
            }
        };

        if data.len() < expected_len {
            return Err(Error::MalformedRecord {
                record: "response",
                len: data.len(),
                expected: expected_len,
            });
        }

        Ok(Self {
            is_long,
            device_index: data[1],
            feature_index: data[2],
            function_sw: data[3],
            params: data[4..expected_len].to_vec(),
        })
    }

    /// Extract the function ID from the function_sw byte.
    pub fn function(&self) -> u8 {
        self.function_sw >> 4
    }

    /// Check if this response is a HID++ 2.0 or 1.0 error report.
    pub fn is_error(&self) -> bool {
        self.feature_index == ERROR_FEATURE_INDEX || self.feature_index == ERROR_SUB_ID_V10
    }

    /// Error code carried by an error report.
    ///
    /// Error reports echo the failed feature index in byte 3 and the failed
    /// function byte in byte 4; the code follows in byte 5.
    pub fn error_code(&self) -> u8 {
        self.params.get(1).copied().unwrap_or(0)
    }

    /// Whether this report answers the given request (success or error).
    pub fn answers(&self, req: &HidppRequest) -> bool {
        if self.device_index != req.device_index {
            return false;
        }
        if self.is_error() {
            return self.function_sw == req.feature_index
                && self.params.first() == Some(&req.function_sw);
        }
        self.feature_index == req.feature_index && self.function_sw == req.function_sw
    }
}
