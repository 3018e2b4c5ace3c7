//! Touch surface geometry and the input capabilities derived from it.

use crate::error::{Error, Result};
use serde::Serialize;

/// Corner of the touch surface the device reports as coordinate origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    LowerLeft,
    LowerRight,
    UpperLeft,
    UpperRight,
}

impl Origin {
    /// Decode the origin byte of a geometry response.
    ///
    /// Unknown codes fall back to `UpperLeft`, which leaves coordinates untouched.
    pub fn from_wire(code: u8) -> Self {
        match code {
            1 => Self::LowerLeft,
            2 => Self::LowerRight,
            3 => Self::UpperLeft,
            4 => Self::UpperRight,
            _ => Self::UpperLeft,
        }
    }

    /// X axis runs right to left.
    pub fn flips_x(&self) -> bool {
        matches!(self, Self::LowerRight | Self::UpperRight)
    }

    /// Y axis runs bottom to top.
    pub fn flips_y(&self) -> bool {
        matches!(self, Self::LowerLeft | Self::LowerRight)
    }
}

/// Touch surface description reported by the device during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TouchpadGeometry {
    pub x_size: u16,
    pub y_size: u16,
    /// Dots per inch; 0 when the device does not report it.
    pub resolution: u16,
    pub origin: Origin,
    pub max_fingers: u8,
    pub max_contact_width: u8,
}

/// Length of the touch mouse geometry response.
pub const MOUSE_GEOMETRY_LEN: usize = 9;
/// Length of the touchpad raw-info response.
pub const TOUCHPAD_GEOMETRY_LEN: usize = 8;

impl TouchpadGeometry {
    /// Parse the touch mouse raw-points info response.
    ///
    /// Layout: x_size BE, y_size BE, resolution BE, origin, max fingers, max width.
    pub fn from_mouse_params(params: &[u8]) -> Result<Self> {
        if params.len() < MOUSE_GEOMETRY_LEN {
            return Err(Error::MalformedRecord {
                record: "mouse geometry",
                len: params.len(),
                expected: MOUSE_GEOMETRY_LEN,
            });
        }
        Ok(Self {
            x_size: u16::from_be_bytes([params[0], params[1]]),
            y_size: u16::from_be_bytes([params[2], params[3]]),
            resolution: u16::from_be_bytes([params[4], params[5]]),
            origin: Origin::from_wire(params[6]),
            max_fingers: params[7],
            max_contact_width: params[8],
        })
    }

    /// Parse the touchpad raw-info response.
    ///
    /// Layout: x_size BE, y_size BE, z range, area range, timestamp unit,
    /// origin. The finger count is fixed per model and passed in.
    pub fn from_touchpad_params(params: &[u8], max_fingers: u8) -> Result<Self> {
        if params.len() < TOUCHPAD_GEOMETRY_LEN {
            return Err(Error::MalformedRecord {
                record: "touchpad geometry",
                len: params.len(),
                expected: TOUCHPAD_GEOMETRY_LEN,
            });
        }
        Ok(Self {
            x_size: u16::from_be_bytes([params[0], params[1]]),
            y_size: u16::from_be_bytes([params[2], params[3]]),
            resolution: 0,
            origin: Origin::from_wire(params[7]),
            max_fingers,
            max_contact_width: params[5],
        })
    }

    /// Map a raw device coordinate into top-left-origin space.
    pub fn transform(&self, x: u16, y: u16) -> (i32, i32) {
        let mut x = x as i32;
        let mut y = y as i32;
        if self.origin.flips_x() {
            x = self.x_size as i32 - x;
        }
        if self.origin.flips_y() {
            y = self.y_size as i32 - y;
        }
        (x, y)
    }

    /// Compare against the size a model is known to have.
    pub fn check_expected_size(&self, expected: (u16, u16)) -> Result<()> {
        if (self.x_size, self.y_size) != expected {
            return Err(Error::UnsupportedGeometry {
                expected_x: expected.0,
                expected_y: expected.1,
                reported_x: self.x_size,
                reported_y: self.y_size,
            });
        }
        Ok(())
    }
}

/// Axis and key ranges announced to the input sink when it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub x_max: u16,
    pub y_max: u16,
    pub pressure_max: u16,
    pub contact_width_max: u8,
    /// Number of multi-touch slots; 0 for pointer-only sinks.
    pub slots: u8,
    /// Highest finger-count tool bit the device can report (0..=4).
    pub max_tool_fingers: u8,
    /// Relative X/Y axes are reported.
    pub relative: bool,
}

impl Capabilities {
    /// Touch mouse capabilities once the device geometry is known.
    pub fn for_touch_mouse(geometry: &TouchpadGeometry, slots: u8) -> Self {
        let width = geometry.max_contact_width as u16;
        Self {
            x_max: geometry.x_size,
            y_max: geometry.y_size,
            pressure_max: (width * width).max(255),
            contact_width_max: geometry.max_contact_width,
            slots,
            max_tool_fingers: geometry.max_fingers.min(4),
            relative: true,
        }
    }

    /// Touchpad capabilities, announced before negotiation using the model's fixed size.
    pub fn for_touchpad(size: (u16, u16), slots: u8) -> Self {
        Self {
            x_max: size.0,
            y_max: size.1,
            pressure_max: 255,
            contact_width_max: 255,
            slots,
            max_tool_fingers: 4,
            relative: false,
        }
    }

    /// Pointer-only capabilities used in legacy mode.
    pub fn pointer_only() -> Self {
        Self {
            x_max: 0,
            y_max: 0,
            pressure_max: 0,
            contact_width_max: 0,
            slots: 0,
            max_tool_fingers: 0,
            relative: true,
        }
    }
}
