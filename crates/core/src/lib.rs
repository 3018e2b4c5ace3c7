//! hidpp-touch-core: HID++ touch report decoding and raw-mode negotiation.
//!
//! Decodes reports from Logitech touch mice and wireless touchpads into a
//! multi-touch contact stream and button state, and drives the HID++ 2.0
//! handshake that switches a device into raw reporting.

pub mod buttons;
pub mod codec;
pub mod config;
pub mod device;
pub mod directory;
pub mod error;
pub mod event;
pub mod geometry;
pub mod hidpp;
pub mod negotiate;
pub mod session;
pub mod tracker;
pub mod transport;

/// Logitech USB Vendor ID.
pub const LOGITECH_VID: u16 = 0x046D;

/// Unifying product IDs of the supported touch devices.
pub mod pids {
    /// Zone Touch Mouse T400.
    pub const ZONE_TOUCH_MOUSE_T400: u16 = 0x4026;
    /// Touch Mouse T620.
    pub const TOUCH_MOUSE_T620: u16 = 0x4027;
    /// Wireless Touchpad.
    pub const WIRELESS_TOUCHPAD: u16 = 0x4011;
    /// Wireless Rechargeable Touchpad T650.
    pub const TOUCHPAD_T650: u16 = 0x4101;
}
