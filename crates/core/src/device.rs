//! Supported touch devices and their per-model quirks.

use crate::hidpp::features;
use crate::pids;
use serde::{Deserialize, Serialize};

/// Report protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Touch mice: fixed-slot raw points, pointer reports, three button sources.
    TouchMouse,
    /// Touchpads: dual-touch reports keyed by finger id.
    Touchpad,
}

/// Supported Logitech touch devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    ZoneTouchMouseT400,
    TouchMouseT620,
    WirelessTouchpad,
    TouchpadT650,
}

/// Surface size every wireless touchpad is expected to report.
pub const TOUCHPAD_EXPECTED_SIZE: (u16, u16) = (3700, 2480);
/// Slots on the wireless touchpads.
pub const TOUCHPAD_SLOTS: u8 = 5;
/// Finger records that fit in one raw-points event.
pub const TOUCH_MOUSE_MAX_RECORDS: u8 = 4;

impl DeviceKind {
    pub const ALL: &'static [DeviceKind] = &[
        DeviceKind::ZoneTouchMouseT400,
        DeviceKind::TouchMouseT620,
        DeviceKind::WirelessTouchpad,
        DeviceKind::TouchpadT650,
    ];

    /// Look up model from its Unifying product ID.
    pub fn from_pid(pid: u16) -> Option<Self> {
        match pid {
            pids::ZONE_TOUCH_MOUSE_T400 => Some(Self::ZoneTouchMouseT400),
            pids::TOUCH_MOUSE_T620 => Some(Self::TouchMouseT620),
            pids::WIRELESS_TOUCHPAD => Some(Self::WirelessTouchpad),
            pids::TOUCHPAD_T650 => Some(Self::TouchpadT650),
            _ => None,
        }
    }

    /// Parse a CLI-friendly model name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "t400" | "zone-touch-mouse-t400" => Some(Self::ZoneTouchMouseT400),
            "t620" | "touch-mouse-t620" => Some(Self::TouchMouseT620),
            "wtp" | "wireless-touchpad" => Some(Self::WirelessTouchpad),
            "t650" | "touchpad-t650" => Some(Self::TouchpadT650),
            _ => None,
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ZoneTouchMouseT400 => "Logitech Zone Touch Mouse T400",
            Self::TouchMouseT620 => "Logitech Touch Mouse T620",
            Self::WirelessTouchpad => "Logitech Wireless Touchpad",
            Self::TouchpadT650 => "Logitech Wireless Rechargeable Touchpad T650",
        }
    }

    /// Unifying product ID.
    pub fn pid(&self) -> u16 {
        match self {
            Self::ZoneTouchMouseT400 => pids::ZONE_TOUCH_MOUSE_T400,
            Self::TouchMouseT620 => pids::TOUCH_MOUSE_T620,
            Self::WirelessTouchpad => pids::WIRELESS_TOUCHPAD,
            Self::TouchpadT650 => pids::TOUCHPAD_T650,
        }
    }

    pub fn variant(&self) -> Variant {
        match self {
            Self::ZoneTouchMouseT400 | Self::TouchMouseT620 => Variant::TouchMouse,
            Self::WirelessTouchpad | Self::TouchpadT650 => Variant::Touchpad,
        }
    }

    /// The T620 duplicates buttons in its pointer report; those bits are ignored.
    pub fn ignores_pointer_buttons(&self) -> bool {
        matches!(self, Self::TouchMouseT620)
    }

    /// Logical ID of the raw touch feature.
    pub fn touch_feature(&self) -> u16 {
        match self.variant() {
            Variant::TouchMouse => features::TOUCH_MOUSE_RAW_POINTS,
            Variant::Touchpad => features::TOUCHPAD_RAW_XY,
        }
    }

    /// Logical ID of the secondary button feature, if the model has one.
    pub fn aux_button_feature(&self) -> Option<u16> {
        match self.variant() {
            Variant::TouchMouse => Some(features::TOUCH_MOUSE_AUX_BUTTONS),
            Variant::Touchpad => None,
        }
    }

    /// Surface size assumed for the model, when it is fixed.
    pub fn expected_size(&self) -> Option<(u16, u16)> {
        match self.variant() {
            Variant::TouchMouse => None,
            Variant::Touchpad => Some(TOUCHPAD_EXPECTED_SIZE),
        }
    }

    /// Flags for the raw-mode enable command.
    pub fn raw_mode_flags(&self) -> RawModeFlags {
        match self.variant() {
            Variant::TouchMouse => RawModeFlags {
                send_raw_reports: true,
                force_area_reporting: true,
                enhanced_sensor_settings: false,
            },
            Variant::Touchpad => RawModeFlags {
                send_raw_reports: true,
                force_area_reporting: true,
                enhanced_sensor_settings: true,
            },
        }
    }

    /// The input sink is only started once raw mode is confirmed.
    pub fn defers_sink_start(&self) -> bool {
        self.variant() == Variant::TouchMouse
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Options of the raw-mode enable command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawModeFlags {
    pub send_raw_reports: bool,
    pub force_area_reporting: bool,
    pub enhanced_sensor_settings: bool,
}

impl RawModeFlags {
    /// Bitmask sent as the single command parameter.
    pub fn bits(&self) -> u8 {
        self.send_raw_reports as u8
            | (self.force_area_reporting as u8) << 1
            | (self.enhanced_sensor_settings as u8) << 2
    }
}
