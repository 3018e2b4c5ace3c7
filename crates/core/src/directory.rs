//! Feature directory: resolves logical HID++ features to device indices and
//! issues the touch feature commands.
//!
//! Root feature (index 0x00):
//!   - Function 0: getFeatureID(feature id BE) → params[0] = feature index
//!   - Function 1: getProtocolVersion → params[0] = major, params[1] = minor
//!
//! Touch features (raw points / raw XY):
//!   - Function 0: getTouchpadInfo → geometry
//!   - Function 2: setRawReportState(flags)

use crate::device::{RawModeFlags, Variant};
use crate::error::{Error, Result};
use crate::geometry::TouchpadGeometry;
use crate::hidpp::{features, HidppRequest};
use crate::transport::{hidpp_request, CommandTransport};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

const ROOT_INDEX: u8 = 0x00;
const FN_GET_FEATURE: u8 = 0x00;
const FN_GET_PROTOCOL_VERSION: u8 = 0x01;
const FN_GET_TOUCH_INFO: u8 = 0x00;
const FN_SET_RAW_REPORT_STATE: u8 = 0x02;

/// HID++ protocol version reported by the root feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

/// Logical feature ID → device-assigned feature index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeatureTable {
    entries: BTreeMap<u16, u8>,
}

impl FeatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feature_id: u16, index: u8) {
        self.entries.insert(feature_id, index);
    }

    /// Device index of a feature; `None` until resolved or when the device lacks it.
    pub fn index_of(&self, feature_id: u16) -> Option<u8> {
        self.entries.get(&feature_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Synchronous query interface to one device's features.
pub struct FeatureDirectory<'a> {
    transport: &'a dyn CommandTransport,
    device_index: u8,
}

impl<'a> FeatureDirectory<'a> {
    pub fn new(transport: &'a dyn CommandTransport, device_index: u8) -> Self {
        Self {
            transport,
            device_index,
        }
    }

    /// Ask the root feature for the protocol version. Advisory only.
    pub fn query_root_version(&self) -> Result<ProtocolVersion> {
        let req = HidppRequest::new(
            self.device_index,
            ROOT_INDEX,
            FN_GET_PROTOCOL_VERSION,
            vec![],
        );
        let resp = hidpp_request(self.transport, &req)?;
        Ok(ProtocolVersion {
            major: resp.params[0],
            minor: resp.params[1],
        })
    }

    /// Look up the feature index for a logical feature ID.
    pub fn resolve_feature(&self, feature_id: u16) -> Result<u8> {
        let req = HidppRequest::new(
            self.device_index,
            ROOT_INDEX,
            FN_GET_FEATURE,
            feature_id.to_be_bytes().to_vec(),
        );
        let resp = hidpp_request(self.transport, &req)?;

        let feature_index = resp.params[0];
        if feature_index == 0 && feature_id != features::ROOT {
            debug!(
                feature_id = format_args!("0x{:04X}", feature_id),
                "Feature not supported by device"
            );
            return Err(Error::FeatureNotFound(feature_id));
        }

        debug!(
            feature_id = format_args!("0x{:04X}", feature_id),
            feature_index = feature_index,
            "Feature lookup success"
        );
        Ok(feature_index)
    }

    /// Read the touch surface description from the resolved touch feature.
    pub fn query_geometry(
        &self,
        feature_index: u8,
        variant: Variant,
        max_slots: u8,
    ) -> Result<TouchpadGeometry> {
        let req = HidppRequest::new(self.device_index, feature_index, FN_GET_TOUCH_INFO, vec![]);
        let resp = hidpp_request(self.transport, &req)?;
        let geometry = match variant {
            Variant::TouchMouse => TouchpadGeometry::from_mouse_params(&resp.params)?,
            Variant::Touchpad => TouchpadGeometry::from_touchpad_params(&resp.params, max_slots)?,
        };
        debug!(
            x_size = geometry.x_size,
            y_size = geometry.y_size,
            origin = ?geometry.origin,
            max_fingers = geometry.max_fingers,
            "Touch geometry"
        );
        Ok(geometry)
    }

    /// Switch the touch feature into raw reporting.
    pub fn enable_raw_mode(&self, feature_index: u8, flags: RawModeFlags) -> Result<()> {
        let req = HidppRequest::new(
            self.device_index,
            feature_index,
            FN_SET_RAW_REPORT_STATE,
            vec![flags.bits()],
        );
        hidpp_request(self.transport, &req)?;
        debug!(
            feature_index = feature_index,
            flags = format_args!("0x{:02X}", flags.bits()),
            "Raw mode requested"
        );
        Ok(())
    }
}
