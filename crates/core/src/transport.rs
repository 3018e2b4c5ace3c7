//! Synchronous command transport abstraction.
//!
//! Real devices and the test mock share the same interface. Implementations
//! own the request/response timeout; this layer only frames, logs, and
//! checks for HID++ error replies.

use crate::error::{Error, Result};
use crate::hidpp::{HidppRequest, HidppResponse};
use tracing::{trace, warn};

/// Abstraction over a blocking HID++ command/response exchange.
///
/// `send_report` writes one encoded request and returns the raw bytes of the
/// matching response, or `Error::Timeout` when none arrives in time.
pub trait CommandTransport: Send + Sync {
    /// Write a raw HID report and return the response.
    fn send_report(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Send a HID++ request and decode the response.
pub fn hidpp_request(
    transport: &dyn CommandTransport,
    req: &HidppRequest,
) -> Result<HidppResponse> {
    let encoded = req.encode()?;
    trace!(
        device_index = req.device_index,
        feature_index = req.feature_index,
        function_sw = format_args!("0x{:02X}", req.function_sw),
        report_hex = format_args!("{:02X?}", encoded),
        "HID++ TX"
    );

    let raw = transport.send_report(&encoded)?;
    let resp = HidppResponse::decode(&raw)?;

    trace!(
        is_long = resp.is_long,
        feature_index = resp.feature_index,
        function = resp.function(),
        params_hex = format_args!("{:02X?}", resp.params),
        "HID++ RX"
    );

    if resp.is_error() {
        let code = resp.error_code();
        warn!(
            feature_index = req.feature_index,
            function = req.function(),
            error_code = code,
            "HID++ error response"
        );
        return Err(Error::HidppProtocol {
            feature: req.feature_index as u16,
            code,
        });
    }

    Ok(resp)
}

/// A mock command transport for testing.
///
/// Stores predefined request→reply mappings and counts how often each
/// request was sent.
#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::hidpp::{pack_function_sw, LONG_REPORT_LEN, SHORT_REPORT_LEN};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    enum Reply {
        Bytes(Vec<u8>),
        Timeout,
    }

    /// Mock transport that returns preconfigured responses.
    pub struct MockTransport {
        replies: Mutex<HashMap<Vec<u8>, Reply>>,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    fn short_request(device_idx: u8, feature_idx: u8, function: u8, params: &[u8]) -> Vec<u8> {
        let mut req = vec![0x10, device_idx, feature_idx, pack_function_sw(function)];
        let mut pad = params.to_vec();
        pad.resize(SHORT_REPORT_LEN - 4, 0);
        req.extend_from_slice(&pad);
        req
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                replies: Mutex::new(HashMap::new()),
                sent: Mutex::new(Vec::new()),
            }
        }

        /// Register a raw response for a given request.
        pub fn on_request(&self, request: Vec<u8>, response: Vec<u8>) {
            self.replies
                .lock()
                .unwrap()
                .insert(request, Reply::Bytes(response));
        }

        /// Register a short-request / long-response exchange.
        ///
        /// Touch feature commands always use short requests; responses are
        /// long so that up to 16 output params fit.
        pub fn on_command(
            &self,
            device_idx: u8,
            feature_idx: u8,
            function: u8,
            req_params: &[u8],
            resp_params: &[u8],
        ) {
            let req = short_request(device_idx, feature_idx, function, req_params);
            let mut resp = vec![0x11, device_idx, feature_idx, pack_function_sw(function)];
            let mut pad = resp_params.to_vec();
            pad.resize(LONG_REPORT_LEN - 4, 0);
            resp.extend_from_slice(&pad);
            self.on_request(req, resp);
        }

        /// Make a short request time out.
        pub fn timeout_on_command(
            &self,
            device_idx: u8,
            feature_idx: u8,
            function: u8,
            req_params: &[u8],
        ) {
            let req = short_request(device_idx, feature_idx, function, req_params);
            self.replies.lock().unwrap().insert(req, Reply::Timeout);
        }

        /// Answer a short request with a HID++ 2.0 error report.
        pub fn error_on_command(
            &self,
            device_idx: u8,
            feature_idx: u8,
            function: u8,
            req_params: &[u8],
            code: u8,
        ) {
            let req = short_request(device_idx, feature_idx, function, req_params);
            let resp = vec![
                0x10,
                device_idx,
                0xFF,
                feature_idx,
                pack_function_sw(function),
                code,
                0x00,
            ];
            self.on_request(req, resp);
        }

        /// How many times a short request was sent.
        pub fn sent_count(
            &self,
            device_idx: u8,
            feature_idx: u8,
            function: u8,
            req_params: &[u8],
        ) -> usize {
            let req = short_request(device_idx, feature_idx, function, req_params);
            self.sent.lock().unwrap().iter().filter(|s| **s == req).count()
        }

        /// Total number of requests sent.
        pub fn total_sent(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl CommandTransport for MockTransport {
        fn send_report(&self, data: &[u8]) -> Result<Vec<u8>> {
            self.sent.lock().unwrap().push(data.to_vec());
            let replies = self.replies.lock().unwrap();
            match replies.get(data) {
                Some(Reply::Bytes(bytes)) => Ok(bytes.clone()),
                Some(Reply::Timeout) => Err(Error::Timeout(format!(
                    "mock: request {:02X?} timed out",
                    data
                ))),
                None => Err(Error::Hid(format!(
                    "mock: no response registered for request {:02X?}",
                    data
                ))),
            }
        }
    }
}
