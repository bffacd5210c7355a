//! Outbound messages (unframed payloads)
//!
//! The monitor only understands query messages. Two are sent:
//! - a header-only handshake reply when the monitor asks for one
//! - the feed request that subscribes to periodic parameter pushes

use bytes::Bytes;
use chrono::NaiveDateTime;

/// Header used for the handshake reply
const HANDSHAKE_HEADER: &str = "MSH|^~\\&|||||||QRY^R02|160|P|2.3.1\r";

/// Header used for the feed request
const QUERY_HEADER: &str = "MSH|^~\\&|||||||QRY^R02|1203|P|2.3.1|\r";

/// Query id carried in QRD
const QUERY_ID: &str = "Query0";

/// QRD timestamp format
const QUERY_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Parameters of the periodic push requested in QRF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    /// Parameter codes to push (e.g. `101` for HR)
    pub codes: Vec<String>,
    /// Push interval in seconds
    pub frequency_secs: u32,
    /// Push every parameter instead of `codes`
    pub send_all: bool,
}

impl FeedRequest {
    pub fn new(codes: Vec<String>) -> Self {
        Self {
            codes,
            frequency_secs: 1,
            send_all: false,
        }
    }

    /// Build the QRY^R02 payload for the given local time
    pub fn to_payload(&self, now: NaiveDateTime) -> Bytes {
        // QRF|MON||||<ip>&<seq>^<send type>^<frequency>^<send all>^<code&code...>
        // IP is unused by bedside monitors; send type 1 = physiological parameters.
        let qrd = format!(
            "QRD|{}|R|I|{}|||||RES\r",
            now.format(QUERY_TIME_FORMAT),
            QUERY_ID
        );
        let qrf = format!(
            "QRF|MON||||0&0^1^{}^{}^{}\r",
            self.frequency_secs,
            u8::from(self.send_all),
            self.codes.join("&")
        );

        let mut payload = String::with_capacity(QUERY_HEADER.len() + qrd.len() + qrf.len());
        payload.push_str(QUERY_HEADER);
        payload.push_str(&qrd);
        payload.push_str(&qrf);
        Bytes::from(payload)
    }
}

/// Header-only reply to a handshake request (MSH trigger 106)
pub fn handshake_reply() -> Bytes {
    Bytes::from_static(HANDSHAKE_HEADER.as_bytes())
}
