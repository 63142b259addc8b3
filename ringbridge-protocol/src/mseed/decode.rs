//! Record decoding: format detection plus the decoded record type.

use crate::error::{ProtocolError, Result};
use crate::mseed::{v2, v3};
use crate::packet::Samples;

/// Shortest parseable record prefix; span walkers stop below this.
pub const MIN_RECORD_LENGTH: usize = 40;

/// One decoded miniSEED record, either format version.
#[derive(Clone, Debug)]
pub struct MseedRecord {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub sampling_rate: f64,
    pub start_time_ns: i64,
    pub samples: Samples,
    /// Total length of the record in the source buffer.
    pub record_length: usize,
    pub format_version: u8,
}

impl MseedRecord {
    /// Epoch nanoseconds of the final sample; equals the start time for a
    /// single sample or a non-positive rate.
    pub fn end_time_ns(&self) -> i64 {
        let n = self.samples.len();
        if n >= 1 && self.sampling_rate > 0.0 {
            self.start_time_ns + (((n - 1) as f64) / self.sampling_rate * 1.0e9).round() as i64
        } else {
            self.start_time_ns
        }
    }
}

/// Decode one record from the start of `data`, auto-detecting the format
/// version.
pub fn decode(data: &[u8]) -> Result<MseedRecord> {
    if data.len() < MIN_RECORD_LENGTH {
        return Err(ProtocolError::FrameTooShort {
            expected: MIN_RECORD_LENGTH,
            actual: data.len(),
        });
    }
    if v3::detect(data) {
        return v3::parse(data);
    }
    if v2::detect(data) {
        return v2::parse(data);
    }
    Err(ProtocolError::UnpackFailed(
        "buffer starts with neither a v2 nor a v3 record".into(),
    ))
}
