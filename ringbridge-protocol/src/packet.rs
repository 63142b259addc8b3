use crate::error::{ProtocolError, Result};
use crate::stream_id::StreamIdentifier;

/// Typed sample buffer carried by a [`Packet`].
///
/// A single sum type rather than any dynamic-dispatch arrangement: the
/// miniSEED encoder's dispatch over it is exhaustive and checkable.
#[derive(Clone, Debug, PartialEq)]
pub enum Samples {
    Int32(Vec<i32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Text(Vec<u8>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Self::Int32(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name used in logs and error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Int32(_) => "int32",
            Self::Float32(_) => "float32",
            Self::Float64(_) => "float64",
            Self::Text(_) => "text",
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Text(_))
    }
}

/// One logical time-series packet: the pipeline's unit of work.
///
/// Created by the SEEDLink source for every unpacked miniSEED record, routed
/// through the coordinator's queues, and consumed by each DataLink sink.
#[derive(Clone, Debug, Default)]
pub struct Packet {
    identifier: Option<StreamIdentifier>,
    samples: Option<Samples>,
    start_time_ns: i64,
    sampling_rate: f64,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Identifier --

    /// Sets the stream identifier. All four components must be present
    /// (the location code may be empty, but must have been set).
    pub fn set_identifier(&mut self, identifier: StreamIdentifier) -> Result<()> {
        if !identifier.has_network() {
            return Err(ProtocolError::InvalidArgument("network not set".into()));
        }
        if !identifier.has_station() {
            return Err(ProtocolError::InvalidArgument("station not set".into()));
        }
        if !identifier.has_channel() {
            return Err(ProtocolError::InvalidArgument("channel not set".into()));
        }
        if !identifier.has_location_code() {
            return Err(ProtocolError::InvalidArgument(
                "location code not set".into(),
            ));
        }
        self.identifier = Some(identifier);
        Ok(())
    }

    pub fn identifier(&self) -> Result<&StreamIdentifier> {
        self.identifier
            .as_ref()
            .ok_or(ProtocolError::NotSet("stream identifier"))
    }

    pub fn has_identifier(&self) -> bool {
        self.identifier.is_some()
    }

    // -- Sampling rate --

    pub fn set_sampling_rate(&mut self, rate_hz: f64) -> Result<()> {
        if !(rate_hz > 0.0) {
            return Err(ProtocolError::InvalidArgument(format!(
                "sampling rate {rate_hz} must be positive"
            )));
        }
        self.sampling_rate = rate_hz;
        Ok(())
    }

    pub fn sampling_rate(&self) -> Result<f64> {
        if !self.has_sampling_rate() {
            return Err(ProtocolError::NotSet("sampling rate"));
        }
        Ok(self.sampling_rate)
    }

    pub fn has_sampling_rate(&self) -> bool {
        self.sampling_rate > 0.0
    }

    // -- Timing --

    /// Start time as signed nanoseconds since the Unix epoch.
    pub fn set_start_time_ns(&mut self, start_ns: i64) {
        self.start_time_ns = start_ns;
    }

    /// Start time in fractional epoch seconds, rounded to the nearest
    /// nanosecond.
    pub fn set_start_time_secs(&mut self, start_secs: f64) {
        self.start_time_ns = (start_secs * 1.0e9).round() as i64;
    }

    pub fn start_time_ns(&self) -> i64 {
        self.start_time_ns
    }

    /// Epoch time of the final sample, in nanoseconds:
    /// `start + round((n - 1) / rate * 1e9)`.
    pub fn end_time_ns(&self) -> Result<i64> {
        if !self.has_sampling_rate() {
            return Err(ProtocolError::NotSet("sampling rate"));
        }
        let n = self.sample_count();
        if n < 1 {
            return Err(ProtocolError::NotSet("samples"));
        }
        let duration = (((n - 1) as f64) / self.sampling_rate * 1.0e9).round() as i64;
        Ok(self.start_time_ns + duration)
    }

    // -- Samples --

    /// Installs the sample buffer. An empty buffer is a no-op: the previous
    /// variant and contents are kept.
    pub fn set_samples(&mut self, samples: Samples) {
        if samples.is_empty() {
            return;
        }
        self.samples = Some(samples);
    }

    pub fn samples(&self) -> Option<&Samples> {
        self.samples.as_ref()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.as_ref().map_or(0, Samples::len)
    }

    /// Sum over the numeric sample values. Text packets are rejected.
    pub fn sum_samples(&self) -> Result<f64> {
        match self.samples.as_ref() {
            None => Ok(0.0),
            Some(Samples::Int32(v)) => Ok(v.iter().map(|&x| f64::from(x)).sum()),
            Some(Samples::Float32(v)) => Ok(v.iter().map(|&x| f64::from(x)).sum()),
            Some(Samples::Float64(v)) => Ok(v.iter().sum()),
            Some(Samples::Text(_)) => Err(ProtocolError::InvalidOperation(
                "cannot sum text samples".into(),
            )),
        }
    }

    /// Sum of squares over the numeric sample values. Text packets are
    /// rejected.
    pub fn sum_squared_samples(&self) -> Result<f64> {
        match self.samples.as_ref() {
            None => Ok(0.0),
            Some(Samples::Int32(v)) => Ok(v.iter().map(|&x| f64::from(x) * f64::from(x)).sum()),
            Some(Samples::Float32(v)) => Ok(v.iter().map(|&x| f64::from(x) * f64::from(x)).sum()),
            Some(Samples::Float64(v)) => Ok(v.iter().map(|&x| x * x).sum()),
            Some(Samples::Text(_)) => Err(ProtocolError::InvalidOperation(
                "cannot sum text samples".into(),
            )),
        }
    }

    /// A packet is complete for encoding when the identifier is fully set,
    /// the rate is positive, and at least one sample is present.
    pub fn is_complete(&self) -> bool {
        self.has_identifier() && self.has_sampling_rate() && self.sample_count() >= 1
    }
}
