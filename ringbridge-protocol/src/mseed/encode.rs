//! Packet-to-record encoding for DataLink publication.

use tracing::warn;

use crate::error::{ProtocolError, Result};
use crate::mseed::{Compression, RecordSpec, SampleEncoding, decode, v2, v3};
use crate::packet::{Packet, Samples};

/// Hard cap and `<= 0` default for the produced record length.
pub const MAX_RECORD_LENGTH: usize = 4096;

/// One wire-ready miniSEED record plus the times the DataLink WRITE frame
/// needs, parsed back from the record header.
#[derive(Clone, Debug)]
pub struct DataLinkPayload {
    pub data: Vec<u8>,
    pub start_time_ns: i64,
    pub end_time_ns: i64,
}

fn select_encoding(samples: &Samples, compression: Compression) -> Result<SampleEncoding> {
    match (samples, compression) {
        (Samples::Int32(_), Compression::None) => Ok(SampleEncoding::Int32),
        (Samples::Int32(_), Compression::Steim1) => Ok(SampleEncoding::Steim1),
        (Samples::Int32(_), Compression::Steim2) => Ok(SampleEncoding::Steim2),
        (_, Compression::None) => Ok(match samples {
            Samples::Float32(_) => SampleEncoding::Float32,
            Samples::Float64(_) => SampleEncoding::Float64,
            Samples::Text(_) => SampleEncoding::Text,
            Samples::Int32(_) => unreachable!("handled above"),
        }),
        (samples, compression) => Err(ProtocolError::Unsupported(format!(
            "{compression:?} compression is only valid for int32 data, not {}",
            samples.kind_name()
        ))),
    }
}

/// Convert a complete packet into one or more miniSEED records.
///
/// `max_record_length` defaults to 4096 when zero or negative and is capped
/// at 4096. With `use_v3` the records are miniSEED 3 (variable length),
/// otherwise miniSEED 2 (fixed length, power of two). Steim compression is
/// only valid for Int32 packets.
///
/// Record boundaries preserve sample order; each returned payload carries
/// the start and end time read back from the record it wraps. If packing
/// stalls partway the records produced so far are returned with a warning.
pub fn to_datalink_payloads(
    packet: &Packet,
    max_record_length: i32,
    use_v3: bool,
    compression: Compression,
) -> Result<Vec<DataLinkPayload>> {
    if !packet.has_identifier() {
        return Err(ProtocolError::InvalidArgument(
            "stream identifier not set".into(),
        ));
    }
    if !packet.has_sampling_rate() {
        return Err(ProtocolError::InvalidArgument("sampling rate not set".into()));
    }
    let samples = packet.samples().ok_or_else(|| {
        ProtocolError::InvalidOperation("packet carries no samples".into())
    })?;

    let record_length = if max_record_length <= 0 {
        MAX_RECORD_LENGTH
    } else {
        (max_record_length as usize).min(MAX_RECORD_LENGTH)
    };
    let encoding = select_encoding(samples, compression)?;

    let identifier = packet.identifier()?;
    let rate = packet.sampling_rate()?;
    let network = identifier.network()?;
    let station = identifier.station()?;
    let location = identifier.location_code()?;
    let channel = identifier.channel()?;

    let total = samples.len();
    let mut payloads = Vec::new();
    let mut offset = 0usize;
    let mut sequence = 1u32;

    while offset < total {
        let record_start =
            packet.start_time_ns() + ((offset as f64) / rate * 1.0e9).round() as i64;
        let spec = RecordSpec {
            network,
            station,
            location,
            channel,
            sampling_rate: rate,
            start_time_ns: record_start,
        };

        let packed = if use_v3 {
            v3::pack(&spec, samples, offset, encoding, record_length, 1)
        } else {
            v2::pack(&spec, samples, offset, encoding, record_length, sequence)
        };
        let (data, taken) = match packed {
            Ok(result) => result,
            Err(error) if !payloads.is_empty() => {
                warn!(%error, packed = offset, total, "packer stopped early, forwarding partial set");
                break;
            }
            Err(error) => return Err(error),
        };

        let parsed = decode::decode(&data).map_err(|e| {
            ProtocolError::EncodingFailed(format!("produced record failed to parse back: {e}"))
        })?;
        payloads.push(DataLinkPayload {
            start_time_ns: parsed.start_time_ns,
            end_time_ns: parsed.end_time_ns(),
            data,
        });

        offset += taken;
        sequence += 1;
    }

    if offset < total {
        warn!(packed = offset, total, "not all samples were packed");
    }
    Ok(payloads)
}
