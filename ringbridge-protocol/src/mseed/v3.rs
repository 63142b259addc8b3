//! miniSEED 3 variable-length records: little-endian header, FDSN source
//! identifier, CRC-32C integrity check.

use crate::error::{ProtocolError, Result};
use crate::mseed::decode::MseedRecord;
use crate::mseed::{RecordSpec, SampleEncoding, sid, steim, time, v2};
use crate::packet::Samples;

pub(crate) const FIXED_HEADER_LEN: usize = 40;
const CRC_OFFSET: usize = 28;

const fn build_crc32c_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x82F6_3B78
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC32C_TABLE: [u32; 256] = build_crc32c_table();

fn crc_update(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        crc = (crc >> 8) ^ CRC32C_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    crc
}

/// CRC-32C (Castagnoli) of a record with its CRC field treated as zero.
fn record_crc(record: &[u8]) -> u32 {
    let mut crc = u32::MAX;
    crc = crc_update(crc, &record[..CRC_OFFSET]);
    crc = crc_update(crc, &[0u8; 4]);
    crc = crc_update(crc, &record[CRC_OFFSET + 4..]);
    !crc
}

/// Plain CRC-32C, exposed for tests.
#[cfg(test)]
pub(crate) fn crc32c(data: &[u8]) -> u32 {
    !crc_update(u32::MAX, data)
}

/// Pack one record from `samples[offset..]` into at most
/// `max_record_length` bytes. Returns the record and the samples consumed.
pub(crate) fn pack(
    spec: &RecordSpec<'_>,
    samples: &Samples,
    offset: usize,
    encoding: SampleEncoding,
    max_record_length: usize,
    publication_version: u8,
) -> Result<(Vec<u8>, usize)> {
    let total = samples.len();
    if offset >= total {
        return Err(ProtocolError::EncodingFailed("no samples left".into()));
    }

    let source_id = sid::to_sid(spec.network, spec.station, spec.location, spec.channel);
    if source_id.len() > u8::MAX as usize {
        return Err(ProtocolError::EncodingFailed("source id too long".into()));
    }
    let capacity = max_record_length
        .checked_sub(FIXED_HEADER_LEN + source_id.len())
        .unwrap_or(0);

    let (payload, taken) = match (samples, encoding) {
        (Samples::Int32(v), SampleEncoding::Int32) => {
            let take = (total - offset).min(capacity / 4);
            let mut bytes = Vec::with_capacity(take * 4);
            for &sample in &v[offset..offset + take] {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            (bytes, take)
        }
        (Samples::Int32(v), SampleEncoding::Steim1) => {
            steim::encode(&v[offset..], capacity / steim::FRAME_LEN, steim::Variant::Steim1)?
        }
        (Samples::Int32(v), SampleEncoding::Steim2) => {
            steim::encode(&v[offset..], capacity / steim::FRAME_LEN, steim::Variant::Steim2)?
        }
        (Samples::Float32(v), SampleEncoding::Float32) => {
            let take = (total - offset).min(capacity / 4);
            let mut bytes = Vec::with_capacity(take * 4);
            for &sample in &v[offset..offset + take] {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            (bytes, take)
        }
        (Samples::Float64(v), SampleEncoding::Float64) => {
            let take = (total - offset).min(capacity / 8);
            let mut bytes = Vec::with_capacity(take * 8);
            for &sample in &v[offset..offset + take] {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            (bytes, take)
        }
        (Samples::Text(v), SampleEncoding::Text) => {
            let take = (total - offset).min(capacity);
            (v[offset..offset + take].to_vec(), take)
        }
        (samples, encoding) => {
            return Err(ProtocolError::EncodingFailed(format!(
                "cannot encode {} samples as {encoding:?}",
                samples.kind_name()
            )));
        }
    };
    if taken == 0 {
        return Err(ProtocolError::EncodingFailed(
            "record too small for a single sample".into(),
        ));
    }

    let header_time = time::from_epoch_ns(spec.start_time_ns);
    if !(0..=65535).contains(&header_time.year) {
        return Err(ProtocolError::EncodingFailed(format!(
            "year {} not representable",
            header_time.year
        )));
    }

    let mut record = Vec::with_capacity(FIXED_HEADER_LEN + source_id.len() + payload.len());
    record.extend_from_slice(b"MS");
    record.push(3);
    record.push(0); // flags
    record.extend_from_slice(&header_time.nanosecond.to_le_bytes());
    record.extend_from_slice(&(header_time.year as u16).to_le_bytes());
    record.extend_from_slice(&header_time.doy.to_le_bytes());
    record.push(header_time.hour);
    record.push(header_time.minute);
    record.push(header_time.second);
    record.push(encoding.code());
    record.extend_from_slice(&spec.sampling_rate.to_le_bytes());
    record.extend_from_slice(&(taken as u32).to_le_bytes());
    record.extend_from_slice(&[0u8; 4]); // CRC, patched below
    record.push(publication_version);
    record.push(source_id.len() as u8);
    record.extend_from_slice(&0u16.to_le_bytes()); // no extra headers
    record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    record.extend_from_slice(source_id.as_bytes());
    record.extend_from_slice(&payload);

    let crc = record_crc(&record);
    record[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
    Ok((record, taken))
}

/// True when the buffer plausibly starts with a v3 record.
pub(crate) fn detect(data: &[u8]) -> bool {
    data.len() >= 3 && &data[0..2] == b"MS" && data[2] == 3
}

/// Parse one full v3 record from the start of `data`.
pub(crate) fn parse(data: &[u8]) -> Result<MseedRecord> {
    if data.len() < FIXED_HEADER_LEN {
        return Err(ProtocolError::FrameTooShort {
            expected: FIXED_HEADER_LEN,
            actual: data.len(),
        });
    }
    if !detect(data) {
        return Err(ProtocolError::UnpackFailed(
            "buffer does not start with a v3 record header".into(),
        ));
    }

    let nanosecond = u32::from_le_bytes(data[4..8].try_into().unwrap());
    let year = i32::from(u16::from_le_bytes(data[8..10].try_into().unwrap()));
    let doy = u16::from_le_bytes(data[10..12].try_into().unwrap());
    let encoding = SampleEncoding::from_code(data[15])?;
    let raw_rate = f64::from_le_bytes(data[16..24].try_into().unwrap());
    let sample_count = u32::from_le_bytes(data[24..28].try_into().unwrap()) as usize;
    let stored_crc = u32::from_le_bytes(data[28..32].try_into().unwrap());
    let sid_length = usize::from(data[33]);
    let extra_length = usize::from(u16::from_le_bytes(data[34..36].try_into().unwrap()));
    let payload_length = u32::from_le_bytes(data[36..40].try_into().unwrap()) as usize;

    let record_length = FIXED_HEADER_LEN + sid_length + extra_length + payload_length;
    if data.len() < record_length {
        return Err(ProtocolError::FrameTooShort {
            expected: record_length,
            actual: data.len(),
        });
    }
    let record = &data[..record_length];

    let computed_crc = record_crc(record);
    if computed_crc != stored_crc {
        return Err(ProtocolError::UnpackFailed(format!(
            "CRC mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
        )));
    }

    let source_id = std::str::from_utf8(&record[FIXED_HEADER_LEN..FIXED_HEADER_LEN + sid_length])
        .map_err(|_| ProtocolError::UnpackFailed("source id is not UTF-8".into()))?;
    let (network, station, location, channel) = sid::from_sid(source_id)?;

    // Negative values store a sampling period in seconds.
    let sampling_rate = if raw_rate < 0.0 { -1.0 / raw_rate } else { raw_rate };

    let payload = &record[FIXED_HEADER_LEN + sid_length + extra_length..];
    let big_endian = matches!(encoding, SampleEncoding::Steim1 | SampleEncoding::Steim2);
    let samples = v2::decode_payload(payload, encoding, sample_count, big_endian)?;

    let header_time = time::HeaderTime {
        year,
        doy,
        hour: record[12],
        minute: record[13],
        second: record[14],
        nanosecond,
    };

    Ok(MseedRecord {
        network,
        station,
        location,
        channel,
        sampling_rate,
        start_time_ns: time::to_epoch_ns(&header_time),
        samples,
        record_length,
        format_version: 3,
    })
}
