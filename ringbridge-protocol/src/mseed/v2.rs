//! miniSEED 2 fixed-length records: 48-byte header, Blockette 1000/1001,
//! big-endian numerics.

use crate::error::{ProtocolError, Result};
use crate::mseed::decode::MseedRecord;
use crate::mseed::{RecordSpec, SampleEncoding, steim, time};
use crate::packet::Samples;

pub(crate) const FIXED_HEADER_LEN: usize = 48;
/// Fixed header + Blockette 1000 + Blockette 1001.
pub(crate) const DATA_OFFSET: usize = 64;

fn be_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn be_i16(data: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([data[at], data[at + 1]])
}

fn be_i32(data: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn put_be_u16(data: &mut [u8], at: usize, value: u16) {
    data[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

/// Encode the sampling rate as the v2 factor/multiplier pair. Integral
/// rates and integral periods are representable; anything else is not.
fn rate_to_factor_multiplier(rate: f64) -> Result<(i16, i16)> {
    if rate >= 1.0 {
        let rounded = rate.round();
        if (rate - rounded).abs() < 1e-9 && rounded <= f64::from(i16::MAX) {
            return Ok((rounded as i16, 1));
        }
    } else if rate > 0.0 {
        let period = (1.0 / rate).round();
        if (1.0 / rate - period).abs() < 1e-9 && period <= f64::from(i16::MAX) {
            return Ok((-(period as i16), 1));
        }
    }
    Err(ProtocolError::EncodingFailed(format!(
        "sampling rate {rate} is not representable as factor/multiplier"
    )))
}

fn factor_multiplier_to_rate(factor: i16, multiplier: i16) -> f64 {
    let f = f64::from(factor);
    let m = f64::from(multiplier);
    if factor == 0 {
        0.0
    } else if factor > 0 && multiplier > 0 {
        f * m
    } else if factor > 0 && multiplier < 0 {
        -f / m
    } else if factor < 0 && multiplier > 0 {
        -m / f
    } else {
        1.0 / (f * m)
    }
}

fn write_code(buffer: &mut [u8], at: usize, width: usize, value: &str) {
    let bytes = value.as_bytes();
    for i in 0..width {
        buffer[at + i] = *bytes.get(i).unwrap_or(&b' ');
    }
}

/// Pack one record from `samples[offset..]`.
///
/// `spec.start_time_ns` must already be the start time of *this* record.
/// Returns the record bytes (exactly `record_length` long) and the number
/// of samples consumed.
pub(crate) fn pack(
    spec: &RecordSpec<'_>,
    samples: &Samples,
    offset: usize,
    encoding: SampleEncoding,
    record_length: usize,
    sequence: u32,
) -> Result<(Vec<u8>, usize)> {
    if !record_length.is_power_of_two() || !(128..=4096).contains(&record_length) {
        return Err(ProtocolError::EncodingFailed(format!(
            "v2 record length {record_length} must be a power of two in [128, 4096]"
        )));
    }
    let total = samples.len();
    if offset >= total {
        return Err(ProtocolError::EncodingFailed("no samples left".into()));
    }

    let capacity = record_length - DATA_OFFSET;
    let (payload, taken) = match (samples, encoding) {
        (Samples::Int32(v), SampleEncoding::Int32) => {
            let take = (total - offset).min(capacity / 4).min(usize::from(u16::MAX));
            let mut bytes = Vec::with_capacity(take * 4);
            for &sample in &v[offset..offset + take] {
                bytes.extend_from_slice(&sample.to_be_bytes());
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
            let take = (total - offset).min(capacity / 4).min(usize::from(u16::MAX));
            let mut bytes = Vec::with_capacity(take * 4);
            for &sample in &v[offset..offset + take] {
                bytes.extend_from_slice(&sample.to_be_bytes());
            }
            (bytes, take)
        }
        (Samples::Float64(v), SampleEncoding::Float64) => {
            let take = (total - offset).min(capacity / 8).min(usize::from(u16::MAX));
            let mut bytes = Vec::with_capacity(take * 8);
            for &sample in &v[offset..offset + take] {
                bytes.extend_from_slice(&sample.to_be_bytes());
            }
            (bytes, take)
        }
        (Samples::Text(v), SampleEncoding::Text) => {
            let take = (total - offset).min(capacity).min(usize::from(u16::MAX));
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
    let fract = (header_time.nanosecond / 100_000) as u16;
    let usec = ((header_time.nanosecond % 100_000) / 1_000) as u8;
    let (factor, multiplier) = rate_to_factor_multiplier(spec.sampling_rate)?;

    let mut record = vec![0u8; record_length];
    record[0..6].copy_from_slice(format!("{:06}", sequence % 1_000_000).as_bytes());
    record[6] = b'D';
    record[7] = b' ';
    write_code(&mut record, 8, 5, spec.station);
    write_code(&mut record, 13, 2, spec.location);
    write_code(&mut record, 15, 3, spec.channel);
    write_code(&mut record, 18, 2, spec.network);

    put_be_u16(&mut record, 20, header_time.year as u16);
    put_be_u16(&mut record, 22, header_time.doy);
    record[24] = header_time.hour;
    record[25] = header_time.minute;
    record[26] = header_time.second;
    put_be_u16(&mut record, 28, fract);

    put_be_u16(&mut record, 30, taken as u16);
    put_be_u16(&mut record, 32, factor as u16);
    put_be_u16(&mut record, 34, multiplier as u16);
    record[39] = 2; // blockette count
    put_be_u16(&mut record, 44, DATA_OFFSET as u16);
    put_be_u16(&mut record, 46, FIXED_HEADER_LEN as u16);

    // Blockette 1000
    put_be_u16(&mut record, 48, 1000);
    put_be_u16(&mut record, 50, 56);
    record[52] = encoding.code();
    record[53] = 1; // big-endian word order
    record[54] = record_length.trailing_zeros() as u8;

    // Blockette 1001
    put_be_u16(&mut record, 56, 1001);
    put_be_u16(&mut record, 58, 0);
    record[61] = usec;

    record[DATA_OFFSET..DATA_OFFSET + payload.len()].copy_from_slice(&payload);
    Ok((record, taken))
}

fn looks_like_header(data: &[u8]) -> bool {
    data.len() >= FIXED_HEADER_LEN
        && data[0..6]
            .iter()
            .all(|b| b.is_ascii_digit() || *b == b' ')
        && matches!(data[6], b'D' | b'R' | b'Q' | b'M')
}

/// True when the buffer plausibly starts with a v2 record.
pub(crate) fn detect(data: &[u8]) -> bool {
    looks_like_header(data)
}

/// Parse one full v2 record from the start of `data`.
pub(crate) fn parse(data: &[u8]) -> Result<MseedRecord> {
    if !looks_like_header(data) {
        return Err(ProtocolError::UnpackFailed(
            "buffer does not start with a v2 record header".into(),
        ));
    }

    let station = String::from_utf8_lossy(&data[8..13]).trim().to_owned();
    let location = String::from_utf8_lossy(&data[13..15]).trim().to_owned();
    let channel = String::from_utf8_lossy(&data[15..18]).trim().to_owned();
    let network = String::from_utf8_lossy(&data[18..20]).trim().to_owned();

    let header_time = time::HeaderTime {
        year: i32::from(be_u16(data, 20)),
        doy: be_u16(data, 22),
        hour: data[24],
        minute: data[25],
        second: data[26],
        nanosecond: u32::from(be_u16(data, 28)) * 100_000,
    };

    let sample_count = usize::from(be_u16(data, 30));
    let sampling_rate = factor_multiplier_to_rate(be_i16(data, 32), be_i16(data, 34));
    let activity_flags = data[36];
    let time_correction = be_i32(data, 40);
    let data_offset = usize::from(be_u16(data, 44));
    let mut blockette_offset = usize::from(be_u16(data, 46));

    let mut encoding = None;
    let mut record_length = None;
    let mut big_endian_payload = true;
    let mut usec_offset: i8 = 0;

    for _ in 0..8 {
        if blockette_offset == 0 || blockette_offset + 4 > data.len() {
            break;
        }
        let blockette_type = be_u16(data, blockette_offset);
        let next = usize::from(be_u16(data, blockette_offset + 2));
        match blockette_type {
            1000 => {
                if blockette_offset + 7 > data.len() {
                    return Err(ProtocolError::UnpackFailed(
                        "truncated Blockette 1000".into(),
                    ));
                }
                encoding = Some(SampleEncoding::from_code(data[blockette_offset + 4])?);
                big_endian_payload = data[blockette_offset + 5] != 0;
                let power = data[blockette_offset + 6];
                if power > 20 {
                    return Err(ProtocolError::UnpackFailed(format!(
                        "implausible record length power {power}"
                    )));
                }
                record_length = Some(1usize << power);
            }
            1001 => {
                if blockette_offset + 6 <= data.len() {
                    usec_offset = data[blockette_offset + 5] as i8;
                }
            }
            _ => {}
        }
        blockette_offset = next;
    }

    let encoding = encoding.ok_or_else(|| {
        ProtocolError::UnpackFailed("record carries no Blockette 1000".into())
    })?;
    let record_length = record_length.unwrap();
    if data.len() < record_length {
        return Err(ProtocolError::FrameTooShort {
            expected: record_length,
            actual: data.len(),
        });
    }
    if data_offset < FIXED_HEADER_LEN || data_offset > record_length {
        return Err(ProtocolError::UnpackFailed(format!(
            "data offset {data_offset} outside record"
        )));
    }

    let payload = &data[data_offset..record_length];
    let samples = decode_payload(payload, encoding, sample_count, big_endian_payload)?;

    let mut start_time_ns = time::to_epoch_ns(&header_time) + i64::from(usec_offset) * 1_000;
    // Correction units are 0.0001 s; bit 1 of the activity flags records
    // that it is already applied.
    if activity_flags & 0x02 == 0 {
        start_time_ns += i64::from(time_correction) * 100_000;
    }

    Ok(MseedRecord {
        network,
        station,
        location,
        channel,
        sampling_rate,
        start_time_ns,
        samples,
        record_length,
        format_version: 2,
    })
}

pub(crate) fn decode_payload(
    payload: &[u8],
    encoding: SampleEncoding,
    sample_count: usize,
    big_endian: bool,
) -> Result<Samples> {
    let need = |size: usize| -> Result<()> {
        if payload.len() < sample_count * size {
            Err(ProtocolError::UnpackFailed(format!(
                "payload of {} bytes cannot hold {sample_count} samples",
                payload.len()
            )))
        } else {
            Ok(())
        }
    };

    match encoding {
        SampleEncoding::Int32 => {
            need(4)?;
            let mut samples = Vec::with_capacity(sample_count);
            for chunk in payload[..sample_count * 4].chunks_exact(4) {
                let bytes: [u8; 4] = chunk.try_into().unwrap();
                samples.push(if big_endian {
                    i32::from_be_bytes(bytes)
                } else {
                    i32::from_le_bytes(bytes)
                });
            }
            Ok(Samples::Int32(samples))
        }
        SampleEncoding::Float32 => {
            need(4)?;
            let mut samples = Vec::with_capacity(sample_count);
            for chunk in payload[..sample_count * 4].chunks_exact(4) {
                let bytes: [u8; 4] = chunk.try_into().unwrap();
                samples.push(if big_endian {
                    f32::from_be_bytes(bytes)
                } else {
                    f32::from_le_bytes(bytes)
                });
            }
            Ok(Samples::Float32(samples))
        }
        SampleEncoding::Float64 => {
            need(8)?;
            let mut samples = Vec::with_capacity(sample_count);
            for chunk in payload[..sample_count * 8].chunks_exact(8) {
                let bytes: [u8; 8] = chunk.try_into().unwrap();
                samples.push(if big_endian {
                    f64::from_be_bytes(bytes)
                } else {
                    f64::from_le_bytes(bytes)
                });
            }
            Ok(Samples::Float64(samples))
        }
        SampleEncoding::Text => {
            need(1)?;
            Ok(Samples::Text(payload[..sample_count].to_vec()))
        }
        SampleEncoding::Steim1 => Ok(Samples::Int32(steim::decode(
            payload,
            sample_count,
            steim::Variant::Steim1,
            big_endian,
        )?)),
        SampleEncoding::Steim2 => Ok(Samples::Int32(steim::decode(
            payload,
            sample_count,
            steim::Variant::Steim2,
            big_endian,
        )?)),
    }
}
