//! Steim1/Steim2 difference compression for Int32 samples.
//!
//! Both variants pack first differences into 64-byte frames of sixteen
//! 32-bit words. Word 0 of each frame holds 2-bit control nibbles for the
//! frame's words; words 1 and 2 of the first frame carry the forward and
//! reverse integration constants (first and last sample of the record).

use crate::error::{ProtocolError, Result};
use tracing::warn;

pub(crate) const FRAME_LEN: usize = 64;
const WORDS_PER_FRAME: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Variant {
    Steim1,
    Steim2,
}

/// One encoded chunk: how many diffs it covers and how it is packed.
#[derive(Copy, Clone, Debug)]
enum Chunk {
    /// Steim1 + Steim2: four 8-bit diffs, control nibble 01.
    Four8,
    /// Steim1 only: two 16-bit diffs, control nibble 10.
    Two16,
    /// Steim1 only: one 32-bit diff, control nibble 11.
    One32,
    /// Steim2, nibble 10 with a 2-bit sub-code in the word.
    One30,
    Two15,
    Three10,
    /// Steim2, nibble 11 with a 2-bit sub-code in the word.
    Five6,
    Six5,
    Seven4,
}

impl Chunk {
    fn count(self) -> usize {
        match self {
            Self::One32 | Self::One30 => 1,
            Self::Two16 | Self::Two15 => 2,
            Self::Three10 => 3,
            Self::Four8 => 4,
            Self::Five6 => 5,
            Self::Six5 => 6,
            Self::Seven4 => 7,
        }
    }

    fn nibble(self) -> u32 {
        match self {
            Self::Four8 => 1,
            Self::Two16 | Self::One30 | Self::Two15 | Self::Three10 => 2,
            Self::One32 | Self::Five6 | Self::Six5 | Self::Seven4 => 3,
        }
    }
}

fn fits(value: i32, bits: u32) -> bool {
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    (i64::from(value)) >= min && (i64::from(value)) <= max
}

fn all_fit(diffs: &[i32], bits: u32) -> bool {
    diffs.iter().all(|&d| fits(d, bits))
}

fn pick_chunk(diffs: &[i32], variant: Variant) -> Result<Chunk> {
    let n = diffs.len();
    match variant {
        Variant::Steim1 => {
            if n >= 4 && all_fit(&diffs[..4], 8) {
                Ok(Chunk::Four8)
            } else if n >= 2 && all_fit(&diffs[..2], 16) {
                Ok(Chunk::Two16)
            } else {
                Ok(Chunk::One32)
            }
        }
        Variant::Steim2 => {
            if n >= 7 && all_fit(&diffs[..7], 4) {
                Ok(Chunk::Seven4)
            } else if n >= 6 && all_fit(&diffs[..6], 5) {
                Ok(Chunk::Six5)
            } else if n >= 5 && all_fit(&diffs[..5], 6) {
                Ok(Chunk::Five6)
            } else if n >= 4 && all_fit(&diffs[..4], 8) {
                Ok(Chunk::Four8)
            } else if n >= 3 && all_fit(&diffs[..3], 10) {
                Ok(Chunk::Three10)
            } else if n >= 2 && all_fit(&diffs[..2], 15) {
                Ok(Chunk::Two15)
            } else if fits(diffs[0], 30) {
                Ok(Chunk::One30)
            } else {
                Err(ProtocolError::EncodingFailed(format!(
                    "difference {} exceeds 30 bits (Steim2)",
                    diffs[0]
                )))
            }
        }
    }
}

fn pack_fields(diffs: &[i32], bits: u32, sub_code: Option<u32>) -> u32 {
    let mask = if bits == 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    };
    let mut word = match sub_code {
        Some(code) => code << 30,
        None => 0,
    };
    let count = diffs.len() as u32;
    for (i, &d) in diffs.iter().enumerate() {
        word |= (d as u32 & mask) << (bits * (count - 1 - i as u32));
    }
    word
}

fn encode_word(diffs: &[i32], chunk: Chunk) -> u32 {
    match chunk {
        Chunk::Four8 => pack_fields(diffs, 8, None),
        Chunk::Two16 => pack_fields(diffs, 16, None),
        Chunk::One32 => diffs[0] as u32,
        Chunk::One30 => pack_fields(diffs, 30, Some(1)),
        Chunk::Two15 => pack_fields(diffs, 15, Some(2)),
        Chunk::Three10 => pack_fields(diffs, 10, Some(3)),
        Chunk::Five6 => pack_fields(diffs, 6, Some(0)),
        Chunk::Six5 => pack_fields(diffs, 5, Some(1)),
        Chunk::Seven4 => pack_fields(diffs, 4, Some(2)),
    }
}

/// Encode as many leading samples as fit into at most `max_frames` frames.
///
/// Returns the big-endian frame bytes and the number of samples consumed.
pub(crate) fn encode(
    samples: &[i32],
    max_frames: usize,
    variant: Variant,
) -> Result<(Vec<u8>, usize)> {
    if samples.is_empty() || max_frames == 0 {
        return Err(ProtocolError::EncodingFailed(
            "nothing to compress into zero space".into(),
        ));
    }

    // First difference is never used by the decoder; zero keeps it small.
    let mut diffs = Vec::with_capacity(samples.len());
    diffs.push(0i32);
    for pair in samples.windows(2) {
        diffs.push(pair[1].wrapping_sub(pair[0]));
    }

    let mut words: Vec<u32> = Vec::new();
    let mut consumed = 0usize;
    let mut frame_index = 0usize;

    while consumed < samples.len() && frame_index < max_frames {
        let mut frame = [0u32; WORDS_PER_FRAME];
        let mut nibbles = 0u32;
        let data_start = if frame_index == 0 {
            frame[1] = samples[0] as u32; // forward integration constant
            3
        } else {
            1
        };

        let mut w = data_start;
        while w < WORDS_PER_FRAME && consumed < samples.len() {
            let chunk = pick_chunk(&diffs[consumed..], variant)?;
            let count = chunk.count();
            frame[w] = encode_word(&diffs[consumed..consumed + count], chunk);
            nibbles |= chunk.nibble() << (30 - 2 * w as u32);
            consumed += count;
            w += 1;
        }
        frame[0] = nibbles;
        words.extend_from_slice(&frame);
        frame_index += 1;
    }

    // Reverse integration constant: last sample actually packed.
    words[2] = samples[consumed - 1] as u32;

    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    Ok((bytes, consumed))
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    ((value << (32 - bits)) as i32) >> (32 - bits)
}

fn unpack_fields(word: u32, bits: u32, count: u32, out: &mut Vec<i32>) {
    let mask = (1u32 << bits) - 1;
    for i in 0..count {
        let field = (word >> (bits * (count - 1 - i))) & mask;
        out.push(sign_extend(field, bits));
    }
}

/// Decode `expected` samples from Steim frames.
pub(crate) fn decode(
    data: &[u8],
    expected: usize,
    variant: Variant,
    big_endian: bool,
) -> Result<Vec<i32>> {
    if expected == 0 {
        return Ok(Vec::new());
    }
    if data.len() < FRAME_LEN {
        return Err(ProtocolError::UnpackFailed(format!(
            "Steim payload of {} bytes is shorter than one frame",
            data.len()
        )));
    }

    let read_word = |chunk: &[u8]| -> u32 {
        let bytes: [u8; 4] = chunk.try_into().unwrap();
        if big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        }
    };

    let mut samples: Vec<i32> = Vec::with_capacity(expected);
    let mut x0 = 0i32;
    let mut xn = 0i32;
    let mut diffs_seen = 0usize;

    'frames: for (frame_index, frame) in data.chunks_exact(FRAME_LEN).enumerate() {
        let nibbles = read_word(&frame[0..4]);
        for w in 1..WORDS_PER_FRAME {
            let word = read_word(&frame[w * 4..w * 4 + 4]);
            if frame_index == 0 && w == 1 {
                x0 = word as i32;
                continue;
            }
            if frame_index == 0 && w == 2 {
                xn = word as i32;
                continue;
            }

            let nibble = (nibbles >> (30 - 2 * w as u32)) & 0x3;
            let mut decoded: Vec<i32> = Vec::with_capacity(7);
            match (variant, nibble) {
                (_, 0) => continue,
                (_, 1) => unpack_fields(word, 8, 4, &mut decoded),
                (Variant::Steim1, 2) => unpack_fields(word, 16, 2, &mut decoded),
                (Variant::Steim1, 3) => decoded.push(word as i32),
                (Variant::Steim2, 2) => match word >> 30 {
                    1 => decoded.push(sign_extend(word & 0x3FFF_FFFF, 30)),
                    2 => unpack_fields(word, 15, 2, &mut decoded),
                    3 => unpack_fields(word, 10, 3, &mut decoded),
                    code => {
                        return Err(ProtocolError::UnpackFailed(format!(
                            "invalid Steim2 sub-code {code} for nibble 10"
                        )));
                    }
                },
                (Variant::Steim2, 3) => match word >> 30 {
                    0 => unpack_fields(word, 6, 5, &mut decoded),
                    1 => unpack_fields(word, 5, 6, &mut decoded),
                    2 => unpack_fields(word, 4, 7, &mut decoded),
                    code => {
                        return Err(ProtocolError::UnpackFailed(format!(
                            "invalid Steim2 sub-code {code} for nibble 11"
                        )));
                    }
                },
                _ => unreachable!("nibble is two bits"),
            }

            for diff in decoded {
                if diffs_seen == 0 {
                    samples.push(x0);
                } else if let Some(&previous) = samples.last() {
                    samples.push(previous.wrapping_add(diff));
                }
                diffs_seen += 1;
                if samples.len() == expected {
                    break 'frames;
                }
            }
        }
    }

    if samples.len() < expected {
        return Err(ProtocolError::UnpackFailed(format!(
            "Steim frames held {} of {expected} samples",
            samples.len()
        )));
    }
    if let Some(&last) = samples.last()
        && last != xn
    {
        warn!(last, xn, "Steim reverse integration constant mismatch");
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(samples: &[i32], variant: Variant) {
        let (bytes, consumed) = encode(samples, 64, variant).unwrap();
        assert_eq!(consumed, samples.len());
        assert_eq!(bytes.len() % FRAME_LEN, 0);
        let decoded = decode(&bytes, consumed, variant, true).unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn steim1_small_diffs() {
        roundtrip(&[1, 2, 3, -4], Variant::Steim1);
    }

    #[test]
    fn steim2_small_diffs() {
        roundtrip(&[1, 2, 3, -4], Variant::Steim2);
    }

    #[test]
    fn mixed_magnitudes() {
        let samples = [
            0, 1, -1, 127, -128, 300, -300, 40_000, -40_000, 1_000_000, -1_000_000, 7, 8, 9,
        ];
        roundtrip(&samples, Variant::Steim1);
        roundtrip(&samples, Variant::Steim2);
    }

    #[test]
    fn steim1_full_range_diffs() {
        roundtrip(&[0, i32::MAX, 0, i32::MIN + 1, 17], Variant::Steim1);
    }

    #[test]
    fn steim2_rejects_oversized_diff() {
        // A jump needing more than 30 bits of difference.
        let err = encode(&[0, 1 << 30], 64, Variant::Steim2).unwrap_err();
        assert!(matches!(err, ProtocolError::EncodingFailed(_)));
    }

    #[test]
    fn multi_frame_spill() {
        // 13 data words fit in frame 0; a long constant ramp needs more.
        let samples: Vec<i32> = (0..500).collect();
        roundtrip(&samples, Variant::Steim1);
        roundtrip(&samples, Variant::Steim2);
    }

    #[test]
    fn frame_limit_bounds_consumption() {
        let samples: Vec<i32> = (0..100_000).step_by(1000).collect();
        let (bytes, consumed) = encode(&samples, 1, Variant::Steim1).unwrap();
        assert_eq!(bytes.len(), FRAME_LEN);
        assert!(consumed < samples.len());
        let decoded = decode(&bytes, consumed, Variant::Steim1, true).unwrap();
        assert_eq!(decoded, &samples[..consumed]);
    }

    #[test]
    fn single_sample() {
        roundtrip(&[42], Variant::Steim1);
        roundtrip(&[42], Variant::Steim2);
    }

    #[test]
    fn integration_constants_in_frame_zero() {
        let samples = [10, 11, 12];
        let (bytes, _) = encode(&samples, 4, Variant::Steim1).unwrap();
        let x0 = i32::from_be_bytes(bytes[4..8].try_into().unwrap());
        let xn = i32::from_be_bytes(bytes[8..12].try_into().unwrap());
        assert_eq!(x0, 10);
        assert_eq!(xn, 12);
    }

    #[test]
    fn truncated_payload_rejected() {
        assert!(decode(&[0u8; 32], 4, Variant::Steim1, true).is_err());
    }
}
