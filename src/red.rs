//! RED (Range Encoded Differences) block codec.
//!
//! RED compresses a block of 32-bit samples by storing first-order
//! differences with a variable-length prefix code. Small differences (the
//! common case for physiological signals) take one byte; the worst case is
//! five bytes per sample. Each block is self-contained: a 304-byte header
//! with a CRC, flags and counts, followed by the encoded difference stream
//! padded to an 8-byte boundary.
//!
//! # Examples
//!
//! ```rust
//! use mef3::red;
//!
//! let samples = vec![100, 102, 105, 108, 110, 112, 115, 118, 120, 125];
//! let block = red::compress(&samples, 1_000_000, false).unwrap();
//! let out = red::decompress(&block.bytes, &Default::default(), true).unwrap();
//! assert_eq!(out.samples, samples);
//! ```

use crate::aes;
use crate::crc;
use crate::error::{MefError, Result};
use crate::types::{
    PasswordData, RedBlockHeader, TimeSeriesIndex, PAD_BYTE, RED_DISCONTINUITY_FLAG,
    RED_KNOWN_FLAGS, RED_LEVEL_1_ENCRYPTION_FLAG, RED_LEVEL_2_ENCRYPTION_FLAG,
};

/// Reserved sample value encoding NaN.
pub const RED_NAN: i32 = i32::MIN;
/// Reserved sample value encoding negative infinity.
pub const RED_NEGATIVE_INFINITY: i32 = i32::MIN + 1;
/// Reserved sample value encoding positive infinity.
pub const RED_POSITIVE_INFINITY: i32 = i32::MAX;
/// Largest legal (non-reserved) sample value.
pub const RED_MAXIMUM_SAMPLE_VALUE: i32 = i32::MAX - 1;
/// Smallest legal (non-reserved) sample value.
pub const RED_MINIMUM_SAMPLE_VALUE: i32 = i32::MIN + 2;

/// Encryption applied to a block's difference payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionLevel {
    #[default]
    None,
    Level1,
    Level2,
}

/// Result of compressing one block.
#[derive(Debug, Clone)]
pub struct CompressedBlock {
    /// Header + payload, ready to append to a `.tdat` file.
    pub bytes: Vec<u8>,
    pub header: RedBlockHeader,
    /// Index entry for the block. `file_offset` and `start_sample` are left
    /// for the caller to fill in.
    pub index: TimeSeriesIndex,
}

/// Result of decompressing one block.
#[derive(Debug, Clone)]
pub struct DecompressedBlock {
    pub samples: Vec<i32>,
    pub header: RedBlockHeader,
}

/// Compresses one block of samples without encryption.
pub fn compress(samples: &[i32], start_time: i64, discontinuity: bool) -> Result<CompressedBlock> {
    compress_with(
        samples,
        start_time,
        discontinuity,
        EncryptionLevel::None,
        &PasswordData::none(),
    )
}

/// Compresses one block of samples, optionally encrypting the difference
/// payload with the given level's key.
pub fn compress_with(
    samples: &[i32],
    start_time: i64,
    discontinuity: bool,
    encryption: EncryptionLevel,
    password_data: &PasswordData,
) -> Result<CompressedBlock> {
    if samples.is_empty() {
        return Err(MefError::InvalidFormat(
            "cannot compress an empty sample block".to_string(),
        ));
    }

    // 一阶差分: d[0]=s[0], d[i]=s[i]-s[i-1]
    let mut differences = Vec::with_capacity(samples.len());
    differences.push(samples[0]);
    for pair in samples.windows(2) {
        differences.push(pair[1].wrapping_sub(pair[0]));
    }

    let mut payload = encode_differences(&differences);
    let difference_bytes = payload.len() as u32;

    // 差分流补齐到8字节边界 (块头本身是8的倍数)
    while (RedBlockHeader::BYTES + payload.len()) % 8 != 0 {
        payload.push(PAD_BYTE);
    }

    let mut header = RedBlockHeader::new();
    header.flags = if discontinuity { RED_DISCONTINUITY_FLAG } else { 0 };
    header.difference_bytes = difference_bytes;
    header.number_of_samples = samples.len() as u32;
    header.block_bytes = (RedBlockHeader::BYTES + payload.len()) as u32;
    header.start_time = start_time;
    header.statistics = compute_statistics(&differences);

    match encryption {
        EncryptionLevel::None => {}
        EncryptionLevel::Level1 => {
            let key = password_data.key_for_level(1).ok_or_else(|| {
                MefError::Unauthorized("level 1 encryption requested without a key".to_string())
            })?;
            encrypt_payload(&mut payload, key);
            header.flags |= RED_LEVEL_1_ENCRYPTION_FLAG;
        }
        EncryptionLevel::Level2 => {
            let key = password_data.key_for_level(2).ok_or_else(|| {
                MefError::Unauthorized("level 2 encryption requested without a key".to_string())
            })?;
            encrypt_payload(&mut payload, key);
            header.flags |= RED_LEVEL_2_ENCRYPTION_FLAG;
        }
    }

    let mut bytes = header.to_bytes();
    bytes.extend_from_slice(&payload);

    // CRC覆盖除CRC字段本身之外的整个块
    header.block_crc = crc::calculate(&bytes[4..]);
    bytes[0..4].copy_from_slice(&header.block_crc.to_le_bytes());

    let (min_val, max_val) = find_extrema(samples);
    let mut index = TimeSeriesIndex::new();
    index.start_time = start_time;
    index.number_of_samples = samples.len() as u32;
    index.block_bytes = header.block_bytes;
    index.maximum_sample_value = max_val;
    index.minimum_sample_value = min_val;
    index.flags = header.flags;

    Ok(CompressedBlock {
        bytes,
        header,
        index,
    })
}

/// Decompresses one block (header + payload).
///
/// `validate_crc` controls the block CRC check; decryption requires the
/// password data to grant the block's encryption level.
pub fn decompress(
    block: &[u8],
    password_data: &PasswordData,
    validate_crc: bool,
) -> Result<DecompressedBlock> {
    if block.len() < RedBlockHeader::BYTES {
        return Err(MefError::TruncatedBlock(format!(
            "block of {} bytes is shorter than the header",
            block.len()
        )));
    }

    let header = RedBlockHeader::from_bytes(block)?;

    if header.flags & !RED_KNOWN_FLAGS != 0 {
        return Err(MefError::UnsupportedVersion {
            major: crate::types::MEF_VERSION_MAJOR,
            minor: crate::types::MEF_VERSION_MINOR,
        });
    }

    let block_bytes = header.block_bytes as usize;
    if block_bytes < RedBlockHeader::BYTES || block.len() < block_bytes {
        return Err(MefError::TruncatedBlock(format!(
            "header declares {} bytes, {} available",
            block_bytes,
            block.len()
        )));
    }

    if validate_crc && !crc::validate(&block[4..block_bytes], header.block_crc) {
        return Err(MefError::CorruptBlock("block CRC mismatch".to_string()));
    }

    let mut payload = block[RedBlockHeader::BYTES..block_bytes].to_vec();

    if header.is_level_2_encrypted() {
        let key = password_data.key_for_level(2).ok_or_else(|| {
            MefError::Unauthorized("block requires level 2 access".to_string())
        })?;
        decrypt_payload(&mut payload, key);
    } else if header.is_level_1_encrypted() {
        let key = password_data.key_for_level(1).ok_or_else(|| {
            MefError::Unauthorized("block requires level 1 access".to_string())
        })?;
        decrypt_payload(&mut payload, key);
    }

    if (header.difference_bytes as usize) > payload.len() {
        return Err(MefError::TruncatedBlock(format!(
            "difference stream of {} bytes exceeds payload of {}",
            header.difference_bytes,
            payload.len()
        )));
    }

    let mut samples = decode_differences(
        &payload[..header.difference_bytes as usize],
        header.number_of_samples as usize,
    )?;

    // 非1.0/0.0的比例因子表示有损模式
    if header.scale_factor != 1.0 && header.scale_factor != 0.0 {
        for sample in samples.iter_mut() {
            *sample = (*sample as f64 * header.scale_factor as f64).round() as i32;
        }
    }

    Ok(DecompressedBlock { samples, header })
}

/// Minimum and maximum over the non-sentinel samples.
///
/// Returns `(RED_NAN, RED_NAN)` when no sample carries a real value.
///
/// # Examples
///
/// ```rust
/// use mef3::red;
///
/// assert_eq!(red::find_extrema(&[-100, 50, 200, -300, 150, 0, 75]), (-300, 200));
/// assert_eq!(red::find_extrema(&[red::RED_NAN, red::RED_NAN]), (red::RED_NAN, red::RED_NAN));
/// ```
pub fn find_extrema(samples: &[i32]) -> (i32, i32) {
    let mut min_val: Option<i32> = None;
    let mut max_val: Option<i32> = None;

    for &value in samples {
        if value == RED_NAN || value == RED_NEGATIVE_INFINITY || value == RED_POSITIVE_INFINITY {
            continue;
        }
        min_val = Some(min_val.map_or(value, |m| m.min(value)));
        max_val = Some(max_val.map_or(value, |m| m.max(value)));
    }

    (min_val.unwrap_or(RED_NAN), max_val.unwrap_or(RED_NAN))
}

// 变长前缀码:
//   0xxxxxxx                    1字节, 0..127
//   10xxxxxx                    1字节, -(x+1), 即 -64..-1
//   110sxxxx yyyyyyyy           2字节, 12位幅值, s为符号
//   1110sxxx yyyyyyyy zzzzzzzz  3字节, 19位幅值
//   11110000 + 4字节大端补码     5字节, 任意32位差分
fn encode_differences(differences: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(differences.len() * 2);

    for &diff in differences {
        if (0..=127).contains(&diff) {
            out.push(diff as u8);
        } else if (-64..0).contains(&diff) {
            out.push(0x80 | (-diff - 1) as u8);
        } else if (-4096..=4095).contains(&diff) {
            let magnitude = if diff >= 0 { diff } else { -diff - 1 };
            let sign = if diff < 0 { 0x10 } else { 0 };
            out.push(0xC0 | sign | ((magnitude >> 8) & 0x0F) as u8);
            out.push((magnitude & 0xFF) as u8);
        } else if (-524_288..=524_287).contains(&diff) {
            let magnitude = if diff >= 0 { diff } else { -diff - 1 };
            let sign = if diff < 0 { 0x08 } else { 0 };
            out.push(0xE0 | sign | ((magnitude >> 16) & 0x07) as u8);
            out.push(((magnitude >> 8) & 0xFF) as u8);
            out.push((magnitude & 0xFF) as u8);
        } else {
            out.push(0xF0);
            out.extend_from_slice(&diff.to_be_bytes());
        }
    }

    out
}

fn decode_differences(input: &[u8], num_samples: usize) -> Result<Vec<i32>> {
    let mut samples = Vec::with_capacity(num_samples);
    let mut pos = 0usize;
    let mut previous = 0i32;

    let truncated = |need: usize, pos: usize| {
        MefError::TruncatedBlock(format!(
            "difference stream ends at byte {} while decoding a {}-byte symbol",
            pos, need
        ))
    };

    for i in 0..num_samples {
        if pos >= input.len() {
            return Err(truncated(1, pos));
        }
        let first = input[pos];
        pos += 1;

        let diff = if first & 0x80 == 0 {
            first as i32
        } else if first & 0xC0 == 0x80 {
            -((first & 0x3F) as i32) - 1
        } else if first & 0xE0 == 0xC0 {
            if pos + 1 > input.len() {
                return Err(truncated(2, pos));
            }
            let magnitude = (((first & 0x0F) as i32) << 8) | input[pos] as i32;
            pos += 1;
            if first & 0x10 != 0 {
                -magnitude - 1
            } else {
                magnitude
            }
        } else if first & 0xF0 == 0xE0 {
            if pos + 2 > input.len() {
                return Err(truncated(3, pos));
            }
            let magnitude = (((first & 0x07) as i32) << 16)
                | ((input[pos] as i32) << 8)
                | input[pos + 1] as i32;
            pos += 2;
            if first & 0x08 != 0 {
                -magnitude - 1
            } else {
                magnitude
            }
        } else {
            if pos + 4 > input.len() {
                return Err(truncated(5, pos));
            }
            let diff = i32::from_be_bytes([
                input[pos],
                input[pos + 1],
                input[pos + 2],
                input[pos + 3],
            ]);
            pos += 4;
            diff
        };

        // 前缀和重建样本
        if i == 0 {
            previous = diff;
        } else {
            previous = previous.wrapping_add(diff);
        }
        samples.push(previous);
    }

    Ok(samples)
}

// 符号统计直方图: (d+128)&0xFF 的256档计数, 归一化到最大值255,
// 非零档至少为1。仅供兼容读取器参考, 解码不依赖它。
fn compute_statistics(differences: &[i32]) -> [u8; 256] {
    let mut counts = [0u64; 256];
    for &diff in differences {
        let symbol = (diff.wrapping_add(128) & 0xFF) as usize;
        counts[symbol] += 1;
    }

    let mut stats = [0u8; 256];
    let max_count = counts.iter().copied().max().unwrap_or(0);
    if max_count > 0 {
        for (stat, &count) in stats.iter_mut().zip(counts.iter()) {
            *stat = ((count * 255) / max_count) as u8;
            if count > 0 && *stat == 0 {
                *stat = 1;
            }
        }
    }
    stats
}

// 只加密完整的16字节分组, 不足一组的尾部保持明文
fn encrypt_payload(payload: &mut [u8], key: &[u8; aes::EXPANDED_KEY_BYTES]) {
    for chunk in payload.chunks_exact_mut(aes::BLOCK_BYTES) {
        let block: [u8; aes::BLOCK_BYTES] = chunk.try_into().unwrap();
        chunk.copy_from_slice(&aes::encrypt_block(&block, key));
    }
}

fn decrypt_payload(payload: &mut [u8], key: &[u8; aes::EXPANDED_KEY_BYTES]) {
    for chunk in payload.chunks_exact_mut(aes::BLOCK_BYTES) {
        let block: [u8; aes::BLOCK_BYTES] = chunk.try_into().unwrap();
        chunk.copy_from_slice(&aes::decrypt_block(&block, key));
    }
}
