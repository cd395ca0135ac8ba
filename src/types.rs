//! On-disk structures of the MEF 3.0 format.
//!
//! Every structure here has a fixed byte width and fixed field offsets; the
//! serialized form is little-endian regardless of host endianness and
//! round-trips byte-for-byte, including the opaque "protected" and
//! "discretionary" regions. Fresh structures fill those regions with the
//! format's pad byte `0x7E`.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::aes;
use crate::crc;
use crate::error::{MefError, Result};
use crate::utils::{read_text_field, write_text_field};

/// MEF format major version produced and accepted by this crate.
pub const MEF_VERSION_MAJOR: u8 = 3;
/// MEF format minor version.
pub const MEF_VERSION_MINOR: u8 = 0;

/// Fill byte for unused protected/discretionary regions and file padding.
pub const PAD_BYTE: u8 = 0x7E;

/// "No entry" sentinel for µUTC timestamp fields.
pub const UUTC_NO_ENTRY: i64 = i64::MIN;
/// "No entry" sentinel for entry counters.
pub const UNKNOWN_NUMBER_OF_ENTRIES: i64 = -1;
/// "No entry" sentinel for CRC fields.
pub const CRC_NO_ENTRY: u32 = 0;
/// "No entry" sentinel for the segment number field.
pub const SEGMENT_NUMBER_NO_ENTRY: i32 = -1;
/// "No entry" sentinel for the GMT offset field (one past the legal range).
pub const GMT_OFFSET_NO_ENTRY: i32 = -86_401;

/// Byte-order code stored in every Universal Header (always little-endian).
pub const MEF_LITTLE_ENDIAN: u8 = 1;

// 目录与文件类型代码（5字节NUL结尾字符串的小端u32形式）
pub const SESSION_DIRECTORY_TYPE: &str = "mefd";
pub const SESSION_DIRECTORY_TYPE_CODE: u32 = 0x6466_656d;
pub const SEGMENT_DIRECTORY_TYPE: &str = "segd";
pub const SEGMENT_DIRECTORY_TYPE_CODE: u32 = 0x6467_6573;
pub const TIME_SERIES_CHANNEL_DIRECTORY_TYPE: &str = "timd";
pub const TIME_SERIES_CHANNEL_DIRECTORY_TYPE_CODE: u32 = 0x646d_6974;
pub const VIDEO_CHANNEL_DIRECTORY_TYPE: &str = "vidd";
pub const TIME_SERIES_METADATA_FILE_TYPE: &str = "tmet";
pub const TIME_SERIES_METADATA_FILE_TYPE_CODE: u32 = 0x7465_6d74;
pub const TIME_SERIES_DATA_FILE_TYPE: &str = "tdat";
pub const TIME_SERIES_DATA_FILE_TYPE_CODE: u32 = 0x7461_6474;
pub const TIME_SERIES_INDICES_FILE_TYPE: &str = "tidx";
pub const TIME_SERIES_INDICES_FILE_TYPE_CODE: u32 = 0x7864_6974;
pub const RECORD_DATA_FILE_TYPE: &str = "rdat";
pub const RECORD_DATA_FILE_TYPE_CODE: u32 = 0x7461_6472;
pub const RECORD_INDICES_FILE_TYPE: &str = "ridx";
pub const RECORD_INDICES_FILE_TYPE_CODE: u32 = 0x7864_6972;

/// Metadata file size (every `.tmet` file is exactly this long).
pub const METADATA_FILE_BYTES: usize = 16_384;
/// Absolute offset of metadata section 2 within a `.tmet` file.
pub const METADATA_SECTION_2_OFFSET: usize = 2560;
/// Absolute offset of metadata section 3 within a `.tmet` file.
pub const METADATA_SECTION_3_OFFSET: usize = 13_312;

const TYPE_BYTES: usize = 5;
const NAME_BYTES: usize = 256;
const UUID_BYTES: usize = 16;
const PASSWORD_VALIDATION_BYTES: usize = 16;

/// RED block flag: block begins after a time discontinuity.
pub const RED_DISCONTINUITY_FLAG: u8 = 0x01;
/// RED block flag: difference payload is level-1 encrypted.
pub const RED_LEVEL_1_ENCRYPTION_FLAG: u8 = 0x02;
/// RED block flag: difference payload is level-2 encrypted.
pub const RED_LEVEL_2_ENCRYPTION_FLAG: u8 = 0x04;
/// All flag bits this crate understands.
pub const RED_KNOWN_FLAGS: u8 =
    RED_DISCONTINUITY_FLAG | RED_LEVEL_1_ENCRYPTION_FLAG | RED_LEVEL_2_ENCRYPTION_FLAG;

fn check_len(buf: &[u8], need: usize, what: &str) -> Result<()> {
    if buf.len() < need {
        return Err(MefError::InvalidFormat(format!(
            "{} needs {} bytes, got {}",
            what,
            need,
            buf.len()
        )));
    }
    Ok(())
}

/// The 1024-byte header at the start of every MEF 3.0 file.
///
/// The header CRC covers bytes `[4..1024)` of the serialized header; the
/// body CRC covers everything after the header in the owning file.
///
/// # Examples
///
/// ```rust
/// use mef3::types::UniversalHeader;
///
/// let mut uh = UniversalHeader::new("tdat");
/// uh.channel_name = "chan_01".to_string();
/// uh.segment_number = 0;
///
/// let bytes = uh.to_bytes();
/// assert_eq!(bytes.len(), UniversalHeader::BYTES);
/// assert_eq!(UniversalHeader::from_bytes(&bytes).unwrap(), uh);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct UniversalHeader {
    pub header_crc: u32,
    pub body_crc: u32,
    pub file_type: String,
    pub version_major: u8,
    pub version_minor: u8,
    pub byte_order_code: u8,
    pub start_time: i64,
    pub end_time: i64,
    pub number_of_entries: i64,
    pub maximum_entry_size: i64,
    pub segment_number: i32,
    pub channel_name: String,
    pub session_name: String,
    pub anonymized_name: String,
    pub level_uuid: [u8; UUID_BYTES],
    pub file_uuid: [u8; UUID_BYTES],
    pub provenance_uuid: [u8; UUID_BYTES],
    pub level_1_password_validation: [u8; PASSWORD_VALIDATION_BYTES],
    pub level_2_password_validation: [u8; PASSWORD_VALIDATION_BYTES],
    pub protected_region: [u8; 60],
    pub discretionary_region: [u8; 64],
}

impl UniversalHeader {
    pub const BYTES: usize = 1024;

    /// Fresh header of the given file type with all "no entry" defaults.
    pub fn new(file_type: &str) -> Self {
        UniversalHeader {
            header_crc: CRC_NO_ENTRY,
            body_crc: CRC_NO_ENTRY,
            file_type: file_type.to_string(),
            version_major: MEF_VERSION_MAJOR,
            version_minor: MEF_VERSION_MINOR,
            byte_order_code: MEF_LITTLE_ENDIAN,
            start_time: UUTC_NO_ENTRY,
            end_time: UUTC_NO_ENTRY,
            number_of_entries: UNKNOWN_NUMBER_OF_ENTRIES,
            maximum_entry_size: UNKNOWN_NUMBER_OF_ENTRIES,
            segment_number: SEGMENT_NUMBER_NO_ENTRY,
            channel_name: String::new(),
            session_name: String::new(),
            anonymized_name: String::new(),
            level_uuid: [0; UUID_BYTES],
            file_uuid: [0; UUID_BYTES],
            provenance_uuid: [0; UUID_BYTES],
            level_1_password_validation: [0; PASSWORD_VALIDATION_BYTES],
            level_2_password_validation: [0; PASSWORD_VALIDATION_BYTES],
            protected_region: [PAD_BYTE; 60],
            discretionary_region: [PAD_BYTE; 64],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::BYTES];
        {
            let mut cur = Cursor::new(&mut buf[..]);
            cur.write_u32::<LittleEndian>(self.header_crc).unwrap();
            cur.write_u32::<LittleEndian>(self.body_crc).unwrap();
        }
        write_text_field(&mut buf[8..8 + TYPE_BYTES], &self.file_type);
        buf[13] = self.version_major;
        buf[14] = self.version_minor;
        buf[15] = self.byte_order_code;
        {
            let mut cur = Cursor::new(&mut buf[16..52]);
            cur.write_i64::<LittleEndian>(self.start_time).unwrap();
            cur.write_i64::<LittleEndian>(self.end_time).unwrap();
            cur.write_i64::<LittleEndian>(self.number_of_entries).unwrap();
            cur.write_i64::<LittleEndian>(self.maximum_entry_size).unwrap();
            cur.write_i32::<LittleEndian>(self.segment_number).unwrap();
        }
        write_text_field(&mut buf[52..308], &self.channel_name);
        write_text_field(&mut buf[308..564], &self.session_name);
        write_text_field(&mut buf[564..820], &self.anonymized_name);
        buf[820..836].copy_from_slice(&self.level_uuid);
        buf[836..852].copy_from_slice(&self.file_uuid);
        buf[852..868].copy_from_slice(&self.provenance_uuid);
        buf[868..884].copy_from_slice(&self.level_1_password_validation);
        buf[884..900].copy_from_slice(&self.level_2_password_validation);
        buf[900..960].copy_from_slice(&self.protected_region);
        buf[960..1024].copy_from_slice(&self.discretionary_region);
        buf
    }

    /// Serializes and stamps the header CRC over bytes `[4..1024)`.
    pub fn to_bytes_with_crc(&self) -> Vec<u8> {
        let mut buf = self.to_bytes();
        let header_crc = crc::calculate(&buf[4..Self::BYTES]);
        buf[0..4].copy_from_slice(&header_crc.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::BYTES, "universal header")?;

        let take16 = |range: std::ops::Range<usize>| {
            let mut out = [0u8; UUID_BYTES];
            out.copy_from_slice(&buf[range]);
            out
        };
        let level_uuid = take16(820..836);
        let file_uuid = take16(836..852);
        let provenance_uuid = take16(852..868);
        let level_1_password_validation = take16(868..884);
        let level_2_password_validation = take16(884..900);

        let mut protected_region = [0u8; 60];
        protected_region.copy_from_slice(&buf[900..960]);
        let mut discretionary_region = [0u8; 64];
        discretionary_region.copy_from_slice(&buf[960..1024]);

        let mut cur = Cursor::new(&buf[16..52]);
        Ok(UniversalHeader {
            header_crc: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            body_crc: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            file_type: read_text_field(&buf[8..8 + TYPE_BYTES]),
            version_major: buf[13],
            version_minor: buf[14],
            byte_order_code: buf[15],
            start_time: cur.read_i64::<LittleEndian>()?,
            end_time: cur.read_i64::<LittleEndian>()?,
            number_of_entries: cur.read_i64::<LittleEndian>()?,
            maximum_entry_size: cur.read_i64::<LittleEndian>()?,
            segment_number: cur.read_i32::<LittleEndian>()?,
            channel_name: read_text_field(&buf[52..308]),
            session_name: read_text_field(&buf[308..564]),
            anonymized_name: read_text_field(&buf[564..820]),
            level_uuid,
            file_uuid,
            provenance_uuid,
            level_1_password_validation,
            level_2_password_validation,
            protected_region,
            discretionary_region,
        })
    }

    /// Checks the stored header CRC against the serialized bytes of a file
    /// prefix.
    pub fn validate_header_crc(file_prefix: &[u8]) -> Result<()> {
        check_len(file_prefix, Self::BYTES, "universal header")?;
        let stored = u32::from_le_bytes(file_prefix[0..4].try_into().unwrap());
        if stored != CRC_NO_ENTRY && !crc::validate(&file_prefix[4..Self::BYTES], stored) {
            return Err(MefError::InvalidFormat(
                "universal header CRC mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

/// Metadata section 1: encryption levels for the following sections.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSection1 {
    pub section_2_encryption: i8,
    pub section_3_encryption: i8,
    pub protected_region: [u8; 766],
    pub discretionary_region: [u8; 768],
}

impl MetadataSection1 {
    pub const BYTES: usize = 1536;

    pub fn new() -> Self {
        MetadataSection1 {
            // 默认值: 第2节1级加密, 第3节2级加密
            section_2_encryption: 1,
            section_3_encryption: 2,
            protected_region: [PAD_BYTE; 766],
            discretionary_region: [PAD_BYTE; 768],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::BYTES];
        buf[0] = self.section_2_encryption as u8;
        buf[1] = self.section_3_encryption as u8;
        buf[2..768].copy_from_slice(&self.protected_region);
        buf[768..1536].copy_from_slice(&self.discretionary_region);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::BYTES, "metadata section 1")?;
        let mut protected_region = [0u8; 766];
        protected_region.copy_from_slice(&buf[2..768]);
        let mut discretionary_region = [0u8; 768];
        discretionary_region.copy_from_slice(&buf[768..1536]);
        Ok(MetadataSection1 {
            section_2_encryption: buf[0] as i8,
            section_3_encryption: buf[1] as i8,
            protected_region,
            discretionary_region,
        })
    }
}

impl Default for MetadataSection1 {
    fn default() -> Self {
        Self::new()
    }
}

/// Time-series metadata section 2: acquisition parameters and the
/// per-segment compression summary.
#[derive(Debug, Clone)]
pub struct TimeSeriesMetadataSection2 {
    pub channel_description: String,
    pub session_description: String,
    pub recording_duration: i64,
    pub reference_description: String,
    pub acquisition_channel_number: i64,
    pub sampling_frequency: f64,
    pub low_frequency_filter_setting: f64,
    pub high_frequency_filter_setting: f64,
    pub notch_filter_frequency_setting: f64,
    pub ac_line_frequency: f64,
    pub units_conversion_factor: f64,
    pub units_description: String,
    pub maximum_native_sample_value: f64,
    pub minimum_native_sample_value: f64,
    pub start_sample: i64,
    pub number_of_samples: i64,
    pub number_of_blocks: i64,
    pub maximum_block_bytes: i64,
    pub maximum_block_samples: u32,
    pub maximum_difference_bytes: u32,
    pub block_interval: i64,
    pub number_of_discontinuities: i64,
    pub maximum_contiguous_blocks: i64,
    pub maximum_contiguous_block_bytes: i64,
    pub maximum_contiguous_samples: i64,
    pub protected_region: [u8; 2160],
    pub discretionary_region: [u8; 2160],
}

impl TimeSeriesMetadataSection2 {
    pub const BYTES: usize = 10_752;

    pub fn new() -> Self {
        TimeSeriesMetadataSection2 {
            channel_description: String::new(),
            session_description: String::new(),
            recording_duration: -1,
            reference_description: String::new(),
            acquisition_channel_number: -1,
            sampling_frequency: -1.0,
            low_frequency_filter_setting: -1.0,
            high_frequency_filter_setting: -1.0,
            notch_filter_frequency_setting: -1.0,
            ac_line_frequency: -1.0,
            units_conversion_factor: 0.0,
            units_description: String::new(),
            maximum_native_sample_value: f64::NAN,
            minimum_native_sample_value: f64::NAN,
            start_sample: -1,
            number_of_samples: -1,
            number_of_blocks: -1,
            maximum_block_bytes: -1,
            maximum_block_samples: u32::MAX,
            maximum_difference_bytes: u32::MAX,
            block_interval: -1,
            number_of_discontinuities: -1,
            maximum_contiguous_blocks: -1,
            maximum_contiguous_block_bytes: -1,
            maximum_contiguous_samples: -1,
            protected_region: [PAD_BYTE; 2160],
            discretionary_region: [PAD_BYTE; 2160],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::BYTES];
        write_text_field(&mut buf[0..2048], &self.channel_description);
        write_text_field(&mut buf[2048..4096], &self.session_description);
        {
            let mut cur = Cursor::new(&mut buf[4096..4104]);
            cur.write_i64::<LittleEndian>(self.recording_duration).unwrap();
        }
        write_text_field(&mut buf[4104..6152], &self.reference_description);
        {
            let mut cur = Cursor::new(&mut buf[6152..6208]);
            cur.write_i64::<LittleEndian>(self.acquisition_channel_number).unwrap();
            cur.write_f64::<LittleEndian>(self.sampling_frequency).unwrap();
            cur.write_f64::<LittleEndian>(self.low_frequency_filter_setting).unwrap();
            cur.write_f64::<LittleEndian>(self.high_frequency_filter_setting).unwrap();
            cur.write_f64::<LittleEndian>(self.notch_filter_frequency_setting).unwrap();
            cur.write_f64::<LittleEndian>(self.ac_line_frequency).unwrap();
            cur.write_f64::<LittleEndian>(self.units_conversion_factor).unwrap();
        }
        write_text_field(&mut buf[6208..6336], &self.units_description);
        {
            let mut cur = Cursor::new(&mut buf[6336..6432]);
            cur.write_f64::<LittleEndian>(self.maximum_native_sample_value).unwrap();
            cur.write_f64::<LittleEndian>(self.minimum_native_sample_value).unwrap();
            cur.write_i64::<LittleEndian>(self.start_sample).unwrap();
            cur.write_i64::<LittleEndian>(self.number_of_samples).unwrap();
            cur.write_i64::<LittleEndian>(self.number_of_blocks).unwrap();
            cur.write_i64::<LittleEndian>(self.maximum_block_bytes).unwrap();
            cur.write_u32::<LittleEndian>(self.maximum_block_samples).unwrap();
            cur.write_u32::<LittleEndian>(self.maximum_difference_bytes).unwrap();
            cur.write_i64::<LittleEndian>(self.block_interval).unwrap();
            cur.write_i64::<LittleEndian>(self.number_of_discontinuities).unwrap();
            cur.write_i64::<LittleEndian>(self.maximum_contiguous_blocks).unwrap();
            cur.write_i64::<LittleEndian>(self.maximum_contiguous_block_bytes).unwrap();
            cur.write_i64::<LittleEndian>(self.maximum_contiguous_samples).unwrap();
        }
        buf[6432..8592].copy_from_slice(&self.protected_region);
        buf[8592..10_752].copy_from_slice(&self.discretionary_region);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::BYTES, "time series metadata section 2")?;
        let mut head = Cursor::new(&buf[6152..6208]);
        let mut tail = Cursor::new(&buf[6336..6432]);
        let mut protected_region = [0u8; 2160];
        protected_region.copy_from_slice(&buf[6432..8592]);
        let mut discretionary_region = [0u8; 2160];
        discretionary_region.copy_from_slice(&buf[8592..10_752]);

        Ok(TimeSeriesMetadataSection2 {
            channel_description: read_text_field(&buf[0..2048]),
            session_description: read_text_field(&buf[2048..4096]),
            recording_duration: i64::from_le_bytes(buf[4096..4104].try_into().unwrap()),
            reference_description: read_text_field(&buf[4104..6152]),
            acquisition_channel_number: head.read_i64::<LittleEndian>()?,
            sampling_frequency: head.read_f64::<LittleEndian>()?,
            low_frequency_filter_setting: head.read_f64::<LittleEndian>()?,
            high_frequency_filter_setting: head.read_f64::<LittleEndian>()?,
            notch_filter_frequency_setting: head.read_f64::<LittleEndian>()?,
            ac_line_frequency: head.read_f64::<LittleEndian>()?,
            units_conversion_factor: head.read_f64::<LittleEndian>()?,
            units_description: read_text_field(&buf[6208..6336]),
            maximum_native_sample_value: tail.read_f64::<LittleEndian>()?,
            minimum_native_sample_value: tail.read_f64::<LittleEndian>()?,
            start_sample: tail.read_i64::<LittleEndian>()?,
            number_of_samples: tail.read_i64::<LittleEndian>()?,
            number_of_blocks: tail.read_i64::<LittleEndian>()?,
            maximum_block_bytes: tail.read_i64::<LittleEndian>()?,
            maximum_block_samples: tail.read_u32::<LittleEndian>()?,
            maximum_difference_bytes: tail.read_u32::<LittleEndian>()?,
            block_interval: tail.read_i64::<LittleEndian>()?,
            number_of_discontinuities: tail.read_i64::<LittleEndian>()?,
            maximum_contiguous_blocks: tail.read_i64::<LittleEndian>()?,
            maximum_contiguous_block_bytes: tail.read_i64::<LittleEndian>()?,
            maximum_contiguous_samples: tail.read_i64::<LittleEndian>()?,
            protected_region,
            discretionary_region,
        })
    }
}

impl Default for TimeSeriesMetadataSection2 {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata section 3: recording time context and subject identity.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSection3 {
    pub recording_time_offset: i64,
    pub dst_start_time: i64,
    pub dst_end_time: i64,
    pub gmt_offset: i32,
    pub subject_name_1: String,
    pub subject_name_2: String,
    pub subject_id: String,
    pub recording_location: String,
    pub protected_region: [u8; 1124],
    pub discretionary_region: [u8; 1024],
}

impl MetadataSection3 {
    pub const BYTES: usize = 3072;

    pub fn new() -> Self {
        MetadataSection3 {
            recording_time_offset: UUTC_NO_ENTRY,
            dst_start_time: UUTC_NO_ENTRY,
            dst_end_time: UUTC_NO_ENTRY,
            gmt_offset: GMT_OFFSET_NO_ENTRY,
            subject_name_1: String::new(),
            subject_name_2: String::new(),
            subject_id: String::new(),
            recording_location: String::new(),
            protected_region: [PAD_BYTE; 1124],
            discretionary_region: [PAD_BYTE; 1024],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::BYTES];
        {
            let mut cur = Cursor::new(&mut buf[0..28]);
            cur.write_i64::<LittleEndian>(self.recording_time_offset).unwrap();
            cur.write_i64::<LittleEndian>(self.dst_start_time).unwrap();
            cur.write_i64::<LittleEndian>(self.dst_end_time).unwrap();
            cur.write_i32::<LittleEndian>(self.gmt_offset).unwrap();
        }
        write_text_field(&mut buf[28..156], &self.subject_name_1);
        write_text_field(&mut buf[156..284], &self.subject_name_2);
        write_text_field(&mut buf[284..412], &self.subject_id);
        write_text_field(&mut buf[412..924], &self.recording_location);
        buf[924..2048].copy_from_slice(&self.protected_region);
        buf[2048..3072].copy_from_slice(&self.discretionary_region);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::BYTES, "metadata section 3")?;
        let mut cur = Cursor::new(&buf[0..28]);
        let mut protected_region = [0u8; 1124];
        protected_region.copy_from_slice(&buf[924..2048]);
        let mut discretionary_region = [0u8; 1024];
        discretionary_region.copy_from_slice(&buf[2048..3072]);

        Ok(MetadataSection3 {
            recording_time_offset: cur.read_i64::<LittleEndian>()?,
            dst_start_time: cur.read_i64::<LittleEndian>()?,
            dst_end_time: cur.read_i64::<LittleEndian>()?,
            gmt_offset: cur.read_i32::<LittleEndian>()?,
            subject_name_1: read_text_field(&buf[28..156]),
            subject_name_2: read_text_field(&buf[156..284]),
            subject_id: read_text_field(&buf[284..412]),
            recording_location: read_text_field(&buf[412..924]),
            protected_region,
            discretionary_region,
        })
    }
}

impl Default for MetadataSection3 {
    fn default() -> Self {
        Self::new()
    }
}

/// One 56-byte entry of a `.tidx` indices file, locating a single RED block.
///
/// `start_sample` is channel-cumulative: it keeps counting across segment
/// boundaries, so a block can be located from a channel-wide sample index
/// without rebasing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSeriesIndex {
    pub file_offset: i64,
    pub start_time: i64,
    pub start_sample: i64,
    pub number_of_samples: u32,
    pub block_bytes: u32,
    pub maximum_sample_value: i32,
    pub minimum_sample_value: i32,
    pub protected_region: [u8; 4],
    pub flags: u8,
    pub red_protected_region: [u8; 3],
    pub red_discretionary_region: [u8; 8],
}

impl TimeSeriesIndex {
    pub const BYTES: usize = 56;

    pub fn new() -> Self {
        TimeSeriesIndex {
            file_offset: -1,
            start_time: UUTC_NO_ENTRY,
            start_sample: -1,
            number_of_samples: u32::MAX,
            block_bytes: u32::MAX,
            maximum_sample_value: crate::red::RED_NAN,
            minimum_sample_value: crate::red::RED_NAN,
            protected_region: [PAD_BYTE; 4],
            flags: 0,
            red_protected_region: [PAD_BYTE; 3],
            red_discretionary_region: [PAD_BYTE; 8],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::BYTES];
        {
            let mut cur = Cursor::new(&mut buf[0..40]);
            cur.write_i64::<LittleEndian>(self.file_offset).unwrap();
            cur.write_i64::<LittleEndian>(self.start_time).unwrap();
            cur.write_i64::<LittleEndian>(self.start_sample).unwrap();
            cur.write_u32::<LittleEndian>(self.number_of_samples).unwrap();
            cur.write_u32::<LittleEndian>(self.block_bytes).unwrap();
            cur.write_i32::<LittleEndian>(self.maximum_sample_value).unwrap();
            cur.write_i32::<LittleEndian>(self.minimum_sample_value).unwrap();
        }
        buf[40..44].copy_from_slice(&self.protected_region);
        buf[44] = self.flags;
        buf[45..48].copy_from_slice(&self.red_protected_region);
        buf[48..56].copy_from_slice(&self.red_discretionary_region);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::BYTES, "time series index")?;
        let mut cur = Cursor::new(&buf[0..40]);
        let mut protected_region = [0u8; 4];
        protected_region.copy_from_slice(&buf[40..44]);
        let mut red_protected_region = [0u8; 3];
        red_protected_region.copy_from_slice(&buf[45..48]);
        let mut red_discretionary_region = [0u8; 8];
        red_discretionary_region.copy_from_slice(&buf[48..56]);

        Ok(TimeSeriesIndex {
            file_offset: cur.read_i64::<LittleEndian>()?,
            start_time: cur.read_i64::<LittleEndian>()?,
            start_sample: cur.read_i64::<LittleEndian>()?,
            number_of_samples: cur.read_u32::<LittleEndian>()?,
            block_bytes: cur.read_u32::<LittleEndian>()?,
            maximum_sample_value: cur.read_i32::<LittleEndian>()?,
            minimum_sample_value: cur.read_i32::<LittleEndian>()?,
            protected_region,
            flags: buf[44],
            red_protected_region,
            red_discretionary_region,
        })
    }

    pub fn is_discontinuity(&self) -> bool {
        self.flags & RED_DISCONTINUITY_FLAG != 0
    }
}

impl Default for TimeSeriesIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Header of a record in a `.rdat` file (recognized, not exercised by the
/// time-series core).
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    pub record_crc: u32,
    pub type_string: String,
    pub version_major: u8,
    pub version_minor: u8,
    pub encryption: i8,
    pub bytes: u32,
    pub time: i64,
}

impl RecordHeader {
    pub const BYTES: usize = 24;

    pub fn new(type_string: &str) -> Self {
        RecordHeader {
            record_crc: CRC_NO_ENTRY,
            type_string: type_string.to_string(),
            version_major: 0xFF,
            version_minor: 0xFF,
            encryption: 0,
            bytes: 0,
            time: UUTC_NO_ENTRY,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::BYTES];
        buf[0..4].copy_from_slice(&self.record_crc.to_le_bytes());
        write_text_field(&mut buf[4..4 + TYPE_BYTES], &self.type_string);
        buf[9] = self.version_major;
        buf[10] = self.version_minor;
        buf[11] = self.encryption as u8;
        buf[12..16].copy_from_slice(&self.bytes.to_le_bytes());
        buf[16..24].copy_from_slice(&self.time.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::BYTES, "record header")?;
        Ok(RecordHeader {
            record_crc: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            type_string: read_text_field(&buf[4..4 + TYPE_BYTES]),
            version_major: buf[9],
            version_minor: buf[10],
            encryption: buf[11] as i8,
            bytes: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            time: i64::from_le_bytes(buf[16..24].try_into().unwrap()),
        })
    }
}

/// One entry of a `.ridx` record indices file.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordIndex {
    pub type_string: String,
    pub version_major: u8,
    pub version_minor: u8,
    pub encryption: i8,
    pub file_offset: i64,
    pub time: i64,
}

impl RecordIndex {
    pub const BYTES: usize = 24;

    pub fn new(type_string: &str) -> Self {
        RecordIndex {
            type_string: type_string.to_string(),
            version_major: 0xFF,
            version_minor: 0xFF,
            encryption: 0,
            file_offset: -1,
            time: UUTC_NO_ENTRY,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::BYTES];
        write_text_field(&mut buf[0..TYPE_BYTES], &self.type_string);
        buf[5] = self.version_major;
        buf[6] = self.version_minor;
        buf[7] = self.encryption as u8;
        buf[8..16].copy_from_slice(&self.file_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.time.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::BYTES, "record index")?;
        Ok(RecordIndex {
            type_string: read_text_field(&buf[0..TYPE_BYTES]),
            version_major: buf[5],
            version_minor: buf[6],
            encryption: buf[7] as i8,
            file_offset: i64::from_le_bytes(buf[8..16].try_into().unwrap()),
            time: i64::from_le_bytes(buf[16..24].try_into().unwrap()),
        })
    }
}

/// The 304-byte header at the start of every RED block.
#[derive(Debug, Clone, PartialEq)]
pub struct RedBlockHeader {
    pub block_crc: u32,
    pub flags: u8,
    pub protected_region: [u8; 3],
    pub discretionary_region: [u8; 8],
    pub detrend_slope: f32,
    pub detrend_intercept: f32,
    pub scale_factor: f32,
    pub difference_bytes: u32,
    pub number_of_samples: u32,
    pub block_bytes: u32,
    pub start_time: i64,
    pub statistics: [u8; 256],
}

impl RedBlockHeader {
    pub const BYTES: usize = 304;

    pub fn new() -> Self {
        RedBlockHeader {
            block_crc: CRC_NO_ENTRY,
            flags: 0,
            protected_region: [PAD_BYTE; 3],
            discretionary_region: [PAD_BYTE; 8],
            detrend_slope: 0.0,
            detrend_intercept: 0.0,
            scale_factor: 1.0,
            difference_bytes: 0,
            number_of_samples: 0,
            block_bytes: 0,
            start_time: UUTC_NO_ENTRY,
            statistics: [0; 256],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::BYTES];
        buf[0..4].copy_from_slice(&self.block_crc.to_le_bytes());
        buf[4] = self.flags;
        buf[5..8].copy_from_slice(&self.protected_region);
        buf[8..16].copy_from_slice(&self.discretionary_region);
        {
            let mut cur = Cursor::new(&mut buf[16..48]);
            cur.write_f32::<LittleEndian>(self.detrend_slope).unwrap();
            cur.write_f32::<LittleEndian>(self.detrend_intercept).unwrap();
            cur.write_f32::<LittleEndian>(self.scale_factor).unwrap();
            cur.write_u32::<LittleEndian>(self.difference_bytes).unwrap();
            cur.write_u32::<LittleEndian>(self.number_of_samples).unwrap();
            cur.write_u32::<LittleEndian>(self.block_bytes).unwrap();
            cur.write_i64::<LittleEndian>(self.start_time).unwrap();
        }
        buf[48..304].copy_from_slice(&self.statistics);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::BYTES, "RED block header")?;
        let mut cur = Cursor::new(&buf[16..48]);
        let mut protected_region = [0u8; 3];
        protected_region.copy_from_slice(&buf[5..8]);
        let mut discretionary_region = [0u8; 8];
        discretionary_region.copy_from_slice(&buf[8..16]);
        let mut statistics = [0u8; 256];
        statistics.copy_from_slice(&buf[48..304]);

        Ok(RedBlockHeader {
            block_crc: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            flags: buf[4],
            protected_region,
            discretionary_region,
            detrend_slope: cur.read_f32::<LittleEndian>()?,
            detrend_intercept: cur.read_f32::<LittleEndian>()?,
            scale_factor: cur.read_f32::<LittleEndian>()?,
            difference_bytes: cur.read_u32::<LittleEndian>()?,
            number_of_samples: cur.read_u32::<LittleEndian>()?,
            block_bytes: cur.read_u32::<LittleEndian>()?,
            start_time: cur.read_i64::<LittleEndian>()?,
            statistics,
        })
    }

    pub fn is_discontinuity(&self) -> bool {
        self.flags & RED_DISCONTINUITY_FLAG != 0
    }

    pub fn is_level_1_encrypted(&self) -> bool {
        self.flags & RED_LEVEL_1_ENCRYPTION_FLAG != 0
    }

    pub fn is_level_2_encrypted(&self) -> bool {
        self.flags & RED_LEVEL_2_ENCRYPTION_FLAG != 0
    }
}

impl Default for RedBlockHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Expanded encryption keys and the access level they grant.
#[derive(Clone)]
pub struct PasswordData {
    pub level_1_key: Option<[u8; aes::EXPANDED_KEY_BYTES]>,
    pub level_2_key: Option<[u8; aes::EXPANDED_KEY_BYTES]>,
    pub access_level: u8,
}

impl PasswordData {
    pub fn none() -> Self {
        PasswordData {
            level_1_key: None,
            level_2_key: None,
            access_level: 0,
        }
    }

    /// Key usable for the given encryption level, if access permits.
    ///
    /// A level-2 password grants level-1 access as well, so the level-2 key
    /// stands in when no dedicated level-1 key is present.
    pub fn key_for_level(&self, level: u8) -> Option<&[u8; aes::EXPANDED_KEY_BYTES]> {
        if self.access_level < level {
            return None;
        }
        match level {
            1 => self.level_1_key.as_ref().or(self.level_2_key.as_ref()),
            2 => self.level_2_key.as_ref(),
            _ => None,
        }
    }
}

impl Default for PasswordData {
    fn default() -> Self {
        Self::none()
    }
}

/// Summary information for one channel of an open session.
///
/// Times are µUTC (microseconds since the Unix epoch).
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub name: String,
    pub sampling_frequency: f64,
    pub number_of_samples: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub units: String,
    pub units_conversion_factor: f64,
    pub number_of_segments: i32,
}

/// Summary information for one segment of a channel.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub name: String,
    pub segment_number: i32,
    pub start_time: i64,
    pub end_time: i64,
    pub start_sample: i64,
    pub number_of_samples: i64,
    pub number_of_blocks: i64,
}
