use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::crc;
use crate::error::{MefError, Result};
use crate::reader::{password_validation_field, read_universal_header};
use crate::red::{self, RED_MAXIMUM_SAMPLE_VALUE, RED_MINIMUM_SAMPLE_VALUE, RED_NAN};
use crate::types::{
    MetadataSection1, MetadataSection3, PasswordData, TimeSeriesIndex,
    TimeSeriesMetadataSection2, UniversalHeader, METADATA_FILE_BYTES, METADATA_SECTION_2_OFFSET,
    METADATA_SECTION_3_OFFSET, TIME_SERIES_DATA_FILE_TYPE, TIME_SERIES_INDICES_FILE_TYPE,
    TIME_SERIES_METADATA_FILE_TYPE, UUTC_NO_ENTRY,
};
use crate::utils::{samples_to_micros, segment_base_name};

/// Default number of samples per RED block.
const DEFAULT_BLOCK_LEN: u32 = 1000;

/// Writer for a MEF 3.0 session directory.
///
/// The writer converts floating-point sample streams into blocked `si4`
/// streams, chooses segment boundaries automatically on time
/// discontinuities, and maintains the per-segment index and metadata files.
/// Channels are created on first write; each channel keeps one data file
/// open while its current segment is being filled.
///
/// Writes are append-only and sequential within a channel. Dropping the
/// writer closes it, but errors during an implicit close are suppressed, so
/// call [`close`](MefWriter::close) explicitly when the result matters.
///
/// # Examples
///
/// ```rust
/// use mef3::{MefWriter, MefReader};
///
/// let dir = std::env::temp_dir().join("mef3_doc_writer.mefd");
/// # std::fs::remove_dir_all(&dir).ok();
/// let mut writer = MefWriter::create(&dir, true)?;
/// writer.set_block_len(100);
/// writer.set_data_units("uV");
///
/// // 1秒钟1kHz的正弦波
/// let data: Vec<f64> = (0..1000)
///     .map(|i| 100.0 * (2.0 * std::f64::consts::PI * i as f64 / 100.0).sin())
///     .collect();
/// writer.write_data(&data, "eeg_1", 1_000_000_000_000, 1000.0, Some(3), false)?;
/// writer.close()?;
///
/// let reader = MefReader::open(&dir)?;
/// assert_eq!(reader.channels(), vec!["eeg_1".to_string()]);
/// # std::fs::remove_dir_all(&dir).ok();
/// # Ok::<(), mef3::MefError>(())
/// ```
pub struct MefWriter {
    path: PathBuf,
    session_name: String,
    closed: bool,

    // 会话级配置
    block_len: u32,
    max_nans_written: u32,
    data_units: String,
    units_conversion_factor: f64,
    recording_time_offset: i64,
    gmt_offset: i32,
    subject_name: String,
    subject_id: String,
    recording_location: String,
    channel_description: String,
    session_description: String,

    password_data: PasswordData,
    level_1_validation: [u8; 16],
    level_2_validation: [u8; 16],
    level_uuid: [u8; 16],

    channels: BTreeMap<String, ChannelState>,
}

struct ChannelState {
    path: PathBuf,
    current_segment: i32,
    /// 下一个块的通道累计起始样本号
    next_start_sample: i64,
    last_end_time: i64,
    sampling_frequency: f64,
    units_conversion_factor: f64,
    indices: Vec<TimeSeriesIndex>,
    total_samples: i64,
    segment_max_difference_bytes: u32,
    data_file: Option<BufWriter<File>>,
    data_offset: i64,
    body_crc: u32,
}

impl MefWriter {
    /// Creates (or reopens) a session without passwords.
    ///
    /// With `overwrite` any existing directory at `path` is deleted first;
    /// otherwise new segments are appended after the existing ones. The
    /// `.mefd` extension is added if missing.
    pub fn create<P: AsRef<Path>>(path: P, overwrite: bool) -> Result<Self> {
        Self::create_with_passwords(path, overwrite, None, None)
    }

    /// Creates a session with optional level-1 and level-2 passwords.
    ///
    /// Passwords are expanded into AES round keys once, here; their
    /// validation fields are stamped into every Universal Header the writer
    /// produces.
    pub fn create_with_passwords<P: AsRef<Path>>(
        path: P,
        overwrite: bool,
        password_1: Option<&str>,
        password_2: Option<&str>,
    ) -> Result<Self> {
        let mut path = path.as_ref().to_path_buf();
        if path.extension().and_then(|e| e.to_str()) != Some("mefd") {
            path.set_extension("mefd");
        }

        if overwrite && path.exists() {
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;

        let session_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut password_data = PasswordData::none();
        let mut level_1_validation = [0u8; 16];
        let mut level_2_validation = [0u8; 16];

        if let Some(pw) = password_1 {
            password_data.level_1_key = Some(crate::aes::expand_key(pw)?);
            password_data.access_level = 1;
            level_1_validation = password_validation_field(pw);
        }
        if let Some(pw) = password_2 {
            password_data.level_2_key = Some(crate::aes::expand_key(pw)?);
            password_data.access_level = 2;
            level_2_validation = password_validation_field(pw);
        }

        debug!(path = %path.display(), overwrite, "created MEF session");

        Ok(MefWriter {
            path,
            session_name,
            closed: false,
            block_len: DEFAULT_BLOCK_LEN,
            max_nans_written: 0,
            data_units: "V".to_string(),
            units_conversion_factor: 1.0,
            recording_time_offset: 0,
            gmt_offset: crate::types::GMT_OFFSET_NO_ENTRY,
            subject_name: String::new(),
            subject_id: String::new(),
            recording_location: String::new(),
            channel_description: String::new(),
            session_description: String::new(),
            password_data,
            level_1_validation,
            level_2_validation,
            level_uuid: *Uuid::new_v4().as_bytes(),
            channels: BTreeMap::new(),
        })
    }

    /// Session directory path (with the `.mefd` extension).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Samples per RED block for subsequent writes.
    pub fn block_len(&self) -> u32 {
        self.block_len
    }

    pub fn set_block_len(&mut self, block_len: u32) {
        self.block_len = block_len.max(1);
    }

    /// Advisory limit on consecutive NaN samples; stored but not enforced.
    pub fn max_nans_written(&self) -> u32 {
        self.max_nans_written
    }

    pub fn set_max_nans_written(&mut self, max_nans: u32) {
        self.max_nans_written = max_nans;
    }

    pub fn data_units(&self) -> &str {
        &self.data_units
    }

    pub fn set_data_units(&mut self, units: &str) {
        self.data_units = units.to_string();
    }

    pub fn units_conversion_factor(&self) -> f64 {
        self.units_conversion_factor
    }

    /// Conversion factor applied by readers to map `si4` samples back to
    /// physical units. Overridden per channel when [`write_data`]
    /// quantizes with a precision or auto-scale.
    ///
    /// [`write_data`]: MefWriter::write_data
    pub fn set_units_conversion_factor(&mut self, factor: f64) {
        self.units_conversion_factor = factor;
    }

    pub fn set_recording_time_offset(&mut self, offset: i64) {
        self.recording_time_offset = offset;
    }

    pub fn set_gmt_offset(&mut self, offset: i32) {
        self.gmt_offset = offset;
    }

    pub fn set_subject_name(&mut self, name: &str) {
        self.subject_name = name.to_string();
    }

    pub fn set_subject_id(&mut self, id: &str) {
        self.subject_id = id.to_string();
    }

    pub fn set_recording_location(&mut self, location: &str) {
        self.recording_location = location.to_string();
    }

    pub fn set_channel_description(&mut self, description: &str) {
        self.channel_description = description.to_string();
    }

    pub fn set_session_description(&mut self, description: &str) {
        self.session_description = description.to_string();
    }

    /// Writes floating-point samples to a channel.
    ///
    /// Samples are quantized to `si4`: with `precision` of `p ≥ 0` values
    /// are scaled by `10^p`; without it a per-call scale is chosen that maps
    /// the largest magnitude to 90% of the legal sample range. NaN becomes
    /// the reserved NaN sample; out-of-range values saturate. The inverse
    /// scale is recorded as the channel's units conversion factor, so a
    /// later auto-scaled call with a different range overwrites it — pass an
    /// explicit `precision` when writing one channel in several calls.
    ///
    /// A new segment is started when `new_segment` is set, when the channel
    /// has none yet, or when `start_uutc` is further than two blocks from
    /// the end of the previous write.
    pub fn write_data(
        &mut self,
        data: &[f64],
        channel_name: &str,
        start_uutc: i64,
        sampling_frequency: f64,
        precision: Option<i32>,
        new_segment: bool,
    ) -> Result<()> {
        if self.closed {
            return Err(MefError::Closed);
        }
        if data.is_empty() {
            return Ok(());
        }

        let scale = match precision {
            Some(p) if p >= 0 => 10f64.powi(p),
            _ => {
                // 自动定标: 最大幅值映射到合法范围的90%
                let max_abs = data
                    .iter()
                    .filter(|v| !v.is_nan())
                    .fold(0f64, |m, v| m.max(v.abs()));
                if max_abs > 0.0 {
                    RED_MAXIMUM_SAMPLE_VALUE as f64 / max_abs * 0.9
                } else {
                    1.0
                }
            }
        };

        let samples: Vec<i32> = data
            .iter()
            .map(|&v| {
                if v.is_nan() {
                    RED_NAN
                } else {
                    (v * scale)
                        .clamp(
                            RED_MINIMUM_SAMPLE_VALUE as f64,
                            RED_MAXIMUM_SAMPLE_VALUE as f64,
                        )
                        .round() as i32
                }
            })
            .collect();

        self.write_samples(
            &samples,
            channel_name,
            start_uutc,
            sampling_frequency,
            new_segment,
            Some(1.0 / scale),
        )
    }

    /// Writes raw `si4` samples to a channel without quantization.
    pub fn write_raw_data(
        &mut self,
        data: &[i32],
        channel_name: &str,
        start_uutc: i64,
        sampling_frequency: f64,
        new_segment: bool,
    ) -> Result<()> {
        if self.closed {
            return Err(MefError::Closed);
        }
        if data.is_empty() {
            return Ok(());
        }
        self.write_samples(
            data,
            channel_name,
            start_uutc,
            sampling_frequency,
            new_segment,
            None,
        )
    }

    /// Flushes all open data files to disk.
    pub fn flush(&mut self) -> Result<()> {
        for state in self.channels.values_mut() {
            if let Some(file) = state.data_file.as_mut() {
                file.flush()?;
            }
        }
        Ok(())
    }

    /// Finalizes every channel's current segment and closes the session.
    ///
    /// Idempotent; any later write fails with [`MefError::Closed`].
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        let names: Vec<String> = self.channels.keys().cloned().collect();
        for name in names {
            if self.channels[&name].data_file.is_some() {
                self.finalize_segment(&name)?;
            }
        }

        self.closed = true;
        debug!(path = %self.path.display(), "closed MEF session");
        Ok(())
    }

    fn write_samples(
        &mut self,
        samples: &[i32],
        channel_name: &str,
        start_uutc: i64,
        sampling_frequency: f64,
        new_segment: bool,
        conversion_factor: Option<f64>,
    ) -> Result<()> {
        if sampling_frequency <= 0.0 {
            return Err(MefError::InvalidFormat(format!(
                "sampling frequency {} Hz is not positive",
                sampling_frequency
            )));
        }

        self.ensure_channel(channel_name, sampling_frequency)?;

        let block_len = self.block_len as usize;

        // 分段判定: 显式要求 / 还没有打开的段 / 时间不连续超过两个块的跨度
        let need_new_segment = {
            let state = &self.channels[channel_name];
            let mut needed = new_segment || state.data_file.is_none();
            if !needed && state.last_end_time != UUTC_NO_ENTRY {
                let expected = state.last_end_time + (1e6 / sampling_frequency).round() as i64;
                let max_gap = (2.0 * block_len as f64 * 1e6 / sampling_frequency) as i64;
                if (start_uutc - expected).abs() > max_gap {
                    needed = true;
                }
            }
            needed
        };

        if need_new_segment {
            if self.channels[channel_name].data_file.is_some() {
                self.finalize_segment(channel_name)?;
            }
            self.create_segment(channel_name)?;
        }

        let state = self.channels.get_mut(channel_name).unwrap();
        if let Some(factor) = conversion_factor {
            state.units_conversion_factor = factor;
        }
        let mut written = 0usize;
        let mut first_block = true;

        while written < samples.len() {
            let chunk = &samples[written..(written + block_len).min(samples.len())];
            let block_time = start_uutc + samples_to_micros(written as i64, sampling_frequency);
            let discontinuity = first_block && need_new_segment;

            let mut block = red::compress(chunk, block_time, discontinuity)?;
            block.index.file_offset = state.data_offset;
            block.index.start_sample = state.next_start_sample;

            let file = state.data_file.as_mut().expect("segment data file is open");
            file.write_all(&block.bytes)?;

            state.body_crc = crc::update(&block.bytes, state.body_crc);
            state.data_offset += block.bytes.len() as i64;
            state.next_start_sample += chunk.len() as i64;
            state.segment_max_difference_bytes = state
                .segment_max_difference_bytes
                .max(block.header.difference_bytes);
            state.indices.push(block.index);

            written += chunk.len();
            first_block = false;
        }

        state.last_end_time =
            start_uutc + samples_to_micros(samples.len() as i64 - 1, sampling_frequency);
        state.total_samples += samples.len() as i64;

        Ok(())
    }

    fn ensure_channel(&mut self, channel_name: &str, sampling_frequency: f64) -> Result<()> {
        if let Some(state) = self.channels.get(channel_name) {
            if state.sampling_frequency != sampling_frequency {
                return Err(MefError::SamplingRateMismatch {
                    channel: channel_name.to_string(),
                    expected: state.sampling_frequency,
                    actual: sampling_frequency,
                });
            }
            return Ok(());
        }

        let channel_path = self.path.join(format!("{}.timd", channel_name));
        let mut state = ChannelState {
            path: channel_path.clone(),
            current_segment: -1,
            next_start_sample: 0,
            last_end_time: UUTC_NO_ENTRY,
            sampling_frequency,
            units_conversion_factor: self.units_conversion_factor,
            indices: Vec::new(),
            total_samples: 0,
            segment_max_difference_bytes: 0,
            data_file: None,
            data_offset: 0,
            body_crc: crc::CRC_START_VALUE,
        };

        if channel_path.is_dir() {
            // 追加模式: 接着已有的最后一个段继续
            self.restore_channel_state(channel_name, &mut state)?;
        } else {
            fs::create_dir_all(&channel_path)?;
        }

        self.channels.insert(channel_name.to_string(), state);
        Ok(())
    }

    // 从磁盘上最后一个段的索引文件恢复样本计数和时间进度
    fn restore_channel_state(&self, channel_name: &str, state: &mut ChannelState) -> Result<()> {
        let mut last_segment: Option<(i32, PathBuf)> = None;
        for entry in fs::read_dir(&state.path)? {
            let dir = entry?.path();
            if !dir.is_dir() || dir.extension().and_then(|e| e.to_str()) != Some("segd") {
                continue;
            }
            let name = dir
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let number = crate::utils::parse_segment_number(&name)?;
            if last_segment.as_ref().map_or(true, |(n, _)| number > *n) {
                last_segment = Some((number, dir));
            }
        }

        let Some((number, segment_dir)) = last_segment else {
            return Ok(());
        };

        let base = segment_base_name(channel_name, number);

        // 采样率必须与已有数据一致
        let meta_path = segment_dir.join(format!("{}.tmet", base));
        let mut meta_file = BufReader::new(File::open(&meta_path)?);
        read_universal_header(&mut meta_file, TIME_SERIES_METADATA_FILE_TYPE)?;
        meta_file.seek(SeekFrom::Start(METADATA_SECTION_2_OFFSET as u64))?;
        let mut meta2_bytes = vec![0u8; TimeSeriesMetadataSection2::BYTES];
        std::io::Read::read_exact(&mut meta_file, &mut meta2_bytes)?;
        let meta2 = TimeSeriesMetadataSection2::from_bytes(&meta2_bytes)?;
        if meta2.sampling_frequency > 0.0 && meta2.sampling_frequency != state.sampling_frequency {
            return Err(MefError::SamplingRateMismatch {
                channel: channel_name.to_string(),
                expected: meta2.sampling_frequency,
                actual: state.sampling_frequency,
            });
        }

        let idx_path = segment_dir.join(format!("{}.tidx", base));
        let mut idx_file = BufReader::new(File::open(&idx_path)?);
        let uh = read_universal_header(&mut idx_file, TIME_SERIES_INDICES_FILE_TYPE)?;

        let count = uh.number_of_entries.max(0) as usize;
        if count > 0 {
            let mut body = vec![0u8; count * TimeSeriesIndex::BYTES];
            std::io::Read::read_exact(&mut idx_file, &mut body)?;
            let last =
                TimeSeriesIndex::from_bytes(&body[(count - 1) * TimeSeriesIndex::BYTES..])?;
            state.total_samples = last.start_sample + last.number_of_samples as i64;
            state.next_start_sample = state.total_samples;
        }

        state.current_segment = number;
        state.last_end_time = uh.end_time;

        debug!(
            channel = channel_name,
            segment = number,
            samples = state.total_samples,
            "resumed existing channel"
        );
        Ok(())
    }

    fn create_segment(&mut self, channel_name: &str) -> Result<()> {
        let mut uh = self.base_header(TIME_SERIES_DATA_FILE_TYPE, channel_name);

        let state = self.channels.get_mut(channel_name).unwrap();
        state.current_segment += 1;

        let base = segment_base_name(channel_name, state.current_segment);
        let segment_dir = state.path.join(format!("{}.segd", base));
        fs::create_dir_all(&segment_dir)?;

        let data_path = segment_dir.join(format!("{}.tdat", base));
        let mut file = BufWriter::new(File::create(&data_path)?);

        // 占位头部, 定稿时回填时间范围和CRC
        uh.segment_number = state.current_segment;
        file.write_all(&uh.to_bytes_with_crc())?;

        state.data_file = Some(file);
        state.data_offset = UniversalHeader::BYTES as i64;
        state.body_crc = crc::CRC_START_VALUE;
        state.indices.clear();
        state.segment_max_difference_bytes = 0;
        state.next_start_sample = state.total_samples;

        debug!(channel = channel_name, segment = state.current_segment, "created segment");
        Ok(())
    }

    fn finalize_segment(&mut self, channel_name: &str) -> Result<()> {
        // 先关闭数据文件并摘出汇总所需的状态
        let (summary, base, segment_dir, segment_number, body_crc, block_count) = {
            let state = self.channels.get_mut(channel_name).unwrap();
            let Some(mut file) = state.data_file.take() else {
                return Ok(());
            };
            file.flush()?;
            let file = file.into_inner().map_err(|e| {
                MefError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            })?;
            drop(file);

            let summary = SegmentSummary::from_indices(&state.indices, state.sampling_frequency);
            let base = segment_base_name(channel_name, state.current_segment);
            let segment_dir = state.path.join(format!("{}.segd", base));
            (
                summary,
                base,
                segment_dir,
                state.current_segment,
                state.body_crc,
                state.indices.len() as i64,
            )
        };

        // 数据文件头部回填: 时间范围、条目数和两个CRC
        {
            let mut uh = self.base_header(TIME_SERIES_DATA_FILE_TYPE, channel_name);
            uh.segment_number = segment_number;
            uh.start_time = summary.start_time;
            uh.end_time = summary.end_time;
            uh.number_of_entries = block_count;
            uh.maximum_entry_size = summary.maximum_block_bytes;
            uh.body_crc = body_crc;

            let data_path = segment_dir.join(format!("{}.tdat", base));
            let mut data_file = OpenOptions::new().write(true).open(&data_path)?;
            data_file.seek(SeekFrom::Start(0))?;
            data_file.write_all(&uh.to_bytes_with_crc())?;
            data_file.flush()?;
        }

        self.write_metadata_file(&segment_dir, &base, channel_name, &summary)?;
        self.write_indices_file(&segment_dir, &base, channel_name, &summary)?;

        debug!(
            channel = channel_name,
            segment = segment_number,
            blocks = block_count,
            "finalized segment"
        );
        Ok(())
    }

    fn write_metadata_file(
        &self,
        segment_dir: &Path,
        base: &str,
        channel_name: &str,
        summary: &SegmentSummary,
    ) -> Result<()> {
        let mut uh = self.base_header(TIME_SERIES_METADATA_FILE_TYPE, channel_name);
        let state = &self.channels[channel_name];

        let mut meta2 = TimeSeriesMetadataSection2::new();
        meta2.channel_description = self.channel_description.clone();
        meta2.session_description = self.session_description.clone();
        meta2.sampling_frequency = state.sampling_frequency;
        meta2.units_conversion_factor = state.units_conversion_factor;
        meta2.units_description = self.data_units.clone();
        meta2.start_sample = summary.start_sample;
        meta2.number_of_samples = summary.number_of_samples;
        meta2.number_of_blocks = state.indices.len() as i64;
        meta2.maximum_block_bytes = summary.maximum_block_bytes;
        meta2.maximum_block_samples = summary.maximum_block_samples;
        meta2.maximum_difference_bytes = state.segment_max_difference_bytes;
        meta2.number_of_discontinuities = summary.number_of_discontinuities;
        meta2.maximum_contiguous_blocks = summary.maximum_contiguous_blocks;
        meta2.maximum_contiguous_block_bytes = summary.maximum_contiguous_block_bytes;
        meta2.maximum_contiguous_samples = summary.maximum_contiguous_samples;
        if summary.maximum_block_samples > 0 && state.sampling_frequency > 0.0 {
            meta2.block_interval =
                samples_to_micros(summary.maximum_block_samples as i64, state.sampling_frequency);
        }
        if summary.start_time != UUTC_NO_ENTRY && summary.end_time != UUTC_NO_ENTRY {
            meta2.recording_duration = summary.end_time - summary.start_time;
        }

        let mut meta3 = MetadataSection3::new();
        meta3.recording_time_offset = self.recording_time_offset;
        meta3.gmt_offset = self.gmt_offset;
        meta3.subject_name_1 = self.subject_name.clone();
        meta3.subject_id = self.subject_id.clone();
        meta3.recording_location = self.recording_location.clone();

        let mut bytes = vec![0u8; METADATA_FILE_BYTES];
        bytes[UniversalHeader::BYTES..METADATA_SECTION_2_OFFSET]
            .copy_from_slice(&MetadataSection1::new().to_bytes());
        bytes[METADATA_SECTION_2_OFFSET..METADATA_SECTION_3_OFFSET]
            .copy_from_slice(&meta2.to_bytes());
        bytes[METADATA_SECTION_3_OFFSET..].copy_from_slice(&meta3.to_bytes());

        uh.segment_number = state.current_segment;
        uh.start_time = summary.start_time;
        uh.end_time = summary.end_time;
        uh.number_of_entries = 1;
        uh.maximum_entry_size = (METADATA_FILE_BYTES - UniversalHeader::BYTES) as i64;
        uh.body_crc = crc::calculate(&bytes[UniversalHeader::BYTES..]);
        bytes[..UniversalHeader::BYTES].copy_from_slice(&uh.to_bytes_with_crc());

        let meta_path = segment_dir.join(format!("{}.tmet", base));
        let mut file = BufWriter::new(File::create(&meta_path)?);
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(())
    }

    fn write_indices_file(
        &self,
        segment_dir: &Path,
        base: &str,
        channel_name: &str,
        summary: &SegmentSummary,
    ) -> Result<()> {
        let mut uh = self.base_header(TIME_SERIES_INDICES_FILE_TYPE, channel_name);
        let state = &self.channels[channel_name];

        let mut body = Vec::with_capacity(state.indices.len() * TimeSeriesIndex::BYTES);
        for index in &state.indices {
            body.extend_from_slice(&index.to_bytes());
        }

        uh.segment_number = state.current_segment;
        uh.start_time = summary.start_time;
        uh.end_time = summary.end_time;
        uh.number_of_entries = state.indices.len() as i64;
        uh.maximum_entry_size = summary.maximum_block_bytes;
        uh.body_crc = crc::calculate(&body);

        let idx_path = segment_dir.join(format!("{}.tidx", base));
        let mut file = BufWriter::new(File::create(&idx_path)?);
        file.write_all(&uh.to_bytes_with_crc())?;
        file.write_all(&body)?;
        file.flush()?;
        Ok(())
    }

    fn base_header(&self, file_type: &str, channel_name: &str) -> UniversalHeader {
        let mut uh = UniversalHeader::new(file_type);
        uh.channel_name = channel_name.to_string();
        uh.session_name = self.session_name.clone();
        uh.level_uuid = self.level_uuid;
        let file_uuid = *Uuid::new_v4().as_bytes();
        uh.file_uuid = file_uuid;
        uh.provenance_uuid = file_uuid;
        uh.level_1_password_validation = self.level_1_validation;
        uh.level_2_password_validation = self.level_2_validation;
        uh
    }
}

impl Drop for MefWriter {
    fn drop(&mut self) {
        // 析构中的关闭失败只能忽略
        let _ = self.close();
    }
}

// 定稿时从索引表推导的段级汇总
struct SegmentSummary {
    start_time: i64,
    end_time: i64,
    start_sample: i64,
    number_of_samples: i64,
    maximum_block_samples: u32,
    maximum_block_bytes: i64,
    number_of_discontinuities: i64,
    maximum_contiguous_blocks: i64,
    maximum_contiguous_block_bytes: i64,
    maximum_contiguous_samples: i64,
}

impl SegmentSummary {
    fn from_indices(indices: &[TimeSeriesIndex], sampling_frequency: f64) -> Self {
        let mut summary = SegmentSummary {
            start_time: UUTC_NO_ENTRY,
            end_time: UUTC_NO_ENTRY,
            start_sample: -1,
            number_of_samples: 0,
            maximum_block_samples: 0,
            maximum_block_bytes: 0,
            number_of_discontinuities: 0,
            maximum_contiguous_blocks: 0,
            maximum_contiguous_block_bytes: 0,
            maximum_contiguous_samples: 0,
        };

        let Some(first) = indices.first() else {
            return summary;
        };
        let last = indices.last().unwrap();

        summary.start_time = first.start_time;
        summary.start_sample = first.start_sample;
        summary.end_time = last.start_time
            + samples_to_micros(last.number_of_samples.saturating_sub(1) as i64, sampling_frequency);

        // 连续运行区间以不连续标志为界
        let mut run_blocks = 0i64;
        let mut run_bytes = 0i64;
        let mut run_samples = 0i64;

        for index in indices {
            summary.number_of_samples += index.number_of_samples as i64;
            summary.maximum_block_samples =
                summary.maximum_block_samples.max(index.number_of_samples);
            summary.maximum_block_bytes = summary.maximum_block_bytes.max(index.block_bytes as i64);

            if index.is_discontinuity() {
                summary.number_of_discontinuities += 1;
                run_blocks = 0;
                run_bytes = 0;
                run_samples = 0;
            }
            run_blocks += 1;
            run_bytes += index.block_bytes as i64;
            run_samples += index.number_of_samples as i64;

            summary.maximum_contiguous_blocks = summary.maximum_contiguous_blocks.max(run_blocks);
            summary.maximum_contiguous_block_bytes =
                summary.maximum_contiguous_block_bytes.max(run_bytes);
            summary.maximum_contiguous_samples =
                summary.maximum_contiguous_samples.max(run_samples);
        }

        summary
    }
}
