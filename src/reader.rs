use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{MefError, Result};
use crate::red::{self, RED_NAN, RED_NEGATIVE_INFINITY, RED_POSITIVE_INFINITY};
use crate::sha256;
use crate::types::{
    ChannelInfo, MetadataSection3, PasswordData, SegmentInfo, TimeSeriesIndex,
    TimeSeriesMetadataSection2, UniversalHeader, METADATA_FILE_BYTES, METADATA_SECTION_2_OFFSET,
    METADATA_SECTION_3_OFFSET, MEF_VERSION_MAJOR, TIME_SERIES_DATA_FILE_TYPE,
    TIME_SERIES_INDICES_FILE_TYPE, TIME_SERIES_METADATA_FILE_TYPE, UUTC_NO_ENTRY,
};
use crate::utils::parse_segment_number;

/// Reader for a MEF 3.0 session directory.
///
/// Opening a session scans the directory tree and loads all metadata and
/// block indices into memory; sample data itself is only read (and
/// decompressed) on demand, one block at a time. The reader keeps no file
/// handles open between calls.
///
/// # Examples
///
/// ```rust,no_run
/// use mef3::MefReader;
///
/// let reader = MefReader::open("recording.mefd")?;
/// for name in reader.channels() {
///     let info = reader.channel_info(&name)?;
///     println!("{}: {} samples at {} Hz", name, info.number_of_samples,
///         info.sampling_frequency);
/// }
///
/// // 读取第一个通道的全部数据
/// let names = reader.channels();
/// let data = reader.get_data(&names[0], None, None)?;
/// # Ok::<(), mef3::MefError>(())
/// ```
pub struct MefReader {
    path: PathBuf,
    session_name: String,
    start_time: i64,
    end_time: i64,
    channels: BTreeMap<String, ChannelInfo>,
    segments: BTreeMap<String, Vec<SegmentInfo>>,
    indices: BTreeMap<String, Vec<Vec<TimeSeriesIndex>>>,
    metadata2: BTreeMap<String, TimeSeriesMetadataSection2>,
    metadata3: BTreeMap<String, MetadataSection3>,
    password_data: PasswordData,
    validate_crc: bool,
}

impl MefReader {
    /// Opens a session without a password.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_password(path, None)
    }

    /// Opens a session, unlocking encrypted content with `password`.
    ///
    /// The password is checked against the validation fields of the first
    /// metadata file found; a password that matches neither level fails with
    /// [`MefError::Unauthorized`].
    pub fn open_with_password<P: AsRef<Path>>(path: P, password: Option<&str>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(MefError::NotFound(format!(
                "session directory {} does not exist",
                path.display()
            )));
        }

        let session_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut reader = MefReader {
            path,
            session_name,
            start_time: UUTC_NO_ENTRY,
            end_time: UUTC_NO_ENTRY,
            channels: BTreeMap::new(),
            segments: BTreeMap::new(),
            indices: BTreeMap::new(),
            metadata2: BTreeMap::new(),
            metadata3: BTreeMap::new(),
            password_data: PasswordData::none(),
            validate_crc: true,
        };
        reader.load_session(password)?;
        Ok(reader)
    }

    /// Enables or disables RED block CRC verification (enabled by default).
    pub fn set_crc_validation(&mut self, enabled: bool) {
        self.validate_crc = enabled;
    }

    /// Session directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Session name (directory name without the `.mefd` extension).
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Earliest channel start time in µUTC.
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Latest channel end time in µUTC.
    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    /// Session duration in microseconds.
    pub fn duration(&self) -> i64 {
        if self.start_time == UUTC_NO_ENTRY || self.end_time == UUTC_NO_ENTRY {
            return 0;
        }
        self.end_time - self.start_time
    }

    /// Names of all time-series channels, sorted.
    pub fn channels(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// Summary information for one channel.
    pub fn channel_info(&self, channel_name: &str) -> Result<&ChannelInfo> {
        self.channels
            .get(channel_name)
            .ok_or_else(|| MefError::NotFound(format!("channel {}", channel_name)))
    }

    /// Per-segment information for one channel.
    pub fn segments(&self, channel_name: &str) -> Result<&[SegmentInfo]> {
        self.segments
            .get(channel_name)
            .map(|v| v.as_slice())
            .ok_or_else(|| MefError::NotFound(format!("channel {}", channel_name)))
    }

    /// Acquisition metadata (section 2) of a channel's first segment.
    pub fn channel_metadata(&self, channel_name: &str) -> Result<&TimeSeriesMetadataSection2> {
        self.metadata2
            .get(channel_name)
            .ok_or_else(|| MefError::NotFound(format!("channel {}", channel_name)))
    }

    /// Recording context metadata (section 3) of a channel's first segment.
    pub fn recording_metadata(&self, channel_name: &str) -> Result<&MetadataSection3> {
        self.metadata3
            .get(channel_name)
            .ok_or_else(|| MefError::NotFound(format!("channel {}", channel_name)))
    }

    /// Looks up a numeric property by name.
    ///
    /// Without a channel: `start_time`, `end_time`, `duration`. With a
    /// channel: `fsamp`/`sampling_frequency`, `num_samples`/
    /// `number_of_samples`, `start_time`, `end_time`,
    /// `units_conversion_factor`.
    pub fn numeric_property(&self, property: &str, channel_name: Option<&str>) -> Result<f64> {
        match channel_name {
            None => match property {
                "start_time" => Ok(self.start_time as f64),
                "end_time" => Ok(self.end_time as f64),
                "duration" => Ok(self.duration() as f64),
                _ => Err(MefError::NotFound(format!("session property {}", property))),
            },
            Some(name) => {
                let info = self.channel_info(name)?;
                match property {
                    "fsamp" | "sampling_frequency" => Ok(info.sampling_frequency),
                    "num_samples" | "number_of_samples" => Ok(info.number_of_samples as f64),
                    "start_time" => Ok(info.start_time as f64),
                    "end_time" => Ok(info.end_time as f64),
                    "units_conversion_factor" => Ok(info.units_conversion_factor),
                    _ => Err(MefError::NotFound(format!("channel property {}", property))),
                }
            }
        }
    }

    /// Looks up a string property by name.
    ///
    /// Without a channel: `session_name`, `path`. With a channel: `units`
    /// (or `unit`), `channel_name`.
    pub fn string_property(&self, property: &str, channel_name: Option<&str>) -> Result<String> {
        match channel_name {
            None => match property {
                "session_name" => Ok(self.session_name.clone()),
                "path" => Ok(self.path.display().to_string()),
                _ => Err(MefError::NotFound(format!("session property {}", property))),
            },
            Some(name) => {
                let info = self.channel_info(name)?;
                match property {
                    "unit" | "units" => Ok(info.units.clone()),
                    "channel_name" => Ok(info.name.clone()),
                    _ => Err(MefError::NotFound(format!("channel property {}", property))),
                }
            }
        }
    }

    /// Reads raw `si4` samples from the half-open channel sample range
    /// `[start_sample, end_sample)`.
    pub fn get_raw_data(
        &self,
        channel_name: &str,
        start_sample: i64,
        end_sample: i64,
    ) -> Result<Vec<i32>> {
        self.channel_info(channel_name)?;
        let segments = self.segments(channel_name)?;
        let indices = self
            .indices
            .get(channel_name)
            .ok_or_else(|| MefError::NotFound(format!("channel {}", channel_name)))?;

        let mut result = Vec::with_capacity((end_sample - start_sample).max(0) as usize);
        let mut accumulated: i64 = 0;

        for (segment, segment_indices) in segments.iter().zip(indices.iter()) {
            let segment_start = accumulated;
            let segment_end = accumulated + segment.number_of_samples;
            accumulated = segment_end;

            if segment_end <= start_sample || segment_start >= end_sample {
                continue;
            }

            self.read_segment_range(
                channel_name,
                segment,
                segment_indices,
                start_sample,
                end_sample,
                &mut result,
            )?;
        }

        Ok(result)
    }

    /// Reads converted `f64` samples from an optional µUTC time range.
    ///
    /// `None` bounds extend to the start/end of the channel. Sentinel
    /// samples are materialized as floating NaN/±∞; all others are scaled by
    /// the channel's units conversion factor (a stored factor of zero is
    /// treated as one).
    pub fn get_data(
        &self,
        channel_name: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<f64>> {
        let info = self.channel_info(channel_name)?;
        let fs = info.sampling_frequency;
        if fs <= 0.0 {
            return Err(MefError::InvalidFormat(format!(
                "channel {} has no valid sampling frequency",
                channel_name
            )));
        }

        let total = info.number_of_samples;
        let to_sample = |t: i64| ((t - info.start_time) as f64 * fs / 1e6).floor() as i64;

        let start_sample = start_time.map(&to_sample).unwrap_or(0).clamp(0, total);
        let end_sample = end_time.map(&to_sample).unwrap_or(total).clamp(0, total);

        let raw = self.get_raw_data(channel_name, start_sample, end_sample)?;

        let mut conversion = info.units_conversion_factor;
        if conversion == 0.0 {
            conversion = 1.0;
        }

        Ok(raw
            .into_iter()
            .map(|s| match s {
                RED_NAN => f64::NAN,
                RED_NEGATIVE_INFINITY => f64::NEG_INFINITY,
                RED_POSITIVE_INFINITY => f64::INFINITY,
                _ => s as f64 * conversion,
            })
            .collect())
    }

    // 解压一个段内与请求范围相交的所有块并拼接结果
    fn read_segment_range(
        &self,
        channel_name: &str,
        segment: &SegmentInfo,
        segment_indices: &[TimeSeriesIndex],
        start_sample: i64,
        end_sample: i64,
        result: &mut Vec<i32>,
    ) -> Result<()> {
        let data_path = self
            .path
            .join(format!("{}.timd", channel_name))
            .join(format!("{}.segd", segment.name))
            .join(format!("{}.tdat", segment.name));

        let mut file = BufReader::new(File::open(&data_path)?);
        read_universal_header(&mut file, TIME_SERIES_DATA_FILE_TYPE)?;

        // 块按start_sample升序; 用二分查找跳过范围之前的块
        let first = segment_indices
            .partition_point(|idx| idx.start_sample + idx.number_of_samples as i64 <= start_sample);

        for idx in &segment_indices[first..] {
            let block_start = idx.start_sample;
            if block_start >= end_sample {
                break;
            }
            let block_len = idx.number_of_samples as i64;

            let mut compressed = vec![0u8; idx.block_bytes as usize];
            file.seek(SeekFrom::Start(idx.file_offset as u64))?;
            file.read_exact(&mut compressed)?;

            let block = red::decompress(&compressed, &self.password_data, self.validate_crc)?;

            let local_start = (start_sample - block_start).max(0) as usize;
            let local_end = ((end_sample - block_start).min(block_len)) as usize;
            result.extend_from_slice(&block.samples[local_start..local_end]);
        }

        Ok(())
    }

    fn load_session(&mut self, password: Option<&str>) -> Result<()> {
        debug!(path = %self.path.display(), "opening MEF session");

        let mut channel_dirs: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();
            match dir.extension().and_then(|e| e.to_str()) {
                Some("timd") => channel_dirs.push(dir),
                Some("vidd") => {
                    debug!(path = %dir.display(), "skipping video channel");
                }
                _ => {}
            }
        }
        channel_dirs.sort();

        for dir in channel_dirs {
            if let Err(e) = self.load_channel(&dir, password) {
                match e {
                    MefError::Unauthorized(_) => return Err(e),
                    _ => warn!(path = %dir.display(), error = %e, "skipping unreadable channel"),
                }
            }
        }

        // 会话时间范围取所有通道的并集
        let mut start = i64::MAX;
        let mut end = i64::MIN;
        for info in self.channels.values() {
            if info.start_time != UUTC_NO_ENTRY {
                start = start.min(info.start_time);
            }
            if info.end_time != UUTC_NO_ENTRY {
                end = end.max(info.end_time);
            }
        }
        self.start_time = if start == i64::MAX { UUTC_NO_ENTRY } else { start };
        self.end_time = if end == i64::MIN { UUTC_NO_ENTRY } else { end };

        Ok(())
    }

    fn load_channel(&mut self, channel_path: &Path, password: Option<&str>) -> Result<()> {
        let channel_name = channel_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut segment_dirs: Vec<PathBuf> = std::fs::read_dir(channel_path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir() && p.extension().and_then(|e| e.to_str()) == Some("segd"))
            .collect();
        // 零填充的段号使字典序等价于数值序
        segment_dirs.sort();

        let mut segment_infos = Vec::new();
        let mut segment_indices = Vec::new();

        for segment_dir in &segment_dirs {
            match self.load_segment(segment_dir, &channel_name, password) {
                Ok((info, indices)) => {
                    segment_infos.push(info);
                    segment_indices.push(indices);
                }
                Err(e @ MefError::Unauthorized(_)) => return Err(e),
                Err(e) => {
                    warn!(path = %segment_dir.display(), error = %e, "skipping unreadable segment");
                }
            }
        }

        if segment_infos.is_empty() {
            return Err(MefError::InvalidFormat(format!(
                "channel {} has no readable segments",
                channel_name
            )));
        }

        let mut info = ChannelInfo {
            name: channel_name.clone(),
            sampling_frequency: -1.0,
            number_of_samples: 0,
            start_time: i64::MAX,
            end_time: i64::MIN,
            units: String::new(),
            units_conversion_factor: 1.0,
            number_of_segments: segment_infos.len() as i32,
        };

        for segment in &segment_infos {
            info.number_of_samples += segment.number_of_samples;
            if segment.start_time != UUTC_NO_ENTRY {
                info.start_time = info.start_time.min(segment.start_time);
            }
            if segment.end_time != UUTC_NO_ENTRY {
                info.end_time = info.end_time.max(segment.end_time);
            }
        }
        if info.start_time == i64::MAX {
            info.start_time = UUTC_NO_ENTRY;
        }
        if info.end_time == i64::MIN {
            info.end_time = UUTC_NO_ENTRY;
        }

        if let Some(meta2) = self.metadata2.get(&channel_name) {
            info.sampling_frequency = meta2.sampling_frequency;
            info.units = meta2.units_description.clone();
            info.units_conversion_factor = meta2.units_conversion_factor;
        }

        debug!(
            channel = %channel_name,
            segments = segment_infos.len(),
            samples = info.number_of_samples,
            "loaded channel"
        );

        self.channels.insert(channel_name.clone(), info);
        self.segments.insert(channel_name.clone(), segment_infos);
        self.indices.insert(channel_name, segment_indices);
        Ok(())
    }

    fn load_segment(
        &mut self,
        segment_path: &Path,
        channel_name: &str,
        password: Option<&str>,
    ) -> Result<(SegmentInfo, Vec<TimeSeriesIndex>)> {
        let segment_name = segment_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        // 元数据文件: 固定16384字节
        let meta_path = segment_path.join(format!("{}.tmet", segment_name));
        let mut meta_bytes = vec![0u8; METADATA_FILE_BYTES];
        {
            let mut file = File::open(&meta_path)?;
            file.read_exact(&mut meta_bytes)?;
        }

        UniversalHeader::validate_header_crc(&meta_bytes)?;
        let uh = UniversalHeader::from_bytes(&meta_bytes)?;
        check_type_and_version(&uh, TIME_SERIES_METADATA_FILE_TYPE)?;

        // 第一个头部用来确定访问级别
        if self.password_data.access_level == 0 {
            self.password_data = resolve_access(&uh, password)?;
        }

        let meta2 = TimeSeriesMetadataSection2::from_bytes(
            &meta_bytes[METADATA_SECTION_2_OFFSET..METADATA_SECTION_3_OFFSET],
        )?;
        let meta3 = MetadataSection3::from_bytes(&meta_bytes[METADATA_SECTION_3_OFFSET..])?;

        let segment_number = if uh.segment_number >= 0 {
            uh.segment_number
        } else {
            parse_segment_number(&segment_name).unwrap_or(0)
        };

        let info = SegmentInfo {
            name: segment_name.clone(),
            segment_number,
            start_time: uh.start_time,
            end_time: uh.end_time,
            start_sample: meta2.start_sample,
            number_of_samples: meta2.number_of_samples.max(0),
            number_of_blocks: meta2.number_of_blocks.max(0),
        };

        // 每通道保留第一段的元数据
        self.metadata2
            .entry(channel_name.to_string())
            .or_insert(meta2);
        self.metadata3
            .entry(channel_name.to_string())
            .or_insert(meta3);

        let indices = self.read_indices(&segment_path.join(format!("{}.tidx", segment_name)))?;

        Ok((info, indices))
    }

    fn read_indices(&self, indices_path: &Path) -> Result<Vec<TimeSeriesIndex>> {
        let mut file = BufReader::new(File::open(indices_path)?);
        let uh = read_universal_header(&mut file, TIME_SERIES_INDICES_FILE_TYPE)?;

        let count = uh.number_of_entries.max(0) as usize;
        let mut body = vec![0u8; count * TimeSeriesIndex::BYTES];
        file.read_exact(&mut body)?;

        if uh.body_crc != crate::types::CRC_NO_ENTRY && !crate::crc::validate(&body, uh.body_crc) {
            return Err(MefError::InvalidFormat(format!(
                "index body CRC mismatch in {}",
                indices_path.display()
            )));
        }

        body.chunks_exact(TimeSeriesIndex::BYTES)
            .map(TimeSeriesIndex::from_bytes)
            .collect()
    }
}

/// Reads and validates a Universal Header from the start of a file.
pub(crate) fn read_universal_header<R: Read>(
    reader: &mut R,
    expected_type: &str,
) -> Result<UniversalHeader> {
    let mut buf = vec![0u8; UniversalHeader::BYTES];
    reader.read_exact(&mut buf)?;
    UniversalHeader::validate_header_crc(&buf)?;
    let uh = UniversalHeader::from_bytes(&buf)?;
    check_type_and_version(&uh, expected_type)?;
    Ok(uh)
}

fn check_type_and_version(uh: &UniversalHeader, expected_type: &str) -> Result<()> {
    if uh.file_type != expected_type {
        return Err(MefError::InvalidFormat(format!(
            "expected file type {}, found {}",
            expected_type, uh.file_type
        )));
    }
    if uh.version_major != MEF_VERSION_MAJOR {
        return Err(MefError::UnsupportedVersion {
            major: uh.version_major,
            minor: uh.version_minor,
        });
    }
    Ok(())
}

// 用口令推导校验字段并与头部比对, 决定访问级别
fn resolve_access(uh: &UniversalHeader, password: Option<&str>) -> Result<PasswordData> {
    let mut data = PasswordData::none();

    let level_1_set = uh.level_1_password_validation.iter().any(|&b| b != 0);
    let level_2_set = uh.level_2_password_validation.iter().any(|&b| b != 0);

    let Some(password) = password else {
        if !level_1_set && !level_2_set {
            data.access_level = 2;
        }
        return Ok(data);
    };

    let key = crate::aes::expand_key(password)?;
    let candidate = password_validation_field(password);

    if level_2_set && candidate == uh.level_2_password_validation {
        data.level_2_key = Some(key);
        data.access_level = 2;
    } else if level_1_set && candidate == uh.level_1_password_validation {
        data.level_1_key = Some(key);
        data.access_level = 1;
    } else if !level_1_set && !level_2_set {
        // 会话未加密, 口令无需匹配
        data.access_level = 2;
    } else {
        return Err(MefError::Unauthorized(
            "password does not match any access level".to_string(),
        ));
    }

    Ok(data)
}

/// Derives the 16-byte password validation field stored in Universal
/// Headers: the first half of the SHA-256 digest of the zero-padded
/// password block.
pub(crate) fn password_validation_field(password: &str) -> [u8; 16] {
    let mut padded = [0u8; 16];
    let bytes = password.as_bytes();
    let len = bytes.len().min(15);
    padded[..len].copy_from_slice(&bytes[..len]);

    let digest = sha256::hash(&padded);
    let mut field = [0u8; 16];
    field.copy_from_slice(&digest[..16]);
    field
}
