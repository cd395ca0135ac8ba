use chrono::{DateTime, TimeZone, Utc};

use crate::error::{MefError, Result};

/// 读取固定宽度的NUL结尾文本字段
pub fn read_text_field(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// 写入固定宽度的NUL结尾文本字段，超长部分截断
pub fn write_text_field(buf: &mut [u8], text: &str) {
    buf.fill(0);
    let bytes = text.as_bytes();
    let len = bytes.len().min(buf.len().saturating_sub(1));
    buf[..len].copy_from_slice(&bytes[..len]);
}

/// 段目录的基本名: "<channel>-NNNNNN"
pub fn segment_base_name(channel_name: &str, segment_number: i32) -> String {
    format!("{}-{:06}", channel_name, segment_number)
}

/// 从段目录名中解析段号
pub fn parse_segment_number(segment_name: &str) -> Result<i32> {
    let digits = segment_name
        .rsplit('-')
        .next()
        .ok_or_else(|| MefError::InvalidFormat(format!("bad segment name: {}", segment_name)))?;
    digits
        .parse::<i32>()
        .map_err(|_| MefError::InvalidFormat(format!("bad segment number in: {}", segment_name)))
}

/// Converts a microsecond UTC timestamp to a [`DateTime<Utc>`].
///
/// Returns `None` for the format's "no entry" sentinel or out-of-range
/// values.
///
/// # Examples
///
/// ```rust
/// use mef3::utils::uutc_to_datetime;
///
/// let dt = uutc_to_datetime(1_000_000_000_000_000).unwrap();
/// assert_eq!(dt.to_rfc3339(), "2001-09-09T01:46:40+00:00");
/// ```
pub fn uutc_to_datetime(uutc: i64) -> Option<DateTime<Utc>> {
    if uutc == crate::types::UUTC_NO_ENTRY {
        return None;
    }
    Utc.timestamp_micros(uutc).single()
}

/// Converts a [`DateTime<Utc>`] to a microsecond UTC timestamp.
pub fn datetime_to_uutc(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

/// 按采样率把样本数换算成微秒时长
pub fn samples_to_micros(num_samples: i64, sampling_frequency: f64) -> i64 {
    (num_samples as f64 * 1e6 / sampling_frequency).round() as i64
}
