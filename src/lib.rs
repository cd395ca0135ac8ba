//! # MEF 3.0 Library for Rust
//!
//! A pure Rust library for reading and writing MEF 3.0 (Multiscale
//! Electrophysiology Format) files — a directory-based container for long,
//! multi-channel neurophysiological recordings with lossless RED
//! compression, AES-128 encryption and CRC-protected integrity. Files
//! written by this library are byte-compatible with existing MEF 3.0
//! tooling.
//!
//! A session is a `.mefd` directory holding one `.timd` directory per
//! channel, which in turn holds numbered `.segd` segment directories. Each
//! segment stores its samples as compressed RED blocks in a `.tdat` file,
//! located through a `.tidx` index file and described by a fixed-size
//! `.tmet` metadata file.
//!
//! ```rust,no_run
//! use mef3::{MefWriter, MefReader};
//!
//! // 写入一个通道
//! let mut writer = MefWriter::create("session.mefd", true)?;
//! writer.set_data_units("uV");
//! let data: Vec<f64> = (0..10_000).map(|i| (i as f64 / 50.0).sin() * 100.0).collect();
//! writer.write_data(&data, "eeg_1", 1_700_000_000_000_000, 1000.0, Some(3), false)?;
//! writer.close()?;
//!
//! // 读回来
//! let reader = MefReader::open("session.mefd")?;
//! let samples = reader.get_data("eeg_1", None, None)?;
//! assert_eq!(samples.len(), 10_000);
//! # Ok::<(), mef3::MefError>(())
//! ```

pub mod aes;
pub mod crc;
pub mod error;
pub mod reader;
pub mod red;
pub mod sha256;
pub mod types;
pub mod utils;
pub mod writer;

// Re-export main types for convenience
pub use error::{MefError, Result};
pub use reader::MefReader;
pub use red::{RED_MAXIMUM_SAMPLE_VALUE, RED_MINIMUM_SAMPLE_VALUE, RED_NAN};
pub use types::{ChannelInfo, SegmentInfo, TimeSeriesIndex, UniversalHeader};
pub use writer::MefWriter;

/// Library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// MEF format version implemented by this crate
pub fn mef_version() -> &'static str {
    "3.0"
}
