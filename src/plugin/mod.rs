//! Plugin header decoding (.esp/.esm/.esl).
//!
//! # Example
//!
//! ```ignore
//! use modlens::plugin::read_header_file;
//!
//! let header = read_header_file(Path::new("Data/Dawnguard.esm"))?;
//! println!("{} masters", header.masters.len());
//! ```

mod header;
mod reader;

#[cfg(test)]
pub(crate) use header::fixtures;
pub use header::{
    decode_header, read_header, read_header_file, HeaderDecoder, PluginFlags, PluginHeader, MAX_RECORD_SIZE,
};
pub use reader::ByteReader;
