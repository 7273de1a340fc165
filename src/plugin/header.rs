//! Plugin header record decoding.
//!
//! A plugin starts with a single header record (`TES4` for Oblivion and
//! later, `TES3` for Morrowind) followed by subrecords:
//!
//! | Subrecord | Contents |
//! |-----------|----------|
//! | `HEDR` | format version, record count |
//! | `CNAM` | author (zstring) |
//! | `SNAM` | description (zstring) |
//! | `MAST` | master filename (zstring), repeated, each followed by `DATA` |
//! | `XXXX` | u32 size override for the next subrecord |
//!
//! Only the header record is read; the rest of the file is never touched.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use binrw::BinRead;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::reader::{decode_zstring, signature_str, ByteReader};
use crate::error::DecodeError;
use crate::games::GameType;
use crate::paths;

/// Largest header record we are willing to buffer.
pub const MAX_RECORD_SIZE: u64 = 16 * 1024 * 1024;

/// Record flag: file is a master (ESM)
const FLAG_MASTER: u32 = 0x1;
/// Record flag: strings live in external string tables
const FLAG_LOCALIZED: u32 = 0x80;

/// Size of the TES4 record header for Skyrim, Fallout 3/NV/4 and Starfield
const TES4_HEADER_LEN: usize = 24;
/// Oblivion's TES4 record header lacks the trailing version fields
const TES4_OBLIVION_HEADER_LEN: usize = 20;
/// Size of the TES3 record header
const TES3_HEADER_LEN: usize = 16;

/// Morrowind HEDR: version, file type, author[32], description[256], record count
const TES3_HEDR_LEN: usize = 300;
/// Morrowind HEDR file type for masters
const TES3_FILE_TYPE_MASTER: u32 = 1;

#[derive(Debug, BinRead)]
#[br(little, magic = b"TES4")]
struct Tes4Record {
    data_size: u32,
    flags: u32,
    _form_id: u32,
    _version_control: u32,
}

#[derive(Debug, BinRead)]
#[br(little, magic = b"TES3")]
struct Tes3Record {
    data_size: u32,
    _unknown: u32,
    flags: u32,
}

/// Plugin flags decoded from the header record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginFlags {
    pub is_master: bool,
    pub is_light: bool,
    pub is_localized: bool,
}

/// Decoded plugin header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginHeader {
    pub filename: String,
    pub flags: PluginFlags,
    /// Masters in declaration order, duplicates preserved
    pub masters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// HEDR format version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<f32>,
    /// HEDR record count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u32>,
}

/// Header decoder bound to a game's flag layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderDecoder {
    game: GameType,
}

impl HeaderDecoder {
    pub fn new(game: GameType) -> Self {
        Self { game }
    }

    /// Decode a header from the leading bytes of a plugin file.
    ///
    /// `bytes` must contain at least the whole header record; trailing
    /// data (the rest of the plugin) is ignored.
    pub fn decode(&self, filename: &str, bytes: &[u8]) -> Result<PluginHeader, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let signature = reader.signature()?;

        let mut header = match &signature {
            b"TES4" => self.decode_tes4(filename, bytes)?,
            b"TES3" => decode_tes3(filename, bytes)?,
            _ => {
                return Err(DecodeError::UnknownMarker {
                    found: signature_str(&signature),
                })
            }
        };

        // Light sub-format: the extension alone makes a plugin light (and a master)
        if paths::extension(filename).as_deref() == Some("esl") {
            header.flags.is_light = true;
            header.flags.is_master = true;
        }

        debug!(
            "Decoded {}: {} masters, flags {:?}",
            filename,
            header.masters.len(),
            header.flags
        );
        Ok(header)
    }

    /// Decode a header from any reader, consuming only the header record.
    pub fn read<R: Read>(&self, filename: &str, reader: R) -> Result<PluginHeader, DecodeError> {
        let bytes = read_header_record(reader)?;
        self.decode(filename, &bytes)
    }

    /// Decode the header of a plugin file on disk.
    pub fn read_file(&self, path: &Path) -> Result<PluginHeader, DecodeError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let file = File::open(path)?;
        self.read(&filename, file)
    }

    fn decode_tes4(&self, filename: &str, bytes: &[u8]) -> Result<PluginHeader, DecodeError> {
        ensure_len(bytes, TES4_OBLIVION_HEADER_LEN)?;
        let record = Tes4Record::read(&mut Cursor::new(bytes))
            .map_err(|e| from_binrw(e, bytes.len(), TES4_OBLIVION_HEADER_LEN))?;

        let header_len = tes4_header_len(bytes);
        let mut reader = ByteReader::new(bytes);
        reader.skip(header_len)?;
        let mut data = reader.sub_reader(record.data_size as usize)?;

        let light_flag = self.game.light_flag().unwrap_or(0);
        let mut header = PluginHeader {
            filename: filename.to_string(),
            flags: PluginFlags {
                is_master: record.flags & FLAG_MASTER != 0,
                is_light: light_flag != 0 && record.flags & light_flag != 0,
                is_localized: record.flags & FLAG_LOCALIZED != 0,
            },
            masters: Vec::new(),
            author: None,
            description: None,
            version: None,
            record_count: None,
        };

        let mut size_override: Option<usize> = None;
        while !data.is_empty() {
            let offset = header_len + data.position();
            let signature = data.signature()?;
            let declared = data.u16()? as usize;
            let size = size_override.take().unwrap_or(declared);
            let mut field = take_field(&mut data, &signature, offset, size)?;

            match &signature {
                b"XXXX" => size_override = Some(field.u32()? as usize),
                b"HEDR" => {
                    header.version = Some(field.f32()?);
                    header.record_count = Some(field.u32()?);
                }
                b"CNAM" => header.author = non_empty(decode_zstring(field.take(size)?)),
                b"SNAM" => header.description = non_empty(decode_zstring(field.take(size)?)),
                b"MAST" => header.masters.push(decode_zstring(field.take(size)?)),
                _ => {}
            }
        }

        Ok(header)
    }
}

/// Decode with the default game layout (Skyrim SE flag bits).
pub fn decode_header(filename: &str, bytes: &[u8]) -> Result<PluginHeader, DecodeError> {
    HeaderDecoder::default().decode(filename, bytes)
}

/// Decode from a reader with the default game layout.
pub fn read_header<R: Read>(filename: &str, reader: R) -> Result<PluginHeader, DecodeError> {
    HeaderDecoder::default().read(filename, reader)
}

/// Decode the header of a plugin file with the default game layout.
pub fn read_header_file(path: &Path) -> Result<PluginHeader, DecodeError> {
    HeaderDecoder::default().read_file(path)
}

fn decode_tes3(filename: &str, bytes: &[u8]) -> Result<PluginHeader, DecodeError> {
    ensure_len(bytes, TES3_HEADER_LEN)?;
    let record = Tes3Record::read(&mut Cursor::new(bytes))
        .map_err(|e| from_binrw(e, bytes.len(), TES3_HEADER_LEN))?;

    let mut reader = ByteReader::new(bytes);
    reader.skip(TES3_HEADER_LEN)?;
    let mut data = reader.sub_reader(record.data_size as usize)?;

    let mut header = PluginHeader {
        filename: filename.to_string(),
        flags: PluginFlags {
            is_master: record.flags & FLAG_MASTER != 0,
            ..PluginFlags::default()
        },
        masters: Vec::new(),
        author: None,
        description: None,
        version: None,
        record_count: None,
    };

    while !data.is_empty() {
        let offset = TES3_HEADER_LEN + data.position();
        let signature = data.signature()?;
        let size = data.u32()? as usize;
        let mut field = take_field(&mut data, &signature, offset, size)?;

        match &signature {
            b"HEDR" => {
                if size < TES3_HEDR_LEN {
                    return Err(DecodeError::Truncated {
                        offset,
                        needed: TES3_HEDR_LEN,
                        available: size,
                    });
                }
                header.version = Some(field.f32()?);
                if field.u32()? == TES3_FILE_TYPE_MASTER {
                    header.flags.is_master = true;
                }
                header.author = non_empty(decode_zstring(field.take(32)?));
                header.description = non_empty(decode_zstring(field.take(256)?));
                header.record_count = Some(field.u32()?);
            }
            b"MAST" => header.masters.push(decode_zstring(field.take(size)?)),
            _ => {}
        }
    }

    Ok(header)
}

/// Oblivion plugins start their first subrecord at offset 20.
fn tes4_header_len(bytes: &[u8]) -> usize {
    if bytes.len() >= TES4_OBLIVION_HEADER_LEN + 4
        && &bytes[TES4_OBLIVION_HEADER_LEN..TES4_OBLIVION_HEADER_LEN + 4] == b"HEDR"
    {
        TES4_OBLIVION_HEADER_LEN
    } else {
        TES4_HEADER_LEN
    }
}

fn take_field<'a>(
    data: &mut ByteReader<'a>,
    signature: &[u8; 4],
    offset: usize,
    size: usize,
) -> Result<ByteReader<'a>, DecodeError> {
    if size > data.remaining() {
        return Err(DecodeError::SubrecordOverflow {
            signature: signature_str(signature),
            offset,
            size,
            remaining: data.remaining(),
        });
    }
    data.sub_reader(size)
}

fn ensure_len(bytes: &[u8], needed: usize) -> Result<(), DecodeError> {
    if bytes.len() < needed {
        return Err(DecodeError::Truncated {
            offset: 0,
            needed,
            available: bytes.len(),
        });
    }
    Ok(())
}

fn from_binrw(e: binrw::Error, available: usize, needed: usize) -> DecodeError {
    match e {
        binrw::Error::BadMagic { found, .. } => DecodeError::UnknownMarker {
            found: format!("{:?}", found),
        },
        binrw::Error::Io(io) => DecodeError::Io(io),
        _ => DecodeError::Truncated {
            offset: 0,
            needed,
            available,
        },
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Read exactly the header record (record header + declared data) from a stream.
fn read_header_record<R: Read>(reader: R) -> Result<Vec<u8>, DecodeError> {
    let mut reader = reader;
    let mut buf = Vec::with_capacity(TES4_HEADER_LEN);
    (&mut reader)
        .take(TES4_HEADER_LEN as u64)
        .read_to_end(&mut buf)?;

    let header_len = match buf.get(0..4) {
        Some(b"TES4") => tes4_header_len(&buf),
        Some(b"TES3") => TES3_HEADER_LEN,
        Some(other) => {
            return Err(DecodeError::UnknownMarker {
                found: signature_str(other),
            })
        }
        None => {
            return Err(DecodeError::Truncated {
                offset: 0,
                needed: 4,
                available: buf.len(),
            })
        }
    };
    ensure_len(&buf, 8)?;

    let data_size = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as u64;
    if data_size > MAX_RECORD_SIZE {
        return Err(DecodeError::RecordTooLarge {
            size: data_size,
            limit: MAX_RECORD_SIZE,
        });
    }

    let total = header_len as u64 + data_size;
    let already = buf.len() as u64;
    if total > already {
        reader.take(total - already).read_to_end(&mut buf)?;
    } else {
        buf.truncate(total as usize);
    }
    Ok(buf)
}

/// Byte-level plugin builders shared by tests across the crate.
#[cfg(test)]
pub(crate) mod fixtures {
    /// Build a subrecord with a u16 size.
    pub fn subrecord(sig: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = sig.to_vec();
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    pub fn zstring(s: &str) -> Vec<u8> {
        let mut out = s.as_bytes().to_vec();
        out.push(0);
        out
    }

    /// Build a Skyrim-style TES4 plugin header.
    pub fn tes4_plugin(flags: u32, masters: &[&str], author: Option<&str>) -> Vec<u8> {
        let mut data = Vec::new();
        let mut hedr = Vec::new();
        hedr.extend_from_slice(&1.71f32.to_le_bytes());
        hedr.extend_from_slice(&42u32.to_le_bytes());
        hedr.extend_from_slice(&0x800u32.to_le_bytes());
        data.extend(subrecord(b"HEDR", &hedr));
        if let Some(author) = author {
            data.extend(subrecord(b"CNAM", &zstring(author)));
        }
        for master in masters {
            data.extend(subrecord(b"MAST", &zstring(master)));
            data.extend(subrecord(b"DATA", &0u64.to_le_bytes()));
        }

        let mut out = b"TES4".to_vec();
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // form id
        out.extend_from_slice(&0u32.to_le_bytes()); // version control
        out.extend_from_slice(&44u16.to_le_bytes()); // form version
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend(data);
        out
    }
}
