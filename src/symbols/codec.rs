//! Binary symbol table format.
//!
//! Layout: a four-byte magic, a little-endian format version, then the
//! bincode serialization of the table compressed with raw deflate. The
//! version gates decoding; there is no cross-version migration.

use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tracing::debug;

use super::SymbolTable;

const MAGIC: &[u8; 4] = b"KWST";
/// Current on-disk format version.
pub const FORMAT_VERSION: u16 = 1;

#[derive(Debug)]
pub enum CodecError {
    /// Input is shorter than the fixed header.
    Truncated,
    /// The magic bytes do not match.
    BadMagic([u8; 4]),
    /// A version this build does not understand.
    UnsupportedVersion(u16),
    /// Compression or decompression failed.
    Compression(std::io::Error),
    /// The payload is not a valid table serialization.
    Payload(bincode::Error),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Truncated => write!(f, "symbol table input shorter than its header"),
            CodecError::BadMagic(found) => {
                write!(f, "bad symbol table magic {found:?}, expected {MAGIC:?}")
            }
            CodecError::UnsupportedVersion(version) => {
                write!(
                    f,
                    "symbol table format version {version} not supported, expected {FORMAT_VERSION}"
                )
            }
            CodecError::Compression(err) => write!(f, "symbol table compression failed: {err}"),
            CodecError::Payload(err) => write!(f, "symbol table payload invalid: {err}"),
        }
    }
}

impl StdError for CodecError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CodecError::Compression(err) => Some(err),
            CodecError::Payload(err) => Some(err),
            _ => None,
        }
    }
}

/// Encode a table into its binary form.
pub fn encode_table(table: &SymbolTable) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::serialize(table).map_err(CodecError::Payload)?;
    let mut out = Vec::with_capacity(MAGIC.len() + 2 + payload.len() / 2);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    let mut encoder = DeflateEncoder::new(out, Compression::default());
    encoder.write_all(&payload).map_err(CodecError::Compression)?;
    encoder.finish().map_err(CodecError::Compression)
}

/// Decode a table from its binary form.
pub fn decode_table(bytes: &[u8]) -> Result<SymbolTable, CodecError> {
    if bytes.len() < MAGIC.len() + 2 {
        return Err(CodecError::Truncated);
    }
    let (magic, rest) = bytes.split_at(MAGIC.len());
    if magic != MAGIC {
        let mut found = [0u8; 4];
        found.copy_from_slice(magic);
        return Err(CodecError::BadMagic(found));
    }
    let version = u16::from_le_bytes([rest[0], rest[1]]);
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let mut payload = Vec::new();
    DeflateDecoder::new(&rest[2..])
        .read_to_end(&mut payload)
        .map_err(CodecError::Compression)?;
    bincode::deserialize(&payload).map_err(CodecError::Payload)
}

/// Encode a table and write it to `path`.
pub fn write_table_file(path: impl AsRef<Path>, table: &SymbolTable) -> crate::Result<()> {
    let path = path.as_ref();
    let bytes = encode_table(table)?;
    fs::write(path, &bytes)?;
    debug!(path = %path.display(), entries = table.len(), "symbol table written");
    Ok(())
}

/// Read and decode a table from `path`.
pub fn read_table_file(path: impl AsRef<Path>) -> crate::Result<SymbolTable> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let table = decode_table(&bytes)?;
    debug!(path = %path.display(), entries = table.len(), "symbol table loaded");
    Ok(table)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::testutil::{aggregate, function};
    use super::*;
    use crate::descriptor::{BuiltinTag, Type};

    #[test]
    fn encode_decode_preserves_entries_and_order() {
        let table = SymbolTable::new(vec![
            function(1, "demo.add"),
            aggregate(
                2,
                "demo.Pair",
                vec![
                    Type::builtin(BuiltinTag::Int),
                    Type::builtin(BuiltinTag::Double),
                ],
            ),
            function(3, "demo.sub"),
        ]);
        let bytes = encode_table(&table).unwrap();
        assert_eq!(&bytes[..4], b"KWST");
        let decoded = decode_table(&bytes).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let table = SymbolTable::default();
        let mut bytes = encode_table(&table).unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            decode_table(&bytes),
            Err(CodecError::BadMagic(_))
        ));
    }

    #[test]
    fn future_version_is_rejected() {
        let table = SymbolTable::default();
        let mut bytes = encode_table(&table).unwrap();
        bytes[4] = 0xff;
        bytes[5] = 0xff;
        assert!(matches!(
            decode_table(&bytes),
            Err(CodecError::UnsupportedVersion(0xffff))
        ));
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(matches!(decode_table(b"KW"), Err(CodecError::Truncated)));
    }

    #[test]
    fn corrupt_payload_is_rejected() {
        let table = SymbolTable::new(vec![function(1, "demo.add")]);
        let mut bytes = encode_table(&table).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x5a;
        assert!(decode_table(&bytes).is_err());
    }
}
