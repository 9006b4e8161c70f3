// Serialization utilities
//
// Two encodings live side by side:
// - the canonical encoding (fixed-width LE integers and raw bytes, no length
//   prefixes) is the hashing/signing input and is produced by the
//   `canonical_bytes` methods on the data types;
// - the storage encoding below adds VarInt length prefixes so records
//   read back from the database can be decoded again.

use std::io::{self, Read, Write};
use thiserror::Error;

/// A stored record could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> Self {
        DecodeError(e.to_string())
    }
}

/// Trait for types stored in the database
pub trait Serializable {
    fn serialize(&self) -> Vec<u8>;

    fn from_reader(reader: &mut dyn Read) -> Result<Self, DecodeError>
    where
        Self: Sized;

    /// Decode a complete record, rejecting trailing bytes
    fn deserialize(data: &[u8]) -> Result<Self, DecodeError>
    where
        Self: Sized,
    {
        let mut cursor = io::Cursor::new(data);
        let value = Self::from_reader(&mut cursor)?;
        if cursor.position() as usize != data.len() {
            return Err(DecodeError(format!(
                "{} trailing bytes after record",
                data.len() - cursor.position() as usize
            )));
        }
        Ok(value)
    }
}

/// Upper bound on any single length prefix, so a corrupt prefix cannot
/// trigger a huge allocation
const MAX_VAR_LEN: u64 = 32 * 1024 * 1024;

/// Write a variable-length integer (VarInt)
pub fn write_varint<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    match value {
        0..=0xfc => {
            writer.write_all(&[value as u8])?;
        }
        0xfd..=0xffff => {
            writer.write_all(&[0xfd])?;
            writer.write_all(&(value as u16).to_le_bytes())?;
        }
        0x10000..=0xffffffff => {
            writer.write_all(&[0xfe])?;
            writer.write_all(&(value as u32).to_le_bytes())?;
        }
        _ => {
            writer.write_all(&[0xff])?;
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Read a variable-length integer (VarInt)
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut first_byte = [0u8; 1];
    reader.read_exact(&mut first_byte)?;

    match first_byte[0] {
        0..=0xfc => Ok(first_byte[0] as u64),
        0xfd => {
            let mut bytes = [0u8; 2];
            reader.read_exact(&mut bytes)?;
            Ok(u16::from_le_bytes(bytes) as u64)
        }
        0xfe => {
            let mut bytes = [0u8; 4];
            reader.read_exact(&mut bytes)?;
            Ok(u32::from_le_bytes(bytes) as u64)
        }
        0xff => {
            let mut bytes = [0u8; 8];
            reader.read_exact(&mut bytes)?;
            Ok(u64::from_le_bytes(bytes))
        }
    }
}

/// Read a VarInt used as an element count or byte length
pub fn read_len<R: Read + ?Sized>(reader: &mut R) -> Result<usize, DecodeError> {
    let len = read_varint(reader)?;
    if len > MAX_VAR_LEN {
        return Err(DecodeError(format!("length prefix {} out of range", len)));
    }
    Ok(len as usize)
}

/// Write bytes with length prefix (VarInt length + data)
pub fn write_var_bytes<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    write_varint(writer, data.len() as u64)?;
    writer.write_all(data)?;
    Ok(())
}

/// Read bytes with length prefix
pub fn read_var_bytes<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>, DecodeError> {
    let len = read_len(reader)?;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    Ok(data)
}

pub fn read_u64<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

pub fn read_array<const N: usize, R: Read + ?Sized>(reader: &mut R) -> io::Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let _ = write_varint(&mut buf, self.len() as u64);
        for item in self {
            buf.extend_from_slice(&item.serialize());
        }
        buf
    }

    fn from_reader(reader: &mut dyn Read) -> Result<Self, DecodeError> {
        let count = read_len(reader)?;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(T::from_reader(reader)?);
        }
        Ok(items)
    }
}
