// Canonical byte encoding shared by hashing, storage and wire transfer

use std::io::{self, Read, Write};

/// Upper bound for any length-prefixed field; rejects hostile length prefixes
/// before allocating.
pub const MAX_VAR_BYTES: usize = 1 << 20;

/// Upper bound for a decoded element count (inputs, outputs, transactions)
pub const MAX_ITEM_COUNT: u64 = 100_000;

/// Trait for types with a canonical byte layout
pub trait Serializable {
    fn serialize(&self) -> Vec<u8>;
    fn deserialize(data: &[u8]) -> Result<Self, String> where Self: Sized;
}

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
    let [first] = read_array::<1, R>(reader)?;

    match first {
        0..=0xfc => Ok(first as u64),
        0xfd => Ok(u16::from_le_bytes(read_array(reader)?) as u64),
        0xfe => Ok(u32::from_le_bytes(read_array(reader)?) as u64),
        0xff => Ok(u64::from_le_bytes(read_array(reader)?)),
    }
}

/// Read an element count and reject absurd values
pub fn read_count<R: Read + ?Sized>(reader: &mut R) -> io::Result<usize> {
    let count = read_varint(reader)?;
    if count > MAX_ITEM_COUNT {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Element count too large: {}", count),
        ));
    }
    Ok(count as usize)
}

/// Write bytes with length prefix (VarInt length + data)
pub fn write_var_bytes<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    write_varint(writer, data.len() as u64)?;
    writer.write_all(data)?;
    Ok(())
}

/// Read bytes with length prefix
pub fn read_var_bytes<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = read_varint(reader)?;
    if len > MAX_VAR_BYTES as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Length prefix too large: {}", len),
        ));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// Read a fixed-size array
pub fn read_array<const N: usize, R: Read + ?Sized>(reader: &mut R) -> io::Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}
