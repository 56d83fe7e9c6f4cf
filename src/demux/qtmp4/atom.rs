//! QuickTime/MP4 atom headers
//!
//! Every atom is a 32-bit size plus a 4-byte type tag. A size of 1
//! means a 64-bit extended size follows; a size of 0 means the atom
//! extends to the end of the file.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt};
use std::fmt;
use std::io::{Read, Seek, SeekFrom};

/// A four-character atom type tag
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fourcc(pub [u8; 4]);

impl Fourcc {
    pub const fn new(tag: &[u8; 4]) -> Self {
        Fourcc(*tag)
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "'{}'", s),
            Err(_) => write!(f, "{:02x?}", self.0),
        }
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl PartialEq<&[u8; 4]> for Fourcc {
    fn eq(&self, other: &&[u8; 4]) -> bool {
        &self.0 == *other
    }
}

/// A decoded atom header
#[derive(Debug, Clone, Copy)]
pub struct Atom {
    pub fourcc: Fourcc,
    /// File position of the atom's first size byte
    pub position: u64,
    /// Total atom size including the header
    pub size: u64,
    /// Header size: 8, or 16 with an extended size
    pub header_size: u64,
}

impl Atom {
    /// Size of the atom's payload
    pub fn payload_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size)
    }

    /// File position just past the atom
    pub fn end(&self) -> u64 {
        self.position + self.size
    }
}

/// Read one atom header at the current position. `file_size` resolves
/// size-zero atoms that extend to the end of the file.
pub fn read_atom<R: Read + Seek>(reader: &mut R, file_size: u64) -> Result<Atom> {
    let position = reader.stream_position()?;
    let size32 = reader.read_u32::<BigEndian>()?;
    let mut fourcc = [0u8; 4];
    reader.read_exact(&mut fourcc)?;

    let (size, header_size) = match size32 {
        0 => (file_size.saturating_sub(position), 8),
        1 => {
            let size64 = reader.read_u64::<BigEndian>()?;
            (size64, 16)
        }
        n => (n as u64, 8),
    };

    if size < header_size {
        return Err(Error::format(format!(
            "atom {} at {} declares size {} smaller than its header",
            Fourcc(fourcc),
            position,
            size
        )));
    }
    if position + size > file_size {
        return Err(Error::format(format!(
            "atom {} at {} extends past the end of the file",
            Fourcc(fourcc),
            position
        )));
    }

    Ok(Atom {
        fourcc: Fourcc(fourcc),
        position,
        size,
        header_size,
    })
}

/// Skip to the end of an atom
pub fn skip_atom<R: Read + Seek>(reader: &mut R, atom: &Atom) -> Result<()> {
    reader.seek(SeekFrom::Start(atom.end()))?;
    Ok(())
}

/// Read an atom's full payload into memory
pub fn read_payload<R: Read + Seek>(reader: &mut R, atom: &Atom) -> Result<Vec<u8>> {
    let len = atom.payload_size();
    if len > 256 * 1024 * 1024 {
        return Err(Error::format(format!(
            "refusing to load atom {} with a {} byte payload",
            atom.fourcc, len
        )));
    }
    let mut payload = vec![0u8; len as usize];
    reader.seek(SeekFrom::Start(atom.position + atom.header_size))?;
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_plain_atom() {
        let mut data = Vec::new();
        data.extend_from_slice(&16u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&[0u8; 8]);

        let mut cur = Cursor::new(&data);
        let atom = read_atom(&mut cur, data.len() as u64).unwrap();
        assert_eq!(atom.fourcc, b"moov");
        assert_eq!(atom.size, 16);
        assert_eq!(atom.header_size, 8);
        assert_eq!(atom.payload_size(), 8);
    }

    #[test]
    fn test_extended_size() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&24u64.to_be_bytes());
        data.extend_from_slice(&[0u8; 8]);

        let mut cur = Cursor::new(&data);
        let atom = read_atom(&mut cur, data.len() as u64).unwrap();
        assert_eq!(atom.fourcc, b"mdat");
        assert_eq!(atom.size, 24);
        assert_eq!(atom.header_size, 16);
    }

    #[test]
    fn test_size_zero_extends_to_eof() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0u8; 100]);

        let mut cur = Cursor::new(&data);
        let atom = read_atom(&mut cur, data.len() as u64).unwrap();
        assert_eq!(atom.size, 108);
    }

    #[test]
    fn test_truncated_atom_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&500u32.to_be_bytes());
        data.extend_from_slice(b"trak");

        let mut cur = Cursor::new(&data);
        assert!(read_atom(&mut cur, data.len() as u64).is_err());
    }

    #[test]
    fn test_undersized_atom_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(b"free");

        let mut cur = Cursor::new(&data);
        assert!(read_atom(&mut cur, data.len() as u64).is_err());
    }
}
