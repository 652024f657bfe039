use crate::error::Result;
use crate::mutability::Mutability;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// A module-level variable record.
///
/// `this_global` and `type_index` are constant pool indexes of the global's signature string and
/// its declared type signature string respectively.
#[derive(Clone, Debug, PartialEq)]
pub struct Global {
    pub flags: Mutability,
    pub this_global: u16,
    pub type_index: u16,
}

impl Global {
    /// Deserialize the `Global` from bytes.
    ///
    /// # Errors
    /// Returns an error if the flags are out of domain.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<Global> {
        let flags = Mutability::from_bytes(bytes)?;
        let this_global = bytes.read_u16::<BigEndian>()?;
        let type_index = bytes.read_u16::<BigEndian>()?;
        Ok(Global {
            flags,
            this_global,
            type_index,
        })
    }

    /// Serialize the `Global` to bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes cannot be written.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        self.flags.to_bytes(bytes)?;
        bytes.write_u16::<BigEndian>(self.this_global)?;
        bytes.write_u16::<BigEndian>(self.type_index)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip() -> Result<()> {
        let global = Global {
            flags: Mutability::Constant,
            this_global: 3,
            type_index: 4,
        };
        let mut bytes = Vec::new();
        global.to_bytes(&mut bytes)?;
        let mut cursor = Cursor::new(bytes);
        assert_eq!(global, Global::from_bytes(&mut cursor)?);
        Ok(())
    }
}
