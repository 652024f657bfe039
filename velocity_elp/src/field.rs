use crate::error::Result;
use crate::mutability::Mutability;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// A class field record.
///
/// `this_field` and `type_index` are constant pool indexes of the field's signature string and its
/// declared type signature string respectively.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub flags: Mutability,
    pub this_field: u16,
    pub type_index: u16,
}

impl Field {
    /// Deserialize the `Field` from bytes.
    ///
    /// # Errors
    /// Returns an error if the flags are out of domain.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<Field> {
        let flags = Mutability::from_bytes(bytes)?;
        let this_field = bytes.read_u16::<BigEndian>()?;
        let type_index = bytes.read_u16::<BigEndian>()?;
        Ok(Field {
            flags,
            this_field,
            type_index,
        })
    }

    /// Serialize the `Field` to bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes cannot be written.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        self.flags.to_bytes(bytes)?;
        bytes.write_u16::<BigEndian>(self.this_field)?;
        bytes.write_u16::<BigEndian>(self.type_index)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip() -> Result<()> {
        let field = Field {
            flags: Mutability::Variable,
            this_field: 1,
            type_index: 2,
        };
        let mut bytes = Vec::new();
        field.to_bytes(&mut bytes)?;
        let mut cursor = Cursor::new(bytes);
        assert_eq!(field, Field::from_bytes(&mut cursor)?);
        Ok(())
    }
}
