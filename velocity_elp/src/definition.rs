use crate::class::Class;
use crate::error::Error::InvalidDefinitionKind;
use crate::error::Result;
use crate::method::Method;
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// A top-level or nested definition of a Spade module file: either a method or a class.
#[derive(Clone, Debug, PartialEq)]
pub enum Definition {
    Method(Method),
    Class(Class),
}

impl Definition {
    /// Get the kind tag of the `Definition`.
    #[must_use]
    pub fn kind(&self) -> u8 {
        match self {
            Definition::Method(_) => 0x01,
            Definition::Class(_) => 0x02,
        }
    }

    /// Deserialize the `Definition` from bytes.
    ///
    /// # Errors
    /// Returns `InvalidDefinitionKind` if the kind byte is out of domain.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<Definition> {
        let kind = bytes.read_u8()?;
        match kind {
            0x01 => Ok(Definition::Method(Method::from_bytes(bytes)?)),
            0x02 => Ok(Definition::Class(Class::from_bytes(bytes)?)),
            _ => Err(InvalidDefinitionKind(kind)),
        }
    }

    /// Serialize the `Definition` to bytes.
    ///
    /// # Errors
    /// Returns an error if a nested record cannot be written.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u8(self.kind())?;
        match self {
            Definition::Method(method) => method.to_bytes(bytes),
            Definition::Class(class) => class.to_bytes(bytes),
        }
    }
}
