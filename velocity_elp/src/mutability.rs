use crate::error::Error::InvalidMutability;
use crate::error::Result;
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::Cursor;

/// Mutability flags shared by globals and fields.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mutability {
    /// The slot may be reassigned.
    Variable = 0x01,
    /// The slot is assigned once at definition time.
    Constant = 0x02,
}

impl Mutability {
    /// Deserialize the `Mutability` from bytes.
    ///
    /// # Errors
    /// Returns `InvalidMutability` if the flag byte is out of domain.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<Mutability> {
        let flags = bytes.read_u8()?;
        match flags {
            0x01 => Ok(Mutability::Variable),
            0x02 => Ok(Mutability::Constant),
            _ => Err(InvalidMutability(flags)),
        }
    }

    /// Serialize the `Mutability` to bytes.
    ///
    /// # Errors
    /// Should not occur; returns an error if the byte cannot be written.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u8(*self as u8)?;
        Ok(())
    }

    /// Whether the slot may be reassigned.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        matches!(self, Mutability::Variable)
    }
}

impl fmt::Display for Mutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutability::Variable => write!(f, "var"),
            Mutability::Constant => write!(f, "const"),
        }
    }
}
