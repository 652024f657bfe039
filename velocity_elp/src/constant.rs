use crate::error::Error::{InvalidCharacterConstant, InvalidConstantTag};
use crate::error::Result;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Cursor, Read};

/// A single constant pool entry of a Spade module file.
///
/// Constants carry the literal values referenced by bytecode operands. An array constant nests
/// further constants and is verified recursively.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Null,
    True,
    False,
    Char(char),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Constant>),
}

impl Constant {
    /// Get the tag of the `Constant`.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Constant::Null => 0x00,
            Constant::True => 0x01,
            Constant::False => 0x02,
            Constant::Char(_) => 0x03,
            Constant::Int(_) => 0x04,
            Constant::Float(_) => 0x05,
            Constant::String(_) => 0x06,
            Constant::Array(_) => 0x07,
        }
    }

    /// Deserialize the `Constant` from bytes.
    ///
    /// # Errors
    /// Returns an error if the tag is invalid or a payload is malformed.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<Constant> {
        let tag = bytes.read_u8()?;
        let constant = match tag {
            0x00 => Constant::Null,
            0x01 => Constant::True,
            0x02 => Constant::False,
            0x03 => {
                let value = bytes.read_u32::<BigEndian>()?;
                let character = char::from_u32(value).ok_or(InvalidCharacterConstant(value))?;
                Constant::Char(character)
            }
            0x04 => Constant::Int(bytes.read_i64::<BigEndian>()?),
            0x05 => Constant::Float(bytes.read_f64::<BigEndian>()?),
            0x06 => {
                let length = bytes.read_u16::<BigEndian>()? as usize;
                let mut utf8_bytes = vec![0; length];
                bytes.read_exact(&mut utf8_bytes)?;
                Constant::String(String::from_utf8(utf8_bytes)?)
            }
            0x07 => {
                let length = bytes.read_u16::<BigEndian>()?;
                let mut items = Vec::with_capacity(length as usize);
                for _ in 0..length {
                    items.push(Constant::from_bytes(bytes)?);
                }
                Constant::Array(items)
            }
            _ => return Err(InvalidConstantTag(tag)),
        };
        Ok(constant)
    }

    /// Serialize the `Constant` to bytes.
    ///
    /// # Errors
    /// If a string is more than 65,535 bytes long or an array has more than 65,535 items.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u8(self.tag())?;

        match self {
            Constant::Null | Constant::True | Constant::False => {}
            Constant::Char(character) => bytes.write_u32::<BigEndian>(u32::from(*character))?,
            Constant::Int(value) => bytes.write_i64::<BigEndian>(*value)?,
            Constant::Float(value) => bytes.write_f64::<BigEndian>(*value)?,
            Constant::String(value) => {
                let length = u16::try_from(value.len())?;
                bytes.write_u16::<BigEndian>(length)?;
                bytes.extend_from_slice(value.as_bytes());
            }
            Constant::Array(items) => {
                let length = u16::try_from(items.len())?;
                bytes.write_u16::<BigEndian>(length)?;
                for item in items {
                    item.to_bytes(bytes)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => write!(f, "null"),
            Constant::True => write!(f, "true"),
            Constant::False => write!(f, "false"),
            Constant::Char(character) => write!(f, "'{character}'"),
            Constant::Int(value) => write!(f, "{value}"),
            Constant::Float(value) => write!(f, "{value}"),
            Constant::String(value) => write!(f, "\"{value}\""),
            Constant::Array(items) => {
                let items = items
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "[{items}]")
            }
        }
    }
}
