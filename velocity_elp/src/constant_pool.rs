use crate::constant::Constant;
use crate::error::Error::{
    ConstantPoolOverflow, InvalidConstantPoolIndex, InvalidConstantPoolType,
};
use crate::error::Result;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::Cursor;

/// The constant pool of a Spade module file.
///
/// A module-scoped indexed array of literal values referenced by bytecode operands and record
/// fields. Indexes are zero-based and must be strictly less than the pool length.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstantPool {
    constants: Vec<Constant>,
}

impl ConstantPool {
    /// Create a new empty constant pool.
    #[must_use]
    pub fn new() -> Self {
        ConstantPool::default()
    }

    /// Add a constant to the pool and return its index.
    ///
    /// # Errors
    /// Returns `ConstantPoolOverflow` if the pool already holds `u16::MAX` entries.
    pub fn add(&mut self, constant: Constant) -> Result<u16> {
        let index = u16::try_from(self.constants.len()).map_err(|_| ConstantPoolOverflow)?;
        self.constants.push(constant);
        Ok(index)
    }

    /// Add a string constant to the pool and return its index.
    ///
    /// # Errors
    /// Returns `ConstantPoolOverflow` if the pool already holds `u16::MAX` entries.
    pub fn add_string<S: Into<String>>(&mut self, value: S) -> Result<u16> {
        self.add(Constant::String(value.into()))
    }

    /// Get a constant from the pool; `None` if the index is out of range.
    #[must_use]
    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    /// Get a constant from the pool.
    ///
    /// # Errors
    /// Returns `InvalidConstantPoolIndex` if the index is out of range.
    pub fn try_get(&self, index: u16) -> Result<&Constant> {
        self.get(index).ok_or(InvalidConstantPoolIndex(index))
    }

    /// Get a string constant from the pool.
    ///
    /// # Errors
    /// Returns an error if the index is out of range or the entry is not a string.
    pub fn try_get_string(&self, index: u16) -> Result<&String> {
        match self.try_get(index)? {
            Constant::String(value) => Ok(value),
            _ => Err(InvalidConstantPoolType(index)),
        }
    }

    /// The number of constants in the pool.
    #[must_use]
    pub fn len(&self) -> u16 {
        u16::try_from(self.constants.len()).unwrap_or(u16::MAX)
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Iterate over the constants in the pool.
    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.constants.iter()
    }

    /// Deserialize the `ConstantPool` from bytes.
    ///
    /// # Errors
    /// Returns an error if a constant is malformed.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<ConstantPool> {
        let count = bytes.read_u16::<BigEndian>()?;
        let mut constants = Vec::with_capacity(count as usize);
        for _ in 0..count {
            constants.push(Constant::from_bytes(bytes)?);
        }
        Ok(ConstantPool { constants })
    }

    /// Serialize the `ConstantPool` to bytes.
    ///
    /// # Errors
    /// Returns an error if the pool holds more than `u16::MAX` entries.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        let count = u16::try_from(self.constants.len())?;
        bytes.write_u16::<BigEndian>(count)?;
        for constant in &self.constants {
            constant.to_bytes(bytes)?;
        }
        Ok(())
    }
}

impl fmt::Display for ConstantPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, constant) in self.constants.iter().enumerate() {
            writeln!(f, "#{index} = {constant}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ConstantPool {
    type Item = &'a Constant;
    type IntoIter = std::slice::Iter<'a, Constant>;

    fn into_iter(self) -> Self::IntoIter {
        self.constants.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_add_and_get() -> Result<()> {
        let mut pool = ConstantPool::new();
        let index = pool.add(Constant::Int(42))?;
        assert_eq!(0, index);
        assert_eq!(Some(&Constant::Int(42)), pool.get(index));
        assert_eq!(1, pool.len());
        assert!(!pool.is_empty());
        Ok(())
    }

    #[test]
    fn test_try_get_invalid_index() {
        let pool = ConstantPool::new();
        assert_eq!(Err(InvalidConstantPoolIndex(3)), pool.try_get(3));
    }

    #[test]
    fn test_try_get_string() -> Result<()> {
        let mut pool = ConstantPool::new();
        let string_index = pool.add_string("foo")?;
        let int_index = pool.add(Constant::Int(1))?;
        assert_eq!("foo", pool.try_get_string(string_index)?);
        assert_eq!(
            Err(InvalidConstantPoolType(int_index)),
            pool.try_get_string(int_index)
        );
        Ok(())
    }

    #[test]
    fn test_round_trip() -> Result<()> {
        let mut pool = ConstantPool::new();
        pool.add(Constant::Null)?;
        pool.add_string("main")?;
        pool.add(Constant::Array(vec![Constant::Int(1)]))?;

        let mut bytes = Vec::new();
        pool.to_bytes(&mut bytes)?;
        let mut cursor = Cursor::new(bytes);
        assert_eq!(pool, ConstantPool::from_bytes(&mut cursor)?);
        Ok(())
    }

    #[test]
    fn test_display() -> Result<()> {
        let mut pool = ConstantPool::new();
        pool.add(Constant::Int(7))?;
        pool.add_string("x")?;
        assert_eq!("#0 = 7\n#1 = \"x\"\n", pool.to_string());
        Ok(())
    }
}
