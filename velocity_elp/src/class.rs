use crate::definition::Definition;
use crate::error::Error::InvalidClassKind;
use crate::error::Result;
use crate::field::Field;
use crate::method::Method;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// The kind of a class record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClassKind {
    Class = 0x01,
    Interface = 0x02,
    Enum = 0x03,
    Annotation = 0x04,
}

impl ClassKind {
    /// Deserialize the `ClassKind` from bytes.
    ///
    /// # Errors
    /// Returns `InvalidClassKind` if the kind byte is out of domain.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<ClassKind> {
        let kind = bytes.read_u8()?;
        match kind {
            0x01 => Ok(ClassKind::Class),
            0x02 => Ok(ClassKind::Interface),
            0x03 => Ok(ClassKind::Enum),
            0x04 => Ok(ClassKind::Annotation),
            _ => Err(InvalidClassKind(kind)),
        }
    }

    /// Serialize the `ClassKind` to bytes.
    ///
    /// # Errors
    /// Returns an error if the byte cannot be written.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u8(*self as u8)?;
        Ok(())
    }
}

/// A class record of a Spade module file.
///
/// `this_class` is the constant pool index of the class signature string; `supers` is the index of
/// an array constant holding the signature strings of the superclasses. Nested `objects` are
/// definitions scoped inside the class body.
#[derive(Clone, Debug, PartialEq)]
pub struct Class {
    pub kind: ClassKind,
    pub this_class: u16,
    pub supers: u16,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub objects: Vec<Definition>,
}

impl Class {
    /// Deserialize the `Class` from bytes.
    ///
    /// # Errors
    /// Returns an error if the kind byte is out of domain or a nested record is malformed.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<Class> {
        let kind = ClassKind::from_bytes(bytes)?;
        let this_class = bytes.read_u16::<BigEndian>()?;
        let supers = bytes.read_u16::<BigEndian>()?;

        let fields_count = bytes.read_u16::<BigEndian>()?;
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            fields.push(Field::from_bytes(bytes)?);
        }

        let methods_count = bytes.read_u16::<BigEndian>()?;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            methods.push(Method::from_bytes(bytes)?);
        }

        let objects_count = bytes.read_u16::<BigEndian>()?;
        let mut objects = Vec::with_capacity(objects_count as usize);
        for _ in 0..objects_count {
            objects.push(Definition::from_bytes(bytes)?);
        }

        Ok(Class {
            kind,
            this_class,
            supers,
            fields,
            methods,
            objects,
        })
    }

    /// Serialize the `Class` to bytes.
    ///
    /// # Errors
    /// If there are more than 65,535 fields, methods or nested objects.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        self.kind.to_bytes(bytes)?;
        bytes.write_u16::<BigEndian>(self.this_class)?;
        bytes.write_u16::<BigEndian>(self.supers)?;

        let fields_count = u16::try_from(self.fields.len())?;
        bytes.write_u16::<BigEndian>(fields_count)?;
        for field in &self.fields {
            field.to_bytes(bytes)?;
        }

        let methods_count = u16::try_from(self.methods.len())?;
        bytes.write_u16::<BigEndian>(methods_count)?;
        for method in &self.methods {
            method.to_bytes(bytes)?;
        }

        let objects_count = u16::try_from(self.objects.len())?;
        bytes.write_u16::<BigEndian>(objects_count)?;
        for object in &self.objects {
            object.to_bytes(bytes)?;
        }
        Ok(())
    }
}

impl Default for Class {
    fn default() -> Self {
        Class {
            kind: ClassKind::Class,
            this_class: 0,
            supers: 0,
            fields: Vec::new(),
            methods: Vec::new(),
            objects: Vec::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mutability::Mutability;

    #[test]
    fn test_invalid_kind() {
        let mut cursor = Cursor::new(vec![0x05]);
        assert_eq!(
            Err(InvalidClassKind(0x05)),
            ClassKind::from_bytes(&mut cursor)
        );
    }

    #[test]
    fn test_round_trip() -> Result<()> {
        let class = Class {
            kind: ClassKind::Enum,
            this_class: 1,
            supers: 2,
            fields: vec![Field {
                flags: Mutability::Variable,
                this_field: 3,
                type_index: 4,
            }],
            methods: vec![Method::default()],
            objects: vec![Definition::Class(Class::default())],
        };
        let mut bytes = Vec::new();
        class.to_bytes(&mut bytes)?;
        let mut cursor = Cursor::new(bytes);
        assert_eq!(class, Class::from_bytes(&mut cursor)?);
        Ok(())
    }
}
