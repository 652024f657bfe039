use crate::constant_pool::ConstantPool;
use crate::definition::Definition;
use crate::error::Error::{InvalidFileKind, VerificationError};
use crate::error::Result;
use crate::global::Global;
use crate::verifier;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Magic number of an executable module file.
pub const EXECUTABLE_MAGIC: u32 = 0xc0ff_eede;
/// Magic number of a library module file.
pub const LIBRARY_MAGIC: u32 = 0x6020_cafe;

/// The kind of a module file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FileKind {
    /// An executable module containing an entry point.
    #[default]
    Executable = 0x01,
    /// A library module.
    Library = 0x02,
}

impl FileKind {
    /// The magic number a file of this kind must carry.
    #[must_use]
    pub fn magic(&self) -> u32 {
        match self {
            FileKind::Executable => EXECUTABLE_MAGIC,
            FileKind::Library => LIBRARY_MAGIC,
        }
    }

    /// Deserialize the `FileKind` from bytes.
    ///
    /// # Errors
    /// Returns `InvalidFileKind` if the kind byte is out of domain.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<FileKind> {
        let kind = bytes.read_u8()?;
        match kind {
            0x01 => Ok(FileKind::Executable),
            0x02 => Ok(FileKind::Library),
            _ => Err(InvalidFileKind(kind)),
        }
    }

    /// Serialize the `FileKind` to bytes.
    ///
    /// # Errors
    /// Returns an error if the byte cannot be written.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u8(*self as u8)?;
        Ok(())
    }
}

/// `ModuleFile` represents the content of a compiled Spade `.elp` module file.
///
/// The raw `magic` field is kept as read from disk; whether it matches the file kind is a
/// verification rule, not a parse rule, so corrupt headers surface through [`verify`](Self::verify)
/// together with every other structural defect.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleFile {
    pub magic: u32,
    pub kind: FileKind,
    pub constant_pool: ConstantPool,
    pub globals: Vec<Global>,
    pub objects: Vec<Definition>,
}

impl ModuleFile {
    /// Create an empty module file of the given kind with a matching magic number.
    #[must_use]
    pub fn new(kind: FileKind) -> Self {
        ModuleFile {
            magic: kind.magic(),
            kind,
            constant_pool: ConstantPool::new(),
            globals: Vec::new(),
            objects: Vec::new(),
        }
    }

    /// Verify the `ModuleFile`.
    ///
    /// On success, every index field of every record is within bounds against the declared
    /// constant pool and code lengths, and every instruction of every method decodes with
    /// in-range operands.
    ///
    /// # Errors
    /// Returns a `VerificationError` if the verification fails.
    pub fn verify(&self) -> Result<()> {
        verifier::verify(self).map_err(VerificationError)
    }

    /// Deserialize the `ModuleFile` from bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes are not a structurally well-formed module file.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<ModuleFile> {
        let magic = bytes.read_u32::<BigEndian>()?;
        let kind = FileKind::from_bytes(bytes)?;
        let constant_pool = ConstantPool::from_bytes(bytes)?;

        let globals_count = bytes.read_u16::<BigEndian>()?;
        let mut globals = Vec::with_capacity(globals_count as usize);
        for _ in 0..globals_count {
            globals.push(Global::from_bytes(bytes)?);
        }

        let objects_count = bytes.read_u16::<BigEndian>()?;
        let mut objects = Vec::with_capacity(objects_count as usize);
        for _ in 0..objects_count {
            objects.push(Definition::from_bytes(bytes)?);
        }

        Ok(ModuleFile {
            magic,
            kind,
            constant_pool,
            globals,
            objects,
        })
    }

    /// Serialize the `ModuleFile` to bytes.
    ///
    /// # Errors
    /// If there are more than 65,535 globals or objects.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u32::<BigEndian>(self.magic)?;
        self.kind.to_bytes(bytes)?;
        self.constant_pool.to_bytes(bytes)?;

        let globals_count = u16::try_from(self.globals.len())?;
        bytes.write_u16::<BigEndian>(globals_count)?;
        for global in &self.globals {
            global.to_bytes(bytes)?;
        }

        let objects_count = u16::try_from(self.objects.len())?;
        bytes.write_u16::<BigEndian>(objects_count)?;
        for object in &self.objects {
            object.to_bytes(bytes)?;
        }
        Ok(())
    }
}

impl Default for ModuleFile {
    fn default() -> Self {
        ModuleFile::new(FileKind::Executable)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constant::Constant;
    use crate::method::Method;
    use crate::mutability::Mutability;

    #[test]
    fn test_file_kind_magic() {
        assert_eq!(EXECUTABLE_MAGIC, FileKind::Executable.magic());
        assert_eq!(LIBRARY_MAGIC, FileKind::Library.magic());
    }

    #[test]
    fn test_invalid_file_kind() {
        let mut cursor = Cursor::new(vec![0x03]);
        assert_eq!(
            Err(InvalidFileKind(0x03)),
            FileKind::from_bytes(&mut cursor)
        );
    }

    #[test]
    fn test_new_magic_matches_kind() {
        let module_file = ModuleFile::new(FileKind::Library);
        assert_eq!(LIBRARY_MAGIC, module_file.magic);
        assert_eq!(Ok(()), module_file.verify());
    }

    #[test]
    fn test_round_trip() -> Result<()> {
        let mut module_file = ModuleFile::new(FileKind::Executable);
        let this_global = module_file.constant_pool.add_string("test::answer")?;
        let type_index = module_file.constant_pool.add_string("basic.int")?;
        module_file.constant_pool.add(Constant::Int(42))?;
        module_file.globals.push(Global {
            flags: Mutability::Constant,
            this_global,
            type_index,
        });
        module_file
            .objects
            .push(Definition::Method(Method::default()));

        let mut bytes = Vec::new();
        module_file.to_bytes(&mut bytes)?;
        let mut cursor = Cursor::new(bytes);
        assert_eq!(module_file, ModuleFile::from_bytes(&mut cursor)?);
        Ok(())
    }
}
