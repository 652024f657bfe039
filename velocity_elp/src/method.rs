use crate::error::Error::{CodeTooLarge, InvalidMethodKind};
use crate::error::Result;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

/// The kind of a method record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MethodKind {
    /// A free function.
    Function = 0x01,
    /// A member method of a class.
    Method = 0x02,
}

impl MethodKind {
    /// Deserialize the `MethodKind` from bytes.
    ///
    /// # Errors
    /// Returns `InvalidMethodKind` if the kind byte is out of domain.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<MethodKind> {
        let kind = bytes.read_u8()?;
        match kind {
            0x01 => Ok(MethodKind::Function),
            0x02 => Ok(MethodKind::Method),
            _ => Err(InvalidMethodKind(kind)),
        }
    }

    /// Serialize the `MethodKind` to bytes.
    ///
    /// # Errors
    /// Returns an error if the byte cannot be written.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u8(*self as u8)?;
        Ok(())
    }
}

/// An argument or local variable record: constant pool indexes of the variable's signature string
/// and its declared type signature string.
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub this_variable: u16,
    pub type_index: u16,
}

impl Variable {
    /// Deserialize the `Variable` from bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes cannot be read.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<Variable> {
        let this_variable = bytes.read_u16::<BigEndian>()?;
        let type_index = bytes.read_u16::<BigEndian>()?;
        Ok(Variable {
            this_variable,
            type_index,
        })
    }

    /// Serialize the `Variable` to bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes cannot be written.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<BigEndian>(self.this_variable)?;
        bytes.write_u16::<BigEndian>(self.type_index)?;
        Ok(())
    }
}

/// An exception table entry: the byte-offset range it covers, the handler offset, and the
/// constant pool index of the caught type's signature string.
#[derive(Clone, Debug, PartialEq)]
pub struct ExceptionHandler {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
    pub exception: u16,
}

impl ExceptionHandler {
    /// Deserialize the `ExceptionHandler` from bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes cannot be read.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<ExceptionHandler> {
        let start_pc = bytes.read_u32::<BigEndian>()?;
        let end_pc = bytes.read_u32::<BigEndian>()?;
        let handler_pc = bytes.read_u32::<BigEndian>()?;
        let exception = bytes.read_u16::<BigEndian>()?;
        Ok(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
            exception,
        })
    }

    /// Serialize the `ExceptionHandler` to bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes cannot be written.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u32::<BigEndian>(self.start_pc)?;
        bytes.write_u32::<BigEndian>(self.end_pc)?;
        bytes.write_u32::<BigEndian>(self.handler_pc)?;
        bytes.write_u16::<BigEndian>(self.exception)?;
        Ok(())
    }
}

/// A line info entry: `times` consecutive code bytes map to source line `line`.
#[derive(Clone, Debug, PartialEq)]
pub struct LineNumber {
    pub times: u32,
    pub line: u32,
}

impl LineNumber {
    /// Deserialize the `LineNumber` from bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes cannot be read.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<LineNumber> {
        let times = bytes.read_u32::<BigEndian>()?;
        let line = bytes.read_u32::<BigEndian>()?;
        Ok(LineNumber { times, line })
    }

    /// Serialize the `LineNumber` to bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes cannot be written.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u32::<BigEndian>(self.times)?;
        bytes.write_u32::<BigEndian>(self.line)?;
        Ok(())
    }
}

/// A single case of a match table: the constant pool index of the case value and the code offset
/// to branch to when the scrutinee equals that value.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchCase {
    pub value: u16,
    pub location: u32,
}

impl MatchCase {
    /// Deserialize the `MatchCase` from bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes cannot be read.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<MatchCase> {
        let value = bytes.read_u16::<BigEndian>()?;
        let location = bytes.read_u32::<BigEndian>()?;
        Ok(MatchCase { value, location })
    }

    /// Serialize the `MatchCase` to bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes cannot be written.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<BigEndian>(self.value)?;
        bytes.write_u32::<BigEndian>(self.location)?;
        Ok(())
    }
}

/// A multiway-branch structure mapping constant pool values to code offsets, with a default
/// offset taken when no case matches.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchTable {
    pub cases: Vec<MatchCase>,
    pub default_location: u32,
}

impl MatchTable {
    /// Deserialize the `MatchTable` from bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes cannot be read.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<MatchTable> {
        let case_count = bytes.read_u16::<BigEndian>()?;
        let mut cases = Vec::with_capacity(case_count as usize);
        for _ in 0..case_count {
            cases.push(MatchCase::from_bytes(bytes)?);
        }
        let default_location = bytes.read_u32::<BigEndian>()?;
        Ok(MatchTable {
            cases,
            default_location,
        })
    }

    /// Serialize the `MatchTable` to bytes.
    ///
    /// # Errors
    /// Returns an error if there are more than 65,535 cases.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        let case_count = u16::try_from(self.cases.len())?;
        bytes.write_u16::<BigEndian>(case_count)?;
        for case in &self.cases {
            case.to_bytes(bytes)?;
        }
        bytes.write_u32::<BigEndian>(self.default_location)?;
        Ok(())
    }
}

/// A method record of a Spade module file.
///
/// `this_method` is the constant pool index of the method's signature string. Locals at or above
/// `closure_start` are closure cells shared with nested lambdas. `max_stack` bounds the method's
/// operand stack; the compiler declares it and the verifier requires it. Code lengths are 32-bit
/// throughout.
#[derive(Clone, Debug, PartialEq)]
pub struct Method {
    pub kind: MethodKind,
    pub this_method: u16,
    pub type_params: Vec<u16>,
    pub args: Vec<Variable>,
    pub locals: Vec<Variable>,
    pub closure_start: u16,
    pub max_stack: u32,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub line_numbers: Vec<LineNumber>,
    pub lambdas: Vec<Method>,
    pub match_tables: Vec<MatchTable>,
}

impl Method {
    /// Deserialize the `Method` from bytes.
    ///
    /// # Errors
    /// Returns an error if the kind byte is out of domain or a nested record is malformed.
    pub fn from_bytes(bytes: &mut Cursor<Vec<u8>>) -> Result<Method> {
        let kind = MethodKind::from_bytes(bytes)?;
        let this_method = bytes.read_u16::<BigEndian>()?;

        let type_param_count = bytes.read_u8()?;
        let mut type_params = Vec::with_capacity(type_param_count as usize);
        for _ in 0..type_param_count {
            type_params.push(bytes.read_u16::<BigEndian>()?);
        }

        let args_count = bytes.read_u8()?;
        let mut args = Vec::with_capacity(args_count as usize);
        for _ in 0..args_count {
            args.push(Variable::from_bytes(bytes)?);
        }

        let locals_count = bytes.read_u16::<BigEndian>()?;
        let closure_start = bytes.read_u16::<BigEndian>()?;
        let mut locals = Vec::with_capacity(locals_count as usize);
        for _ in 0..locals_count {
            locals.push(Variable::from_bytes(bytes)?);
        }

        let max_stack = bytes.read_u32::<BigEndian>()?;

        let code_count = bytes.read_u32::<BigEndian>()?;
        let mut code = vec![0; code_count as usize];
        bytes.read_exact(&mut code)?;

        let exception_table_count = bytes.read_u16::<BigEndian>()?;
        let mut exception_table = Vec::with_capacity(exception_table_count as usize);
        for _ in 0..exception_table_count {
            exception_table.push(ExceptionHandler::from_bytes(bytes)?);
        }

        let line_count = bytes.read_u16::<BigEndian>()?;
        let mut line_numbers = Vec::with_capacity(line_count as usize);
        for _ in 0..line_count {
            line_numbers.push(LineNumber::from_bytes(bytes)?);
        }

        let lambda_count = bytes.read_u16::<BigEndian>()?;
        let mut lambdas = Vec::with_capacity(lambda_count as usize);
        for _ in 0..lambda_count {
            lambdas.push(Method::from_bytes(bytes)?);
        }

        let match_count = bytes.read_u16::<BigEndian>()?;
        let mut match_tables = Vec::with_capacity(match_count as usize);
        for _ in 0..match_count {
            match_tables.push(MatchTable::from_bytes(bytes)?);
        }

        Ok(Method {
            kind,
            this_method,
            type_params,
            args,
            locals,
            closure_start,
            max_stack,
            code,
            exception_table,
            line_numbers,
            lambdas,
            match_tables,
        })
    }

    /// Serialize the `Method` to bytes.
    ///
    /// # Errors
    /// - If a count field overflows its width.
    /// - `CodeTooLarge` if the code section exceeds `u32::MAX` bytes.
    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        self.kind.to_bytes(bytes)?;
        bytes.write_u16::<BigEndian>(self.this_method)?;

        let type_param_count = u8::try_from(self.type_params.len())?;
        bytes.write_u8(type_param_count)?;
        for type_param in &self.type_params {
            bytes.write_u16::<BigEndian>(*type_param)?;
        }

        let args_count = u8::try_from(self.args.len())?;
        bytes.write_u8(args_count)?;
        for arg in &self.args {
            arg.to_bytes(bytes)?;
        }

        let locals_count = u16::try_from(self.locals.len())?;
        bytes.write_u16::<BigEndian>(locals_count)?;
        bytes.write_u16::<BigEndian>(self.closure_start)?;
        for local in &self.locals {
            local.to_bytes(bytes)?;
        }

        bytes.write_u32::<BigEndian>(self.max_stack)?;

        let code_count =
            u32::try_from(self.code.len()).map_err(|_| CodeTooLarge(self.code.len()))?;
        bytes.write_u32::<BigEndian>(code_count)?;
        bytes.extend_from_slice(&self.code);

        let exception_table_count = u16::try_from(self.exception_table.len())?;
        bytes.write_u16::<BigEndian>(exception_table_count)?;
        for handler in &self.exception_table {
            handler.to_bytes(bytes)?;
        }

        let line_count = u16::try_from(self.line_numbers.len())?;
        bytes.write_u16::<BigEndian>(line_count)?;
        for line_number in &self.line_numbers {
            line_number.to_bytes(bytes)?;
        }

        let lambda_count = u16::try_from(self.lambdas.len())?;
        bytes.write_u16::<BigEndian>(lambda_count)?;
        for lambda in &self.lambdas {
            lambda.to_bytes(bytes)?;
        }

        let match_count = u16::try_from(self.match_tables.len())?;
        bytes.write_u16::<BigEndian>(match_count)?;
        for match_table in &self.match_tables {
            match_table.to_bytes(bytes)?;
        }
        Ok(())
    }
}

impl Default for Method {
    fn default() -> Self {
        Method {
            kind: MethodKind::Function,
            this_method: 0,
            type_params: Vec::new(),
            args: Vec::new(),
            locals: Vec::new(),
            closure_start: 0,
            max_stack: 0,
            code: Vec::new(),
            exception_table: Vec::new(),
            line_numbers: Vec::new(),
            lambdas: Vec::new(),
            match_tables: Vec::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_method() -> Method {
        Method {
            kind: MethodKind::Method,
            this_method: 1,
            type_params: vec![2],
            args: vec![Variable {
                this_variable: 3,
                type_index: 4,
            }],
            locals: vec![
                Variable {
                    this_variable: 5,
                    type_index: 6,
                },
                Variable {
                    this_variable: 7,
                    type_index: 8,
                },
            ],
            closure_start: 1,
            max_stack: 4,
            code: vec![0x00, 0x22],
            exception_table: vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 1,
                handler_pc: 1,
                exception: 9,
            }],
            line_numbers: vec![LineNumber { times: 2, line: 10 }],
            lambdas: vec![Method::default()],
            match_tables: vec![MatchTable {
                cases: vec![MatchCase {
                    value: 1,
                    location: 0,
                }],
                default_location: 1,
            }],
        }
    }

    #[test]
    fn test_invalid_kind() {
        let mut cursor = Cursor::new(vec![0x03]);
        assert_eq!(
            Err(InvalidMethodKind(0x03)),
            MethodKind::from_bytes(&mut cursor)
        );
    }

    #[test]
    fn test_round_trip() -> Result<()> {
        let method = sample_method();
        let mut bytes = Vec::new();
        method.to_bytes(&mut bytes)?;
        let mut cursor = Cursor::new(bytes);
        assert_eq!(method, Method::from_bytes(&mut cursor)?);
        Ok(())
    }

    #[test]
    fn test_default_round_trip() -> Result<()> {
        let method = Method::default();
        let mut bytes = Vec::new();
        method.to_bytes(&mut bytes)?;
        let mut cursor = Cursor::new(bytes);
        assert_eq!(method, Method::from_bytes(&mut cursor)?);
        Ok(())
    }
}
