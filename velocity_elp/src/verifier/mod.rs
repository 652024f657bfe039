//! Structural verification of Spade module files.
//!
//! The verifier gates every record the loader will ever materialize: on success, every index
//! field of every record is within bounds against the declared constant pool and code lengths,
//! and every instruction of every method decodes with in-range operands. It does not check the
//! syntax or semantics of the program, only that the basic standards for the various values hold.

mod code;
mod error;

pub use error::VerifyError;

use crate::class::Class;
use crate::definition::Definition;
use crate::field::Field;
use crate::global::Global;
use crate::method::{ExceptionHandler, LineNumber, MatchTable, Method};
use crate::module_file::ModuleFile;
use error::Result;

/// Verify the `ModuleFile`.
///
/// # Errors
/// Returns a `VerifyError` describing the first rule violation.
pub(crate) fn verify(module_file: &ModuleFile) -> Result<()> {
    if module_file.magic != module_file.kind.magic() {
        return Err(VerifyError::MagicMismatch {
            magic: module_file.magic,
            kind: module_file.kind as u8,
        });
    }

    let cp_count = module_file.constant_pool.len();
    for global in &module_file.globals {
        check_global(global, cp_count)?;
    }
    for object in &module_file.objects {
        check_definition(object, cp_count)?;
    }
    Ok(())
}

fn check_definition(definition: &Definition, cp_count: u16) -> Result<()> {
    match definition {
        Definition::Method(method) => check_method(method, cp_count),
        Definition::Class(class) => check_class(class, cp_count),
    }
}

fn check_class(class: &Class, cp_count: u16) -> Result<()> {
    check_pool_index(class.this_class, cp_count)?;
    check_pool_index(class.supers, cp_count)?;

    for field in &class.fields {
        check_field(field, cp_count)?;
    }
    for method in &class.methods {
        check_method(method, cp_count)?;
    }
    for object in &class.objects {
        check_definition(object, cp_count)?;
    }
    Ok(())
}

fn check_field(field: &Field, cp_count: u16) -> Result<()> {
    check_pool_index(field.this_field, cp_count)?;
    check_pool_index(field.type_index, cp_count)?;
    Ok(())
}

fn check_method(method: &Method, cp_count: u16) -> Result<()> {
    check_pool_index(method.this_method, cp_count)?;
    for type_param in &method.type_params {
        check_pool_index(*type_param, cp_count)?;
    }
    for arg in &method.args {
        check_pool_index(arg.this_variable, cp_count)?;
        check_pool_index(arg.type_index, cp_count)?;
    }
    for local in &method.locals {
        check_pool_index(local.this_variable, cp_count)?;
        check_pool_index(local.type_index, cp_count)?;
    }
    let locals = u16::try_from(method.locals.len()).unwrap_or(u16::MAX);
    if method.closure_start > locals {
        return Err(VerifyError::ClosureStartOutOfRange {
            closure_start: method.closure_start,
            locals,
        });
    }

    let code_count =
        u32::try_from(method.code.len()).map_err(|_| VerifyError::CodeTooLarge(method.code.len()))?;
    for handler in &method.exception_table {
        check_exception(handler, cp_count, code_count)?;
    }
    check_lines(&method.line_numbers, code_count)?;
    for lambda in &method.lambdas {
        check_method(lambda, cp_count)?;
    }
    for match_table in &method.match_tables {
        check_match(match_table, code_count, cp_count)?;
    }

    let match_count = u16::try_from(method.match_tables.len()).unwrap_or(u16::MAX);
    code::verify(&method.code, cp_count, match_count)
}

fn check_match(match_table: &MatchTable, code_count: u32, cp_count: u16) -> Result<()> {
    for case in &match_table.cases {
        check_pool_index(case.value, cp_count)?;
        check_code_offset(case.location, code_count)?;
    }
    check_code_offset(match_table.default_location, code_count)
}

fn check_lines(line_numbers: &[LineNumber], code_count: u32) -> Result<()> {
    let total: u64 = line_numbers.iter().map(|line| u64::from(line.times)).sum();
    if total > u64::from(code_count) {
        return Err(VerifyError::LineNumbersExceedCode { total, code_count });
    }
    Ok(())
}

fn check_exception(handler: &ExceptionHandler, cp_count: u16, code_count: u32) -> Result<()> {
    check_pool_index(handler.exception, cp_count)?;
    if handler.start_pc > handler.end_pc {
        return Err(VerifyError::InvalidExceptionRange {
            start_pc: handler.start_pc,
            end_pc: handler.end_pc,
        });
    }
    check_code_offset(handler.start_pc, code_count)?;
    check_code_offset(handler.end_pc, code_count)?;
    check_code_offset(handler.handler_pc, code_count)
}

fn check_global(global: &Global, cp_count: u16) -> Result<()> {
    check_pool_index(global.this_global, cp_count)?;
    check_pool_index(global.type_index, cp_count)?;
    Ok(())
}

fn check_pool_index(index: u16, cp_count: u16) -> Result<()> {
    if index >= cp_count {
        return Err(VerifyError::InvalidConstantPoolIndex(index));
    }
    Ok(())
}

fn check_code_offset(offset: u32, code_count: u32) -> Result<()> {
    if offset >= code_count {
        return Err(VerifyError::InvalidCodeOffset { offset, code_count });
    }
    Ok(())
}
