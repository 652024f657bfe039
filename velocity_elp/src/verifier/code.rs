use crate::error::Error;
use crate::instruction::Instruction;
use crate::verifier::error::{Result, VerifyError};
use std::io::Cursor;

/// Verify a method's code array.
///
/// Decodes every instruction in sequence and checks that constant-pool-indexed operands are below
/// `cp_count`, match operands are below `match_count`, and every branch displacement lands on the
/// start of an instruction inside the code array.
pub(crate) fn verify(code: &[u8], cp_count: u16, match_count: u16) -> Result<()> {
    let code_count =
        u32::try_from(code.len()).map_err(|_| VerifyError::CodeTooLarge(code.len()))?;
    let mut cursor = Cursor::new(code.to_vec());
    let mut starts = Vec::new();
    let mut branches = Vec::new();

    loop {
        let offset = position(&cursor, code.len())?;
        if offset >= code_count {
            break;
        }
        starts.push(offset);

        let instruction = Instruction::from_bytes(&mut cursor).map_err(|error| match error {
            Error::InvalidOpcode(opcode) => VerifyError::InvalidOpcode { opcode, offset },
            _ => VerifyError::TruncatedInstruction { offset },
        })?;

        match instruction {
            Instruction::Const(index)
            | Instruction::LoadGlobal(index)
            | Instruction::StoreGlobal(index)
            | Instruction::GetMember(index)
            | Instruction::SetMember(index) => {
                if index >= cp_count {
                    return Err(VerifyError::InvalidConstantPoolIndex(index));
                }
            }
            Instruction::Match(index) => {
                if index >= match_count {
                    return Err(VerifyError::InvalidMatchTableIndex(index));
                }
            }
            Instruction::Jump(displacement)
            | Instruction::JumpIfTrue(displacement)
            | Instruction::JumpIfFalse(displacement) => {
                let next = i64::from(position(&cursor, code.len())?);
                branches.push((offset, next + i64::from(displacement)));
            }
            _ => {}
        }
    }

    for (offset, target) in branches {
        let aligned = u32::try_from(target)
            .is_ok_and(|target| starts.binary_search(&target).is_ok());
        if !aligned {
            return Err(VerifyError::InvalidBranchTarget { offset, target });
        }
    }
    Ok(())
}

fn position(cursor: &Cursor<Vec<u8>>, code_length: usize) -> Result<u32> {
    u32::try_from(cursor.position()).map_err(|_| VerifyError::CodeTooLarge(code_length))
}
