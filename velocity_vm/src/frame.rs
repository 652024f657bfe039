use crate::Error::{
    ArgumentError, InvalidArgumentIndex, InvalidConstantIndex, InvalidLocalVariableIndex,
    InvalidMatchTableIndex, InvalidProgramCounter, OperandStackOverflow, OperandStackUnderflow,
};
use crate::Result;
use std::sync::Arc;
use velocity_object::{ExceptionEntry, FrameTemplate, Heap, MatchTable, Reference};

/// A per-invocation activation record.
///
/// A frame is instantiated from a method's [`FrameTemplate`]: the code, exception table, match
/// tables and constant pool are shared views; the operand stack, arguments and plain local slots
/// are per-activation. Locals at or above the closure start hold the template's shared closure
/// cells. The operand stack is bounded by the `max_stack` the compiler declared; violating the
/// bound in either direction is a fatal error, not a recoverable condition.
#[derive(Debug)]
pub struct Frame {
    method: Reference,
    code: Arc<[u8]>,
    ip: usize,
    stack: Vec<Reference>,
    max_stack: usize,
    args: Vec<Reference>,
    locals: Vec<Reference>,
    closure_start: usize,
    exception_table: Arc<[ExceptionEntry]>,
    match_tables: Arc<[MatchTable]>,
    constant_pool: Arc<[Reference]>,
}

impl Frame {
    /// Instantiate a frame from a method's template.
    ///
    /// Plain locals start as `null`; closure positions receive the template's shared cells.
    ///
    /// # Errors
    /// Returns `ArgumentError` if the argument count does not match the template.
    pub fn new(
        heap: &Heap,
        method: Reference,
        template: &FrameTemplate,
        args: Vec<Reference>,
    ) -> Result<Frame> {
        if args.len() != template.args().len() {
            let sign = heap.callable_sign(method)?;
            return Err(ArgumentError {
                context: sign.to_string(),
                message: format!(
                    "expected {} arguments, got {}",
                    template.args().len(),
                    args.len()
                ),
            });
        }

        let closure_start = template.closure_start();
        let mut locals = Vec::with_capacity(template.locals().len());
        for index in 0..template.locals().len() {
            if index < closure_start {
                locals.push(heap.null());
            } else {
                locals.push(template.closures()[index - closure_start]);
            }
        }

        Ok(Frame {
            method,
            code: template.code().clone(),
            ip: 0,
            stack: Vec::with_capacity(template.max_stack()),
            max_stack: template.max_stack(),
            args,
            locals,
            closure_start,
            exception_table: template.exception_table().clone(),
            match_tables: template.match_tables().clone(),
            constant_pool: template.constant_pool().clone(),
        })
    }

    /// The method this frame activates.
    #[must_use]
    pub fn method(&self) -> Reference {
        self.method
    }

    /// Push a value onto the operand stack.
    ///
    /// # Errors
    /// Returns `OperandStackOverflow` past the declared bound.
    pub fn push(&mut self, value: Reference) -> Result<()> {
        if self.stack.len() >= self.max_stack {
            return Err(OperandStackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pop the top of the operand stack.
    ///
    /// # Errors
    /// Returns `OperandStackUnderflow` on an empty stack.
    pub fn pop(&mut self) -> Result<Reference> {
        self.stack.pop().ok_or(OperandStackUnderflow)
    }

    /// The value on top of the operand stack.
    ///
    /// # Errors
    /// Returns `OperandStackUnderflow` on an empty stack.
    pub fn peek(&self) -> Result<Reference> {
        self.stack.last().copied().ok_or(OperandStackUnderflow)
    }

    /// Discard the operand stack, leaving the frame ready for a handler.
    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    /// Advance `ip` by one byte and return the byte read.
    ///
    /// # Errors
    /// Returns `InvalidProgramCounter` past the end of the code.
    pub fn read_byte(&mut self) -> Result<u8> {
        let byte = *self.code.get(self.ip).ok_or(InvalidProgramCounter(self.ip))?;
        self.ip += 1;
        Ok(byte)
    }

    /// Advance `ip` by two bytes and return them in big-endian order.
    ///
    /// # Errors
    /// Returns `InvalidProgramCounter` past the end of the code.
    pub fn read_short(&mut self) -> Result<u16> {
        let high = self.read_byte()?;
        let low = self.read_byte()?;
        Ok(u16::from_be_bytes([high, low]))
    }

    /// Adjust `ip` by a signed branch displacement.
    ///
    /// # Errors
    /// Returns `InvalidProgramCounter` if the target lies outside the code.
    pub fn adjust(&mut self, offset: i32) -> Result<()> {
        let target = i64::try_from(self.ip)
            .map_err(|_| InvalidProgramCounter(self.ip))?
            + i64::from(offset);
        let target = usize::try_from(target).map_err(|_| InvalidProgramCounter(self.ip))?;
        if target >= self.code.len() {
            return Err(InvalidProgramCounter(target));
        }
        self.ip = target;
        Ok(())
    }

    /// The program counter: the offset of `ip` from the code base.
    #[must_use]
    pub fn pc(&self) -> usize {
        self.ip
    }

    /// Reset `ip` to the given code offset.
    ///
    /// # Errors
    /// Returns `InvalidProgramCounter` if the offset lies outside the code.
    pub fn set_pc(&mut self, pc: usize) -> Result<()> {
        if pc >= self.code.len() {
            return Err(InvalidProgramCounter(pc));
        }
        self.ip = pc;
        Ok(())
    }

    /// An argument value.
    ///
    /// # Errors
    /// Returns `InvalidArgumentIndex` out of range.
    pub fn arg(&self, index: usize) -> Result<Reference> {
        self.args
            .get(index)
            .copied()
            .ok_or(InvalidArgumentIndex(index))
    }

    /// Replace an argument value.
    ///
    /// # Errors
    /// Returns `InvalidArgumentIndex` out of range.
    pub fn set_arg(&mut self, index: usize, value: Reference) -> Result<()> {
        let slot = self
            .args
            .get_mut(index)
            .ok_or(InvalidArgumentIndex(index))?;
        *slot = value;
        Ok(())
    }

    /// A raw local slot: the plain value below the closure start, the cell object above it.
    ///
    /// # Errors
    /// Returns `InvalidLocalVariableIndex` out of range.
    pub fn local(&self, index: usize) -> Result<Reference> {
        self.locals
            .get(index)
            .copied()
            .ok_or(InvalidLocalVariableIndex(index))
    }

    /// Replace a raw local slot.
    ///
    /// # Errors
    /// Returns `InvalidLocalVariableIndex` out of range.
    pub fn set_local(&mut self, index: usize, value: Reference) -> Result<()> {
        let slot = self
            .locals
            .get_mut(index)
            .ok_or(InvalidLocalVariableIndex(index))?;
        *slot = value;
        Ok(())
    }

    /// The index of the first closure cell local.
    #[must_use]
    pub fn closure_start(&self) -> usize {
        self.closure_start
    }

    /// A constant pool entry.
    ///
    /// # Errors
    /// Returns `InvalidConstantIndex` out of range.
    pub fn constant(&self, index: u16) -> Result<Reference> {
        self.constant_pool
            .get(usize::from(index))
            .copied()
            .ok_or(InvalidConstantIndex(index))
    }

    /// A match table of the active method.
    ///
    /// # Errors
    /// Returns `InvalidMatchTableIndex` out of range.
    pub fn match_table(&self, index: u16) -> Result<&MatchTable> {
        self.match_tables
            .get(usize::from(index))
            .ok_or(InvalidMatchTableIndex(index))
    }

    /// Find the innermost exception handler covering `pc` whose declared type is a super of the
    /// thrown value's type.
    ///
    /// # Errors
    /// Returns an error if the heap rejects a dereference.
    pub fn handler_for(
        &self,
        heap: &Heap,
        pc: u32,
        thrown_class: Option<Reference>,
    ) -> Result<Option<u32>> {
        let Some(thrown_class) = thrown_class else {
            return Ok(None);
        };
        for entry in self.exception_table.iter() {
            if entry.start_pc <= pc
                && pc <= entry.end_pc
                && heap.is_subtype(thrown_class, entry.class)?
            {
                return Ok(Some(entry.handler_pc));
            }
        }
        Ok(None)
    }

    /// Append every object this frame keeps alive: constant pool entries, operand stack slots,
    /// arguments, locals (plain values and closure cells), exception-entry types, match-case
    /// keys, and the method itself.
    pub fn roots(&self, roots: &mut Vec<Reference>) {
        roots.extend(self.constant_pool.iter().copied());
        roots.extend(self.stack.iter().copied());
        roots.extend(self.args.iter().copied());
        roots.extend(self.locals.iter().copied());
        roots.extend(self.exception_table.iter().map(|entry| entry.class));
        for table in self.match_tables.iter() {
            roots.extend(table.cases.iter().map(|(key, _)| *key));
        }
        roots.push(self.method);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use velocity_elp::{MethodKind, Sign};
    use velocity_object::{HeapConfig, MemoryManager, Method, Object, ObjectKind};

    fn heap() -> Heap {
        Heap::new(HeapConfig::default())
    }

    fn template(heap: &Heap, max_stack: usize, locals: usize, closure_start: usize) -> Result<FrameTemplate> {
        let mut closures = Vec::new();
        for _ in closure_start..locals {
            closures.push(heap.alloc_cell(heap.null())?);
        }
        let local_variables = (0..locals)
            .map(|index| velocity_object::Variable::new(format!("l{index}"), None))
            .collect();
        Ok(FrameTemplate::new(
            Arc::from(vec![0x00, 0x22]),
            max_stack,
            Vec::new(),
            local_variables,
            closure_start,
            closures,
            Arc::from(Vec::new()),
            Arc::from(Vec::new()),
            Arc::from(Vec::new()),
            Arc::from(Vec::new()),
        ))
    }

    fn method_object(heap: &Heap, template: &FrameTemplate) -> Result<Reference> {
        let sign = Sign::parse("test::f()").expect("sign");
        let method = Method::new(sign, MethodKind::Function, template.clone());
        Ok(heap.allocate(Object::new(ObjectKind::Method(method)))?)
    }

    #[test]
    fn test_push_pop_round_trip() -> Result<()> {
        let heap = heap();
        let template = template(&heap, 4, 0, 0)?;
        let method = method_object(&heap, &template)?;
        let mut frame = Frame::new(&heap, method, &template, Vec::new())?;

        let value = heap.alloc_int(42)?;
        frame.push(value)?;
        assert_eq!(value, frame.peek()?);
        assert_eq!(value, frame.pop()?);
        assert_eq!(Err(OperandStackUnderflow), frame.pop());
        Ok(())
    }

    #[test]
    fn test_operand_stack_overflow() -> Result<()> {
        let heap = heap();
        let template = template(&heap, 1, 0, 0)?;
        let method = method_object(&heap, &template)?;
        let mut frame = Frame::new(&heap, method, &template, Vec::new())?;

        frame.push(heap.null())?;
        assert_eq!(Err(OperandStackOverflow), frame.push(heap.null()));
        Ok(())
    }

    #[test]
    fn test_read_byte_and_short() -> Result<()> {
        let heap = heap();
        let mut template = template(&heap, 0, 0, 0)?;
        let method = method_object(&heap, &template)?;
        template = FrameTemplate::new(
            Arc::from(vec![0x12, 0x34, 0x56]),
            0,
            Vec::new(),
            Vec::new(),
            0,
            Vec::new(),
            Arc::from(Vec::new()),
            Arc::from(Vec::new()),
            Arc::from(Vec::new()),
            Arc::from(Vec::new()),
        );
        let mut frame = Frame::new(&heap, method, &template, Vec::new())?;
        assert_eq!(0x12, frame.read_byte()?);
        assert_eq!(0x3456, frame.read_short()?);
        assert_eq!(3, frame.pc());
        assert_eq!(Err(InvalidProgramCounter(3)), frame.read_byte());
        Ok(())
    }

    #[test]
    fn test_adjust_and_pc() -> Result<()> {
        let heap = heap();
        let template = template(&heap, 0, 0, 0)?;
        let method = method_object(&heap, &template)?;
        let mut frame = Frame::new(&heap, method, &template, Vec::new())?;
        frame.read_byte()?;
        frame.adjust(-1)?;
        assert_eq!(0, frame.pc());
        frame.set_pc(1)?;
        assert_eq!(1, frame.pc());
        assert_eq!(Err(InvalidProgramCounter(9)), frame.set_pc(9));
        assert_eq!(Err(InvalidProgramCounter(5)), frame.adjust(4));
        Ok(())
    }

    #[test]
    fn test_argument_count_mismatch() -> Result<()> {
        let heap = heap();
        let template = FrameTemplate::new(
            Arc::from(vec![0x22]),
            0,
            vec![velocity_object::Variable::new("x", None)],
            Vec::new(),
            0,
            Vec::new(),
            Arc::from(Vec::new()),
            Arc::from(Vec::new()),
            Arc::from(Vec::new()),
            Arc::from(Vec::new()),
        );
        let method = method_object(&heap, &template)?;
        let error = Frame::new(&heap, method, &template, Vec::new()).expect_err("arity");
        assert!(matches!(error, ArgumentError { .. }));
        Ok(())
    }

    #[test]
    fn test_locals_and_closure_cells() -> Result<()> {
        let heap = heap();
        let template = template(&heap, 0, 2, 1)?;
        let method = method_object(&heap, &template)?;
        let frame = Frame::new(&heap, method, &template, Vec::new())?;

        assert_eq!(heap.null(), frame.local(0)?);
        let cell = frame.local(1)?;
        assert_eq!(velocity_object::ObjectTag::Cell, heap.tag(cell)?);
        assert_eq!(template.closures()[0], cell);
        assert_eq!(Err(InvalidLocalVariableIndex(2)), frame.local(2));
        Ok(())
    }

    #[test]
    fn test_roots_include_stack_and_method() -> Result<()> {
        let heap = heap();
        let template = template(&heap, 2, 1, 1)?;
        let method = method_object(&heap, &template)?;
        let mut frame = Frame::new(&heap, method, &template, Vec::new())?;
        let value = heap.alloc_int(1)?;
        frame.push(value)?;

        let mut roots = Vec::new();
        frame.roots(&mut roots);
        assert!(roots.contains(&value));
        assert!(roots.contains(&method));
        assert!(roots.contains(&template.closures()[0]));
        Ok(())
    }
}
