use crate::reference::Reference;
use indexmap::IndexMap;
use std::sync::Arc;
use velocity_elp::{LineNumber, MethodKind, Sign};

/// A named variable of a frame template: an argument or a local, with its declared type when the
/// loader could resolve one.
#[derive(Clone, Debug)]
pub struct Variable {
    name: String,
    class: Option<Reference>,
}

impl Variable {
    /// Create a new variable.
    #[must_use]
    pub fn new<S: Into<String>>(name: S, class: Option<Reference>) -> Self {
        Variable {
            name: name.into(),
            class,
        }
    }

    /// The variable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared type, if resolved.
    #[must_use]
    pub fn class(&self) -> Option<Reference> {
        self.class
    }
}

/// A resolved exception table entry: the code range it covers, the handler offset, and the
/// caught type object.
#[derive(Clone, Copy, Debug)]
pub struct ExceptionEntry {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
    pub class: Reference,
}

/// A resolved match table: case keys are references into the module's runtime constant pool.
#[derive(Clone, Debug)]
pub struct MatchTable {
    pub cases: Vec<(Reference, u32)>,
    pub default_location: u32,
}

/// The static, shared description of a method's activation shape.
///
/// A frame template is instantiated into a fresh frame on every invocation: the code and tables
/// are shared, while operand stack, argument and local slots are per-activation. Locals at or
/// above `closure_start` are closure cells allocated per activation and shared with lambdas.
#[derive(Clone, Debug)]
pub struct FrameTemplate {
    code: Arc<[u8]>,
    max_stack: usize,
    args: Vec<Variable>,
    locals: Vec<Variable>,
    closure_start: usize,
    closures: Vec<Reference>,
    exception_table: Arc<[ExceptionEntry]>,
    match_tables: Arc<[MatchTable]>,
    line_numbers: Arc<[LineNumber]>,
    constant_pool: Arc<[Reference]>,
}

impl FrameTemplate {
    /// Create a new frame template.
    ///
    /// `closures` holds one cell object per local index at or above `closure_start`; the cells
    /// are shared by every activation of the method and by its lambdas.
    #[must_use]
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        code: Arc<[u8]>,
        max_stack: usize,
        args: Vec<Variable>,
        locals: Vec<Variable>,
        closure_start: usize,
        closures: Vec<Reference>,
        exception_table: Arc<[ExceptionEntry]>,
        match_tables: Arc<[MatchTable]>,
        line_numbers: Arc<[LineNumber]>,
        constant_pool: Arc<[Reference]>,
    ) -> Self {
        FrameTemplate {
            code,
            max_stack,
            args,
            locals,
            closure_start,
            closures,
            exception_table,
            match_tables,
            line_numbers,
            constant_pool,
        }
    }

    /// The method's bytecode.
    #[must_use]
    pub fn code(&self) -> &Arc<[u8]> {
        &self.code
    }

    /// The operand stack bound declared by the compiler.
    #[must_use]
    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    /// The formal arguments.
    #[must_use]
    pub fn args(&self) -> &[Variable] {
        &self.args
    }

    /// The locals, including closure cell positions.
    #[must_use]
    pub fn locals(&self) -> &[Variable] {
        &self.locals
    }

    /// The index of the first closure cell local.
    #[must_use]
    pub fn closure_start(&self) -> usize {
        self.closure_start
    }

    /// The closure cells shared by every activation of the method.
    #[must_use]
    pub fn closures(&self) -> &[Reference] {
        &self.closures
    }

    /// The exception table.
    #[must_use]
    pub fn exception_table(&self) -> &Arc<[ExceptionEntry]> {
        &self.exception_table
    }

    /// The match tables.
    #[must_use]
    pub fn match_tables(&self) -> &Arc<[MatchTable]> {
        &self.match_tables
    }

    /// The line info table.
    #[must_use]
    pub fn line_numbers(&self) -> &Arc<[LineNumber]> {
        &self.line_numbers
    }

    /// The module-scoped runtime constant pool.
    #[must_use]
    pub fn constant_pool(&self) -> &Arc<[Reference]> {
        &self.constant_pool
    }

    /// The source line covering the given code offset, derived from the line info table.
    #[must_use]
    pub fn line_for_offset(&self, offset: u32) -> Option<u32> {
        let mut covered: u64 = 0;
        for line_number in self.line_numbers.iter() {
            covered += u64::from(line_number.times);
            if u64::from(offset) < covered {
                return Some(line_number.line);
            }
        }
        None
    }
}

/// The runtime data of a Spade method.
#[derive(Clone, Debug)]
pub struct Method {
    sign: Sign,
    kind: MethodKind,
    type_params: IndexMap<String, Reference>,
    lambdas: Vec<Reference>,
    template: FrameTemplate,
}

impl Method {
    /// Create a new method.
    #[must_use]
    pub fn new(sign: Sign, kind: MethodKind, template: FrameTemplate) -> Self {
        Method {
            sign,
            kind,
            type_params: IndexMap::new(),
            lambdas: Vec::new(),
            template,
        }
    }

    /// The method's signature.
    #[must_use]
    pub fn sign(&self) -> &Sign {
        &self.sign
    }

    /// The kind of the method.
    #[must_use]
    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    /// The type parameter table.
    #[must_use]
    pub fn type_params(&self) -> &IndexMap<String, Reference> {
        &self.type_params
    }

    pub(crate) fn type_params_mut(&mut self) -> &mut IndexMap<String, Reference> {
        &mut self.type_params
    }

    /// The lambdas nested in this method.
    #[must_use]
    pub fn lambdas(&self) -> &[Reference] {
        &self.lambdas
    }

    pub(crate) fn lambdas_mut(&mut self) -> &mut Vec<Reference> {
        &mut self.lambdas
    }

    /// The shared frame template.
    #[must_use]
    pub fn template(&self) -> &FrameTemplate {
        &self.template
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn empty_template() -> FrameTemplate {
        FrameTemplate::new(
            Arc::from(vec![0x22]),
            0,
            Vec::new(),
            Vec::new(),
            0,
            Vec::new(),
            Arc::from(Vec::new()),
            Arc::from(Vec::new()),
            Arc::from(Vec::new()),
            Arc::from(Vec::new()),
        )
    }

    #[test]
    fn test_method_new() -> velocity_elp::Result<()> {
        let sign = Sign::parse("test::f()")?;
        let method = Method::new(sign.clone(), MethodKind::Function, empty_template());
        assert_eq!(&sign, method.sign());
        assert_eq!(MethodKind::Function, method.kind());
        assert!(method.type_params().is_empty());
        assert!(method.lambdas().is_empty());
        assert_eq!(&[0x22_u8], method.template().code().as_ref());
        Ok(())
    }

    #[test]
    fn test_line_for_offset() {
        let template = FrameTemplate::new(
            Arc::from(vec![0x00, 0x00, 0x00, 0x22]),
            0,
            Vec::new(),
            Vec::new(),
            0,
            Vec::new(),
            Arc::from(Vec::new()),
            Arc::from(Vec::new()),
            Arc::from(vec![
                LineNumber { times: 2, line: 10 },
                LineNumber { times: 2, line: 11 },
            ]),
            Arc::from(Vec::new()),
        );
        assert_eq!(Some(10), template.line_for_offset(0));
        assert_eq!(Some(10), template.line_for_offset(1));
        assert_eq!(Some(11), template.line_for_offset(2));
        assert_eq!(None, template.line_for_offset(9));
    }
}
