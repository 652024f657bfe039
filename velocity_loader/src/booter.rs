use crate::error::Error::{CorruptFile, ModuleNotFound, SymbolNotFound};
use crate::error::Result;
use crate::module_path::ModulePath;
use crate::registry::ModuleRegistry;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use velocity_elp::{Constant, Definition, ModuleFile, Sign};
use velocity_object::{
    Error as ObjectError, ExceptionEntry, FrameTemplate, Heap, MatchTable, MemoryManager, Method,
    Module, Object, ObjectKind, Reference, Slot, Type, Variable,
};

/// The loader: reads module files from the module path, gates them through the verifier, and
/// materializes verified records into live objects registered with the VM's module table.
#[derive(Debug, Default)]
pub struct Loader {
    module_path: ModulePath,
}

impl Loader {
    /// Create a loader over the given module search path.
    #[must_use]
    pub fn new(module_path: ModulePath) -> Self {
        Loader { module_path }
    }

    /// The module search path.
    #[must_use]
    pub fn module_path(&self) -> &ModulePath {
        &self.module_path
    }

    /// Load a module file: read, verify, materialize, register.
    ///
    /// The module is registered with the registry before its members are populated, so circular
    /// imports resolve through the table.
    ///
    /// # Errors
    /// Returns `CorruptFile` if parsing or verification fails, or a resolution error if a
    /// referenced symbol cannot be found.
    pub fn load_file(
        &self,
        heap: &Heap,
        registry: &ModuleRegistry,
        path: &Path,
    ) -> Result<Reference> {
        let display_path = path.display().to_string();
        let bytes = std::fs::read(path)?;
        let mut cursor = Cursor::new(bytes);
        let module_file = ModuleFile::from_bytes(&mut cursor).map_err(|source| CorruptFile {
            path: display_path.clone(),
            source,
        })?;
        module_file.verify().map_err(|source| CorruptFile {
            path: display_path.clone(),
            source,
        })?;

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| display_path.clone());
        self.boot(heap, registry, &name, path, &module_file)
    }

    /// Load a module by name: return the registered module if present, otherwise search the
    /// module path and load the file found there.
    ///
    /// # Errors
    /// Returns `ModuleNotFound` if no directory on the module path holds the module.
    pub fn load_module(
        &self,
        heap: &Heap,
        registry: &ModuleRegistry,
        name: &str,
    ) -> Result<Reference> {
        if let Some(module) = registry.get(name) {
            return Ok(module);
        }
        let path = self
            .module_path
            .find_module(name)
            .ok_or_else(|| ModuleNotFound(name.to_string()))?;
        self.load_file(heap, registry, &path)
    }

    /// Materialize a verified module file into a live module object.
    ///
    /// # Errors
    /// Returns `CorruptFile` if a record refers to a malformed signature, or a resolution error
    /// if a referenced symbol cannot be found.
    pub fn boot(
        &self,
        heap: &Heap,
        registry: &ModuleRegistry,
        name: &str,
        path: &Path,
        module_file: &ModuleFile,
    ) -> Result<Reference> {
        debug!("loading module '{name}' from {}", path.display());
        let module = heap.allocate(Object::new(ObjectKind::Module(Module::new(
            name,
            path.to_path_buf(),
        ))))?;
        registry.insert(name, module);

        let mut pool = Vec::with_capacity(usize::from(module_file.constant_pool.len()));
        for constant in &module_file.constant_pool {
            pool.push(materialize_constant(heap, constant)?);
        }
        let pool: Arc<[Reference]> = Arc::from(pool);
        heap.set_module_pool(module, pool.clone())?;

        let booter = Booter {
            loader: self,
            heap,
            registry,
            name: name.to_string(),
            path: path.to_path_buf(),
            module_file,
            module,
            pool,
        };
        booter.populate()?;
        debug!("loaded module '{name}'");
        Ok(module)
    }
}

fn materialize_constant(heap: &Heap, constant: &Constant) -> Result<Reference> {
    let reference = match constant {
        Constant::Null => heap.null(),
        Constant::True => heap.boolean(true),
        Constant::False => heap.boolean(false),
        Constant::Char(value) => heap.alloc_char(*value)?,
        Constant::Int(value) => heap.alloc_int(*value)?,
        Constant::Float(value) => heap.alloc_float(*value)?,
        Constant::String(value) => heap.alloc_string(value.clone())?,
        Constant::Array(items) => {
            let mut elements = Vec::with_capacity(items.len());
            for item in items {
                elements.push(materialize_constant(heap, item)?);
            }
            heap.alloc_array(elements)?
        }
    };
    Ok(reference)
}

/// One materialization pass over a single verified module file.
struct Booter<'a> {
    loader: &'a Loader,
    heap: &'a Heap,
    registry: &'a ModuleRegistry,
    name: String,
    path: PathBuf,
    module_file: &'a ModuleFile,
    module: Reference,
    pool: Arc<[Reference]>,
}

impl<'a> Booter<'a> {
    fn populate(&self) -> Result<()> {
        // Classes are shelled before anything resolves so that methods and supers can refer to
        // types declared later in the same module.
        let mut classes = Vec::new();
        for definition in &self.module_file.objects {
            if let Definition::Class(class) = definition {
                self.class_shell(class, self.module, &mut classes)?;
            }
        }
        for (reference, class) in &classes {
            self.populate_class(*reference, class)?;
        }

        for definition in &self.module_file.objects {
            if let Definition::Method(record) = definition {
                let method = self.materialize_method(record)?;
                let sign = self.parse_sign(record.this_method)?;
                self.heap
                    .declare_member(self.module, sign.name(), Slot::constant(method))?;
            }
        }

        for global in &self.module_file.globals {
            let sign = self.parse_sign(global.this_global)?;
            let slot = if global.flags.is_mutable() {
                Slot::variable(self.heap.null())
            } else {
                Slot::constant(self.heap.null())
            };
            self.heap.declare_member(self.module, sign.name(), slot)?;
        }
        Ok(())
    }

    /// Create the type object for a class and its nested classes, declaring each as a member of
    /// its enclosing scope, without resolving anything.
    fn class_shell(
        &self,
        class: &'a velocity_elp::Class,
        owner: Reference,
        out: &mut Vec<(Reference, &'a velocity_elp::Class)>,
    ) -> Result<Reference> {
        let sign = self.parse_sign(class.this_class)?;
        let reference = self.heap.allocate(
            Object::new(ObjectKind::Type(Type::new(sign.clone(), class.kind.into())))
                .with_module(self.module),
        )?;
        for type_param in sign.type_params() {
            let slot = self.heap.allocate(Object::new(ObjectKind::TypeParam {
                name: type_param.clone(),
                value: None,
            }))?;
            self.heap.add_type_param(reference, type_param, slot)?;
        }
        self.heap
            .declare_member(owner, sign.name(), Slot::constant(reference))?;
        out.push((reference, class));

        for definition in &class.objects {
            if let Definition::Class(nested) = definition {
                self.class_shell(nested, reference, out)?;
            }
        }
        Ok(reference)
    }

    fn populate_class(&self, reference: Reference, class: &velocity_elp::Class) -> Result<()> {
        match self.constant(class.supers)? {
            Constant::Null => {}
            Constant::Array(items) => {
                for item in items {
                    let Constant::String(super_sign) = item else {
                        return Err(self.corrupt(velocity_elp::Error::InvalidConstantPoolType(
                            class.supers,
                        )));
                    };
                    let super_type = self.resolve_type(super_sign)?;
                    self.heap.add_super(reference, super_sign, super_type)?;
                }
            }
            _ => {
                return Err(self.corrupt(velocity_elp::Error::InvalidConstantPoolType(
                    class.supers,
                )));
            }
        }

        for field in &class.fields {
            let sign = self.parse_sign(field.this_field)?;
            let slot = if field.flags.is_mutable() {
                Slot::variable(self.heap.null())
            } else {
                Slot::constant(self.heap.null())
            };
            self.heap.declare_member(reference, sign.name(), slot)?;
        }

        for record in &class.methods {
            let method = self.materialize_method(record)?;
            let sign = self.parse_sign(record.this_method)?;
            self.heap
                .declare_member(reference, sign.name(), Slot::constant(method))?;
        }

        for definition in &class.objects {
            if let Definition::Method(record) = definition {
                let method = self.materialize_method(record)?;
                let sign = self.parse_sign(record.this_method)?;
                self.heap
                    .declare_member(reference, sign.name(), Slot::constant(method))?;
            }
        }
        Ok(())
    }

    fn materialize_method(&self, record: &velocity_elp::Method) -> Result<Reference> {
        let sign = self.parse_sign(record.this_method)?;

        let mut args = Vec::with_capacity(record.args.len());
        for arg in &record.args {
            let arg_sign = self.parse_sign(arg.this_variable)?;
            let class = self.resolve_type_lenient(arg.type_index);
            args.push(Variable::new(arg_sign.name(), class));
        }

        let mut locals = Vec::with_capacity(record.locals.len());
        for local in &record.locals {
            let local_sign = self.parse_sign(local.this_variable)?;
            let class = self.resolve_type_lenient(local.type_index);
            locals.push(Variable::new(local_sign.name(), class));
        }

        // Handler matching needs the caught type object, so exception entries resolve strictly.
        let mut exception_table = Vec::with_capacity(record.exception_table.len());
        for handler in &record.exception_table {
            let caught = self.resolve_type(self.string(handler.exception)?)?;
            exception_table.push(ExceptionEntry {
                start_pc: handler.start_pc,
                end_pc: handler.end_pc,
                handler_pc: handler.handler_pc,
                class: caught,
            });
        }

        let mut match_tables = Vec::with_capacity(record.match_tables.len());
        for table in &record.match_tables {
            let cases = table
                .cases
                .iter()
                .map(|case| (self.pool[usize::from(case.value)], case.location))
                .collect();
            match_tables.push(MatchTable {
                cases,
                default_location: table.default_location,
            });
        }

        // Closure cells are allocated once per method and shared by every activation and by the
        // method's lambdas.
        let closure_count = record
            .locals
            .len()
            .saturating_sub(usize::from(record.closure_start));
        let mut closures = Vec::with_capacity(closure_count);
        for _ in 0..closure_count {
            closures.push(self.heap.alloc_cell(self.heap.null())?);
        }

        let template = FrameTemplate::new(
            Arc::from(record.code.clone()),
            usize::try_from(record.max_stack).unwrap_or(usize::MAX),
            args,
            locals,
            usize::from(record.closure_start),
            closures,
            Arc::from(exception_table),
            Arc::from(match_tables),
            Arc::from(record.line_numbers.clone()),
            self.pool.clone(),
        );
        let method = Method::new(sign, record.kind, template);
        let reference = self
            .heap
            .allocate(Object::new(ObjectKind::Method(method)).with_module(self.module))?;

        for type_param in &record.type_params {
            let name = self.string(*type_param)?;
            let slot = self.heap.allocate(Object::new(ObjectKind::TypeParam {
                name: name.to_string(),
                value: None,
            }))?;
            self.heap.add_method_type_param(reference, name, slot)?;
        }

        for lambda in &record.lambdas {
            let lambda_reference = self.materialize_method(lambda)?;
            self.heap.add_lambda(reference, lambda_reference)?;
        }
        Ok(reference)
    }

    /// Resolve a type sign: within this module when the sign carries no module path, otherwise
    /// through the registry, loading the named module from the module path if necessary.
    fn resolve_type(&self, text: &str) -> Result<Reference> {
        let sign = Sign::parse(text).map_err(|source| self.corrupt(source))?;
        let module = if sign.module().is_empty() || sign.module_name() == self.name {
            self.module
        } else {
            self.loader
                .load_module(self.heap, self.registry, &sign.module_name())?
        };

        let mut current = module;
        for segment in sign.path() {
            current = match self.heap.get_member(current, segment) {
                Ok(reference) => reference,
                Err(ObjectError::MemberNotFound(_)) => {
                    return Err(SymbolNotFound(sign.to_string()));
                }
                Err(error) => return Err(error.into()),
            };
        }
        Ok(current)
    }

    /// Declared types of args and locals resolve lazily: a miss leaves the variable untyped
    /// rather than failing the load.
    fn resolve_type_lenient(&self, type_index: u16) -> Option<Reference> {
        let text = self.string(type_index).ok()?;
        self.resolve_type(text).ok()
    }

    fn constant(&self, index: u16) -> Result<&Constant> {
        self.module_file
            .constant_pool
            .try_get(index)
            .map_err(|source| self.corrupt(source))
    }

    fn string(&self, index: u16) -> Result<&String> {
        self.module_file
            .constant_pool
            .try_get_string(index)
            .map_err(|source| self.corrupt(source))
    }

    fn parse_sign(&self, index: u16) -> Result<Sign> {
        let text = self.string(index)?;
        Sign::parse(text).map_err(|source| self.corrupt(source))
    }

    fn corrupt(&self, source: velocity_elp::Error) -> crate::error::Error {
        CorruptFile {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use velocity_elp::{
        Class, ClassKind, FileKind, Global, Instruction, Method as MethodRecord, MethodKind,
        Mutability, Variable as VariableRecord,
    };
    use velocity_object::{HeapConfig, ObjectTag};

    fn heap() -> Heap {
        Heap::new(HeapConfig::default())
    }

    fn write_module(directory: &Path, name: &str, module_file: &ModuleFile) -> PathBuf {
        let mut bytes = Vec::new();
        module_file.to_bytes(&mut bytes).expect("serialize");
        let path = directory.join(format!("{name}.elp"));
        std::fs::write(&path, bytes).expect("write module");
        path
    }

    fn hello_module() -> ModuleFile {
        let mut module_file = ModuleFile::new(FileKind::Executable);
        let pool = &mut module_file.constant_pool;
        let main_sign = pool.add_string("hello::main(basic.array)").expect("pool");
        let arg_sign = pool.add_string("hello::main.args").expect("pool");
        let arg_type = pool.add_string("basic.array").expect("pool");
        let code =
            Instruction::assemble(&[Instruction::ReturnNull]).expect("assemble");
        module_file.objects.push(Definition::Method(MethodRecord {
            kind: MethodKind::Function,
            this_method: main_sign,
            args: vec![VariableRecord {
                this_variable: arg_sign,
                type_index: arg_type,
            }],
            max_stack: 1,
            code,
            ..Default::default()
        }));
        module_file
    }

    #[test]
    fn test_load_file() -> Result<()> {
        let directory = tempfile::tempdir().expect("tempdir");
        let path = write_module(directory.path(), "hello", &hello_module());

        let heap = heap();
        let registry = ModuleRegistry::new();
        let loader = Loader::default();
        let module = loader.load_file(&heap, &registry, &path)?;

        assert_eq!(Some(module), registry.get("hello"));
        assert_eq!("hello", heap.module_name(module)?);
        assert_eq!(3, heap.module_pool(module)?.len());

        let main = heap.get_member(module, "main")?;
        assert_eq!(ObjectTag::Method, heap.tag(main)?);
        let method = heap.method(main)?;
        assert_eq!(1, method.template().args().len());
        assert_eq!("args", method.template().args()[0].name());
        Ok(())
    }

    #[test]
    fn test_load_module_by_name() -> Result<()> {
        let directory = tempfile::tempdir().expect("tempdir");
        write_module(directory.path(), "hello", &hello_module());

        let heap = heap();
        let registry = ModuleRegistry::new();
        let loader = Loader::new(ModulePath::new(vec![directory.path().to_path_buf()]));
        let module = loader.load_module(&heap, &registry, "hello")?;
        assert_eq!(Some(module), registry.get("hello"));

        // A second load returns the registered module
        assert_eq!(module, loader.load_module(&heap, &registry, "hello")?);
        Ok(())
    }

    #[test]
    fn test_module_not_found() {
        let heap = heap();
        let registry = ModuleRegistry::new();
        let loader = Loader::default();
        assert_eq!(
            Err(ModuleNotFound("missing".to_string())),
            loader.load_module(&heap, &registry, "missing")
        );
    }

    #[test]
    fn test_corrupt_magic() {
        let directory = tempfile::tempdir().expect("tempdir");
        let mut module_file = ModuleFile::new(FileKind::Executable);
        module_file.magic = 0x0000_0000;
        let path = write_module(directory.path(), "broken", &module_file);

        let heap = heap();
        let registry = ModuleRegistry::new();
        let loader = Loader::default();
        let error = loader
            .load_file(&heap, &registry, &path)
            .expect_err("expected corrupt file");
        assert!(matches!(error, CorruptFile { .. }));
    }

    #[test]
    fn test_classes_with_supers_and_fields() -> Result<()> {
        let mut module_file = ModuleFile::new(FileKind::Library);
        let pool = &mut module_file.constant_pool;
        let base_sign = pool.add_string("shapes::Shape").expect("pool");
        let no_supers = pool.add(Constant::Null).expect("pool");
        let derived_sign = pool.add_string("shapes::Circle").expect("pool");
        let derived_supers = pool
            .add(Constant::Array(vec![Constant::String(
                "shapes::Shape".to_string(),
            )]))
            .expect("pool");
        let field_sign = pool.add_string("shapes::Circle.radius").expect("pool");
        let field_type = pool.add_string("basic.float").expect("pool");

        module_file.objects.push(Definition::Class(Class {
            kind: ClassKind::Class,
            this_class: base_sign,
            supers: no_supers,
            ..Default::default()
        }));
        module_file.objects.push(Definition::Class(Class {
            kind: ClassKind::Class,
            this_class: derived_sign,
            supers: derived_supers,
            fields: vec![velocity_elp::Field {
                flags: Mutability::Variable,
                this_field: field_sign,
                type_index: field_type,
            }],
            ..Default::default()
        }));

        let directory = tempfile::tempdir().expect("tempdir");
        let path = write_module(directory.path(), "shapes", &module_file);

        let heap = heap();
        let registry = ModuleRegistry::new();
        let loader = Loader::default();
        let module = loader.load_file(&heap, &registry, &path)?;

        let base = heap.get_member(module, "Shape")?;
        let derived = heap.get_member(module, "Circle")?;
        assert!(heap.is_subtype(derived, base)?);

        let instance = heap.instantiate(derived)?;
        assert_eq!(heap.null(), heap.get_member(instance, "radius")?);
        Ok(())
    }

    #[test]
    fn test_forward_reference_to_class() -> Result<()> {
        // A method materialized before the class it names in its exception table
        let mut module_file = ModuleFile::new(FileKind::Library);
        let pool = &mut module_file.constant_pool;
        let method_sign = pool.add_string("app::run()").expect("pool");
        let error_sign = pool.add_string("app::Error").expect("pool");
        let no_supers = pool.add(Constant::Null).expect("pool");

        let code = Instruction::assemble(&[Instruction::ReturnNull]).expect("assemble");
        module_file.objects.push(Definition::Method(MethodRecord {
            kind: MethodKind::Function,
            this_method: method_sign,
            exception_table: vec![velocity_elp::ExceptionHandler {
                start_pc: 0,
                end_pc: 0,
                handler_pc: 0,
                exception: error_sign,
            }],
            code,
            ..Default::default()
        }));
        module_file.objects.push(Definition::Class(Class {
            kind: ClassKind::Class,
            this_class: error_sign,
            supers: no_supers,
            ..Default::default()
        }));

        let directory = tempfile::tempdir().expect("tempdir");
        let path = write_module(directory.path(), "app", &module_file);

        let heap = heap();
        let registry = ModuleRegistry::new();
        let loader = Loader::default();
        let module = loader.load_file(&heap, &registry, &path)?;

        let run = heap.get_member(module, "run")?;
        let error_class = heap.get_member(module, "Error")?;
        let template = heap.method_template(run)?;
        assert_eq!(error_class, template.exception_table()[0].class);
        Ok(())
    }

    #[test]
    fn test_cross_module_super() -> Result<()> {
        let mut base_file = ModuleFile::new(FileKind::Library);
        let pool = &mut base_file.constant_pool;
        let base_sign = pool.add_string("base::Object").expect("pool");
        let no_supers = pool.add(Constant::Null).expect("pool");
        base_file.objects.push(Definition::Class(Class {
            kind: ClassKind::Class,
            this_class: base_sign,
            supers: no_supers,
            ..Default::default()
        }));

        let mut app_file = ModuleFile::new(FileKind::Library);
        let pool = &mut app_file.constant_pool;
        let app_sign = pool.add_string("app::Widget").expect("pool");
        let app_supers = pool
            .add(Constant::Array(vec![Constant::String(
                "base::Object".to_string(),
            )]))
            .expect("pool");
        app_file.objects.push(Definition::Class(Class {
            kind: ClassKind::Class,
            this_class: app_sign,
            supers: app_supers,
            ..Default::default()
        }));

        let directory = tempfile::tempdir().expect("tempdir");
        write_module(directory.path(), "base", &base_file);
        let app_path = write_module(directory.path(), "app", &app_file);

        let heap = heap();
        let registry = ModuleRegistry::new();
        let loader = Loader::new(ModulePath::new(vec![directory.path().to_path_buf()]));
        let app = loader.load_file(&heap, &registry, &app_path)?;

        assert!(registry.contains("base"));
        let base = registry.get("base").expect("base module");
        let widget = heap.get_member(app, "Widget")?;
        let object = heap.get_member(base, "Object")?;
        assert!(heap.is_subtype(widget, object)?);
        Ok(())
    }

    #[test]
    fn test_globals_declared() -> Result<()> {
        let mut module_file = ModuleFile::new(FileKind::Library);
        let pool = &mut module_file.constant_pool;
        let global_sign = pool.add_string("config::limit").expect("pool");
        let global_type = pool.add_string("basic.int").expect("pool");
        module_file.globals.push(Global {
            flags: Mutability::Variable,
            this_global: global_sign,
            type_index: global_type,
        });

        let directory = tempfile::tempdir().expect("tempdir");
        let path = write_module(directory.path(), "config", &module_file);

        let heap = heap();
        let registry = ModuleRegistry::new();
        let loader = Loader::default();
        let module = loader.load_file(&heap, &registry, &path)?;
        assert_eq!(heap.null(), heap.get_member(module, "limit")?);
        Ok(())
    }

    #[test]
    fn test_lambdas_materialized() -> Result<()> {
        let mut module_file = ModuleFile::new(FileKind::Library);
        let pool = &mut module_file.constant_pool;
        let outer_sign = pool.add_string("fun::outer()").expect("pool");
        let lambda_sign = pool.add_string("fun::outer.<lambda0>()").expect("pool");

        let lambda_code = Instruction::assemble(&[Instruction::ReturnNull]).expect("assemble");
        let outer_code = Instruction::assemble(&[Instruction::ReturnNull]).expect("assemble");
        module_file.objects.push(Definition::Method(MethodRecord {
            kind: MethodKind::Function,
            this_method: outer_sign,
            code: outer_code,
            lambdas: vec![MethodRecord {
                kind: MethodKind::Function,
                this_method: lambda_sign,
                code: lambda_code,
                ..Default::default()
            }],
            ..Default::default()
        }));

        let directory = tempfile::tempdir().expect("tempdir");
        let path = write_module(directory.path(), "fun", &module_file);

        let heap = heap();
        let registry = ModuleRegistry::new();
        let loader = Loader::default();
        let module = loader.load_file(&heap, &registry, &path)?;
        let outer = heap.get_member(module, "outer")?;
        let method = heap.method(outer)?;
        assert_eq!(1, method.lambdas().len());
        assert_eq!(
            "<lambda0>",
            heap.method(method.lambdas()[0])?.sign().name()
        );
        Ok(())
    }
}
