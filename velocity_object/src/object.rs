use crate::class::Type;
use crate::foreign::Foreign;
use crate::heap::ManagerId;
use crate::method::Method;
use crate::module::Module;
use crate::reference::Reference;
use indexmap::IndexMap;

/// Per-object metadata used by the owning manager and its collector.
///
/// `marked` is transient collector state; `life` counts the collections an object has survived
/// and is monotonically increasing. `manager` is set once at allocation and never changes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObjectInfo {
    pub manager: ManagerId,
    pub marked: bool,
    pub life: u32,
}

impl Default for ObjectInfo {
    fn default() -> Self {
        ObjectInfo {
            manager: ManagerId::UNATTACHED,
            marked: false,
            life: 0,
        }
    }
}

/// A named member slot of an object: a value and a mutability flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Slot {
    value: Reference,
    mutable: bool,
}

impl Slot {
    /// Create a reassignable slot.
    #[must_use]
    pub fn variable(value: Reference) -> Self {
        Slot {
            value,
            mutable: true,
        }
    }

    /// Create a single-assignment slot.
    #[must_use]
    pub fn constant(value: Reference) -> Self {
        Slot {
            value,
            mutable: false,
        }
    }

    /// The slot's current value.
    #[must_use]
    pub fn value(&self) -> Reference {
        self.value
    }

    /// Whether the slot may be reassigned.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub(crate) fn set_value(&mut self, value: Reference) {
        self.value = value;
    }
}

/// The closed set of object variants.
///
/// Garbage collection tracing, truthiness, display and the copy policy all dispatch on this tag;
/// the shared member-slot table and the type/module back-references live on [`Object`] itself.
#[derive(Clone, Debug)]
pub enum ObjectKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    String(String),
    Array(Vec<Reference>),
    /// A closure cell: a shared box for a local captured by a lambda.
    Cell(Reference),
    /// A type parameter slot; dereferencing an empty one is a fatal error.
    TypeParam {
        name: String,
        value: Option<Reference>,
    },
    Module(Module),
    Type(Type),
    Method(Method),
    Foreign(Foreign),
    /// A user class instance; its state lives entirely in the member slots.
    Instance,
}

/// A discriminant-only view of [`ObjectKind`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ObjectTag {
    Null,
    Bool,
    Int,
    Float,
    Char,
    String,
    Array,
    Cell,
    TypeParam,
    Module,
    Type,
    Method,
    Foreign,
    Instance,
}

impl ObjectTag {
    /// A human-readable name for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ObjectTag::Null => "null",
            ObjectTag::Bool => "bool",
            ObjectTag::Int => "int",
            ObjectTag::Float => "float",
            ObjectTag::Char => "char",
            ObjectTag::String => "string",
            ObjectTag::Array => "array",
            ObjectTag::Cell => "cell",
            ObjectTag::TypeParam => "type parameter",
            ObjectTag::Module => "module",
            ObjectTag::Type => "type",
            ObjectTag::Method => "method",
            ObjectTag::Foreign => "foreign",
            ObjectTag::Instance => "instance",
        }
    }
}

impl ObjectKind {
    /// The discriminant of this kind.
    #[must_use]
    pub fn tag(&self) -> ObjectTag {
        match self {
            ObjectKind::Null => ObjectTag::Null,
            ObjectKind::Bool(_) => ObjectTag::Bool,
            ObjectKind::Int(_) => ObjectTag::Int,
            ObjectKind::Float(_) => ObjectTag::Float,
            ObjectKind::Char(_) => ObjectTag::Char,
            ObjectKind::String(_) => ObjectTag::String,
            ObjectKind::Array(_) => ObjectTag::Array,
            ObjectKind::Cell(_) => ObjectTag::Cell,
            ObjectKind::TypeParam { .. } => ObjectTag::TypeParam,
            ObjectKind::Module(_) => ObjectTag::Module,
            ObjectKind::Type(_) => ObjectTag::Type,
            ObjectKind::Method(_) => ObjectTag::Method,
            ObjectKind::Foreign(_) => ObjectTag::Foreign,
            ObjectKind::Instance => ObjectTag::Instance,
        }
    }

    /// The natural truth value of this kind. Callables, modules, types and instances are always
    /// truthy; `Null` is always false.
    #[must_use]
    pub fn truth(&self) -> bool {
        match self {
            ObjectKind::Null => false,
            ObjectKind::Bool(value) => *value,
            ObjectKind::Int(value) => *value != 0,
            ObjectKind::Float(value) => *value != 0.0,
            ObjectKind::Char(value) => *value != '\0',
            ObjectKind::String(value) => !value.is_empty(),
            ObjectKind::Array(items) => !items.is_empty(),
            _ => true,
        }
    }

    /// Whether values of this kind can be invoked.
    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(self, ObjectKind::Method(_) | ObjectKind::Foreign(_))
    }
}

/// The polymorphic runtime value of the Velocity VM.
///
/// Every object carries its variant data, an optional reference to its declared type (absent for
/// built-in primitives), an optional reference to the module it originates from (absent for
/// ephemeral values), a member-slot table with unique names, and an [`ObjectInfo`] header for the
/// collector.
#[derive(Clone, Debug)]
pub struct Object {
    kind: ObjectKind,
    class: Option<Reference>,
    module: Option<Reference>,
    members: IndexMap<String, Slot>,
    info: ObjectInfo,
}

impl Object {
    /// Create a new object of the given kind with no type, module or members.
    #[must_use]
    pub fn new(kind: ObjectKind) -> Self {
        Object {
            kind,
            class: None,
            module: None,
            members: IndexMap::new(),
            info: ObjectInfo::default(),
        }
    }

    /// Attach a declared type.
    #[must_use]
    pub fn with_class(mut self, class: Reference) -> Self {
        self.class = Some(class);
        self
    }

    /// Attach an originating module.
    #[must_use]
    pub fn with_module(mut self, module: Reference) -> Self {
        self.module = Some(module);
        self
    }

    /// The variant data.
    #[must_use]
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut ObjectKind {
        &mut self.kind
    }

    /// The declared type, if any.
    #[must_use]
    pub fn class(&self) -> Option<Reference> {
        self.class
    }

    pub(crate) fn set_class(&mut self, class: Option<Reference>) {
        self.class = class;
    }

    /// The originating module, if any.
    #[must_use]
    pub fn module(&self) -> Option<Reference> {
        self.module
    }

    pub(crate) fn set_module(&mut self, module: Option<Reference>) {
        self.module = module;
    }

    /// The member slot table.
    #[must_use]
    pub fn members(&self) -> &IndexMap<String, Slot> {
        &self.members
    }

    pub(crate) fn members_mut(&mut self) -> &mut IndexMap<String, Slot> {
        &mut self.members
    }

    /// The collector header.
    #[must_use]
    pub fn info(&self) -> &ObjectInfo {
        &self.info
    }

    pub(crate) fn info_mut(&mut self) -> &mut ObjectInfo {
        &mut self.info
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_truth() {
        assert!(!ObjectKind::Null.truth());
        assert!(ObjectKind::Bool(true).truth());
        assert!(!ObjectKind::Bool(false).truth());
        assert!(ObjectKind::Int(1).truth());
        assert!(!ObjectKind::Int(0).truth());
        assert!(!ObjectKind::Float(0.0).truth());
        assert!(ObjectKind::Float(0.1).truth());
        assert!(!ObjectKind::Char('\0').truth());
        assert!(ObjectKind::Char('a').truth());
        assert!(!ObjectKind::String(String::new()).truth());
        assert!(ObjectKind::String("x".to_string()).truth());
        assert!(!ObjectKind::Array(Vec::new()).truth());
        assert!(ObjectKind::Instance.truth());
    }

    #[test]
    fn test_tag_names() {
        assert_eq!("null", ObjectKind::Null.tag().name());
        assert_eq!("int", ObjectKind::Int(3).tag().name());
        assert_eq!("instance", ObjectKind::Instance.tag().name());
    }

    #[test]
    fn test_slot_mutability() {
        let reference = Reference::new(ManagerId::UNATTACHED, 0);
        assert!(Slot::variable(reference).is_mutable());
        assert!(!Slot::constant(reference).is_mutable());
    }

    #[test]
    fn test_new_object_defaults() {
        let object = Object::new(ObjectKind::Int(42));
        assert_eq!(ObjectTag::Int, object.kind().tag());
        assert!(object.class().is_none());
        assert!(object.module().is_none());
        assert!(object.members().is_empty());
        assert!(!object.info().marked);
        assert_eq!(0, object.info().life);
    }
}
