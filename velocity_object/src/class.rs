use crate::reference::Reference;
use indexmap::IndexMap;
use velocity_elp::{ClassKind, Sign};

/// The kind of a runtime type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
    Annotation,
}

impl From<ClassKind> for TypeKind {
    fn from(kind: ClassKind) -> Self {
        match kind {
            ClassKind::Class => TypeKind::Class,
            ClassKind::Interface => TypeKind::Interface,
            ClassKind::Enum => TypeKind::Enum,
            ClassKind::Annotation => TypeKind::Annotation,
        }
    }
}

/// The runtime data of a Spade type.
///
/// Supers map names to super type objects in linearization order; type parameters map names to
/// type-parameter objects. The default field and method set for instances lives in the member
/// slots of the wrapping object.
#[derive(Clone, Debug)]
pub struct Type {
    sign: Sign,
    kind: TypeKind,
    supers: IndexMap<String, Reference>,
    type_params: IndexMap<String, Reference>,
}

impl Type {
    /// Create a new type with no supers or type parameters.
    #[must_use]
    pub fn new(sign: Sign, kind: TypeKind) -> Self {
        Type {
            sign,
            kind,
            supers: IndexMap::new(),
            type_params: IndexMap::new(),
        }
    }

    /// The type's signature.
    #[must_use]
    pub fn sign(&self) -> &Sign {
        &self.sign
    }

    /// The kind of the type.
    #[must_use]
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// The super types in linearization order.
    #[must_use]
    pub fn supers(&self) -> &IndexMap<String, Reference> {
        &self.supers
    }

    pub(crate) fn supers_mut(&mut self) -> &mut IndexMap<String, Reference> {
        &mut self.supers
    }

    /// The type parameters.
    #[must_use]
    pub fn type_params(&self) -> &IndexMap<String, Reference> {
        &self.type_params
    }

    pub(crate) fn type_params_mut(&mut self) -> &mut IndexMap<String, Reference> {
        &mut self.type_params
    }
}
