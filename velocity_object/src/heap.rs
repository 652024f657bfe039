use crate::class::Type;
use crate::error::Error::{
    ConstantReassignment, EmptyTypeParam, IndexOutOfBounds, InvalidReference, InvalidValueType,
    ManagerMismatch, MemberNotFound, OutOfMemory,
};
use crate::error::Result;
use crate::foreign::Foreign;
use crate::method::{FrameTemplate, Method};
use crate::object::{Object, ObjectKind, ObjectTag, Slot};
use crate::reference::Reference;
use ahash::AHasher;
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use velocity_elp::Sign;

static NEXT_MANAGER_ID: AtomicU32 = AtomicU32::new(1);

/// The process-unique identity of a heap manager.
///
/// Every object records the manager that allocated it; call sites compare manager identities to
/// reject cross-manager invocation, and every dereference checks that a reference is resolved
/// through the arena that owns it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ManagerId(u32);

impl ManagerId {
    /// The identity of objects not yet registered with any manager.
    pub const UNATTACHED: ManagerId = ManagerId(0);

    fn next() -> ManagerId {
        ManagerId(NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for a heap manager.
#[derive(Clone, Debug)]
pub struct HeapConfig {
    /// Maximum number of live objects; `None` leaves the heap unbounded.
    pub max_objects: Option<usize>,
    /// Number of allocations between collector triggers at safe points.
    pub collection_threshold: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            max_objects: None,
            collection_threshold: 10_000,
        }
    }
}

/// Statistics about heap collections.
#[derive(Clone, Debug, Default)]
pub struct Statistics {
    pub collections: usize,
    pub objects_marked: usize,
    pub objects_swept: usize,
    pub last_collection_duration: Option<std::time::Duration>,
}

/// The contract every heap manager fulfills.
///
/// Allocation registers the object with the manager in the same step (the arena slot is the
/// registration), deallocation releases a slot explicitly, and `collect_garbage` runs a
/// synchronous reclamation pass over the provided roots on the calling thread.
pub trait MemoryManager: Send + Sync {
    /// The manager's process-unique identity.
    fn id(&self) -> ManagerId;

    /// Allocate an object, stamp its header with this manager and register it for collection.
    ///
    /// # Errors
    /// Returns `OutOfMemory` when the configured capacity is reached.
    fn allocate(&self, object: Object) -> Result<Reference>;

    /// Release a previously allocated object.
    ///
    /// # Errors
    /// Returns an error if the reference is not live in this manager.
    fn deallocate(&self, reference: Reference) -> Result<()>;

    /// Run a synchronous mark-and-sweep pass; returns the number of objects reclaimed.
    fn collect_garbage(&self, roots: &[Reference]) -> usize;

    /// The number of live objects.
    fn live_objects(&self) -> usize;

    /// The number of allocations since the last collection.
    fn allocations_since_collection(&self) -> usize;
}

/// The arena backing a heap: a dense slot table with a free list.
///
/// References carry their slot index, so the collector walks the table linearly instead of
/// chasing an intrusive list.
#[derive(Debug)]
pub(crate) struct Arena {
    manager: ManagerId,
    slots: Vec<Option<Object>>,
    free: Vec<u32>,
    live: usize,
    pub(crate) allocations_since_collection: usize,
}

impl Arena {
    fn new(manager: ManagerId) -> Self {
        Arena {
            manager,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            allocations_since_collection: 0,
        }
    }

    fn insert(&mut self, mut object: Object) -> Reference {
        object.info_mut().manager = self.manager;
        self.live += 1;
        self.allocations_since_collection += 1;
        if let Some(index) = self.free.pop() {
            let reference = Reference::new(self.manager, index);
            self.slots[index as usize] = Some(object);
            reference
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Some(object));
            Reference::new(self.manager, index)
        }
    }

    pub(crate) fn get(&self, reference: Reference) -> Result<&Object> {
        if reference.manager() != self.manager {
            return Err(ManagerMismatch {
                expected: self.manager,
                actual: reference.manager(),
            });
        }
        self.slots
            .get(reference.index() as usize)
            .and_then(Option::as_ref)
            .ok_or(InvalidReference(reference))
    }

    pub(crate) fn get_mut(&mut self, reference: Reference) -> Result<&mut Object> {
        if reference.manager() != self.manager {
            return Err(ManagerMismatch {
                expected: self.manager,
                actual: reference.manager(),
            });
        }
        self.slots
            .get_mut(reference.index() as usize)
            .and_then(Option::as_mut)
            .ok_or(InvalidReference(reference))
    }

    fn remove(&mut self, reference: Reference) -> Result<Object> {
        self.get(reference)?;
        let slot = &mut self.slots[reference.index() as usize];
        let object = slot.take().ok_or(InvalidReference(reference))?;
        self.free.push(reference.index());
        self.live -= 1;
        Ok(object)
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }

    /// Walk the arena once: clear the mark and bump the life counter of survivors, drop the
    /// unmarked and return their slots to the free list. Returns the number of objects swept.
    pub(crate) fn sweep(&mut self) -> usize {
        let mut swept = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(object) = slot else {
                continue;
            };
            let info = object.info_mut();
            if info.marked {
                info.marked = false;
                info.life += 1;
            } else {
                *slot = None;
                self.free.push(u32::try_from(index).unwrap_or(u32::MAX));
                self.live -= 1;
                swept += 1;
            }
        }
        swept
    }
}

/// A heap manager: the owner of an object arena and the collector that reclaims it.
#[derive(Debug)]
pub struct Heap {
    id: ManagerId,
    config: HeapConfig,
    null_ref: Reference,
    true_ref: Reference,
    false_ref: Reference,
    arena: Mutex<Arena>,
    pub(crate) stats: Mutex<Statistics>,
}

impl Heap {
    /// Create a new heap.
    ///
    /// The `null`, `true` and `false` singletons are allocated up front and survive every
    /// collection.
    #[must_use]
    pub fn new(config: HeapConfig) -> Self {
        let id = ManagerId::next();
        let mut arena = Arena::new(id);
        let null_ref = arena.insert(Object::new(ObjectKind::Null));
        let true_ref = arena.insert(Object::new(ObjectKind::Bool(true)));
        let false_ref = arena.insert(Object::new(ObjectKind::Bool(false)));
        arena.allocations_since_collection = 0;
        Heap {
            id,
            config,
            null_ref,
            true_ref,
            false_ref,
            arena: Mutex::new(arena),
            stats: Mutex::new(Statistics::default()),
        }
    }

    /// The heap configuration.
    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// A snapshot of the collection statistics.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        self.stats.lock().clone()
    }

    /// The `null` singleton.
    #[must_use]
    pub fn null(&self) -> Reference {
        self.null_ref
    }

    /// The `true` or `false` singleton.
    #[must_use]
    pub fn boolean(&self, value: bool) -> Reference {
        if value { self.true_ref } else { self.false_ref }
    }

    pub(crate) fn permanent_references(&self) -> [Reference; 3] {
        [self.null_ref, self.true_ref, self.false_ref]
    }

    pub(crate) fn arena(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock()
    }

    /// Allocate an integer object.
    ///
    /// # Errors
    /// Returns `OutOfMemory` when the configured capacity is reached.
    pub fn alloc_int(&self, value: i64) -> Result<Reference> {
        self.allocate(Object::new(ObjectKind::Int(value)))
    }

    /// Allocate a float object.
    ///
    /// # Errors
    /// Returns `OutOfMemory` when the configured capacity is reached.
    pub fn alloc_float(&self, value: f64) -> Result<Reference> {
        self.allocate(Object::new(ObjectKind::Float(value)))
    }

    /// Allocate a character object.
    ///
    /// # Errors
    /// Returns `OutOfMemory` when the configured capacity is reached.
    pub fn alloc_char(&self, value: char) -> Result<Reference> {
        self.allocate(Object::new(ObjectKind::Char(value)))
    }

    /// Allocate a string object.
    ///
    /// # Errors
    /// Returns `OutOfMemory` when the configured capacity is reached.
    pub fn alloc_string<S: Into<String>>(&self, value: S) -> Result<Reference> {
        self.allocate(Object::new(ObjectKind::String(value.into())))
    }

    /// Allocate an array object.
    ///
    /// # Errors
    /// Returns `OutOfMemory` when the configured capacity is reached.
    pub fn alloc_array(&self, items: Vec<Reference>) -> Result<Reference> {
        self.allocate(Object::new(ObjectKind::Array(items)))
    }

    /// Allocate a closure cell holding the given value.
    ///
    /// # Errors
    /// Returns `OutOfMemory` when the configured capacity is reached.
    pub fn alloc_cell(&self, value: Reference) -> Result<Reference> {
        self.allocate(Object::new(ObjectKind::Cell(value)))
    }

    /// The discriminant of the referenced object.
    ///
    /// # Errors
    /// Returns an error if the reference is not live in this manager.
    pub fn tag(&self, reference: Reference) -> Result<ObjectTag> {
        Ok(self.arena().get(reference)?.kind().tag())
    }

    /// The declared type of the referenced object.
    ///
    /// # Errors
    /// Returns an error if the reference is not live in this manager.
    pub fn class_of(&self, reference: Reference) -> Result<Option<Reference>> {
        Ok(self.arena().get(reference)?.class())
    }

    /// The originating module of the referenced object.
    ///
    /// # Errors
    /// Returns an error if the reference is not live in this manager.
    pub fn module_of(&self, reference: Reference) -> Result<Option<Reference>> {
        Ok(self.arena().get(reference)?.module())
    }

    /// Attach a declared type to the referenced object.
    ///
    /// # Errors
    /// Returns an error if the reference is not live in this manager.
    pub fn set_class(&self, reference: Reference, class: Option<Reference>) -> Result<()> {
        self.arena().get_mut(reference)?.set_class(class);
        Ok(())
    }

    /// Attach an originating module to the referenced object.
    ///
    /// # Errors
    /// Returns an error if the reference is not live in this manager.
    pub fn set_module(&self, reference: Reference, module: Option<Reference>) -> Result<()> {
        self.arena().get_mut(reference)?.set_module(module);
        Ok(())
    }

    /// The survived-collection count of the referenced object.
    ///
    /// # Errors
    /// Returns an error if the reference is not live in this manager.
    pub fn life(&self, reference: Reference) -> Result<u32> {
        Ok(self.arena().get(reference)?.info().life)
    }

    /// Whether the referenced object's mark bit is set.
    ///
    /// # Errors
    /// Returns an error if the reference is not live in this manager.
    pub fn is_marked(&self, reference: Reference) -> Result<bool> {
        Ok(self.arena().get(reference)?.info().marked)
    }

    /// The natural truth value of the referenced object.
    ///
    /// # Errors
    /// Returns an error if the reference is not live in this manager.
    pub fn truth(&self, reference: Reference) -> Result<bool> {
        Ok(self.arena().get(reference)?.kind().truth())
    }

    /// Whether the referenced object can be invoked.
    ///
    /// # Errors
    /// Returns an error if the reference is not live in this manager.
    pub fn is_callable(&self, reference: Reference) -> Result<bool> {
        Ok(self.arena().get(reference)?.kind().is_callable())
    }

    /// The boolean payload of a bool object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a bool.
    pub fn bool_value(&self, reference: Reference) -> Result<bool> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::Bool(value) => Ok(*value),
            kind => Err(invalid_type("bool", kind)),
        }
    }

    /// The integer payload of an int object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not an int.
    pub fn int_value(&self, reference: Reference) -> Result<i64> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::Int(value) => Ok(*value),
            kind => Err(invalid_type("int", kind)),
        }
    }

    /// The float payload of a float object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a float.
    pub fn float_value(&self, reference: Reference) -> Result<f64> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::Float(value) => Ok(*value),
            kind => Err(invalid_type("float", kind)),
        }
    }

    /// The character payload of a char object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a char.
    pub fn char_value(&self, reference: Reference) -> Result<char> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::Char(value) => Ok(*value),
            kind => Err(invalid_type("char", kind)),
        }
    }

    /// The string payload of a string object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a string.
    pub fn string_value(&self, reference: Reference) -> Result<String> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::String(value) => Ok(value.clone()),
            kind => Err(invalid_type("string", kind)),
        }
    }

    /// The length of an array object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not an array.
    pub fn array_length(&self, reference: Reference) -> Result<usize> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::Array(items) => Ok(items.len()),
            kind => Err(invalid_type("array", kind)),
        }
    }

    /// The elements of an array object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not an array.
    pub fn array_elements(&self, reference: Reference) -> Result<Vec<Reference>> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::Array(items) => Ok(items.clone()),
            kind => Err(invalid_type("array", kind)),
        }
    }

    /// An element of an array object.
    ///
    /// # Errors
    /// Returns `IndexOutOfBounds` if the index is negative or past the end.
    pub fn array_get(&self, reference: Reference, index: i64) -> Result<Reference> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::Array(items) => {
                let position = usize::try_from(index).map_err(|_| IndexOutOfBounds {
                    index,
                    length: items.len(),
                })?;
                items.get(position).copied().ok_or(IndexOutOfBounds {
                    index,
                    length: items.len(),
                })
            }
            kind => Err(invalid_type("array", kind)),
        }
    }

    /// Replace an element of an array object.
    ///
    /// # Errors
    /// Returns `IndexOutOfBounds` if the index is negative or past the end.
    pub fn array_set(&self, reference: Reference, index: i64, value: Reference) -> Result<()> {
        let mut arena = self.arena();
        match arena.get_mut(reference)?.kind_mut() {
            ObjectKind::Array(items) => {
                let length = items.len();
                let position = usize::try_from(index)
                    .ok()
                    .filter(|position| *position < length)
                    .ok_or(IndexOutOfBounds { index, length })?;
                items[position] = value;
                Ok(())
            }
            kind => Err(invalid_type("array", &*kind)),
        }
    }

    /// The value held by a closure cell.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a cell.
    pub fn cell_value(&self, reference: Reference) -> Result<Reference> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::Cell(value) => Ok(*value),
            kind => Err(invalid_type("cell", kind)),
        }
    }

    /// Replace the value held by a closure cell.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a cell.
    pub fn set_cell_value(&self, reference: Reference, value: Reference) -> Result<()> {
        let mut arena = self.arena();
        match arena.get_mut(reference)?.kind_mut() {
            ObjectKind::Cell(cell) => {
                *cell = value;
                Ok(())
            }
            kind => Err(invalid_type("cell", &*kind)),
        }
    }

    /// The value of a type parameter.
    ///
    /// # Errors
    /// Returns `EmptyTypeParam` if the type parameter has not been bound.
    pub fn type_param_value(&self, reference: Reference) -> Result<Reference> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::TypeParam { name, value } => {
                (*value).ok_or_else(|| EmptyTypeParam(name.clone()))
            }
            kind => Err(invalid_type("type parameter", kind)),
        }
    }

    /// Bind the value of a type parameter.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a type parameter.
    pub fn set_type_param_value(
        &self,
        reference: Reference,
        new_value: Option<Reference>,
    ) -> Result<()> {
        let mut arena = self.arena();
        match arena.get_mut(reference)?.kind_mut() {
            ObjectKind::TypeParam { value, .. } => {
                *value = new_value;
                Ok(())
            }
            kind => Err(invalid_type("type parameter", &*kind)),
        }
    }

    /// Get a member of the referenced object.
    ///
    /// Lookup order: the object's own slots, then the inherited slots along the linearised super
    /// chain of its type.
    ///
    /// # Errors
    /// Returns `MemberNotFound` if the chain does not define the member.
    pub fn get_member(&self, reference: Reference, name: &str) -> Result<Reference> {
        let arena = self.arena();
        lookup_member(&arena, reference, name)
    }

    /// Set a member of the referenced object.
    ///
    /// An existing slot is updated subject to its mutability flag; a single-assignment slot
    /// still holding `null` accepts its initializing store. A missing slot is inserted as a
    /// reassignable one.
    ///
    /// # Errors
    /// Returns `ConstantReassignment` if the slot is not mutable and already assigned.
    pub fn set_member(&self, reference: Reference, name: &str, value: Reference) -> Result<()> {
        let null_ref = self.null_ref;
        let mut arena = self.arena();
        let object = arena.get_mut(reference)?;
        if let Some(slot) = object.members_mut().get_mut(name) {
            if !slot.is_mutable() && slot.value() != null_ref {
                return Err(ConstantReassignment(name.to_string()));
            }
            slot.set_value(value);
        } else {
            object
                .members_mut()
                .insert(name.to_string(), Slot::variable(value));
        }
        Ok(())
    }

    /// Declare a member slot on the referenced object, replacing any existing slot.
    ///
    /// This is the loader's entry point: it chooses the slot's mutability and bypasses the
    /// reassignment check that guards run-time stores.
    ///
    /// # Errors
    /// Returns an error if the reference is not live in this manager.
    pub fn declare_member(&self, reference: Reference, name: &str, slot: Slot) -> Result<()> {
        let mut arena = self.arena();
        let object = arena.get_mut(reference)?;
        object.members_mut().insert(name.to_string(), slot);
        Ok(())
    }

    /// The names of the referenced object's own member slots.
    ///
    /// # Errors
    /// Returns an error if the reference is not live in this manager.
    pub fn member_names(&self, reference: Reference) -> Result<Vec<String>> {
        let arena = self.arena();
        Ok(arena.get(reference)?.members().keys().cloned().collect())
    }

    /// Copy the referenced object according to its variant's copy policy: immutable primitives
    /// and callables return self, containers produce a shallow duplicate allocated by this
    /// manager.
    ///
    /// # Errors
    /// Returns `OutOfMemory` when a duplicate cannot be allocated.
    pub fn copy(&self, reference: Reference) -> Result<Reference> {
        let duplicate = {
            let arena = self.arena();
            let object = arena.get(reference)?;
            match object.kind() {
                ObjectKind::Array(items) => Some(
                    Object::new(ObjectKind::Array(items.clone()))
                        .with_members(object.members().clone())
                        .with_origin(object.class(), object.module()),
                ),
                ObjectKind::Instance => Some(
                    Object::new(ObjectKind::Instance)
                        .with_members(object.members().clone())
                        .with_origin(object.class(), object.module()),
                ),
                _ => None,
            }
        };
        match duplicate {
            Some(object) => self.allocate(object),
            None => Ok(reference),
        }
    }

    /// Structural equality of two objects.
    ///
    /// Primitives compare by value with numeric promotion between int and float; NaN compares
    /// false to everything including itself. Arrays compare element-wise. Everything else
    /// compares by identity.
    ///
    /// # Errors
    /// Returns an error if a reference is not live in this manager.
    pub fn equals(&self, first: Reference, second: Reference) -> Result<bool> {
        let arena = self.arena();
        structural_eq(&arena, first, second)
    }

    /// A hash of the referenced object, stable for the process lifetime.
    ///
    /// # Errors
    /// Returns an error if the reference is not live in this manager.
    pub fn hash_value(&self, reference: Reference) -> Result<u64> {
        let arena = self.arena();
        let mut hasher = AHasher::default();
        match arena.get(reference)?.kind() {
            ObjectKind::Null => 0_u8.hash(&mut hasher),
            ObjectKind::Bool(value) => (1_u8, value).hash(&mut hasher),
            ObjectKind::Int(value) => (2_u8, value).hash(&mut hasher),
            ObjectKind::Float(value) => (3_u8, value.to_bits()).hash(&mut hasher),
            ObjectKind::Char(value) => (4_u8, value).hash(&mut hasher),
            ObjectKind::String(value) => (5_u8, value).hash(&mut hasher),
            _ => (6_u8, reference).hash(&mut hasher),
        }
        Ok(hasher.finish())
    }

    /// A human-readable rendering of the referenced object.
    ///
    /// # Errors
    /// Returns an error if a reference is not live in this manager.
    pub fn to_display_string(&self, reference: Reference) -> Result<String> {
        let arena = self.arena();
        let mut visited = Vec::new();
        display(&arena, reference, &mut visited)
    }

    /// The runtime data of a method object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a method.
    pub fn method(&self, reference: Reference) -> Result<Method> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::Method(method) => Ok(method.clone()),
            kind => Err(invalid_type("method", kind)),
        }
    }

    /// The frame template of a method object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a method.
    pub fn method_template(&self, reference: Reference) -> Result<FrameTemplate> {
        Ok(self.method(reference)?.template().clone())
    }

    /// Record a lambda on a method object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a method.
    pub fn add_lambda(&self, reference: Reference, lambda: Reference) -> Result<()> {
        let mut arena = self.arena();
        match arena.get_mut(reference)?.kind_mut() {
            ObjectKind::Method(method) => {
                method.lambdas_mut().push(lambda);
                Ok(())
            }
            kind => Err(invalid_type("method", &*kind)),
        }
    }

    /// Bind a type parameter on a method object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a method.
    pub fn add_method_type_param(
        &self,
        reference: Reference,
        name: &str,
        type_param: Reference,
    ) -> Result<()> {
        let mut arena = self.arena();
        match arena.get_mut(reference)?.kind_mut() {
            ObjectKind::Method(method) => {
                method
                    .type_params_mut()
                    .insert(name.to_string(), type_param);
                Ok(())
            }
            kind => Err(invalid_type("method", &*kind)),
        }
    }

    /// The runtime data of a foreign callable.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a foreign callable.
    pub fn foreign(&self, reference: Reference) -> Result<Foreign> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::Foreign(foreign) => Ok(foreign.clone()),
            kind => Err(invalid_type("foreign", kind)),
        }
    }

    /// The signature of a callable object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not callable.
    pub fn callable_sign(&self, reference: Reference) -> Result<Sign> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::Method(method) => Ok(method.sign().clone()),
            ObjectKind::Foreign(foreign) => Ok(foreign.sign().clone()),
            kind => Err(invalid_type("callable", kind)),
        }
    }

    /// The runtime data of a type object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a type.
    pub fn type_data(&self, reference: Reference) -> Result<Type> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::Type(class) => Ok(class.clone()),
            kind => Err(invalid_type("type", kind)),
        }
    }

    /// Record a super type on a type object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a type.
    pub fn add_super(&self, reference: Reference, name: &str, super_type: Reference) -> Result<()> {
        let mut arena = self.arena();
        match arena.get_mut(reference)?.kind_mut() {
            ObjectKind::Type(class) => {
                class.supers_mut().insert(name.to_string(), super_type);
                Ok(())
            }
            kind => Err(invalid_type("type", &*kind)),
        }
    }

    /// Bind a type parameter on a type object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a type.
    pub fn add_type_param(
        &self,
        reference: Reference,
        name: &str,
        type_param: Reference,
    ) -> Result<()> {
        let mut arena = self.arena();
        match arena.get_mut(reference)?.kind_mut() {
            ObjectKind::Type(class) => {
                class.type_params_mut().insert(name.to_string(), type_param);
                Ok(())
            }
            kind => Err(invalid_type("type", &*kind)),
        }
    }

    /// Whether `sub` is `sup` or transitively names it in its super chain.
    ///
    /// # Errors
    /// Returns an error if a reference is not live in this manager.
    pub fn is_subtype(&self, sub: Reference, sup: Reference) -> Result<bool> {
        let arena = self.arena();
        if sub == sup {
            return Ok(true);
        }
        let mut queue = VecDeque::from([sub]);
        let mut visited = vec![sub];
        while let Some(current) = queue.pop_front() {
            if let ObjectKind::Type(class) = arena.get(current)?.kind() {
                for super_type in class.supers().values() {
                    if *super_type == sup {
                        return Ok(true);
                    }
                    if !visited.contains(super_type) {
                        visited.push(*super_type);
                        queue.push_back(*super_type);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Create an instance of a type: a fresh object whose member slots start from the type's
    /// default field and method set.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the reference is not a type, or `OutOfMemory` when the
    /// instance cannot be allocated.
    pub fn instantiate(&self, class: Reference) -> Result<Reference> {
        let instance = {
            let arena = self.arena();
            let object = arena.get(class)?;
            if !matches!(object.kind(), ObjectKind::Type(_)) {
                return Err(invalid_type("type", object.kind()));
            }
            Object::new(ObjectKind::Instance)
                .with_members(object.members().clone())
                .with_origin(Some(class), object.module())
        };
        self.allocate(instance)
    }

    /// The name of a module object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a module.
    pub fn module_name(&self, reference: Reference) -> Result<String> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::Module(module) => Ok(module.name().to_string()),
            kind => Err(invalid_type("module", kind)),
        }
    }

    /// The runtime constant pool of a module object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a module.
    pub fn module_pool(&self, reference: Reference) -> Result<Arc<[Reference]>> {
        let arena = self.arena();
        match arena.get(reference)?.kind() {
            ObjectKind::Module(module) => Ok(module.constant_pool().clone()),
            kind => Err(invalid_type("module", kind)),
        }
    }

    /// Freeze the runtime constant pool of a module object.
    ///
    /// # Errors
    /// Returns `InvalidValueType` if the object is not a module.
    pub fn set_module_pool(&self, reference: Reference, pool: Arc<[Reference]>) -> Result<()> {
        let mut arena = self.arena();
        match arena.get_mut(reference)?.kind_mut() {
            ObjectKind::Module(module) => {
                module.set_constant_pool(pool);
                Ok(())
            }
            kind => Err(invalid_type("module", &*kind)),
        }
    }
}

impl MemoryManager for Heap {
    fn id(&self) -> ManagerId {
        self.id
    }

    fn allocate(&self, object: Object) -> Result<Reference> {
        let mut arena = self.arena();
        if let Some(capacity) = self.config.max_objects
            && arena.live() >= capacity
        {
            return Err(OutOfMemory { capacity });
        }
        Ok(arena.insert(object))
    }

    fn deallocate(&self, reference: Reference) -> Result<()> {
        self.arena().remove(reference)?;
        Ok(())
    }

    fn collect_garbage(&self, roots: &[Reference]) -> usize {
        self.collect(roots)
    }

    fn live_objects(&self) -> usize {
        self.arena().live()
    }

    fn allocations_since_collection(&self) -> usize {
        self.arena().allocations_since_collection
    }
}

impl Object {
    fn with_members(mut self, members: indexmap::IndexMap<String, Slot>) -> Self {
        *self.members_mut() = members;
        self
    }

    fn with_origin(mut self, class: Option<Reference>, module: Option<Reference>) -> Self {
        self.set_class(class);
        self.set_module(module);
        self
    }
}

fn invalid_type(expected: &'static str, kind: &ObjectKind) -> crate::error::Error {
    InvalidValueType {
        expected,
        actual: kind.tag().name(),
    }
}

fn lookup_member(arena: &Arena, reference: Reference, name: &str) -> Result<Reference> {
    let object = arena.get(reference)?;
    if let Some(slot) = object.members().get(name) {
        return Ok(slot.value());
    }

    // Walk the linearised super chain of the object's type breadth-first.
    let mut queue = VecDeque::new();
    let mut visited = vec![reference];
    if let Some(class) = object.class() {
        queue.push_back(class);
    }
    if let ObjectKind::Type(class) = object.kind() {
        queue.extend(class.supers().values().copied());
    }
    while let Some(current) = queue.pop_front() {
        if visited.contains(&current) {
            continue;
        }
        visited.push(current);
        let object = arena.get(current)?;
        if let Some(slot) = object.members().get(name) {
            return Ok(slot.value());
        }
        if let ObjectKind::Type(class) = object.kind() {
            queue.extend(class.supers().values().copied());
        }
    }
    Err(MemberNotFound(name.to_string()))
}

fn structural_eq(arena: &Arena, first: Reference, second: Reference) -> Result<bool> {
    if first == second {
        return Ok(true);
    }
    let first_kind = arena.get(first)?.kind();
    let second_kind = arena.get(second)?.kind();
    let equal = match (first_kind, second_kind) {
        (ObjectKind::Null, ObjectKind::Null) => true,
        (ObjectKind::Bool(a), ObjectKind::Bool(b)) => a == b,
        (ObjectKind::Int(a), ObjectKind::Int(b)) => a == b,
        (ObjectKind::Float(a), ObjectKind::Float(b)) => a == b,
        (ObjectKind::Int(a), ObjectKind::Float(b)) | (ObjectKind::Float(b), ObjectKind::Int(a)) => {
            let promoted = *a as f64;
            promoted == *b
        }
        (ObjectKind::Char(a), ObjectKind::Char(b)) => a == b,
        (ObjectKind::String(a), ObjectKind::String(b)) => a == b,
        (ObjectKind::Array(a), ObjectKind::Array(b)) => {
            if a.len() != b.len() {
                false
            } else {
                let (a, b) = (a.clone(), b.clone());
                for (x, y) in a.iter().zip(b.iter()) {
                    if !structural_eq(arena, *x, *y)? {
                        return Ok(false);
                    }
                }
                true
            }
        }
        _ => false,
    };
    Ok(equal)
}

fn display(arena: &Arena, reference: Reference, visited: &mut Vec<Reference>) -> Result<String> {
    let object = arena.get(reference)?;
    let rendered = match object.kind() {
        ObjectKind::Null => "null".to_string(),
        ObjectKind::Bool(value) => value.to_string(),
        ObjectKind::Int(value) => value.to_string(),
        ObjectKind::Float(value) => value.to_string(),
        ObjectKind::Char(value) => value.to_string(),
        ObjectKind::String(value) => value.clone(),
        ObjectKind::Array(items) => {
            if visited.contains(&reference) {
                "[...]".to_string()
            } else {
                visited.push(reference);
                let mut rendered = Vec::with_capacity(items.len());
                for item in items.clone() {
                    rendered.push(display(arena, item, visited)?);
                }
                visited.pop();
                format!("[{}]", rendered.join(", "))
            }
        }
        ObjectKind::Cell(value) => display(arena, *value, visited)?,
        ObjectKind::TypeParam { name, value } => match value {
            Some(value) => display(arena, *value, visited)?,
            None => format!("<type-param '{name}'>"),
        },
        ObjectKind::Module(module) => format!("<module '{}'>", module.name()),
        ObjectKind::Type(class) => format!("<type '{}'>", class.sign()),
        ObjectKind::Method(method) => match method.kind() {
            velocity_elp::MethodKind::Function => format!("<function '{}'>", method.sign()),
            velocity_elp::MethodKind::Method => format!("<method '{}'>", method.sign()),
        },
        ObjectKind::Foreign(foreign) => format!("<foreign function '{}'>", foreign.sign()),
        ObjectKind::Instance => match object.class() {
            Some(class) => match arena.get(class)?.kind() {
                ObjectKind::Type(class) => format!("<object of '{}'>", class.sign()),
                _ => "<object>".to_string(),
            },
            None => "<object>".to_string(),
        },
    };
    Ok(rendered)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::class::TypeKind;

    fn heap() -> Heap {
        Heap::new(HeapConfig::default())
    }

    #[test]
    fn test_singletons() -> Result<()> {
        let heap = heap();
        assert_eq!(heap.null(), heap.null());
        assert_eq!(ObjectTag::Null, heap.tag(heap.null())?);
        assert!(heap.bool_value(heap.boolean(true))?);
        assert!(!heap.bool_value(heap.boolean(false))?);
        Ok(())
    }

    #[test]
    fn test_primitive_values() -> Result<()> {
        let heap = heap();
        assert_eq!(42, heap.int_value(heap.alloc_int(42)?)?);
        assert_eq!(42.1, heap.float_value(heap.alloc_float(42.1)?)?);
        assert_eq!('x', heap.char_value(heap.alloc_char('x')?)?);
        assert_eq!("hi", heap.string_value(heap.alloc_string("hi")?)?);
        Ok(())
    }

    #[test]
    fn test_invalid_value_type() -> Result<()> {
        let heap = heap();
        let string = heap.alloc_string("hi")?;
        assert_eq!(
            Err(InvalidValueType {
                expected: "int",
                actual: "string"
            }),
            heap.int_value(string)
        );
        Ok(())
    }

    #[test]
    fn test_manager_mismatch() -> Result<()> {
        let first = heap();
        let second = heap();
        let reference = first.alloc_int(1)?;
        assert_eq!(
            Err(ManagerMismatch {
                expected: second.id(),
                actual: first.id(),
            }),
            second.int_value(reference)
        );
        Ok(())
    }

    #[test]
    fn test_deallocate_and_invalid_reference() -> Result<()> {
        let heap = heap();
        let reference = heap.alloc_int(1)?;
        heap.deallocate(reference)?;
        assert_eq!(Err(InvalidReference(reference)), heap.int_value(reference));
        Ok(())
    }

    #[test]
    fn test_capacity() -> Result<()> {
        let heap = Heap::new(HeapConfig {
            max_objects: Some(4),
            ..Default::default()
        });
        // Three singletons occupy the arena already
        heap.alloc_int(1)?;
        assert_eq!(
            Err(OutOfMemory { capacity: 4 }),
            heap.alloc_int(2)
        );
        Ok(())
    }

    #[test]
    fn test_array_access() -> Result<()> {
        let heap = heap();
        let first = heap.alloc_int(1)?;
        let second = heap.alloc_int(2)?;
        let array = heap.alloc_array(vec![first, second])?;
        assert_eq!(2, heap.array_length(array)?);
        assert_eq!(first, heap.array_get(array, 0)?);
        heap.array_set(array, 1, first)?;
        assert_eq!(first, heap.array_get(array, 1)?);
        assert_eq!(
            Err(IndexOutOfBounds {
                index: 2,
                length: 2
            }),
            heap.array_get(array, 2)
        );
        assert_eq!(
            Err(IndexOutOfBounds {
                index: -1,
                length: 2
            }),
            heap.array_get(array, -1)
        );
        Ok(())
    }

    #[test]
    fn test_members_and_mutability() -> Result<()> {
        let heap = heap();
        let object = heap.allocate(Object::new(ObjectKind::Instance))?;
        let value = heap.alloc_int(1)?;
        heap.set_member(object, "x", value)?;
        assert_eq!(value, heap.get_member(object, "x")?);

        let constant = heap.alloc_int(2)?;
        heap.declare_member(object, "c", Slot::constant(constant))?;
        assert_eq!(
            Err(ConstantReassignment("c".to_string())),
            heap.set_member(object, "c", value)
        );
        assert_eq!(
            Err(MemberNotFound("missing".to_string())),
            heap.get_member(object, "missing")
        );
        Ok(())
    }

    #[test]
    fn test_member_lookup_through_supers() -> Result<()> {
        let heap = heap();
        let base_sign = Sign::parse("test.Base").expect("sign");
        let base = heap.allocate(Object::new(ObjectKind::Type(Type::new(
            base_sign,
            TypeKind::Class,
        ))))?;
        let answer = heap.alloc_int(42)?;
        heap.declare_member(base, "answer", Slot::variable(answer))?;

        let derived_sign = Sign::parse("test.Derived").expect("sign");
        let derived = heap.allocate(Object::new(ObjectKind::Type(Type::new(
            derived_sign,
            TypeKind::Class,
        ))))?;
        heap.add_super(derived, "test.Base", base)?;

        let instance = heap.instantiate(derived)?;
        assert_eq!(answer, heap.get_member(instance, "answer")?);
        assert_eq!(answer, heap.get_member(derived, "answer")?);
        Ok(())
    }

    #[test]
    fn test_is_subtype() -> Result<()> {
        let heap = heap();
        let base = heap.allocate(Object::new(ObjectKind::Type(Type::new(
            Sign::parse("test.Base").expect("sign"),
            TypeKind::Class,
        ))))?;
        let middle = heap.allocate(Object::new(ObjectKind::Type(Type::new(
            Sign::parse("test.Middle").expect("sign"),
            TypeKind::Class,
        ))))?;
        let other = heap.allocate(Object::new(ObjectKind::Type(Type::new(
            Sign::parse("test.Other").expect("sign"),
            TypeKind::Class,
        ))))?;
        heap.add_super(middle, "test.Base", base)?;

        assert!(heap.is_subtype(middle, base)?);
        assert!(heap.is_subtype(middle, middle)?);
        assert!(!heap.is_subtype(middle, other)?);
        assert!(!heap.is_subtype(base, middle)?);
        Ok(())
    }

    #[test]
    fn test_copy_policy() -> Result<()> {
        let heap = heap();
        let int = heap.alloc_int(1)?;
        assert_eq!(int, heap.copy(int)?);
        let string = heap.alloc_string("s")?;
        assert_eq!(string, heap.copy(string)?);

        let array = heap.alloc_array(vec![int])?;
        let copied = heap.copy(array)?;
        assert_ne!(array, copied);
        assert_eq!(heap.array_elements(array)?, heap.array_elements(copied)?);
        Ok(())
    }

    #[test]
    fn test_equality() -> Result<()> {
        let heap = heap();
        let first = heap.alloc_int(1)?;
        let second = heap.alloc_int(1)?;
        let third = heap.alloc_float(1.0)?;
        let nan = heap.alloc_float(f64::NAN)?;
        assert!(heap.equals(first, second)?);
        assert!(heap.equals(first, third)?);
        assert!(!heap.equals(nan, nan)?);

        let first_array = heap.alloc_array(vec![first, second])?;
        let second_array = heap.alloc_array(vec![second, first])?;
        assert!(heap.equals(first_array, second_array)?);
        Ok(())
    }

    #[test]
    fn test_hash_stability() -> Result<()> {
        let heap = heap();
        let first = heap.alloc_string("stable")?;
        let second = heap.alloc_string("stable")?;
        assert_eq!(heap.hash_value(first)?, heap.hash_value(second)?);
        Ok(())
    }

    #[test]
    fn test_display() -> Result<()> {
        let heap = heap();
        assert_eq!("null", heap.to_display_string(heap.null())?);
        let int = heap.alloc_int(42)?;
        let string = heap.alloc_string("hi")?;
        let array = heap.alloc_array(vec![int, string])?;
        assert_eq!("[42, hi]", heap.to_display_string(array)?);
        Ok(())
    }

    #[test]
    fn test_display_cyclic_array() -> Result<()> {
        let heap = heap();
        let array = heap.alloc_array(Vec::new())?;
        let mut arena = heap.arena();
        if let ObjectKind::Array(items) = arena.get_mut(array)?.kind_mut() {
            items.push(array);
        }
        drop(arena);
        assert_eq!("[[...]]", heap.to_display_string(array)?);
        Ok(())
    }

    #[test]
    fn test_type_param() -> Result<()> {
        let heap = heap();
        let type_param = heap.allocate(Object::new(ObjectKind::TypeParam {
            name: "T".to_string(),
            value: None,
        }))?;
        assert_eq!(
            Err(EmptyTypeParam("T".to_string())),
            heap.type_param_value(type_param)
        );
        let class = heap.allocate(Object::new(ObjectKind::Type(Type::new(
            Sign::parse("test.T").expect("sign"),
            TypeKind::Class,
        ))))?;
        heap.set_type_param_value(type_param, Some(class))?;
        assert_eq!(class, heap.type_param_value(type_param)?);
        Ok(())
    }

    #[test]
    fn test_cells() -> Result<()> {
        let heap = heap();
        let value = heap.alloc_int(1)?;
        let cell = heap.alloc_cell(value)?;
        assert_eq!(value, heap.cell_value(cell)?);
        let other = heap.alloc_int(2)?;
        heap.set_cell_value(cell, other)?;
        assert_eq!(other, heap.cell_value(cell)?);
        Ok(())
    }
}
