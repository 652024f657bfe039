use crate::error::Error::SymbolNotFound;
use crate::error::Result;
use indexmap::IndexMap;
use parking_lot::RwLock;
use velocity_elp::Sign;
use velocity_object::{Error as ObjectError, Heap, Reference};

/// The VM's module table: loaded module names mapped to module objects.
///
/// Modules are inserted before their members are populated so that circular imports resolve
/// through the table. The table is written only at load time; execution reads it.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: RwLock<IndexMap<String, Reference>>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        ModuleRegistry::default()
    }

    /// Register a module object under its name.
    pub fn insert<S: Into<String>>(&self, name: S, module: Reference) {
        self.modules.write().insert(name.into(), module);
    }

    /// Look up a module object by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Reference> {
        self.modules.read().get(name).copied()
    }

    /// Whether a module is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.modules.read().contains_key(name)
    }

    /// The registered module names, in load order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }

    /// Every registered module object; these are collector roots.
    #[must_use]
    pub fn roots(&self) -> Vec<Reference> {
        self.modules.read().values().copied().collect()
    }

    /// The number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }

    /// Resolve a sign to a value, walking the module table by the sign's module path, the module
    /// by the type path, and the type by the member path, then matching type-parameter arity and
    /// parameter-type structure for callable signs. Returns `None` when any step misses.
    ///
    /// # Errors
    /// Returns an error if the heap rejects a dereference.
    pub fn lookup(&self, heap: &Heap, sign: &Sign) -> Result<Option<Reference>> {
        let Some(module) = self.get(&sign.module_name()) else {
            return Ok(None);
        };
        let mut current = module;
        for segment in sign.path() {
            current = match heap.get_member(current, segment) {
                Ok(reference) => reference,
                Err(ObjectError::MemberNotFound(_)) => return Ok(None),
                Err(error) => return Err(error.into()),
            };
        }

        if sign.is_callable() {
            let Ok(found) = heap.callable_sign(current) else {
                return Ok(None);
            };
            if !sign.parameters_match(&found) {
                return Ok(None);
            }
        }
        Ok(Some(current))
    }

    /// Resolve a sign to a value.
    ///
    /// # Errors
    /// Returns `SymbolNotFound` if the sign does not resolve.
    pub fn get_symbol(&self, heap: &Heap, sign: &Sign) -> Result<Reference> {
        self.lookup(heap, sign)?
            .ok_or_else(|| SymbolNotFound(sign.to_string()))
    }

    /// Set the value of the symbol the sign names.
    ///
    /// # Errors
    /// Returns `SymbolNotFound` if the enclosing scope does not resolve, or a heap error if the
    /// member slot refuses the store.
    pub fn set_symbol(&self, heap: &Heap, sign: &Sign, value: Reference) -> Result<()> {
        let Some(module) = self.get(&sign.module_name()) else {
            return Err(SymbolNotFound(sign.to_string()));
        };
        let mut current = module;
        let (name, scope) = sign
            .path()
            .split_last()
            .ok_or_else(|| SymbolNotFound(sign.to_string()))?;
        for segment in scope {
            current = match heap.get_member(current, segment) {
                Ok(reference) => reference,
                Err(ObjectError::MemberNotFound(_)) => {
                    return Err(SymbolNotFound(sign.to_string()));
                }
                Err(error) => return Err(error.into()),
            };
        }
        heap.set_member(current, name, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use velocity_object::{HeapConfig, MemoryManager, Module, Object, ObjectKind, Slot};

    fn heap_and_module(registry: &ModuleRegistry) -> Result<(Heap, Reference)> {
        let heap = Heap::new(HeapConfig::default());
        let module = heap.allocate(Object::new(ObjectKind::Module(Module::new(
            "test",
            "test.elp".into(),
        ))))?;
        registry.insert("test", module);
        Ok((heap, module))
    }

    #[test]
    fn test_insert_and_get() -> Result<()> {
        let registry = ModuleRegistry::new();
        assert!(registry.is_empty());
        let (_heap, module) = heap_and_module(&registry)?;
        assert_eq!(Some(module), registry.get("test"));
        assert!(registry.contains("test"));
        assert_eq!(vec!["test".to_string()], registry.names());
        assert_eq!(vec![module], registry.roots());
        assert_eq!(1, registry.len());
        Ok(())
    }

    #[test]
    fn test_lookup_member() -> Result<()> {
        let registry = ModuleRegistry::new();
        let (heap, module) = heap_and_module(&registry)?;
        let value = heap.alloc_int(42)?;
        heap.declare_member(module, "answer", Slot::constant(value))?;

        let sign = Sign::parse("test::answer")?;
        assert_eq!(Some(value), registry.lookup(&heap, &sign)?);
        assert_eq!(value, registry.get_symbol(&heap, &sign)?);
        Ok(())
    }

    #[test]
    fn test_lookup_missing_symbol() -> Result<()> {
        let registry = ModuleRegistry::new();
        let (heap, _module) = heap_and_module(&registry)?;
        let sign = Sign::parse("test::missing")?;
        assert_eq!(None, registry.lookup(&heap, &sign)?);
        assert_eq!(
            Err(SymbolNotFound("test::missing".to_string())),
            registry.get_symbol(&heap, &sign)
        );
        Ok(())
    }

    #[test]
    fn test_lookup_missing_module() -> Result<()> {
        let registry = ModuleRegistry::new();
        let heap = Heap::new(HeapConfig::default());
        let sign = Sign::parse("absent::x")?;
        assert_eq!(None, registry.lookup(&heap, &sign)?);
        Ok(())
    }

    #[test]
    fn test_set_symbol() -> Result<()> {
        let registry = ModuleRegistry::new();
        let (heap, module) = heap_and_module(&registry)?;
        let initial = heap.alloc_int(1)?;
        heap.declare_member(module, "counter", Slot::variable(initial))?;

        let sign = Sign::parse("test::counter")?;
        let updated = heap.alloc_int(2)?;
        registry.set_symbol(&heap, &sign, updated)?;
        assert_eq!(Some(updated), registry.lookup(&heap, &sign)?);
        Ok(())
    }

    #[test]
    fn test_set_symbol_constant_slot() -> Result<()> {
        let registry = ModuleRegistry::new();
        let (heap, module) = heap_and_module(&registry)?;
        let initial = heap.alloc_int(1)?;
        heap.declare_member(module, "fixed", Slot::constant(initial))?;

        let sign = Sign::parse("test::fixed")?;
        let updated = heap.alloc_int(2)?;
        assert!(registry.set_symbol(&heap, &sign, updated).is_err());
        Ok(())
    }
}
