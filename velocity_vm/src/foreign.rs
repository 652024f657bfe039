use crate::Error::NativeLibrary;
use crate::Result;
use crate::vm::Vm;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use velocity_object::Reference;

/// A resolved foreign function: the thin host function pointer the engine invokes with an array
/// of object references, expecting a return object or an error signal.
pub type ForeignFunction = Arc<dyn Fn(&Vm, &[Reference]) -> Result<Reference> + Send + Sync>;

/// The seam through which foreign callables resolve.
///
/// Platform-specific dynamic-library backends implement this trait in the embedding host; the VM
/// treats resolution failure uniformly as a `NativeLibrary` error.
pub trait ForeignLoader: fmt::Debug + Send + Sync {
    /// Resolve `(library, function)` to a callable host function.
    ///
    /// # Errors
    /// Returns `NativeLibrary` if the symbol cannot be resolved.
    fn resolve(&self, library: &str, function: &str) -> Result<ForeignFunction>;
}

/// A registry-backed foreign loader for embedders and tests: host functions are registered under
/// `(library, function)` coordinates instead of being resolved from shared objects.
#[derive(Default)]
pub struct ForeignRegistry {
    functions: DashMap<(String, String), ForeignFunction>,
}

impl ForeignRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        ForeignRegistry::default()
    }

    /// Register a host function under its library and function names.
    pub fn register<L: Into<String>, F: Into<String>>(
        &self,
        library: L,
        function: F,
        host_function: ForeignFunction,
    ) {
        self.functions
            .insert((library.into(), function.into()), host_function);
    }
}

impl ForeignLoader for ForeignRegistry {
    fn resolve(&self, library: &str, function: &str) -> Result<ForeignFunction> {
        self.functions
            .get(&(library.to_string(), function.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| NativeLibrary {
                library: library.to_string(),
                function: function.to_string(),
                reason: "symbol not found".to_string(),
            })
    }
}

impl fmt::Debug for ForeignRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignRegistry")
            .field("functions", &self.functions.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_resolve_missing_symbol() {
        let registry = ForeignRegistry::new();
        let Err(error) = registry.resolve("libio", "io_write") else {
            panic!("expected resolution failure");
        };
        assert_eq!(
            "Failed to resolve io_write in 'libio': symbol not found",
            error.to_string()
        );
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = ForeignRegistry::new();
        registry.register(
            "libio",
            "io_noop",
            Arc::new(|vm: &Vm, _args: &[Reference]| Ok(vm.heap().null())),
        );
        assert!(registry.resolve("libio", "io_noop").is_ok());
        assert_eq!("ForeignRegistry { functions: 1 }", format!("{registry:?}"));
    }
}
