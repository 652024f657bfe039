use crate::Error::ConfigurationError;
use crate::Result;
use std::path::PathBuf;
use velocity_loader::ModulePath;
use velocity_object::HeapConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LANGUAGE_NAME: &str = "spade";
const VM_NAME: &str = "velocity";

/// Settings for the Velocity VM.
///
/// Covers the call-stack depth, the entry point member name, the module search path, the optional
/// native library directory, and the heap configuration.
#[derive(Clone, Debug)]
pub struct Settings {
    stack_depth: usize,
    entry_point: String,
    module_path: ModulePath,
    library_path: Option<PathBuf>,
    heap_config: HeapConfig,
}

impl Settings {
    /// Create a settings builder.
    #[must_use]
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// The VM version.
    #[must_use]
    pub fn version(&self) -> &'static str {
        VERSION
    }

    /// The `version language vm` info string.
    #[must_use]
    pub fn info_string(&self) -> String {
        format!("{VERSION} {LANGUAGE_NAME} {VM_NAME}")
    }

    /// The maximum call-stack depth of a thread.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack_depth
    }

    /// The member name of the entry point method.
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// The module search path.
    #[must_use]
    pub fn module_path(&self) -> &ModulePath {
        &self.module_path
    }

    /// The native library directory, if configured.
    #[must_use]
    pub fn library_path(&self) -> Option<&PathBuf> {
        self.library_path.as_ref()
    }

    /// The heap configuration.
    #[must_use]
    pub fn heap_config(&self) -> &HeapConfig {
        &self.heap_config
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            stack_depth: 1024,
            entry_point: "main".to_string(),
            module_path: ModulePath::default(),
            library_path: None,
            heap_config: HeapConfig::default(),
        }
    }
}

/// Builder for [`Settings`].
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    stack_depth: Option<usize>,
    entry_point: Option<String>,
    module_path: Option<ModulePath>,
    library_path: Option<PathBuf>,
    heap_config: Option<HeapConfig>,
}

impl SettingsBuilder {
    /// Set the maximum call-stack depth of a thread.
    #[must_use]
    pub fn stack_depth(mut self, stack_depth: usize) -> Self {
        self.stack_depth = Some(stack_depth);
        self
    }

    /// Set the member name of the entry point method.
    #[must_use]
    pub fn entry_point<S: Into<String>>(mut self, entry_point: S) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    /// Set the module search path.
    #[must_use]
    pub fn module_path(mut self, module_path: ModulePath) -> Self {
        self.module_path = Some(module_path);
        self
    }

    /// Set the native library directory.
    #[must_use]
    pub fn library_path(mut self, library_path: PathBuf) -> Self {
        self.library_path = Some(library_path);
        self
    }

    /// Set the heap configuration.
    #[must_use]
    pub fn heap_config(mut self, heap_config: HeapConfig) -> Self {
        self.heap_config = Some(heap_config);
        self
    }

    /// Build the settings.
    ///
    /// # Errors
    /// Returns `ConfigurationError` if the stack depth or entry point is degenerate.
    pub fn build(self) -> Result<Settings> {
        let defaults = Settings::default();
        let settings = Settings {
            stack_depth: self.stack_depth.unwrap_or(defaults.stack_depth),
            entry_point: self.entry_point.unwrap_or(defaults.entry_point),
            module_path: self.module_path.unwrap_or(defaults.module_path),
            library_path: self.library_path,
            heap_config: self.heap_config.unwrap_or(defaults.heap_config),
        };
        if settings.stack_depth == 0 {
            return Err(ConfigurationError("stack depth must be non-zero".to_string()));
        }
        if settings.entry_point.is_empty() {
            return Err(ConfigurationError("entry point must be named".to_string()));
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(1024, settings.stack_depth());
        assert_eq!("main", settings.entry_point());
        assert!(settings.library_path().is_none());
        assert_eq!(
            format!("{VERSION} spade velocity"),
            settings.info_string()
        );
    }

    #[test]
    fn test_builder() -> Result<()> {
        let settings = Settings::builder()
            .stack_depth(16)
            .entry_point("start")
            .module_path(ModulePath::from("lib"))
            .library_path(PathBuf::from("native"))
            .build()?;
        assert_eq!(16, settings.stack_depth());
        assert_eq!("start", settings.entry_point());
        assert_eq!("lib", settings.module_path().to_string());
        assert_eq!(Some(&PathBuf::from("native")), settings.library_path());
        Ok(())
    }

    #[test]
    fn test_zero_stack_depth_rejected() {
        assert!(Settings::builder().stack_depth(0).build().is_err());
    }

    #[test]
    fn test_empty_entry_point_rejected() {
        assert!(Settings::builder().entry_point("").build().is_err());
    }
}
