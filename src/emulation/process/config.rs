//! Environment configuration.
//!
//! [`EnvironmentConfig`] collects everything [`EmulationSession`](crate::emulation::EmulationSession)
//! needs to fabricate a process environment: the address layout, the modules to register and
//! the few fixed values guest code reads during startup.
//!
//! # Example
//!
//! ```rust
//! use ntscope::emulation::{EnvironmentConfig, ModuleDescriptor};
//!
//! let main = ModuleDescriptor::new("sample.exe", "c:\\sample.exe", 0x40_0000, 0x40_1000, 0x6000);
//! let config = EnvironmentConfig::new()
//!     .with_main(main)
//!     .with_dll_dir("/opt/win_dll")
//!     .with_seh_walk_budget(8);
//!
//! assert_eq!(config.canonical_order(), vec!["c:\\sample.exe", "", "ntdll.dll", "kernel32.dll"]);
//! ```

use std::path::PathBuf;

use crate::emulation::{layout::AddressLayout, loader::ModuleSource};

/// Configuration of one emulated process environment.
///
/// # Default Configuration
///
/// - The classic 32-bit [`AddressLayout`]
/// - Main module `c:\xxx\toto.exe`, read from that path
/// - Auxiliary modules `ntdll.dll` and `kernel32.dll`, read from `win_dll`
/// - A single environment variable, `ALLUSERSPROFILE`
/// - FS selector `4`, SEH walk budget `5`
#[derive(Clone, Debug)]
pub struct EnvironmentConfig {
    /// Guest addresses of every synthetic structure
    pub layout: AddressLayout,
    /// The main executable
    pub main: ModuleSource,
    /// Other modules, in load order
    pub auxiliary: Vec<ModuleSource>,
    /// Host directory auxiliary module paths are resolved against
    pub dll_dir: PathBuf,
    /// The two system modules leading the initialization-order list
    pub core_modules: [String; 2],
    /// `NAME=value` strings of the environment block
    pub environment: Vec<String>,
    /// Selector loaded into FS
    pub fs_selector: u32,
    /// Maximum frames visited when logging the SEH chain
    pub seh_walk_budget: usize,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            layout: AddressLayout::default(),
            main: ModuleSource::Path("c:\\xxx\\toto.exe".to_string()),
            auxiliary: vec!["ntdll.dll".into(), "kernel32.dll".into()],
            dll_dir: PathBuf::from("win_dll"),
            core_modules: ["ntdll.dll".to_string(), "kernel32.dll".to_string()],
            environment: vec!["ALLUSERSPROFILE=C:\\Documents and Settings\\All Users".to_string()],
            fs_selector: 4,
            seh_walk_budget: 5,
        }
    }
}

impl EnvironmentConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the address layout.
    #[must_use]
    pub fn with_layout(mut self, layout: AddressLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the main module.
    ///
    /// # Arguments
    ///
    /// * `main` - A parsed descriptor, or a path to parse
    #[must_use]
    pub fn with_main(mut self, main: impl Into<ModuleSource>) -> Self {
        self.main = main.into();
        self
    }

    /// Replaces the auxiliary module list.
    #[must_use]
    pub fn with_modules(mut self, modules: Vec<ModuleSource>) -> Self {
        self.auxiliary = modules;
        self
    }

    /// Appends one auxiliary module.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<ModuleSource>) -> Self {
        self.auxiliary.push(module.into());
        self
    }

    /// Sets the directory auxiliary module paths are read from.
    #[must_use]
    pub fn with_dll_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dll_dir = dir.into();
        self
    }

    /// Sets the two modules forced to the front of the initialization-order list.
    #[must_use]
    pub fn with_core_modules(mut self, first: &str, second: &str) -> Self {
        self.core_modules = [first.to_string(), second.to_string()];
        self
    }

    /// Replaces the environment strings.
    #[must_use]
    pub fn with_environment(mut self, environment: Vec<String>) -> Self {
        self.environment = environment;
        self
    }

    /// Appends one `NAME=value` environment string.
    #[must_use]
    pub fn with_env_var(mut self, name: &str, value: &str) -> Self {
        self.environment.push(format!("{name}={value}"));
        self
    }

    /// Sets the FS selector.
    #[must_use]
    pub fn with_fs_selector(mut self, selector: u32) -> Self {
        self.fs_selector = selector;
        self
    }

    /// Sets the SEH walk budget.
    #[must_use]
    pub fn with_seh_walk_budget(mut self, budget: usize) -> Self {
        self.seh_walk_budget = budget;
        self
    }

    /// Module order fed to the list linker: main, sentinel, then the auxiliary modules.
    #[must_use]
    pub fn canonical_order(&self) -> Vec<&str> {
        let mut order = vec![self.main.key_name(), ""];
        order.extend(self.auxiliary.iter().map(ModuleSource::key_name));
        order
    }

    /// The core module names as borrowed strings.
    #[must_use]
    pub fn core_module_names(&self) -> [&str; 2] {
        [&self.core_modules[0], &self.core_modules[1]]
    }
}
