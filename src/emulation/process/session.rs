//! The emulation session: one guest process environment and its exception dispatcher.

use crate::{
    emulation::{
        cpu::{CpuEngine, Register, X86Cpu},
        exception::SehDispatcher,
        layout::AddressLayout,
        loader::{ModuleList, ModuleListKind, ModuleRegistry},
        memory::{GuestMemory, VirtualMemory},
        process::{
            blocks::{
                build_default_seh_frame, build_environment_block, build_loader_data,
                build_process_block, build_process_parameters, build_thread_block,
                map_scratch_regions,
            },
            config::EnvironmentConfig,
        },
    },
    file::{ImageParser, PeParser},
    Result,
};

use strum::IntoEnumIterator;

/// Owns everything one emulated process needs from this layer.
///
/// The session holds the guest memory and CPU so that every operation sees a single,
/// consistent owner; several sessions can coexist without sharing state.
///
/// # Example
///
/// ```rust
/// use ntscope::emulation::{
///     EmulationSession, EnvironmentConfig, GuestMemory, ModuleDescriptor, X86Cpu,
/// };
///
/// let main = ModuleDescriptor::new("toto.exe", "c:\\xxx\\toto.exe", 0x40_0000, 0x40_1000, 0x5000);
/// let config = EnvironmentConfig::new().with_main(main).with_modules(vec![]);
///
/// let mut session = EmulationSession::new(config, GuestMemory::new(), X86Cpu::new())?;
/// session.init_environment()?;
/// session.install_fs_segment();
///
/// assert_eq!(session.registry().len(), 2);
/// # Ok::<(), ntscope::Error>(())
/// ```
pub struct EmulationSession<M = GuestMemory, C = X86Cpu> {
    config: EnvironmentConfig,
    memory: M,
    cpu: C,
    parser: Box<dyn ImageParser>,
    registry: ModuleRegistry,
    lists: Vec<ModuleList>,
    dispatcher: SehDispatcher,
}

impl<M: VirtualMemory, C: CpuEngine> EmulationSession<M, C> {
    /// Creates a session over `memory` and `cpu`. Nothing is written until
    /// [`init_environment`](Self::init_environment).
    ///
    /// # Errors
    /// Returns an error if the configured layout has overlapping regions.
    pub fn new(config: EnvironmentConfig, memory: M, cpu: C) -> Result<Self> {
        config.layout.validate()?;

        let dispatcher = SehDispatcher::new(config.layout.clone(), config.seh_walk_budget);
        Ok(Self {
            config,
            memory,
            cpu,
            parser: Box::new(PeParser),
            registry: ModuleRegistry::new(),
            lists: Vec::new(),
            dispatcher,
        })
    }

    /// Replace the image parser used for path module sources.
    #[must_use]
    pub fn with_parser(mut self, parser: impl ImageParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    /// Build the complete synthetic environment.
    ///
    /// Maps and fills, in order: the thread block, the module slots, the three loader lists,
    /// the process block, the loader data, the environment block, the process parameters,
    /// the default SEH frame and the scratch regions. The dispatch counter is reset.
    ///
    /// Missing modules degrade the result (logged) but do not fail it.
    ///
    /// # Errors
    /// Returns an error if a region cannot be mapped, for instance when the environment was
    /// already built in the same memory.
    pub fn init_environment(&mut self) -> Result<()> {
        let layout = &self.config.layout;
        self.dispatcher.reset();

        build_thread_block(&mut self.memory, layout, layout.default_seh_frame)?;

        self.registry = ModuleRegistry::build(
            &mut self.memory,
            layout,
            self.parser.as_ref(),
            &self.config.main,
            &self.config.auxiliary,
            &self.config.dll_dir,
        )?;

        let canonical = self.config.canonical_order();
        let core = self.config.core_module_names();
        self.lists = ModuleListKind::iter()
            .map(|kind| ModuleList::build(kind, &self.registry, &canonical, core))
            .collect();
        for list in &self.lists {
            list.write(&mut self.memory)?;
        }

        let image_base = self
            .registry
            .main()
            .map(|main| main.descriptor.image_base);
        build_process_block(&mut self.memory, layout, image_base)?;
        build_loader_data(&mut self.memory, layout, &self.registry, core[0])?;
        build_environment_block(&mut self.memory, layout, &self.config.environment)?;
        build_process_parameters(&mut self.memory, layout)?;
        build_default_seh_frame(&mut self.memory, layout)?;
        map_scratch_regions(&mut self.memory, layout)?;

        log::info!(
            "Environment ready: {} modules, thread block {:#x}",
            self.registry.len(),
            layout.thread_block
        );
        Ok(())
    }

    /// Load the configured FS selector and map its base to the thread block.
    pub fn install_fs_segment(&mut self) {
        let selector = self.config.fs_selector;
        self.cpu.set_reg(Register::Fs, selector);
        self.cpu
            .set_segment_base(selector, self.config.layout.thread_block);
    }

    /// Dispatch exception `code`; returns the handler address to resume at.
    ///
    /// # Errors
    /// See [`SehDispatcher::dispatch`].
    pub fn dispatch_exception(&mut self, code: u32) -> Result<u32> {
        self.dispatcher
            .dispatch(&mut self.memory, &mut self.cpu, code)
    }

    /// Dispatch the CPU's pending exception, if any.
    ///
    /// # Errors
    /// See [`SehDispatcher::dispatch`].
    pub fn dispatch_pending(&mut self) -> Result<Option<u32>> {
        match self.cpu.exception() {
            0 => Ok(None),
            code => self.dispatch_exception(code).map(Some),
        }
    }

    /// Resolve the innermost dispatch; returns the instruction pointer to resume at.
    ///
    /// # Errors
    /// See [`SehDispatcher::resolve`].
    pub fn resolve_exception(&mut self) -> Result<u32> {
        self.dispatcher.resolve(&mut self.memory, &mut self.cpu)
    }

    /// Resolve if the CPU stopped at the return trampoline.
    ///
    /// # Errors
    /// See [`SehDispatcher::resolve`].
    pub fn resolve_if_returned(&mut self) -> Result<Option<u32>> {
        if self.is_return_trampoline(self.cpu.reg(Register::Eip)) {
            self.resolve_exception().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Whether `eip` is the return trampoline.
    #[must_use]
    pub fn is_return_trampoline(&self, eip: u32) -> bool {
        self.dispatcher.is_return_trampoline(eip)
    }

    /// The session configuration.
    #[must_use]
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// The address layout.
    #[must_use]
    pub fn layout(&self) -> &AddressLayout {
        &self.config.layout
    }

    /// Registered modules.
    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// The linked loader lists.
    #[must_use]
    pub fn lists(&self) -> &[ModuleList] {
        &self.lists
    }

    /// The linked list of `kind`, once the environment is built.
    #[must_use]
    pub fn list(&self, kind: ModuleListKind) -> Option<&ModuleList> {
        self.lists.iter().find(|list| list.kind() == kind)
    }

    /// The SEH dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &SehDispatcher {
        &self.dispatcher
    }

    /// Guest memory.
    #[must_use]
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Guest memory, mutably.
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// The CPU.
    #[must_use]
    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    /// The CPU, mutably.
    pub fn cpu_mut(&mut self) -> &mut C {
        &mut self.cpu
    }

    /// Give back the memory and CPU.
    #[must_use]
    pub fn into_parts(self) -> (M, C) {
        (self.memory, self.cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::{loader::ModuleDescriptor, EmulationError};

    fn config() -> EnvironmentConfig {
        EnvironmentConfig::new()
            .with_main(ModuleDescriptor::new(
                "toto.exe",
                "c:\\xxx\\toto.exe",
                0x0040_0000,
                0x0040_1000,
                0x5000,
            ))
            .with_modules(vec![
                ModuleDescriptor::new("ntdll.dll", "ntdll.dll", 0x7C90_0000, 0x7C91_2C28, 0xAF000)
                    .into(),
                ModuleDescriptor::new(
                    "kernel32.dll",
                    "kernel32.dll",
                    0x7C80_0000,
                    0x7C80_B64E,
                    0xF6000,
                )
                .into(),
            ])
    }

    #[test]
    fn test_init_environment() {
        let mut session =
            EmulationSession::new(config(), GuestMemory::new(), X86Cpu::new()).unwrap();
        session.init_environment().unwrap();

        assert_eq!(session.registry().len(), 4);
        assert_eq!(session.lists().len(), 3);

        let memory = session.memory();
        assert_eq!(memory.read_u32(0x7ff7_0000).unwrap(), 0x7fff_f000);
        assert_eq!(memory.read_u32(0x7ffd_f008).unwrap(), 0x0040_0000);
        assert_eq!(memory.read_u32(0x7ffd_f00c).unwrap(), 0x0034_1ea0);
        assert_eq!(memory.read_u32(0x0034_1eac).unwrap(), 0x0034_1f00);

        let init = session.list(ModuleListKind::InitializationOrder).unwrap();
        let ntdll = session.registry().get("ntdll.dll").unwrap().slot;
        assert_eq!(init.slots()[0], ntdll);
    }

    #[test]
    fn test_init_twice_fails() {
        let mut session =
            EmulationSession::new(config(), GuestMemory::new(), X86Cpu::new()).unwrap();
        session.init_environment().unwrap();

        assert!(matches!(
            session.init_environment(),
            Err(crate::Error::Emulation(EmulationError::RegionOverlap { .. }))
        ));
    }

    #[test]
    fn test_invalid_layout_rejected() {
        let layout = AddressLayout {
            environment_block: 0x0020_0000,
            ..AddressLayout::default()
        };
        let config = config().with_layout(layout);

        assert!(EmulationSession::new(config, GuestMemory::new(), X86Cpu::new()).is_err());
    }

    #[test]
    fn test_install_fs_segment() {
        let mut session =
            EmulationSession::new(config(), GuestMemory::new(), X86Cpu::new()).unwrap();
        session.install_fs_segment();

        assert_eq!(session.cpu().reg(Register::Fs), 4);
        assert_eq!(session.cpu().segment_base(4), Some(0x7ff7_0000));
    }

    #[test]
    fn test_missing_modules_degrade() {
        let config = EnvironmentConfig::new().with_dll_dir("definitely/not/here");
        let mut session =
            EmulationSession::new(config, GuestMemory::new(), X86Cpu::new()).unwrap();
        session.init_environment().unwrap();

        // Only the sentinel survives
        assert_eq!(session.registry().len(), 1);
        assert_eq!(session.memory().read_u32(0x7ffd_f008).unwrap(), 0);
        let load = session.list(ModuleListKind::LoadOrder).unwrap();
        assert_eq!(load.len(), 1);
    }

    #[test]
    fn test_pending_and_trampoline_helpers() {
        let mut session =
            EmulationSession::new(config(), GuestMemory::new(), X86Cpu::new()).unwrap();
        session.init_environment().unwrap();

        assert_eq!(session.dispatch_pending().unwrap(), None);
        assert_eq!(session.resolve_if_returned().unwrap(), None);
        assert!(session.is_return_trampoline(0x6ead_beef));
    }
}
