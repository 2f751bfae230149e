use std::{any::Any, collections::HashSet, fmt, sync::Arc};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::{
    bus::{controller::BusController, BusLines, RetryBudget, TwoWireBus},
    component::{Component, ComponentCode},
    config::CardConfig,
    device::{OffsetProxy, SharedDevice},
    error::{Error, LastError, Result},
    regs::{EnumerationTable, ModuleCode},
};

/// Per-model card construction, supplied by card support code.
pub trait CardModel {
    /// Model name, also used as the root component's name
    fn name(&self) -> &str;

    /// Card-wide private state for the model
    fn private_state(&self) -> Option<Box<dyn Any + Send>> {
        None
    }

    /// Adds the model's components under `root`.
    ///
    /// Modules missing from the enumeration table are skipped, not errors.
    ///
    /// # Errors
    /// Returns an error if the card cannot be modelled at all
    fn populate(&self, ctx: &CardContext, root: &mut Component) -> Result<()>;
}

/// State shared by every component and attribute of one card
pub struct CardContext {
    device: SharedDevice,
    table: EnumerationTable,
    config: CardConfig,
    model: String,
    private: Mutex<Option<Box<dyn Any + Send>>>,
    last_error: Mutex<Option<LastError>>,
    streams: Mutex<HashSet<usize>>,
}

impl fmt::Debug for CardContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardContext")
            .field("model", &self.model)
            .field("device", &self.device)
            .field("modules", &self.table.len())
            .finish_non_exhaustive()
    }
}

impl CardContext {
    /// Context over an already scanned enumeration table
    pub fn new(
        device: SharedDevice,
        table: EnumerationTable,
        config: CardConfig,
        model: impl Into<String>,
    ) -> Self {
        Self {
            device,
            table,
            config,
            model: model.into(),
            private: Mutex::new(None),
            last_error: Mutex::new(None),
            streams: Mutex::new(HashSet::new()),
        }
    }

    /// Register window of the card
    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    /// Register modules found on the card
    pub fn table(&self) -> &EnumerationTable {
        &self.table
    }

    /// Runtime configuration
    pub fn config(&self) -> &CardConfig {
        &self.config
    }

    /// Card model name
    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Base offset of the `index`-th instance of `module`
    pub fn address(&self, module: ModuleCode, index: usize) -> Option<u64> {
        self.table.address(module, index)
    }

    /// Register layout version of the `index`-th instance of `module`
    pub fn version(&self, module: ModuleCode, index: usize) -> Option<u8> {
        self.table.version(module, index)
    }

    /// The register window of one module instance, addressed from its base
    pub fn module_window(
        &self,
        module: ModuleCode,
        index: usize,
    ) -> Option<OffsetProxy<SharedDevice>> {
        let base = self.address(module, index)?;
        Some(OffsetProxy::new(Arc::clone(&self.device), base))
    }

    /// Bit-banged bus on the `index`-th two-wire line register, with the
    /// configured settle delay
    pub fn two_wire_bus(&self, index: usize, clock_mask: u32, data_mask: u32) -> Option<TwoWireBus> {
        let register = self.address(ModuleCode::TwoWireBus, index)?;
        let lines = BusLines::new(register, clock_mask, data_mask);
        Some(TwoWireBus::with_settle(
            Arc::clone(&self.device),
            lines,
            self.config.bus.settle(),
        ))
    }

    /// Attempts allowed to a two-wire "wait for ready" loop
    pub fn ready_budget(&self) -> RetryBudget {
        self.config.bus.ready_budget()
    }

    /// The `index`-th register-mediated bus controller
    pub fn bus_controller(&self, index: usize) -> Option<BusController> {
        let base = self.address(ModuleCode::BusController, index)?;
        Some(BusController::new(
            Arc::clone(&self.device),
            base,
            self.config.controller.budget(),
        ))
    }

    /// Runs `f` on the card's private state if it is a `T`
    pub fn with_private<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.private.lock();
        let result = guard
            .as_deref_mut()
            .and_then(|p| p.downcast_mut::<T>())
            .map(f);
        result
    }

    fn set_private(&self, state: Option<Box<dyn Any + Send>>) {
        *self.private.lock() = state;
    }

    /// Records an error absorbed by orchestration code
    pub fn set_last_error(&self, err: &Error) {
        *self.last_error.lock() = Some(LastError::from(err));
    }

    /// Returns and clears the last absorbed error
    pub fn take_last_error(&self) -> Option<LastError> {
        self.last_error.lock().take()
    }

    /// Takes exclusive use of capture stream `index`
    ///
    /// # Errors
    /// Returns [`Error::Busy`] if the stream is already locked
    pub fn lock_stream(&self, index: usize) -> Result<StreamGuard<'_>> {
        if !self.streams.lock().insert(index) {
            return Err(Error::Busy(format!("stream {index}")));
        }
        debug!("stream {index} locked");
        Ok(StreamGuard { ctx: self, index })
    }
}

/// Exclusive use of one capture stream; released on drop
#[derive(Debug)]
pub struct StreamGuard<'a> {
    ctx: &'a CardContext,
    index: usize,
}

impl StreamGuard<'_> {
    /// Locked stream index
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        let _removed = self.ctx.streams.lock().remove(&self.index);
        debug!("stream {} unlocked", self.index);
    }
}

/// An opened capture card: its context and its component tree
#[derive(Debug)]
pub struct Card {
    context: CardContext,
    root: Component,
}

impl Card {
    /// Scans the card, builds the model's component tree and initialises it.
    ///
    /// Hooks that fail during post-initialisation leave their feature
    /// unavailable and are recorded as the last error.
    ///
    /// # Errors
    /// Returns an error if the enumeration table cannot be read or the model
    /// rejects the card
    pub fn open(device: SharedDevice, config: CardConfig, model: &dyn CardModel) -> Result<Self> {
        let table = EnumerationTable::scan(&*device)?;
        let context = CardContext::new(device, table, config, model.name());
        context.set_private(model.private_state());

        let mut root = Component::new(ComponentCode::Root, model.name());
        if let Err(err) = model.populate(&context, &mut root) {
            warn!("{}: populate failed: {err}", model.name());
            root.dispose(&context);
            return Err(err);
        }
        let failures = root.post_initialize(&context);
        if failures > 0 {
            warn!("{}: {failures} components failed to initialise", model.name());
        }
        info!(
            "opened {} card: {} register modules, {} components",
            model.name(),
            context.table.len(),
            root.descendants().len()
        );
        Ok(Self { context, root })
    }

    /// Opens the first capture card on the PCI bus, or the one named by the
    /// configuration, through the configured backend
    ///
    /// # Errors
    /// Returns an error if no card is found or its registers cannot be mapped
    #[cfg(feature = "hw")]
    pub fn open_pci(config: CardConfig, model: &dyn CardModel) -> Result<Self> {
        let hw = crate::device::hardware::PciHwDevice::open(&config.pci)?;
        if config.pci.reset_on_open {
            hw.reset()?;
        }
        let adaptor = hw.adaptor(config.pci.backend)?;
        Self::open(adaptor, config, model)
    }

    /// Opens a card simulated behind a register RPC server
    ///
    /// # Errors
    /// Returns an error if the server is unreachable
    pub fn open_emulated(
        server: impl std::net::ToSocketAddrs,
        config: CardConfig,
        model: &dyn CardModel,
    ) -> Result<Self> {
        let dev = crate::device::emulated::EmulatedDevice::connect(server)?;
        Self::open(Arc::new(dev), config, model)
    }

    /// Disposes the component tree and releases the card
    pub fn close(self) {
        drop(self);
    }

    fn dispose_tree(&mut self) {
        let root = std::mem::replace(
            &mut self.root,
            Component::new(ComponentCode::Root, self.context.model.as_str()),
        );
        root.dispose(&self.context);
    }

    /// Card context
    pub fn context(&self) -> &CardContext {
        &self.context
    }

    /// Root component
    pub fn root(&self) -> &Component {
        &self.root
    }

    /// Context and mutable root together, for setting values
    pub fn parts_mut(&mut self) -> (&CardContext, &mut Component) {
        (&self.context, &mut self.root)
    }

    /// Rescans the enumeration table after a firmware reload and lets every
    /// component re-resolve its registers. Returns the number of components
    /// that failed to do so.
    ///
    /// # Errors
    /// Returns an error if the enumeration table cannot be read
    pub fn reload_enumeration(&mut self) -> Result<usize> {
        self.context.table = EnumerationTable::scan(&*self.context.device)?;
        Ok(self.root.update_register_base(&self.context))
    }

    /// Resets every component, returning the number of failures
    pub fn reset(&mut self) -> usize {
        self.root.reset(&self.context)
    }

    /// Applies every component's defaults, returning the number of failures
    pub fn apply_defaults(&mut self) -> usize {
        self.root.apply_defaults(&self.context)
    }

    /// Takes exclusive use of capture stream `index`
    ///
    /// # Errors
    /// Returns [`Error::Busy`] if the stream is already locked
    pub fn lock_stream(&self, index: usize) -> Result<StreamGuard<'_>> {
        self.context.lock_stream(index)
    }

    /// Records an error absorbed by orchestration code
    pub fn set_last_error(&self, err: &Error) {
        self.context.set_last_error(err);
    }

    /// Returns and clears the last absorbed error
    pub fn take_last_error(&self) -> Option<LastError> {
        self.context.take_last_error()
    }
}

impl Drop for Card {
    fn drop(&mut self) {
        self.dispose_tree();
        info!("closed {} card", self.context.model);
    }
}
