//! Host context: the process-wide object plugins call back into
//!
//! A [`HostContext`] carries the host identity reported to plugins, the
//! audio defaults, the window resize primitive and the last-error slot. One
//! global context can be managed with [`HostContext::init`] and
//! [`HostContext::shutdown`]; independent contexts are built with
//! [`HostContext::builder`].
//!
//! Plugin instances only hold a [`Weak`](std::sync::Weak) reference. Once
//! every `Arc` to a context is dropped, control operations on its instances
//! fail with [`Error::NotInitialized`].

use crate::{
    config::HostConfig,
    discovery::{self, PluginInfo, Scanner},
    editor::{ResizeHandler, WindowHandle},
    error::{Error, Result},
    internal::com_implementations::HostApplicationHandle,
    module::{BinaryModule, ClassId},
    plugin::PluginInstance,
    window::NativeResizer,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static GLOBAL: Lazy<Mutex<Option<Arc<HostContext>>>> = Lazy::new(|| Mutex::new(None));

/// Shared host state
pub struct HostContext {
    config: HostConfig,
    application: HostApplicationHandle,
    resize_handler: Box<dyn ResizeHandler>,
    last_error: Mutex<String>,
}

impl HostContext {
    /// Builder for an independent context
    pub fn builder() -> HostContextBuilder {
        HostContextBuilder::default()
    }

    /// Global context, created with default settings on first call
    pub fn init() -> Result<Arc<HostContext>> {
        Self::init_with(HostConfig::default())
    }

    /// Global context, created from `config` if none exists yet
    ///
    /// An existing global context is returned unchanged.
    pub fn init_with(config: HostConfig) -> Result<Arc<HostContext>> {
        let mut global = GLOBAL.lock();
        if let Some(host) = global.as_ref() {
            log::debug!("Host context already initialized");
            return Ok(Arc::clone(host));
        }
        let host = Self::builder().config(config).build()?;
        log::info!("Host context '{}' initialized", host.name());
        *global = Some(Arc::clone(&host));
        Ok(host)
    }

    /// The global context, if initialized
    pub fn global() -> Option<Arc<HostContext>> {
        GLOBAL.lock().clone()
    }

    /// Release the global context. Returns `false` if there was none.
    ///
    /// Instances created from it keep working only while some other `Arc`
    /// to the context is still alive.
    pub fn shutdown() -> bool {
        let released = GLOBAL.lock().take();
        if released.is_some() {
            log::info!("Host context shut down");
        }
        released.is_some()
    }

    /// Host name reported to plugins
    pub fn name(&self) -> &str {
        &self.config.host_name
    }

    /// Configuration the context was built with
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Message of the most recent failed control-thread operation
    pub fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }

    /// Overwrite the last-error slot
    pub fn set_last_error(&self, message: impl Into<String>) {
        *self.last_error.lock() = message.into();
    }

    /// Clear the last-error slot
    pub fn clear_last_error(&self) {
        self.last_error.lock().clear();
    }

    /// Record a failed result in the last-error slot and pass it through
    pub(crate) fn record<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            log::debug!("Operation failed: {}", e);
            self.set_last_error(e.to_string());
        }
        result
    }

    pub(crate) fn application(&self) -> &HostApplicationHandle {
        &self.application
    }

    /// Resize a native window through the configured resize handler
    pub fn resize_window(&self, handle: WindowHandle, width: i32, height: i32) -> Result<()> {
        self.record(self.resize_handler.resize(handle, width, height))
    }

    /// Load a VST3 bundle (or its binary)
    pub fn load_module<P: AsRef<Path>>(&self, path: P) -> Result<Arc<BinaryModule>> {
        self.record(BinaryModule::load(path))
    }

    /// Load a bundle and create an instance of its first audio-module class
    pub fn load_plugin<P: AsRef<Path>>(self: &Arc<Self>, path: P) -> Result<PluginInstance> {
        let module = self.load_module(path)?;
        PluginInstance::new(self, module, None)
    }

    /// Load a bundle and create an instance of a specific class
    pub fn load_plugin_class<P: AsRef<Path>>(
        self: &Arc<Self>,
        path: P,
        class: &ClassId,
    ) -> Result<PluginInstance> {
        let module = self.load_module(path)?;
        PluginInstance::new(self, module, Some(class))
    }

    /// Recursively scan `dir` for bundles, calling `callback` once per
    /// audio-module class. Returns the number of classes reported.
    pub fn scan_directory<P, F>(&self, dir: P, callback: F) -> Result<usize>
    where
        P: AsRef<Path>,
        F: FnMut(&PluginInfo),
    {
        self.record(Scanner::new().scan_directory(dir.as_ref(), callback))
    }

    /// Scan the platform's standard VST3 directories plus the configured scan
    /// paths, skipping missing ones
    pub fn scan_standard_locations<F>(&self, callback: F) -> Result<usize>
    where
        F: FnMut(&PluginInfo),
    {
        let mut locations = discovery::standard_locations();
        locations.extend(self.config.scan_paths.iter().cloned());
        Ok(Scanner::new().scan_locations(&locations, callback))
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("config", &self.config)
            .field("last_error", &self.last_error())
            .finish()
    }
}

/// Message of the global context's most recent failure
///
/// `None` when no global context is initialized.
pub fn last_error() -> Option<String> {
    HostContext::global().map(|host| host.last_error())
}

/// Builder for [`HostContext`]
#[derive(Default)]
pub struct HostContextBuilder {
    config: HostConfig,
    resize_handler: Option<Box<dyn ResizeHandler>>,
}

impl HostContextBuilder {
    /// Replace the whole configuration
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Host name reported to plugins
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.host_name = name.into();
        self
    }

    /// Default sample rate
    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.config.sample_rate = rate;
        self
    }

    /// Default maximum block size
    pub fn max_block_size(mut self, size: usize) -> Self {
        self.config.max_block_size = size;
        self
    }

    /// Capacity of each instance's event queue
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.event_queue_capacity = capacity;
        self
    }

    /// Add an extra directory for standard-location scans
    pub fn add_scan_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.scan_paths.push(PathBuf::from(path.as_ref()));
        self
    }

    /// Replace the native window resizer
    pub fn resize_handler(mut self, handler: impl ResizeHandler + 'static) -> Self {
        self.resize_handler = Some(Box::new(handler));
        self
    }

    /// Build the context
    pub fn build(self) -> Result<Arc<HostContext>> {
        self.config.validate()?;
        let application = HostApplicationHandle::new(&self.config.host_name).ok_or_else(|| {
            Error::NotInitialized("host application object unavailable".to_string())
        })?;
        Ok(Arc::new(HostContext {
            resize_handler: self
                .resize_handler
                .unwrap_or_else(|| Box::new(NativeResizer)),
            application,
            config: self.config,
            last_error: Mutex::new(String::new()),
        }))
    }
}
