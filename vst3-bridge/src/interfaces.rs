//! Capability interfaces a hosted plugin exposes
//!
//! A plugin is seen as a set of independent, separately optional capabilities:
//! a [`Component`] (always present), a [`Processor`] and a [`Controller`]
//! (either may be missing) and, on demand, a [`PlugView`]. The VST3 backend
//! implements these over COM pointers; anything else that implements them
//! (in-process plugins, test doubles) can be hosted the same way.
//!
//! Implementations report refusals as [`Error::PluginRejected`](crate::Error)
//! and are never called concurrently on the same instance.

use crate::{
    audio::ProcessData,
    editor::{EditorFrame, PlatformType, ViewRect, WindowHandle},
    error::Result,
    events::EventSender,
    host::HostContext,
    module::{ClassDescriptor, ClassId},
    parameters::{ParamId, ParameterDescriptor},
    state::MemoryStream,
};

pub use crate::internal::vst3::ConnectionPoint;

/// Bus media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// Audio bus
    Audio,
    /// Note / MIDI event bus
    Event,
}

/// Bus direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusDirection {
    /// Into the plugin
    Input,
    /// Out of the plugin
    Output,
}

/// Description of one bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusInfo {
    /// Display name
    pub name: String,
    /// Channel count (audio buses only)
    pub channel_count: usize,
    /// Whether this is a main (as opposed to auxiliary) bus
    pub is_main: bool,
}

/// Processing mode requested at setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    /// Driven by a live audio callback
    Realtime,
    /// Driven faster than real time
    Offline,
}

/// Sample format requested at setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleSize {
    /// 32-bit float
    Sample32,
}

/// Setup descriptor handed to the processor before activation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSetup {
    /// Processing mode
    pub mode: ProcessMode,
    /// Sample format
    pub sample_size: SampleSize,
    /// Largest block the host will ever pass
    pub max_block_size: usize,
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Most events (notes and parameter points together) one block carries
    pub max_events: usize,
}

impl ProcessSetup {
    /// Real-time, 32-bit float setup
    pub fn realtime(sample_rate: f64, max_block_size: usize, max_events: usize) -> Self {
        Self {
            mode: ProcessMode::Realtime,
            sample_size: SampleSize::Sample32,
            max_block_size,
            sample_rate,
            max_events,
        }
    }

    /// Offline (faster than real time) variant of [`realtime`](Self::realtime)
    pub fn offline(sample_rate: f64, max_block_size: usize, max_events: usize) -> Self {
        Self {
            mode: ProcessMode::Offline,
            ..Self::realtime(sample_rate, max_block_size, max_events)
        }
    }
}

/// Class factory of a binary module
pub trait PluginFactory: Send + Sync {
    /// Vendor reported by the factory
    fn vendor(&self) -> String;

    /// All classes the factory can create
    fn classes(&self) -> Vec<ClassDescriptor>;

    /// Create the processing component of a class
    fn create_component(&self, class_id: &ClassId) -> Result<Box<dyn Component>>;

    /// Create a separate edit controller by class id
    fn create_controller(&self, class_id: &ClassId) -> Result<Box<dyn Controller>>;
}

/// The component half of a plugin: lifecycle, buses and state
pub trait Component: Send {
    /// Initialize against the host context
    fn initialize(&mut self, host: &HostContext) -> Result<()>;

    /// Release everything acquired in `initialize`
    fn terminate(&mut self) -> Result<()>;

    /// Class id of the separate edit controller, if the plugin has one
    fn controller_class_id(&self) -> Option<ClassId>;

    /// Number of buses of the given kind
    fn bus_count(&self, media: MediaType, direction: BusDirection) -> usize;

    /// Description of one bus
    fn bus_info(&self, media: MediaType, direction: BusDirection, index: usize) -> Option<BusInfo>;

    /// Enable or disable one bus
    fn activate_bus(
        &mut self,
        media: MediaType,
        direction: BusDirection,
        index: usize,
        active: bool,
    ) -> Result<()>;

    /// Switch the component on or off
    fn set_active(&mut self, active: bool) -> Result<()>;

    /// Serialize the component state into `stream`
    fn get_state(&mut self, stream: &mut MemoryStream) -> Result<()>;

    /// Restore the component state from `stream`
    fn set_state(&mut self, stream: &mut MemoryStream) -> Result<()>;

    /// Query the audio processor capability
    fn processor(&mut self) -> Option<Box<dyn Processor>>;

    /// Query an edit controller implemented by the component itself
    ///
    /// The returned controller shares the component's lifecycle and must not
    /// be initialized a second time.
    fn embedded_controller(&mut self) -> Option<Box<dyn Controller>> {
        None
    }

    /// Message endpoint to pair with a separately created controller
    fn connection_point(&self) -> Option<ConnectionPoint> {
        None
    }
}

/// The real-time half of a plugin
pub trait Processor: Send {
    /// Negotiate sample rate, block size and format
    fn setup_processing(&mut self, setup: &ProcessSetup) -> Result<()>;

    /// Start or stop processing
    fn set_processing(&mut self, processing: bool) -> Result<()>;

    /// Render one block. Called on the audio thread: must not block.
    fn process(&mut self, data: &mut ProcessData<'_>) -> Result<()>;

    /// Reported processing latency
    fn latency_samples(&self) -> u32 {
        0
    }

    /// Events handed to `process` that the plugin binding could not carry
    fn dropped_events(&self) -> u64 {
        0
    }
}

/// The edit controller half of a plugin: parameters and the editor
pub trait Controller: Send {
    /// Initialize against the host context
    fn initialize(&mut self, host: &HostContext) -> Result<()>;

    /// Release everything acquired in `initialize`
    fn terminate(&mut self) -> Result<()>;

    /// Number of parameters
    fn parameter_count(&self) -> usize;

    /// Descriptor of the parameter at `index` in the current list order
    fn parameter_info(&self, index: usize) -> Option<ParameterDescriptor>;

    /// Current normalized value
    fn get_normalized(&self, id: ParamId) -> f64;

    /// Set a normalized value
    fn set_normalized(&mut self, id: ParamId, value: f64) -> Result<()>;

    /// Convert a normalized value to its plain representation
    fn normalized_to_plain(&self, _id: ParamId, value: f64) -> f64 {
        value
    }

    /// Follow the component state after it was restored
    fn set_component_state(&mut self, stream: &mut MemoryStream) -> Result<()>;

    /// Install the sink that receives edits made in the plugin's own GUI
    fn set_edit_sink(&mut self, _sink: EventSender) {}

    /// Create the editor view, if the plugin has one
    fn create_view(&mut self) -> Option<Box<dyn PlugView>>;

    /// Message endpoint to pair with the component
    fn connection_point(&self) -> Option<ConnectionPoint> {
        None
    }
}

/// A plugin editor view
pub trait PlugView: Send {
    /// Whether the view can be embedded into the given platform window type
    fn is_platform_type_supported(&self, platform: PlatformType) -> bool;

    /// Embed the view into `parent`
    fn attached(&mut self, parent: WindowHandle, platform: PlatformType) -> Result<()>;

    /// Remove the view from its parent window
    fn removed(&mut self) -> Result<()>;

    /// Natural rectangle of the view
    fn size(&self) -> Result<ViewRect>;

    /// Install or clear the frame the view uses to request resizes
    fn set_frame(&mut self, frame: Option<EditorFrame>) -> Result<()>;
}
