//! VST3 binary backend: the capability interfaces over COM pointers

use crate::{
    audio,
    editor::{self, EditorFrame, PlatformType, WindowHandle},
    error::{Error, Result},
    events::{MidiEvent, TimedMidiEvent},
    host::HostContext,
    interfaces::{self, BusDirection, Component, Controller, MediaType, PlugView, PluginFactory, Processor},
    module::{ClassDescriptor, ClassId},
    parameters::{ParamId, ParameterDescriptor, ParameterFlags},
    state::MemoryStream,
};
use libloading::{Library, Symbol};
use std::ffi::c_void;
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use vst3::Steinberg::Vst::BusDirections_::*;
use vst3::Steinberg::Vst::Event_::EventTypes_::*;
use vst3::Steinberg::Vst::MediaTypes_::*;
use vst3::Steinberg::Vst::*;
use vst3::Steinberg::*;
use vst3::{ComPtr, ComWrapper, Interface};

use super::com_implementations::{
    ComponentHandler, HostEventList, HostStream, ParameterChanges, PlugFrame,
    PLUGIN_POINTS_PER_QUEUE,
};
use super::utils::{c_str_to_string, guid_to_tuid, tuid_to_bytes, vst_string_to_string};

fn check(result: tresult, what: &str) -> Result<()> {
    if result == kResultOk {
        Ok(())
    } else {
        Err(Error::PluginRejected(format!(
            "{} returned {:#x}",
            what, result
        )))
    }
}

fn media_type(media: MediaType) -> i32 {
    match media {
        MediaType::Audio => kAudio as i32,
        MediaType::Event => kEvent as i32,
    }
}

fn bus_direction(direction: BusDirection) -> i32 {
    match direction {
        BusDirection::Input => kInput as i32,
        BusDirection::Output => kOutput as i32,
    }
}

/// Run a plugin call that reads or writes a state stream
fn with_stream(stream: &mut MemoryStream, f: impl FnOnce(*mut IBStream) -> tresult) -> tresult {
    let wrapper = ComWrapper::new(HostStream::new(std::mem::take(stream)));
    let ptr = wrapper
        .as_com_ref::<IBStream>()
        .map(|s| s.as_ptr())
        .unwrap_or(ptr::null_mut());
    let result = f(ptr);
    *stream = wrapper.take();
    result
}

/// Loaded module binary with its entry/exit protocol
struct ModuleLibrary {
    exit: Option<unsafe extern "C" fn() -> bool>,
    library: Library,
}

impl ModuleLibrary {
    fn open(binary: &Path) -> Result<Self> {
        log::debug!("Loading module binary {}", binary.display());
        // SAFETY: loading a plugin binary runs its static initializers; this is
        // the trust boundary every host accepts.
        let library = unsafe { Library::new(binary) }.map_err(|e| {
            Error::IoFailure(format!("Failed to load library {}: {}", binary.display(), e))
        })?;

        unsafe { Self::enter(&library)? };

        #[cfg(target_os = "linux")]
        const EXIT: &[u8] = b"ModuleExit\0";
        #[cfg(target_os = "macos")]
        const EXIT: &[u8] = b"bundleExit\0";
        #[cfg(target_os = "windows")]
        const EXIT: &[u8] = b"ExitDll\0";

        let exit = unsafe {
            library
                .get::<unsafe extern "C" fn() -> bool>(EXIT)
                .ok()
                .map(|symbol| *symbol)
        };
        Ok(Self { exit, library })
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    unsafe fn enter(library: &Library) -> Result<()> {
        #[cfg(target_os = "linux")]
        const ENTRY: &[u8] = b"ModuleEntry\0";
        #[cfg(target_os = "macos")]
        const ENTRY: &[u8] = b"bundleEntry\0";

        let entry: Symbol<unsafe extern "C" fn(*mut c_void) -> bool> = library
            .get(ENTRY)
            .map_err(|e| Error::NotFound(format!("Module entry point not found: {}", e)))?;
        if !entry(ptr::null_mut()) {
            return Err(Error::rejected("module entry"));
        }
        Ok(())
    }

    #[cfg(target_os = "windows")]
    unsafe fn enter(library: &Library) -> Result<()> {
        // InitDll is optional on Windows.
        if let Ok(entry) = library.get::<unsafe extern "C" fn() -> bool>(b"InitDll\0") {
            if !entry() {
                return Err(Error::rejected("InitDll"));
            }
        }
        Ok(())
    }

    unsafe fn plugin_factory(&self) -> Result<ComPtr<IPluginFactory>> {
        type GetPluginFactoryFunc = unsafe extern "C" fn() -> *mut IPluginFactory;
        let get_factory: Symbol<GetPluginFactoryFunc> =
            self.library.get(b"GetPluginFactory\0").map_err(|e| {
                Error::NotFound(format!("Failed to find GetPluginFactory: {}", e))
            })?;
        ComPtr::<IPluginFactory>::from_raw(get_factory())
            .ok_or_else(|| Error::rejected("GetPluginFactory returned null"))
    }
}

impl Drop for ModuleLibrary {
    fn drop(&mut self) {
        if let Some(exit) = self.exit {
            // SAFETY: every COM object from this module holds an Arc to it, so
            // nothing of the module is alive any more.
            if !unsafe { exit() } {
                log::warn!("Module exit function reported failure");
            }
        }
    }
}

/// Open a module binary and wrap its class factory
pub(crate) fn load_factory(binary: &Path) -> Result<Box<dyn PluginFactory>> {
    let library = Arc::new(ModuleLibrary::open(binary)?);
    let factory = unsafe { library.plugin_factory()? };
    let vst3_factory = Vst3Factory::new(factory, library);
    log::info!(
        "Loaded {} ({} classes)",
        binary.display(),
        vst3_factory.classes.len()
    );
    Ok(Box::new(vst3_factory))
}

struct Vst3Factory {
    factory: ComPtr<IPluginFactory>,
    vendor: String,
    classes: Vec<ClassDescriptor>,
    library: Arc<ModuleLibrary>,
}

// SAFETY: factories are required to be callable from any thread.
unsafe impl Send for Vst3Factory {}
unsafe impl Sync for Vst3Factory {}

impl Vst3Factory {
    fn new(factory: ComPtr<IPluginFactory>, library: Arc<ModuleLibrary>) -> Self {
        let vendor = unsafe {
            let mut info: PFactoryInfo = std::mem::zeroed();
            if factory.getFactoryInfo(&mut info) == kResultOk {
                c_str_to_string(&info.vendor)
            } else {
                String::new()
            }
        };
        let classes = unsafe { Self::enumerate(&factory, &vendor) };
        Self {
            factory,
            vendor,
            classes,
            library,
        }
    }

    unsafe fn enumerate(factory: &ComPtr<IPluginFactory>, vendor: &str) -> Vec<ClassDescriptor> {
        let factory2 = factory.cast::<IPluginFactory2>();
        let mut classes = Vec::new();

        for i in 0..factory.countClasses() {
            if let Some(ref factory2) = factory2 {
                let mut info: PClassInfo2 = std::mem::zeroed();
                if factory2.getClassInfo2(i, &mut info) == kResultOk {
                    let class_vendor = c_str_to_string(&info.vendor);
                    classes.push(ClassDescriptor {
                        id: ClassId(tuid_to_bytes(&info.cid)),
                        category: c_str_to_string(&info.category),
                        name: c_str_to_string(&info.name),
                        sub_categories: c_str_to_string(&info.subCategories),
                        vendor: if class_vendor.is_empty() {
                            vendor.to_string()
                        } else {
                            class_vendor
                        },
                        version: c_str_to_string(&info.version),
                    });
                    continue;
                }
            }

            let mut info: PClassInfo = std::mem::zeroed();
            if factory.getClassInfo(i, &mut info) == kResultOk {
                classes.push(ClassDescriptor {
                    id: ClassId(tuid_to_bytes(&info.cid)),
                    category: c_str_to_string(&info.category),
                    name: c_str_to_string(&info.name),
                    sub_categories: String::new(),
                    vendor: vendor.to_string(),
                    version: String::new(),
                });
            } else {
                log::warn!("Factory refused class info for index {}", i);
            }
        }
        classes
    }

    unsafe fn create<I: Interface>(&self, class_id: &ClassId) -> Result<ComPtr<I>> {
        let cid = guid_to_tuid(class_id.as_bytes());
        let iid = guid_to_tuid(&I::IID);
        let mut obj: *mut c_void = ptr::null_mut();
        let result = self
            .factory
            .createInstance(cid.as_ptr(), iid.as_ptr(), &mut obj);
        if result != kResultOk || obj.is_null() {
            return Err(Error::PluginRejected(format!(
                "createInstance for class {} returned {:#x}",
                class_id, result
            )));
        }
        ComPtr::from_raw(obj as *mut I)
            .ok_or_else(|| Error::rejected(format!("createInstance for class {}", class_id)))
    }
}

impl PluginFactory for Vst3Factory {
    fn vendor(&self) -> String {
        self.vendor.clone()
    }

    fn classes(&self) -> Vec<ClassDescriptor> {
        self.classes.clone()
    }

    fn create_component(&self, class_id: &ClassId) -> Result<Box<dyn Component>> {
        let component = unsafe { self.create::<IComponent>(class_id)? };
        Ok(Box::new(Vst3Component {
            component,
            library: Arc::clone(&self.library),
        }))
    }

    fn create_controller(&self, class_id: &ClassId) -> Result<Box<dyn Controller>> {
        let controller = unsafe { self.create::<IEditController>(class_id)? };
        Ok(Box::new(Vst3Controller::new(
            controller,
            Arc::clone(&self.library),
        )))
    }
}

/// Message channel between a component and a separately created controller
pub struct ConnectionPoint(ComPtr<IConnectionPoint>);

// SAFETY: only used from the control thread that owns the instance.
unsafe impl Send for ConnectionPoint {}

impl ConnectionPoint {
    pub(crate) fn connect(&self, other: &ConnectionPoint) -> Result<()> {
        check(unsafe { self.0.connect(other.0.as_ptr()) }, "connect")
    }

    pub(crate) fn disconnect(&self, other: &ConnectionPoint) -> Result<()> {
        check(unsafe { self.0.disconnect(other.0.as_ptr()) }, "disconnect")
    }
}

struct Vst3Component {
    component: ComPtr<IComponent>,
    library: Arc<ModuleLibrary>,
}

// SAFETY: the instance owning this is moved between threads but never used
// from two at once.
unsafe impl Send for Vst3Component {}

impl Component for Vst3Component {
    fn initialize(&mut self, host: &HostContext) -> Result<()> {
        let context = host.application().as_ptr();
        check(
            unsafe { self.component.initialize(context) },
            "IComponent::initialize",
        )
    }

    fn terminate(&mut self) -> Result<()> {
        check(unsafe { self.component.terminate() }, "IComponent::terminate")
    }

    fn controller_class_id(&self) -> Option<ClassId> {
        let mut tuid: TUID = [0; 16];
        let result = unsafe { self.component.getControllerClassId(&mut tuid) };
        let bytes = tuid_to_bytes(&tuid);
        (result == kResultOk && bytes != [0; 16]).then_some(ClassId(bytes))
    }

    fn bus_count(&self, media: MediaType, direction: BusDirection) -> usize {
        let count = unsafe {
            self.component
                .getBusCount(media_type(media), bus_direction(direction))
        };
        count.max(0) as usize
    }

    fn bus_info(
        &self,
        media: MediaType,
        direction: BusDirection,
        index: usize,
    ) -> Option<interfaces::BusInfo> {
        unsafe {
            let mut info: BusInfo = std::mem::zeroed();
            let result = self.component.getBusInfo(
                media_type(media),
                bus_direction(direction),
                index as i32,
                &mut info,
            );
            (result == kResultOk).then(|| interfaces::BusInfo {
                name: vst_string_to_string(&info.name),
                channel_count: info.channelCount.max(0) as usize,
                is_main: info.busType == BusTypes_::kMain as i32,
            })
        }
    }

    fn activate_bus(
        &mut self,
        media: MediaType,
        direction: BusDirection,
        index: usize,
        active: bool,
    ) -> Result<()> {
        let result = unsafe {
            self.component.activateBus(
                media_type(media),
                bus_direction(direction),
                index as i32,
                active as TBool,
            )
        };
        check(result, "IComponent::activateBus")
    }

    fn set_active(&mut self, active: bool) -> Result<()> {
        check(
            unsafe { self.component.setActive(active as TBool) },
            "IComponent::setActive",
        )
    }

    fn get_state(&mut self, stream: &mut MemoryStream) -> Result<()> {
        let result = with_stream(stream, |ptr| unsafe { self.component.getState(ptr) });
        check(result, "IComponent::getState")
    }

    fn set_state(&mut self, stream: &mut MemoryStream) -> Result<()> {
        let result = with_stream(stream, |ptr| unsafe { self.component.setState(ptr) });
        check(result, "IComponent::setState")
    }

    fn processor(&mut self) -> Option<Box<dyn Processor>> {
        let processor = self.component.cast::<IAudioProcessor>()?;
        let inputs = self.bus_count(MediaType::Audio, BusDirection::Input);
        let outputs = self.bus_count(MediaType::Audio, BusDirection::Output);
        Some(Box::new(Vst3Processor::new(
            processor,
            inputs,
            outputs,
            Arc::clone(&self.library),
        )))
    }

    fn embedded_controller(&mut self) -> Option<Box<dyn Controller>> {
        let controller = self.component.cast::<IEditController>()?;
        Some(Box::new(Vst3Controller::new(
            controller,
            Arc::clone(&self.library),
        )))
    }

    fn connection_point(&self) -> Option<ConnectionPoint> {
        self.component.cast::<IConnectionPoint>().map(ConnectionPoint)
    }
}

struct Vst3Processor {
    processor: ComPtr<IAudioProcessor>,
    process_mode: i32,
    input_buses: Vec<AudioBusBuffers>,
    output_buses: Vec<AudioBusBuffers>,
    context: ProcessContext,
    input_events: ComWrapper<HostEventList>,
    output_events: ComWrapper<HostEventList>,
    input_changes: ComWrapper<ParameterChanges>,
    output_changes: ComWrapper<ParameterChanges>,
    dropped_events: u64,
    library: Arc<ModuleLibrary>,
}

// SAFETY: see Vst3Component; the process-time COM objects are only touched by
// the thread currently calling `process`.
unsafe impl Send for Vst3Processor {}

impl Vst3Processor {
    fn new(
        processor: ComPtr<IAudioProcessor>,
        input_buses: usize,
        output_buses: usize,
        library: Arc<ModuleLibrary>,
    ) -> Self {
        // SAFETY: AudioBusBuffers and ProcessContext are plain C structs.
        let empty_bus: AudioBusBuffers = unsafe { std::mem::zeroed() };
        Self {
            processor,
            process_mode: ProcessModes_::kRealtime as i32,
            input_buses: vec![empty_bus; input_buses],
            output_buses: vec![empty_bus; output_buses],
            context: unsafe { std::mem::zeroed() },
            input_events: ComWrapper::new(HostEventList::with_capacity(0)),
            output_events: ComWrapper::new(HostEventList::with_capacity(0)),
            input_changes: ComWrapper::new(ParameterChanges::with_capacity(0, 0)),
            output_changes: ComWrapper::new(ParameterChanges::with_capacity(0, 0)),
            dropped_events: 0,
            library,
        }
    }

    fn update_context(&mut self, context: &audio::ProcessContext) {
        use vst3::Steinberg::Vst::ProcessContext_::StatesAndFlags_::*;

        let ctx = &mut self.context;
        ctx.sampleRate = context.sample_rate;
        ctx.projectTimeSamples = context.project_time_samples;
        ctx.projectTimeMusic = context.project_time_music;
        ctx.tempo = context.tempo;
        ctx.timeSigNumerator = context.time_sig_numerator;
        ctx.timeSigDenominator = context.time_sig_denominator;
        ctx.state = kTempoValid | kTimeSigValid | kProjectTimeMusicValid;
        if context.playing {
            ctx.state |= kPlaying;
        }
    }

    /// Size the per-block event lists so a full block of `max_events` host
    /// events always fits. Runs on the control thread before activation.
    fn allocate_events(&mut self, max_events: usize) {
        let max_events = max_events.max(1);
        self.input_events = ComWrapper::new(HostEventList::with_capacity(max_events));
        self.output_events = ComWrapper::new(HostEventList::with_capacity(max_events));
        // coalesced changes are unique per (offset, id), so `max_events`
        // bounds both the ids and the points of one block
        self.input_changes = ComWrapper::new(ParameterChanges::with_capacity(max_events, max_events));
        self.output_changes = ComWrapper::new(ParameterChanges::with_capacity(
            max_events,
            max_events * PLUGIN_POINTS_PER_QUEUE,
        ));
    }

    /// # Safety
    /// The plugin must not be inside a process call.
    unsafe fn load_events(&mut self, data: &audio::ProcessData<'_>) {
        self.input_events.clear();
        self.output_events.clear();
        self.output_changes.clear();

        let mut dropped = 0;
        for timed in data.midi_events() {
            if !self.input_events.push(to_vst_event(timed)) {
                dropped += 1;
            }
        }
        dropped += self.input_changes.load(data.parameter_changes());
        self.dropped_events += dropped as u64;
    }
}

/// Point each bus at its run of channels in the flat pointer table
fn bind_buses(buses: &mut [AudioBusBuffers], channels: &[usize], ptrs: &[*mut f32]) {
    let mut rest = ptrs;
    for (bus, &count) in buses.iter_mut().zip(channels) {
        let count = count.min(rest.len());
        bus.numChannels = count as i32;
        bus.silenceFlags = 0;
        bus.__field0.channelBuffers32 = rest.as_ptr() as *mut *mut f32;
        rest = &rest[count..];
    }
}

impl Processor for Vst3Processor {
    fn setup_processing(&mut self, setup: &interfaces::ProcessSetup) -> Result<()> {
        unsafe {
            let sample32 = SymbolicSampleSizes_::kSample32 as i32;
            if self.processor.canProcessSampleSize(sample32) != kResultOk {
                return Err(Error::Unsupported(
                    "plugin cannot process 32-bit float samples".to_string(),
                ));
            }

            self.process_mode = match setup.mode {
                interfaces::ProcessMode::Realtime => ProcessModes_::kRealtime as i32,
                interfaces::ProcessMode::Offline => ProcessModes_::kOffline as i32,
            };
            self.allocate_events(setup.max_events);
            let mut vst_setup = ProcessSetup {
                processMode: self.process_mode,
                symbolicSampleSize: sample32,
                maxSamplesPerBlock: setup.max_block_size as i32,
                sampleRate: setup.sample_rate,
            };
            check(
                self.processor.setupProcessing(&mut vst_setup),
                "IAudioProcessor::setupProcessing",
            )
        }
    }

    fn set_processing(&mut self, processing: bool) -> Result<()> {
        let result = unsafe { self.processor.setProcessing(processing as TBool) };
        // kNotImplemented is a legal answer to setProcessing.
        if result == kNotImplemented {
            return Ok(());
        }
        check(result, "IAudioProcessor::setProcessing")
    }

    fn process(&mut self, data: &mut audio::ProcessData<'_>) -> Result<()> {
        let layout = data.layout();
        bind_buses(&mut self.input_buses, &layout.inputs, data.raw_inputs());
        bind_buses(&mut self.output_buses, &layout.outputs, data.raw_outputs());
        self.update_context(data.context());

        unsafe {
            self.load_events(data);

            let mut process_data: ProcessData = std::mem::zeroed();
            process_data.processMode = self.process_mode;
            process_data.symbolicSampleSize = SymbolicSampleSizes_::kSample32 as i32;
            process_data.numSamples = data.num_frames() as i32;
            process_data.numInputs = self.input_buses.len() as i32;
            process_data.numOutputs = self.output_buses.len() as i32;
            process_data.inputs = if self.input_buses.is_empty() {
                ptr::null_mut()
            } else {
                self.input_buses.as_mut_ptr()
            };
            process_data.outputs = if self.output_buses.is_empty() {
                ptr::null_mut()
            } else {
                self.output_buses.as_mut_ptr()
            };
            process_data.inputEvents = self
                .input_events
                .as_com_ref::<IEventList>()
                .map(|r| r.as_ptr())
                .unwrap_or(ptr::null_mut());
            process_data.outputEvents = self
                .output_events
                .as_com_ref::<IEventList>()
                .map(|r| r.as_ptr())
                .unwrap_or(ptr::null_mut());
            process_data.inputParameterChanges = self
                .input_changes
                .as_com_ref::<IParameterChanges>()
                .map(|r| r.as_ptr())
                .unwrap_or(ptr::null_mut());
            process_data.outputParameterChanges = self
                .output_changes
                .as_com_ref::<IParameterChanges>()
                .map(|r| r.as_ptr())
                .unwrap_or(ptr::null_mut());
            process_data.processContext = &mut self.context;

            let result = self.processor.process(&mut process_data);
            if result != kResultOk {
                return Err(Error::ProcessRejected(result));
            }
        }
        Ok(())
    }

    fn latency_samples(&self) -> u32 {
        unsafe { self.processor.getLatencySamples() }
    }

    fn dropped_events(&self) -> u64 {
        self.dropped_events
    }
}

/// Translate a queued MIDI event into a VST3 event on bus 0
fn to_vst_event(timed: &TimedMidiEvent) -> Event {
    // SAFETY: Event is a plain C struct; every union member written below is
    // the one its `type` selects.
    unsafe {
        let mut event: Event = std::mem::zeroed();
        event.busIndex = 0;
        event.sampleOffset = timed.sample_offset as i32;
        event.ppqPosition = 0.0;
        event.flags = Event_::EventFlags_::kIsLive as u16;

        match timed.event {
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } => {
                event.r#type = kNoteOnEvent as u16;
                event.__field0.noteOn.channel = channel.as_index() as i16;
                event.__field0.noteOn.pitch = note as i16;
                event.__field0.noteOn.tuning = 0.0;
                event.__field0.noteOn.velocity = velocity as f32 / 127.0;
                event.__field0.noteOn.length = 0;
                event.__field0.noteOn.noteId = -1;
            }
            MidiEvent::NoteOff {
                channel,
                note,
                velocity,
            } => {
                event.r#type = kNoteOffEvent as u16;
                event.__field0.noteOff.channel = channel.as_index() as i16;
                event.__field0.noteOff.pitch = note as i16;
                event.__field0.noteOff.velocity = velocity as f32 / 127.0;
                event.__field0.noteOff.noteId = -1;
                event.__field0.noteOff.tuning = 0.0;
            }
            MidiEvent::PolyAftertouch {
                channel,
                note,
                pressure,
            } => {
                event.r#type = kPolyPressureEvent as u16;
                event.__field0.polyPressure.channel = channel.as_index() as i16;
                event.__field0.polyPressure.pitch = note as i16;
                event.__field0.polyPressure.pressure = pressure as f32 / 127.0;
                event.__field0.polyPressure.noteId = -1;
            }
            MidiEvent::ControlChange {
                channel,
                controller,
                value,
            } => legacy_cc(&mut event, channel.as_index(), controller, value, 0),
            MidiEvent::ProgramChange { channel, program } => legacy_cc(
                &mut event,
                channel.as_index(),
                ControllerNumbers_::kCtrlProgramChange as u8,
                program,
                0,
            ),
            MidiEvent::ChannelAftertouch { channel, pressure } => legacy_cc(
                &mut event,
                channel.as_index(),
                ControllerNumbers_::kAfterTouch as u8,
                pressure,
                0,
            ),
            MidiEvent::PitchBend { channel, value } => legacy_cc(
                &mut event,
                channel.as_index(),
                ControllerNumbers_::kPitchBend as u8,
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
            ),
        }
        event
    }
}

unsafe fn legacy_cc(event: &mut Event, channel: u8, control: u8, value: u8, value2: u8) {
    event.r#type = kLegacyMIDICCOutEvent as u16;
    event.__field0.midiCCOut.controlNumber = control;
    event.__field0.midiCCOut.channel = channel as i8;
    event.__field0.midiCCOut.value = value as i8;
    event.__field0.midiCCOut.value2 = value2 as i8;
}

struct Vst3Controller {
    controller: ComPtr<IEditController>,
    handler: Option<ComWrapper<ComponentHandler>>,
    library: Arc<ModuleLibrary>,
}

// SAFETY: see Vst3Component.
unsafe impl Send for Vst3Controller {}

impl Vst3Controller {
    fn new(controller: ComPtr<IEditController>, library: Arc<ModuleLibrary>) -> Self {
        Self {
            controller,
            handler: None,
            library,
        }
    }
}

impl Controller for Vst3Controller {
    fn initialize(&mut self, host: &HostContext) -> Result<()> {
        let context = host.application().as_ptr();
        check(
            unsafe { self.controller.initialize(context) },
            "IEditController::initialize",
        )
    }

    fn terminate(&mut self) -> Result<()> {
        unsafe {
            if self.handler.take().is_some() {
                self.controller.setComponentHandler(ptr::null_mut());
            }
            check(self.controller.terminate(), "IEditController::terminate")
        }
    }

    fn parameter_count(&self) -> usize {
        unsafe { self.controller.getParameterCount().max(0) as usize }
    }

    fn parameter_info(&self, index: usize) -> Option<ParameterDescriptor> {
        use vst3::Steinberg::Vst::ParameterInfo_::ParameterFlags_::*;

        unsafe {
            let mut info: ParameterInfo = std::mem::zeroed();
            if self.controller.getParameterInfo(index as i32, &mut info) != kResultOk {
                return None;
            }
            let has = |flag: i32| info.flags & flag != 0;
            Some(ParameterDescriptor {
                id: info.id,
                title: vst_string_to_string(&info.title),
                short_title: vst_string_to_string(&info.shortTitle),
                units: vst_string_to_string(&info.units),
                default_normalized: info.defaultNormalizedValue,
                min: self.controller.normalizedParamToPlain(info.id, 0.0),
                max: self.controller.normalizedParamToPlain(info.id, 1.0),
                step_count: info.stepCount.max(0) as u32,
                flags: ParameterFlags {
                    can_automate: has(kCanAutomate as i32),
                    is_read_only: has(kIsReadOnly as i32),
                    is_bypass: has(kIsBypass as i32),
                    is_list: has(kIsList as i32),
                },
            })
        }
    }

    fn get_normalized(&self, id: ParamId) -> f64 {
        unsafe { self.controller.getParamNormalized(id) }
    }

    fn set_normalized(&mut self, id: ParamId, value: f64) -> Result<()> {
        check(
            unsafe { self.controller.setParamNormalized(id, value) },
            "IEditController::setParamNormalized",
        )
    }

    fn normalized_to_plain(&self, id: ParamId, value: f64) -> f64 {
        unsafe { self.controller.normalizedParamToPlain(id, value) }
    }

    fn set_component_state(&mut self, stream: &mut MemoryStream) -> Result<()> {
        let result = with_stream(stream, |ptr| unsafe {
            self.controller.setComponentState(ptr)
        });
        check(result, "IEditController::setComponentState")
    }

    fn set_edit_sink(&mut self, sink: crate::events::EventSender) {
        let handler = ComWrapper::new(ComponentHandler::new(sink));
        let Some(ptr) = handler
            .as_com_ref::<IComponentHandler>()
            .map(|r| r.as_ptr())
        else {
            return;
        };
        let result = unsafe { self.controller.setComponentHandler(ptr) };
        if result == kResultOk {
            self.handler = Some(handler);
        } else {
            log::warn!("Controller refused the component handler ({:#x})", result);
        }
    }

    fn create_view(&mut self) -> Option<Box<dyn PlugView>> {
        let view_ptr = unsafe { self.controller.createView(b"editor\0".as_ptr() as *const _) };
        let view = unsafe { ComPtr::<IPlugView>::from_raw(view_ptr)? };
        Some(Box::new(Vst3View {
            view,
            frame: None,
            library: Arc::clone(&self.library),
        }))
    }

    fn connection_point(&self) -> Option<ConnectionPoint> {
        self.controller.cast::<IConnectionPoint>().map(ConnectionPoint)
    }
}

struct Vst3View {
    view: ComPtr<IPlugView>,
    frame: Option<ComWrapper<PlugFrame>>,
    library: Arc<ModuleLibrary>,
}

// SAFETY: editor calls stay on the control thread.
unsafe impl Send for Vst3View {}

impl PlugView for Vst3View {
    fn is_platform_type_supported(&self, platform: PlatformType) -> bool {
        let platform = platform.as_bytes().as_ptr() as *const _;
        unsafe { self.view.isPlatformTypeSupported(platform) == kResultOk }
    }

    fn attached(&mut self, parent: WindowHandle, platform: PlatformType) -> Result<()> {
        let platform = platform.as_bytes().as_ptr() as *const _;
        check(
            unsafe { self.view.attached(parent.as_ptr(), platform) },
            "IPlugView::attached",
        )
    }

    fn removed(&mut self) -> Result<()> {
        check(unsafe { self.view.removed() }, "IPlugView::removed")
    }

    fn size(&self) -> Result<editor::ViewRect> {
        unsafe {
            let mut rect: ViewRect = std::mem::zeroed();
            check(self.view.getSize(&mut rect), "IPlugView::getSize")?;
            Ok(editor::ViewRect {
                left: rect.left,
                top: rect.top,
                right: rect.right,
                bottom: rect.bottom,
            })
        }
    }

    fn set_frame(&mut self, frame: Option<EditorFrame>) -> Result<()> {
        let Some(frame) = frame else {
            if self.frame.take().is_some() {
                unsafe { self.view.setFrame(ptr::null_mut()) };
            }
            return Ok(());
        };
        let wrapper = ComWrapper::new(PlugFrame::new(frame));
        let ptr = wrapper
            .as_com_ref::<IPlugFrame>()
            .map(|r| r.as_ptr())
            .ok_or_else(|| Error::rejected("IPlugFrame query"))?;
        check(unsafe { self.view.setFrame(ptr) }, "IPlugView::setFrame")?;
        self.frame = Some(wrapper);
        Ok(())
    }
}

impl Drop for Vst3View {
    fn drop(&mut self) {
        if self.frame.take().is_some() {
            unsafe { self.view.setFrame(ptr::null_mut()) };
        }
    }
}
