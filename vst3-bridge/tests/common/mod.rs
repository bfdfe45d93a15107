//! In-process mock plugin shared by the integration tests
//!
//! A [`MockFactory`] hands out a gain component with a separate (or embedded)
//! controller and an optional view. Every call is appended to the shared
//! [`Probe`] journal so tests can assert ordering, and switches on the probe
//! inject failures at run time.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use vst3_bridge::{
    audio::ProcessData,
    editor::{EditorFrame, PlatformType, ResizeHandler, ViewRect, WindowHandle},
    events::{EventSender, TimedMidiEvent},
    interfaces::{
        BusDirection, BusInfo, Component, Controller, MediaType, PlugView, PluginFactory,
        ProcessSetup, Processor,
    },
    module::{BinaryModule, ClassDescriptor, ClassId, AUDIO_MODULE_CLASS},
    parameters::{ParamId, ParameterChange, ParameterDescriptor, ParameterFlags},
    state::MemoryStream,
    Error, HostContext, PluginInstance, Result,
};

pub const COMPONENT_ID: ClassId = ClassId([0x11; 16]);
pub const CONTROLLER_ID: ClassId = ClassId([0x22; 16]);

pub const GAIN: ParamId = 100;
pub const MODE: ParamId = 7;
pub const BYPASS: ParamId = 2001;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Static behavior of a mock plugin
#[derive(Debug, Clone)]
pub struct MockSpec {
    pub name: String,
    pub sub_categories: String,
    pub input_channels: usize,
    pub output_channels: usize,
    pub separate_controller: bool,
    pub has_editor: bool,
    pub platform_supported: bool,
    pub dc: f32,
    pub fail_component_init: bool,
    pub fail_controller_init: bool,
    pub fail_output_bus: bool,
    pub fail_setup: bool,
    pub fail_start: bool,
}

impl Default for MockSpec {
    fn default() -> Self {
        Self {
            name: "Mock Gain".to_string(),
            sub_categories: "Fx|Dynamics".to_string(),
            input_channels: 2,
            output_channels: 2,
            separate_controller: true,
            has_editor: true,
            platform_supported: true,
            dc: 0.0,
            fail_component_init: false,
            fail_controller_init: false,
            fail_output_bus: false,
            fail_setup: false,
            fail_start: false,
        }
    }
}

impl MockSpec {
    /// No audio input, constant offset on every output sample
    pub fn instrument() -> Self {
        Self {
            name: "Mock Synth".to_string(),
            sub_categories: "Instrument|Synth".to_string(),
            input_channels: 0,
            dc: 0.25,
            ..Self::default()
        }
    }
}

/// One rendered block as the processor saw it
#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub frames: usize,
    pub midi: Vec<TimedMidiEvent>,
    pub params: Vec<ParameterChange>,
    pub project_time_samples: i64,
    pub input_channels: usize,
    pub output_channels: usize,
}

/// Shared observation and fault-injection point
#[derive(Default)]
pub struct Probe {
    pub journal: Mutex<Vec<String>>,
    pub blocks: Mutex<Vec<BlockRecord>>,
    pub dsp: Mutex<BTreeMap<ParamId, f64>>,
    pub controller_values: Mutex<BTreeMap<ParamId, f64>>,
    pub edit_sink: Mutex<Option<EventSender>>,
    pub frame: Mutex<Option<EditorFrame>>,
    pub setup: Mutex<Option<ProcessSetup>>,
    pub fail_process: AtomicBool,
    pub panic_process: AtomicBool,
    pub reverse_parameters: AtomicBool,
    pub reject_parameters: AtomicBool,
    /// Events the processor reports it could not carry
    pub dropped_events: AtomicU64,
}

impl Probe {
    pub fn log(&self, entry: impl Into<String>) {
        self.journal.lock().push(entry.into());
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.journal.lock().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.journal.lock().iter().filter(|e| *e == entry).count()
    }

    pub fn last_block(&self) -> Option<BlockRecord> {
        self.blocks.lock().last().cloned()
    }

    pub fn set(&self, flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }
}

pub fn parameter_list() -> Vec<ParameterDescriptor> {
    vec![
        ParameterDescriptor {
            id: GAIN,
            title: "Gain".to_string(),
            short_title: "Gain".to_string(),
            units: "dB".to_string(),
            default_normalized: 0.5,
            min: -60.0,
            max: 0.0,
            step_count: 0,
            flags: ParameterFlags {
                can_automate: true,
                ..ParameterFlags::default()
            },
        },
        ParameterDescriptor {
            id: MODE,
            title: "Mode".to_string(),
            short_title: "Mode".to_string(),
            units: String::new(),
            default_normalized: 0.0,
            min: 0.0,
            max: 3.0,
            step_count: 3,
            flags: ParameterFlags {
                can_automate: true,
                is_list: true,
                ..ParameterFlags::default()
            },
        },
        ParameterDescriptor {
            id: BYPASS,
            title: "Bypass".to_string(),
            short_title: "Byp".to_string(),
            units: String::new(),
            default_normalized: 0.0,
            min: 0.0,
            max: 1.0,
            step_count: 1,
            flags: ParameterFlags {
                can_automate: true,
                is_bypass: true,
                ..ParameterFlags::default()
            },
        },
    ]
}

fn default_of(id: ParamId) -> f64 {
    parameter_list()
        .into_iter()
        .find(|p| p.id == id)
        .map(|p| p.default_normalized)
        .unwrap_or(0.0)
}

fn encode(values: &BTreeMap<ParamId, f64>, stream: &mut MemoryStream) -> Result<()> {
    use std::io::Write;
    for (id, value) in values {
        stream.write_all(&id.to_le_bytes())?;
        stream.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

fn decode(stream: &mut MemoryStream) -> Result<BTreeMap<ParamId, f64>> {
    use std::io::Read;
    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes)?;
    if bytes.len() % 12 != 0 {
        return Err(Error::PluginRejected("corrupt state".to_string()));
    }
    Ok(bytes
        .chunks_exact(12)
        .map(|chunk| {
            let mut id = [0u8; 4];
            let mut value = [0u8; 8];
            id.copy_from_slice(&chunk[..4]);
            value.copy_from_slice(&chunk[4..]);
            (u32::from_le_bytes(id), f64::from_le_bytes(value))
        })
        .collect())
}

pub struct MockFactory {
    spec: MockSpec,
    probe: Arc<Probe>,
}

impl PluginFactory for MockFactory {
    fn vendor(&self) -> String {
        "Mock Audio".to_string()
    }

    fn classes(&self) -> Vec<ClassDescriptor> {
        vec![
            ClassDescriptor {
                id: CONTROLLER_ID,
                category: "Component Controller Class".to_string(),
                name: format!("{} Controller", self.spec.name),
                sub_categories: String::new(),
                vendor: String::new(),
                version: "1.0.0".to_string(),
            },
            ClassDescriptor {
                id: COMPONENT_ID,
                category: AUDIO_MODULE_CLASS.to_string(),
                name: self.spec.name.clone(),
                sub_categories: self.spec.sub_categories.clone(),
                vendor: String::new(),
                version: "1.0.0".to_string(),
            },
        ]
    }

    fn create_component(&self, class_id: &ClassId) -> Result<Box<dyn Component>> {
        if *class_id != COMPONENT_ID {
            return Err(Error::PluginRejected(format!("unknown class {}", class_id)));
        }
        self.probe.log("factory.create_component");
        Ok(Box::new(MockComponent {
            spec: self.spec.clone(),
            probe: Arc::clone(&self.probe),
        }))
    }

    fn create_controller(&self, class_id: &ClassId) -> Result<Box<dyn Controller>> {
        if *class_id != CONTROLLER_ID {
            return Err(Error::PluginRejected(format!("unknown class {}", class_id)));
        }
        self.probe.log("factory.create_controller");
        Ok(Box::new(MockController {
            spec: self.spec.clone(),
            probe: Arc::clone(&self.probe),
            embedded: false,
        }))
    }
}

pub struct MockComponent {
    spec: MockSpec,
    probe: Arc<Probe>,
}

impl Component for MockComponent {
    fn initialize(&mut self, _host: &HostContext) -> Result<()> {
        self.probe.log("component.initialize");
        if self.spec.fail_component_init {
            return Err(Error::PluginRejected("component refused".to_string()));
        }
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        self.probe.log("component.terminate");
        Ok(())
    }

    fn controller_class_id(&self) -> Option<ClassId> {
        self.spec.separate_controller.then_some(CONTROLLER_ID)
    }

    fn bus_count(&self, media: MediaType, direction: BusDirection) -> usize {
        match (media, direction) {
            (MediaType::Audio, BusDirection::Input) => usize::from(self.spec.input_channels > 0),
            (MediaType::Audio, BusDirection::Output) => 1,
            (MediaType::Event, BusDirection::Input) => 1,
            (MediaType::Event, BusDirection::Output) => 0,
        }
    }

    fn bus_info(&self, media: MediaType, direction: BusDirection, index: usize) -> Option<BusInfo> {
        if index >= self.bus_count(media, direction) {
            return None;
        }
        let channel_count = match (media, direction) {
            (MediaType::Audio, BusDirection::Input) => self.spec.input_channels,
            (MediaType::Audio, BusDirection::Output) => self.spec.output_channels,
            _ => 0,
        };
        Some(BusInfo {
            name: format!("{:?} {:?}", media, direction),
            channel_count,
            is_main: true,
        })
    }

    fn activate_bus(
        &mut self,
        media: MediaType,
        direction: BusDirection,
        index: usize,
        active: bool,
    ) -> Result<()> {
        self.probe.log(format!(
            "component.activate_bus {:?} {:?} {} {}",
            media, direction, index, active
        ));
        if self.spec.fail_output_bus && direction == BusDirection::Output && active {
            return Err(Error::PluginRejected("output bus refused".to_string()));
        }
        Ok(())
    }

    fn set_active(&mut self, active: bool) -> Result<()> {
        self.probe.log(format!("component.set_active {}", active));
        Ok(())
    }

    fn get_state(&mut self, stream: &mut MemoryStream) -> Result<()> {
        self.probe.log("component.get_state");
        encode(&self.probe.dsp.lock(), stream)
    }

    fn set_state(&mut self, stream: &mut MemoryStream) -> Result<()> {
        self.probe.log("component.set_state");
        let values = decode(stream)?;
        *self.probe.dsp.lock() = values;
        Ok(())
    }

    fn processor(&mut self) -> Option<Box<dyn Processor>> {
        Some(Box::new(MockProcessor {
            spec: self.spec.clone(),
            probe: Arc::clone(&self.probe),
        }))
    }

    fn embedded_controller(&mut self) -> Option<Box<dyn Controller>> {
        if self.spec.separate_controller {
            return None;
        }
        Some(Box::new(MockController {
            spec: self.spec.clone(),
            probe: Arc::clone(&self.probe),
            embedded: true,
        }))
    }
}

pub struct MockProcessor {
    spec: MockSpec,
    probe: Arc<Probe>,
}

impl Processor for MockProcessor {
    fn setup_processing(&mut self, setup: &ProcessSetup) -> Result<()> {
        self.probe.log("processor.setup_processing");
        if self.spec.fail_setup {
            return Err(Error::PluginRejected("setup refused".to_string()));
        }
        *self.probe.setup.lock() = Some(*setup);
        Ok(())
    }

    fn set_processing(&mut self, processing: bool) -> Result<()> {
        self.probe
            .log(format!("processor.set_processing {}", processing));
        if self.spec.fail_start && processing {
            return Err(Error::PluginRejected("start refused".to_string()));
        }
        Ok(())
    }

    fn process(&mut self, data: &mut ProcessData<'_>) -> Result<()> {
        self.probe.blocks.lock().push(BlockRecord {
            frames: data.num_frames(),
            midi: data.midi_events().to_vec(),
            params: data.parameter_changes().to_vec(),
            project_time_samples: data.context().project_time_samples,
            input_channels: data.input_channel_count(),
            output_channels: data.output_channel_count(),
        });
        if self.probe.panic_process.load(Ordering::SeqCst) {
            panic!("mock processor panicked");
        }

        // write something before failing so zeroing is observable
        let factor = {
            let mut dsp = self.probe.dsp.lock();
            for change in data.parameter_changes() {
                dsp.insert(change.id, change.value);
            }
            dsp.get(&GAIN).copied().unwrap_or_else(|| default_of(GAIN)) as f32 * 2.0
        };
        for channel in 0..data.output_channel_count() {
            let input = data.input(channel);
            if let Some(output) = data.output(channel) {
                for (frame, sample) in output.iter_mut().enumerate() {
                    let dry = input.map(|input| input[frame]).unwrap_or(0.0);
                    *sample = dry * factor + self.spec.dc;
                }
            }
        }

        if self.probe.fail_process.load(Ordering::SeqCst) {
            return Err(Error::ProcessRejected(1));
        }
        Ok(())
    }

    fn latency_samples(&self) -> u32 {
        64
    }

    fn dropped_events(&self) -> u64 {
        self.probe.dropped_events.load(Ordering::SeqCst)
    }
}

pub struct MockController {
    spec: MockSpec,
    probe: Arc<Probe>,
    embedded: bool,
}

impl MockController {
    fn ordered(&self) -> Vec<ParameterDescriptor> {
        let mut list = parameter_list();
        if self.probe.reverse_parameters.load(Ordering::SeqCst) {
            list.reverse();
        }
        list
    }
}

impl Controller for MockController {
    fn initialize(&mut self, _host: &HostContext) -> Result<()> {
        self.probe.log("controller.initialize");
        if self.spec.fail_controller_init {
            return Err(Error::PluginRejected("controller refused".to_string()));
        }
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        self.probe.log("controller.terminate");
        Ok(())
    }

    fn parameter_count(&self) -> usize {
        parameter_list().len()
    }

    fn parameter_info(&self, index: usize) -> Option<ParameterDescriptor> {
        self.ordered().into_iter().nth(index)
    }

    fn get_normalized(&self, id: ParamId) -> f64 {
        self.probe
            .controller_values
            .lock()
            .get(&id)
            .copied()
            .unwrap_or_else(|| default_of(id))
    }

    fn set_normalized(&mut self, id: ParamId, value: f64) -> Result<()> {
        if self.probe.reject_parameters.load(Ordering::SeqCst) {
            return Err(Error::PluginRejected("parameter refused".to_string()));
        }
        self.probe.controller_values.lock().insert(id, value);
        Ok(())
    }

    fn normalized_to_plain(&self, id: ParamId, value: f64) -> f64 {
        parameter_list()
            .into_iter()
            .find(|p| p.id == id)
            .map(|p| p.normalized_to_plain(value))
            .unwrap_or(value)
    }

    fn set_component_state(&mut self, stream: &mut MemoryStream) -> Result<()> {
        self.probe.log(if self.embedded {
            "embedded.set_component_state"
        } else {
            "controller.set_component_state"
        });
        let values = decode(stream)?;
        self.probe.controller_values.lock().extend(values);
        Ok(())
    }

    fn set_edit_sink(&mut self, sink: EventSender) {
        *self.probe.edit_sink.lock() = Some(sink);
    }

    fn create_view(&mut self) -> Option<Box<dyn PlugView>> {
        if !self.spec.has_editor {
            return None;
        }
        self.probe.log("view.create");
        Some(Box::new(MockView {
            spec: self.spec.clone(),
            probe: Arc::clone(&self.probe),
        }))
    }
}

pub struct MockView {
    spec: MockSpec,
    probe: Arc<Probe>,
}

impl PlugView for MockView {
    fn is_platform_type_supported(&self, _platform: PlatformType) -> bool {
        self.spec.platform_supported
    }

    fn attached(&mut self, parent: WindowHandle, _platform: PlatformType) -> Result<()> {
        self.probe
            .log(format!("view.attached {:#x}", parent.as_ptr() as usize));
        Ok(())
    }

    fn removed(&mut self) -> Result<()> {
        self.probe.log("view.removed");
        Ok(())
    }

    fn size(&self) -> Result<ViewRect> {
        Ok(ViewRect::with_size(640, 480))
    }

    fn set_frame(&mut self, frame: Option<EditorFrame>) -> Result<()> {
        self.probe.log(if frame.is_some() {
            "view.set_frame some"
        } else {
            "view.set_frame none"
        });
        *self.probe.frame.lock() = frame;
        Ok(())
    }
}

impl Drop for MockView {
    fn drop(&mut self) {
        self.probe.log("view.release");
    }
}

/// Resize handler that only records its calls
#[derive(Clone, Default)]
pub struct RecordingResizer {
    pub calls: Arc<Mutex<Vec<(usize, i32, i32)>>>,
}

impl ResizeHandler for RecordingResizer {
    fn resize(&self, handle: WindowHandle, width: i32, height: i32) -> Result<()> {
        self.calls
            .lock()
            .push((handle.as_ptr() as usize, width, height));
        Ok(())
    }
}

pub fn window(address: usize) -> WindowHandle {
    unsafe { WindowHandle::from_raw(address as *mut std::ffi::c_void) }
}

pub fn test_host() -> Arc<HostContext> {
    HostContext::builder()
        .name("test host")
        .sample_rate(48000.0)
        .max_block_size(256)
        .event_queue_capacity(64)
        .build()
        .expect("host context")
}

pub fn mock_module(spec: MockSpec) -> (Arc<BinaryModule>, Arc<Probe>) {
    let path = format!("/mock/{}.vst3", spec.name);
    mock_module_at(path, spec)
}

/// Mock module that claims to live at `path`
pub fn mock_module_at(
    path: impl AsRef<std::path::Path>,
    spec: MockSpec,
) -> (Arc<BinaryModule>, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let factory = MockFactory {
        spec,
        probe: Arc::clone(&probe),
    };
    (BinaryModule::from_factory(path, Box::new(factory)), probe)
}

/// Loaded (not yet initialized) instance of `spec`
pub fn load(host: &Arc<HostContext>, spec: MockSpec) -> (PluginInstance, Arc<Probe>) {
    let (module, probe) = mock_module(spec);
    let plugin = PluginInstance::new(host, module, None).expect("plugin instance");
    (plugin, probe)
}

/// Initialized at 48 kHz / 256 and activated
pub fn active(host: &Arc<HostContext>, spec: MockSpec) -> (PluginInstance, Arc<Probe>) {
    let (mut plugin, probe) = load(host, spec);
    plugin.initialize(48000.0, 256).expect("initialize");
    plugin.activate().expect("activate");
    (plugin, probe)
}
