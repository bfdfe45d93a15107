//! Hosted plugin instance
//!
//! A [`PluginInstance`] owns one instantiated class of a [`BinaryModule`]: its
//! component, the optional processor and controller capabilities, the audio
//! bridge negotiated at initialize, the event queue and the editor.
//!
//! Control operations take `&mut self` and are meant for one control thread.
//! The `process*` methods are the audio path: they never allocate, lock or
//! log, and must not overlap other calls on the same instance.

use crate::{
    audio::{AudioBridge, AudioLevels, BusLayout, ProcessContext},
    editor::{EditorBridge, EditorState, WindowHandle},
    error::{Error, ErrorKind, Result},
    events::{cc, EventQueue, EventSender, MidiChannel, MidiEvent},
    host::HostContext,
    interfaces::{
        BusDirection, Component, ConnectionPoint, Controller, MediaType, ProcessMode,
        ProcessSetup, Processor,
    },
    internal::guard,
    lifecycle::{self, LifecycleState, Step, Transition},
    module::{BinaryModule, ClassDescriptor, ClassId},
    parameters::{ParamId, ParameterDescriptor, ParameterUpdate},
    state::MemoryStream,
};
use std::fmt;
use std::sync::{Arc, Weak};

type BusSlot = (MediaType, BusDirection);

/// One instantiated plugin class
pub struct PluginInstance {
    // Field order is drop order: view before controller, everything before
    // the module that owns the code.
    editor: EditorBridge,
    bridge: Option<AudioBridge>,
    processor: Option<Box<dyn Processor>>,
    connections: Option<(ConnectionPoint, ConnectionPoint)>,
    controller: Option<Box<dyn Controller>>,
    component: Box<dyn Component>,
    controller_is_component: bool,
    state: LifecycleState,
    sample_rate: f64,
    max_block_size: usize,
    transport: ProcessContext,
    last_process_error: Option<Error>,
    unreported_process_error: Option<Error>,
    queue: EventQueue,
    sender: EventSender,
    class: ClassDescriptor,
    host: Weak<HostContext>,
    module: Arc<BinaryModule>,
}

impl PluginInstance {
    /// Create an instance of `class` (or of the module's first audio-module
    /// class) and bring it to [`LifecycleState::Loaded`]
    pub fn new(
        host: &Arc<HostContext>,
        module: Arc<BinaryModule>,
        class: Option<&ClassId>,
    ) -> Result<Self> {
        host.record(Self::create(host, module, class))
    }

    fn create(
        host: &Arc<HostContext>,
        module: Arc<BinaryModule>,
        class: Option<&ClassId>,
    ) -> Result<Self> {
        let class = select_class(&module, class)?.clone();
        log::info!(
            "Creating '{}' ({}) from {}",
            class.name,
            class.id,
            module.path().display()
        );

        let factory = module.factory();
        let mut component =
            guard::protect("create component", || factory.create_component(&class.id))?;
        guard::protect("initialize component", || component.initialize(host))?;

        let processor = guard::protect("query audio processor", || Ok(component.processor()))
            .unwrap_or_else(|e| {
                log::warn!("{}", e);
                None
            });
        if processor.is_none() {
            log::warn!("'{}' has no audio processor", class.name);
        }

        let (mut controller, controller_is_component) =
            create_controller(host, &module, &mut *component);

        let connections = match &controller {
            Some(controller) if !controller_is_component => {
                connect(&*component, &**controller)
            }
            _ => None,
        };

        let queue = EventQueue::new(host.config().event_queue_capacity);
        let sender = queue.sender();
        if let Some(controller) = controller.as_mut() {
            controller.set_edit_sink(sender.clone());
            if !controller_is_component {
                sync_controller(&mut *component, &mut **controller);
            }
        }

        Ok(Self {
            editor: EditorBridge::new(),
            bridge: None,
            processor,
            connections,
            controller,
            component,
            controller_is_component,
            state: LifecycleState::Loaded,
            sample_rate: host.config().sample_rate,
            max_block_size: host.config().max_block_size,
            transport: ProcessContext::new(host.config().sample_rate),
            last_process_error: None,
            unreported_process_error: None,
            queue,
            sender,
            class,
            host: Arc::downgrade(host),
            module,
        })
    }

    fn host(&self) -> Result<Arc<HostContext>> {
        self.host
            .upgrade()
            .ok_or_else(|| Error::NotInitialized("host context has been shut down".to_string()))
    }

    /// Run a control operation against a live host context and record its
    /// failure in the last-error slot
    ///
    /// An audio-path failure not reported yet is recorded first, so the slot
    /// reflects it unless this operation fails too.
    fn control<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let host = self.host()?;
        if let Some(e) = self.unreported_process_error.take() {
            host.set_last_error(e.to_string());
        }
        host.record(op(self))
    }

    fn require_loaded(&self) -> Result<()> {
        match self.state {
            LifecycleState::Terminated => Err(Error::NotInitialized(
                "plugin has been terminated".to_string(),
            )),
            _ => Ok(()),
        }
    }

    // Lifecycle

    /// Set up processing at `sample_rate` with blocks of at most
    /// `max_block_size` frames and negotiate the bus layout
    pub fn initialize(&mut self, sample_rate: f64, max_block_size: usize) -> Result<()> {
        self.control(|plugin| {
            plugin.initialize_inner(sample_rate, max_block_size, ProcessMode::Realtime)
        })
    }

    /// [`initialize`](Self::initialize) for rendering faster than real time,
    /// where the plugin may use its high-quality paths
    pub fn initialize_offline(&mut self, sample_rate: f64, max_block_size: usize) -> Result<()> {
        self.control(|plugin| {
            plugin.initialize_inner(sample_rate, max_block_size, ProcessMode::Offline)
        })
    }

    /// [`initialize`](Self::initialize) with the host configuration's audio
    /// settings
    pub fn initialize_default(&mut self) -> Result<()> {
        let host = self.host()?;
        let config = host.config();
        self.initialize(config.sample_rate, config.max_block_size)
    }

    fn initialize_inner(
        &mut self,
        sample_rate: f64,
        max_block_size: usize,
        mode: ProcessMode,
    ) -> Result<()> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "sample rate {} must be positive",
                sample_rate
            )));
        }
        if max_block_size == 0 {
            return Err(Error::InvalidArgument(
                "max block size must be at least 1".to_string(),
            ));
        }
        let Step::Enter(next) = lifecycle::plan(self.state, Transition::Initialize)? else {
            return Ok(());
        };
        let processor = self
            .processor
            .as_mut()
            .ok_or_else(|| Error::Unsupported("plugin has no audio processor".to_string()))?;

        let component = &mut *self.component;
        let mut activated = Vec::new();
        let max_events = self.queue.capacity();
        let setup = match mode {
            ProcessMode::Realtime => ProcessSetup::realtime(sample_rate, max_block_size, max_events),
            ProcessMode::Offline => ProcessSetup::offline(sample_rate, max_block_size, max_events),
        };
        let negotiated = negotiate_buses(&mut *component, &mut activated).and_then(|layout| {
            guard::protect("setup processing", || processor.setup_processing(&setup))?;
            Ok(layout)
        });
        let layout = match negotiated {
            Ok(layout) => layout,
            Err(e) => {
                for (media, direction) in activated.into_iter().rev() {
                    let _ = guard::protect("deactivate bus", || {
                        component.activate_bus(media, direction, 0, false)
                    });
                }
                return Err(e);
            }
        };

        log::info!(
            "'{}' initialized ({:?}) at {} Hz, max block {}, layout {:?} -> {:?}",
            self.class.name,
            mode,
            sample_rate,
            max_block_size,
            layout.inputs,
            layout.outputs
        );
        self.bridge = Some(AudioBridge::new(
            layout,
            max_block_size,
            self.queue.capacity(),
        ));
        self.sample_rate = sample_rate;
        self.max_block_size = max_block_size;
        self.transport.sample_rate = sample_rate;
        self.state = next;
        Ok(())
    }

    /// Start processing. A no-op on an active instance.
    pub fn activate(&mut self) -> Result<()> {
        self.control(Self::activate_inner)
    }

    fn activate_inner(&mut self) -> Result<()> {
        let Step::Enter(next) = lifecycle::plan(self.state, Transition::Activate)? else {
            return Ok(());
        };
        let processor = self
            .processor
            .as_mut()
            .ok_or_else(|| Error::Unsupported("plugin has no audio processor".to_string()))?;

        guard::protect("activate component", || self.component.set_active(true))?;
        if let Err(e) = guard::protect("start processing", || processor.set_processing(true)) {
            if let Err(rollback) =
                guard::protect("deactivate component", || self.component.set_active(false))
            {
                log::warn!("Rollback after failed activation failed: {}", rollback);
            }
            return Err(e);
        }

        // notes queued while inactive are stale by now
        let discarded = self.queue.discard_midi();
        if discarded > 0 {
            log::debug!(
                "'{}': discarded {} MIDI events queued while inactive",
                self.class.name,
                discarded
            );
        }
        log::info!("'{}' activated", self.class.name);
        self.state = next;
        Ok(())
    }

    /// Stop processing. Always succeeds; a no-op unless active.
    pub fn deactivate(&mut self) -> Result<()> {
        self.control(Self::deactivate_inner)
    }

    fn deactivate_inner(&mut self) -> Result<()> {
        let Step::Enter(next) = lifecycle::plan(self.state, Transition::Deactivate)? else {
            return Ok(());
        };
        if let Some(processor) = self.processor.as_mut() {
            if let Err(e) = guard::protect("stop processing", || processor.set_processing(false)) {
                log::warn!("'{}': {}", self.class.name, e);
            }
        }
        if let Err(e) =
            guard::protect("deactivate component", || self.component.set_active(false))
        {
            log::warn!("'{}': {}", self.class.name, e);
        }
        log::info!("'{}' deactivated", self.class.name);
        self.state = next;
        Ok(())
    }

    /// Close the editor, deactivate and terminate controller and component
    ///
    /// Terminal and idempotent. Runs even when the host context is gone, and
    /// automatically on drop.
    pub fn terminate(&mut self) -> Result<()> {
        let result = self.terminate_inner();
        match self.host.upgrade() {
            Some(host) => host.record(result),
            None => result,
        }
    }

    fn terminate_inner(&mut self) -> Result<()> {
        let Step::Enter(next) = lifecycle::plan(self.state, Transition::Terminate)? else {
            return Ok(());
        };
        self.editor.close();
        self.deactivate_inner()?;

        if let Some((component, controller)) = self.connections.take() {
            if let Err(e) = component
                .disconnect(&controller)
                .and_then(|_| controller.disconnect(&component))
            {
                log::warn!("Disconnecting component and controller failed: {}", e);
            }
        }
        if let Some(mut controller) = self.controller.take() {
            if !self.controller_is_component {
                if let Err(e) = guard::protect("terminate controller", || controller.terminate()) {
                    log::warn!("'{}': {}", self.class.name, e);
                }
            }
        }
        self.processor = None;
        self.bridge = None;
        if let Err(e) = guard::protect("terminate component", || self.component.terminate()) {
            log::warn!("'{}': {}", self.class.name, e);
        }
        self.queue.clear();

        log::info!("'{}' terminated", self.class.name);
        self.state = next;
        Ok(())
    }

    // Audio path

    /// Render one block from planar buffers
    ///
    /// `inputs` is `None` for instruments. Host channel `i` maps to the
    /// `i`-th plugin channel counted across buses; missing inputs are silence
    /// and host outputs beyond the plugin's channels are zeroed. On a plugin
    /// failure every output is zeroed and the error returned.
    pub fn process(
        &mut self,
        inputs: Option<&[&[f32]]>,
        outputs: &mut [&mut [f32]],
        num_frames: usize,
    ) -> Result<()> {
        let result = self.process_planar(inputs, outputs, num_frames);
        self.note_process_result(&result);
        result
    }

    /// Render one block from a stereo pair. Inputs must be given both or
    /// neither.
    pub fn process_stereo(
        &mut self,
        input_left: Option<&[f32]>,
        input_right: Option<&[f32]>,
        output_left: &mut [f32],
        output_right: &mut [f32],
        num_frames: usize,
    ) -> Result<()> {
        let pair;
        let inputs = match (input_left, input_right) {
            (Some(left), Some(right)) => {
                pair = [left, right];
                Ok(Some(&pair[..]))
            }
            (None, None) => Ok(None),
            (Some(_), None) => Err(Error::MissingInputChannel { channel: 1 }),
            (None, Some(_)) => Err(Error::MissingInputChannel { channel: 0 }),
        };
        let mut outputs = [output_left, output_right];
        let result = lifecycle::plan(self.state, Transition::Process)
            .and(inputs)
            .and_then(|inputs| self.process_planar(inputs, &mut outputs, num_frames));
        self.note_process_result(&result);
        result
    }

    /// Render one block from interleaved buffers laid out with the plugin's
    /// own input and output channel counts
    pub fn process_interleaved(
        &mut self,
        input: Option<&[f32]>,
        output: &mut [f32],
        num_frames: usize,
    ) -> Result<()> {
        let result = self.render_interleaved(input, output, num_frames);
        self.note_process_result(&result);
        result
    }

    fn process_planar(
        &mut self,
        inputs: Option<&[&[f32]]>,
        outputs: &mut [&mut [f32]],
        num_frames: usize,
    ) -> Result<()> {
        lifecycle::plan(self.state, Transition::Process)?;
        let (Some(bridge), Some(processor)) = (self.bridge.as_mut(), self.processor.as_mut())
        else {
            return Err(Error::NotActive);
        };
        let result = bridge.process_planar(
            &mut **processor,
            &self.transport,
            &self.queue,
            inputs,
            outputs,
            num_frames,
        );
        self.advance_transport(&result, num_frames);
        result
    }

    fn render_interleaved(
        &mut self,
        input: Option<&[f32]>,
        output: &mut [f32],
        num_frames: usize,
    ) -> Result<()> {
        lifecycle::plan(self.state, Transition::Process)?;
        let (Some(bridge), Some(processor)) = (self.bridge.as_mut(), self.processor.as_mut())
        else {
            return Err(Error::NotActive);
        };
        let result = bridge.process_interleaved(
            &mut **processor,
            &self.transport,
            &self.queue,
            input,
            output,
            num_frames,
        );
        self.advance_transport(&result, num_frames);
        result
    }

    /// Keep the outcome of a block for the control thread. Audio-path errors
    /// carry no heap data, so the copy is allocation-free.
    fn note_process_result(&mut self, result: &Result<()>) {
        match result {
            Ok(()) => self.last_process_error = None,
            Err(e) => {
                self.last_process_error = Some(realtime_copy(e));
                self.unreported_process_error = Some(realtime_copy(e));
            }
        }
    }

    /// Why the most recent `process*` call failed, `None` if it succeeded
    ///
    /// The failure also reaches the host's last-error slot with the next
    /// control operation on this instance; the audio path itself never takes
    /// the slot's lock.
    pub fn last_process_error(&self) -> Option<&Error> {
        self.last_process_error.as_ref()
    }

    fn advance_transport(&mut self, result: &Result<()>, num_frames: usize) {
        // rejected arguments mean the block never happened
        let rendered = match result {
            Ok(()) => true,
            Err(e) => e.kind() != ErrorKind::InvalidArgument,
        };
        if rendered {
            self.transport.advance(num_frames);
        }
    }

    /// Transport state handed to the next block
    pub fn transport(&self) -> &ProcessContext {
        &self.transport
    }

    /// Replace the transport state
    pub fn set_transport(&mut self, context: ProcessContext) {
        self.transport = context;
    }

    /// Start or stop the transport
    pub fn set_playing(&mut self, playing: bool) {
        self.transport.playing = playing;
    }

    /// Set the tempo in BPM
    pub fn set_tempo(&mut self, tempo: f64) {
        self.transport.tempo = tempo;
    }

    // Events

    /// Cloneable handle for queueing events from any thread
    pub fn event_sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Events lost so far: displaced from the full queue, or beyond what
    /// the plugin binding could carry into one block
    pub fn displaced_events(&self) -> u64 {
        let dropped = self
            .processor
            .as_deref()
            .map(|processor| processor.dropped_events())
            .unwrap_or(0);
        self.sender.displaced() + dropped
    }

    /// Queue a MIDI event at `sample_offset` of the next block
    pub fn send_midi_event_at(&mut self, event: MidiEvent, sample_offset: u32) -> Result<()> {
        self.control(|plugin| {
            plugin.require_loaded()?;
            event.validate()?;
            if !plugin.sender.send_midi(event, sample_offset) {
                log::warn!(
                    "Event queue of '{}' is full, oldest event dropped",
                    plugin.class.name
                );
            }
            Ok(())
        })
    }

    /// Queue a MIDI event at the start of the next block
    pub fn send_midi_event(&mut self, event: MidiEvent) -> Result<()> {
        self.send_midi_event_at(event, 0)
    }

    /// Queue an event in the compact `(type, channel, data1, data2)` form:
    /// type 0 = note on, 1 = note off, 2 = control change
    pub fn send_raw_midi(
        &mut self,
        event_type: i32,
        channel: u8,
        data1: u8,
        data2: u8,
        sample_offset: u32,
    ) -> Result<()> {
        let event = MidiEvent::from_raw(event_type, channel, data1, data2);
        match event {
            Ok(event) => self.send_midi_event_at(event, sample_offset),
            Err(e) => self.control(|_| Err(e)),
        }
    }

    /// Send a MIDI note on event
    pub fn send_midi_note(&mut self, note: u8, velocity: u8, channel: MidiChannel) -> Result<()> {
        self.send_midi_event(MidiEvent::NoteOn {
            channel,
            note,
            velocity,
        })
    }

    /// Send a MIDI note off event
    pub fn send_midi_note_off(&mut self, note: u8, channel: MidiChannel) -> Result<()> {
        self.send_midi_event(MidiEvent::NoteOff {
            channel,
            note,
            velocity: 0,
        })
    }

    /// Send a MIDI control change event
    pub fn send_midi_cc(&mut self, controller: u8, value: u8, channel: MidiChannel) -> Result<()> {
        self.send_midi_event(MidiEvent::ControlChange {
            channel,
            controller,
            value,
        })
    }

    /// Send a program change
    pub fn send_program_change(&mut self, program: u8, channel: MidiChannel) -> Result<()> {
        self.send_midi_event(MidiEvent::ProgramChange { channel, program })
    }

    /// Send a pitch bend (0-16383, center 8192)
    pub fn send_pitch_bend(&mut self, value: u16, channel: MidiChannel) -> Result<()> {
        self.send_midi_event(MidiEvent::PitchBend { channel, value })
    }

    /// Send channel aftertouch
    pub fn send_aftertouch(&mut self, pressure: u8, channel: MidiChannel) -> Result<()> {
        self.send_midi_event(MidiEvent::ChannelAftertouch { channel, pressure })
    }

    /// Send MIDI panic (all notes off, all sounds off, reset controllers)
    pub fn midi_panic(&mut self) -> Result<()> {
        for channel in MidiChannel::all() {
            self.send_midi_cc(cc::ALL_NOTES_OFF, 0, channel)?;
            self.send_midi_cc(cc::ALL_SOUNDS_OFF, 0, channel)?;
            self.send_midi_cc(cc::RESET_ALL_CONTROLLERS, 0, channel)?;
        }
        Ok(())
    }

    /// Queue a parameter change for `sample_offset` of the next block without
    /// touching the controller
    pub fn schedule_parameter(&mut self, id: ParamId, value: f64, sample_offset: u32) -> Result<()> {
        self.control(|plugin| {
            plugin.require_loaded()?;
            check_normalized(value)?;
            if !plugin.sender.send_parameter(id, value, sample_offset) {
                log::warn!(
                    "Event queue of '{}' is full, oldest event dropped",
                    plugin.class.name
                );
            }
            Ok(())
        })
    }

    // Parameters

    fn controller(&self) -> Result<&dyn Controller> {
        self.require_loaded()?;
        self.controller
            .as_deref()
            .ok_or_else(|| Error::Unsupported("plugin has no edit controller".to_string()))
    }

    /// Number of parameters, 0 without a controller
    pub fn parameter_count(&self) -> usize {
        self.controller
            .as_deref()
            .and_then(|controller| {
                guard::protect("count parameters", || Ok(controller.parameter_count())).ok()
            })
            .unwrap_or(0)
    }

    /// All parameter descriptors in the plugin's current order
    pub fn parameters(&mut self) -> Result<Vec<ParameterDescriptor>> {
        self.control(|plugin| descriptors(plugin.controller()?))
    }

    /// Descriptor of the parameter with `id`
    pub fn parameter_info(&mut self, id: ParamId) -> Result<ParameterDescriptor> {
        self.control(|plugin| find_descriptor(plugin.controller()?, id))
    }

    /// First parameter whose title or short title equals `name`
    pub fn find_parameter(&mut self, name: &str) -> Result<ParameterDescriptor> {
        self.control(|plugin| {
            descriptors(plugin.controller()?)?
                .into_iter()
                .find(|p| p.title == name || p.short_title == name)
                .ok_or_else(|| Error::NotFound(format!("parameter '{}' not found", name)))
        })
    }

    /// Current normalized value
    pub fn get_parameter(&mut self, id: ParamId) -> Result<f64> {
        self.control(|plugin| {
            let controller = plugin.controller()?;
            find_descriptor(controller, id)?;
            guard::protect("get parameter", || Ok(controller.get_normalized(id)))
        })
    }

    /// Set a normalized value on the controller and forward it to the
    /// processor at offset 0 of the next block
    pub fn set_parameter(&mut self, id: ParamId, value: f64) -> Result<()> {
        self.control(|plugin| plugin.set_parameter_inner(id, value))
    }

    fn set_parameter_inner(&mut self, id: ParamId, value: f64) -> Result<()> {
        check_normalized(value)?;
        find_descriptor(self.controller()?, id)?;
        let controller = self
            .controller
            .as_mut()
            .ok_or_else(|| Error::Unsupported("plugin has no edit controller".to_string()))?;
        guard::protect("set parameter", || controller.set_normalized(id, value))?;

        if !self.sender.send_parameter(id, value, 0) {
            log::warn!(
                "Event queue of '{}' is full, oldest event dropped",
                self.class.name
            );
        }
        Ok(())
    }

    /// Set a parameter by title
    pub fn set_parameter_by_name(&mut self, name: &str, value: f64) -> Result<()> {
        let id = self.find_parameter(name)?.id;
        self.set_parameter(id, value)
    }

    /// Create a batch parameter update
    pub fn update_parameters<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut ParameterUpdate) -> Result<()>,
    {
        let mut update = ParameterUpdate::new(self);
        f(&mut update)?;
        update.apply()
    }

    /// Plain value of a normalized value, as converted by the plugin
    pub fn normalized_to_plain(&mut self, id: ParamId, value: f64) -> Result<f64> {
        self.control(|plugin| {
            let controller = plugin.controller()?;
            find_descriptor(controller, id)?;
            guard::protect("convert parameter", || {
                Ok(controller.normalized_to_plain(id, value))
            })
        })
    }

    /// Normalized value of a plain value, from the parameter's range
    pub fn plain_to_normalized(&mut self, id: ParamId, plain: f64) -> Result<f64> {
        self.control(|plugin| {
            let descriptor = find_descriptor(plugin.controller()?, id)?;
            Ok(descriptor.plain_to_normalized(plain))
        })
    }

    /// Display string of a normalized value, with units
    pub fn format_parameter(&mut self, id: ParamId, value: f64) -> Result<String> {
        self.control(|plugin| {
            let descriptor = find_descriptor(plugin.controller()?, id)?;
            Ok(descriptor.format_value(value))
        })
    }

    // State

    /// Serialize the component state
    pub fn save_state(&mut self) -> Result<Vec<u8>> {
        self.control(Self::save_state_inner)
    }

    fn save_state_inner(&mut self) -> Result<Vec<u8>> {
        self.require_loaded()?;
        let mut stream = MemoryStream::new();
        guard::protect("save state", || self.component.get_state(&mut stream))?;
        Ok(stream.into_bytes())
    }

    /// Size in bytes of the current state blob
    pub fn state_size(&mut self) -> Result<usize> {
        self.save_state().map(|state| state.len())
    }

    /// Serialize the component state into `buffer`, returning the bytes
    /// written
    pub fn save_state_into(&mut self, buffer: &mut [u8]) -> Result<usize> {
        self.control(|plugin| {
            let state = plugin.save_state_inner()?;
            let capacity = buffer.len();
            let target = buffer.get_mut(..state.len()).ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "state needs {} bytes, buffer holds {}",
                    state.len(),
                    capacity
                ))
            })?;
            target.copy_from_slice(&state);
            Ok(state.len())
        })
    }

    /// Restore a blob produced by [`save_state`](Self::save_state) and let
    /// the controller follow it
    pub fn load_state(&mut self, data: &[u8]) -> Result<()> {
        self.control(|plugin| plugin.load_state_inner(data))
    }

    fn load_state_inner(&mut self, data: &[u8]) -> Result<()> {
        self.require_loaded()?;
        if data.is_empty() {
            return Err(Error::InvalidArgument("state blob is empty".to_string()));
        }
        let mut stream = MemoryStream::from_bytes(data.to_vec());
        guard::protect("load state", || self.component.set_state(&mut stream))?;

        if let Some(controller) = self.controller.as_mut() {
            stream.rewind();
            if let Err(e) = guard::protect("sync controller state", || {
                controller.set_component_state(&mut stream)
            }) {
                log::warn!("'{}': {}", self.class.name, e);
            }
        }
        log::debug!("'{}' restored {} bytes of state", self.class.name, data.len());
        Ok(())
    }

    // Editor

    /// Whether the plugin can create an editor view
    ///
    /// Creates a view and releases it immediately; the editor state is left
    /// untouched.
    pub fn has_editor(&mut self) -> bool {
        if self.editor.is_open() {
            return true;
        }
        if self.require_loaded().is_err() {
            return false;
        }
        self.controller
            .as_deref_mut()
            .map(|controller| EditorBridge::probe(controller))
            .unwrap_or(false)
    }

    /// Create the editor view
    pub fn open_editor(&mut self) -> Result<()> {
        self.control(|plugin| {
            plugin.require_loaded()?;
            plugin.editor.open(plugin.controller.as_deref_mut())
        })
    }

    /// Embed the open view into `parent`, detaching it from any other window
    /// first
    pub fn attach_editor(&mut self, parent: WindowHandle) -> Result<()> {
        self.control(|plugin| {
            let host = plugin.host.clone();
            plugin.editor.attach(parent, host)
        })
    }

    /// Remove the view from its window, keeping it alive
    pub fn detach_editor(&mut self) -> Result<()> {
        self.control(|plugin| plugin.editor.detach())
    }

    /// Natural `(width, height)` of the open view
    pub fn editor_size(&mut self) -> Result<(i32, i32)> {
        self.control(|plugin| plugin.editor.size())
    }

    /// Detach and release the view. Idempotent.
    pub fn close_editor(&mut self) {
        self.editor.close();
    }

    /// Editor state
    pub fn editor_state(&self) -> EditorState {
        self.editor.state()
    }

    /// Whether a view exists
    pub fn is_editor_open(&self) -> bool {
        self.editor.is_open()
    }

    /// Window the view is attached to
    pub fn editor_parent(&self) -> Option<WindowHandle> {
        self.editor.attached_to()
    }

    // Info

    /// Lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether processing has been set up
    pub fn is_initialized(&self) -> bool {
        self.state.is_initialized()
    }

    /// Whether the process call is legal
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Descriptor of the instantiated class
    pub fn class(&self) -> &ClassDescriptor {
        &self.class
    }

    /// Module the instance was created from
    pub fn module(&self) -> &Arc<BinaryModule> {
        &self.module
    }

    /// Negotiated sample rate (the configured default before initialize)
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Negotiated maximum block size (the configured default before
    /// initialize)
    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    /// Bus layout negotiated at initialize
    pub fn bus_layout(&self) -> Option<&BusLayout> {
        self.bridge.as_ref().map(|bridge| bridge.layout())
    }

    /// Processing latency reported by the plugin
    pub fn latency_samples(&self) -> u32 {
        self.processor
            .as_deref()
            .map(|processor| processor.latency_samples())
            .unwrap_or(0)
    }

    /// Output levels of the last block
    pub fn output_levels(&self) -> Option<&AudioLevels> {
        self.bridge.as_ref().map(|bridge| bridge.levels())
    }

    /// Reset the peak hold of every output channel
    pub fn reset_level_peaks(&mut self) {
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.reset_peak_hold();
        }
    }

    /// Blocks whose process call failed or panicked
    pub fn failed_blocks(&self) -> u64 {
        self.bridge
            .as_ref()
            .map(|bridge| bridge.failed_blocks())
            .unwrap_or(0)
    }

    /// Whether an edit controller is available
    pub fn has_controller(&self) -> bool {
        self.controller.is_some()
    }

    /// Whether an audio processor is available
    pub fn has_processor(&self) -> bool {
        self.processor.is_some()
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        if let Err(e) = self.terminate_inner() {
            log::warn!("Terminating '{}' on drop failed: {}", self.class.name, e);
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("class", &self.class.name)
            .field("state", &self.state)
            .field("sample_rate", &self.sample_rate)
            .field("max_block_size", &self.max_block_size)
            .field("editor", &self.editor.state())
            .finish()
    }
}

fn select_class<'m>(module: &'m BinaryModule, class: Option<&ClassId>) -> Result<&'m ClassDescriptor> {
    match class {
        Some(id) => module
            .find_class(id)
            .filter(|class| class.is_audio_module())
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "{} has no audio module class {}",
                    module.path().display(),
                    id
                ))
            }),
        None => module.audio_classes().next().ok_or_else(|| {
            Error::NotFound(format!(
                "{} has no audio module class",
                module.path().display()
            ))
        }),
    }
}

/// Separate controller if the component names one and it initializes,
/// otherwise the component's own controller. The flag is true for the latter.
fn create_controller(
    host: &HostContext,
    module: &BinaryModule,
    component: &mut dyn Component,
) -> (Option<Box<dyn Controller>>, bool) {
    let controller_id = guard::protect("query controller class", || {
        Ok(component.controller_class_id())
    })
    .ok()
    .flatten();

    if let Some(id) = controller_id {
        match guard::protect("create controller", || {
            module.factory().create_controller(&id)
        }) {
            Ok(mut controller) => {
                return match guard::protect("initialize controller", || {
                    controller.initialize(host)
                }) {
                    Ok(()) => (Some(controller), false),
                    Err(e) => {
                        log::warn!("Continuing without edit controller: {}", e);
                        (None, false)
                    }
                };
            }
            Err(e) => log::debug!("Separate controller {} unavailable: {}", id, e),
        }
    }

    match guard::protect("query embedded controller", || {
        Ok(component.embedded_controller())
    }) {
        Ok(Some(controller)) => (Some(controller), true),
        Ok(None) => {
            log::debug!("Plugin has no edit controller");
            (None, false)
        }
        Err(e) => {
            log::warn!("{}", e);
            (None, false)
        }
    }
}

fn connect(
    component: &dyn Component,
    controller: &dyn Controller,
) -> Option<(ConnectionPoint, ConnectionPoint)> {
    let (Some(a), Some(b)) = (component.connection_point(), controller.connection_point()) else {
        return None;
    };
    match a.connect(&b).and_then(|_| b.connect(&a)) {
        Ok(()) => Some((a, b)),
        Err(e) => {
            log::warn!("Connecting component and controller failed: {}", e);
            None
        }
    }
}

/// Hand the component's initial state to a separate controller
fn sync_controller(component: &mut dyn Component, controller: &mut dyn Controller) {
    let mut stream = MemoryStream::new();
    let result = guard::protect("read component state", || component.get_state(&mut stream))
        .and_then(|_| {
            stream.rewind();
            guard::protect("sync controller state", || {
                controller.set_component_state(&mut stream)
            })
        });
    if let Err(e) = result {
        log::debug!("Initial controller sync skipped: {}", e);
    }
}

/// Activate main buses and read the channel layout. Buses that were switched
/// on are pushed to `activated` so a failed setup can undo them.
fn negotiate_buses(
    component: &mut dyn Component,
    activated: &mut Vec<BusSlot>,
) -> Result<BusLayout> {
    if component.bus_count(MediaType::Audio, BusDirection::Output) == 0 {
        return Err(Error::Unsupported(
            "plugin has no audio output bus".to_string(),
        ));
    }
    guard::protect("activate output bus", || {
        component.activate_bus(MediaType::Audio, BusDirection::Output, 0, true)
    })?;
    activated.push((MediaType::Audio, BusDirection::Output));

    for (media, direction) in [
        (MediaType::Audio, BusDirection::Input),
        (MediaType::Event, BusDirection::Input),
    ] {
        if component.bus_count(media, direction) == 0 {
            continue;
        }
        match guard::protect("activate bus", || {
            component.activate_bus(media, direction, 0, true)
        }) {
            Ok(()) => activated.push((media, direction)),
            Err(e) => log::debug!("{:?} {:?} bus 0 left inactive: {}", media, direction, e),
        }
    }

    let channels = |direction: BusDirection| -> Vec<usize> {
        (0..component.bus_count(MediaType::Audio, direction))
            .map(|index| {
                component
                    .bus_info(MediaType::Audio, direction, index)
                    .map(|bus| bus.channel_count)
                    .unwrap_or(0)
            })
            .collect()
    };
    Ok(BusLayout {
        inputs: channels(BusDirection::Input),
        outputs: channels(BusDirection::Output),
    })
}

fn descriptors(controller: &dyn Controller) -> Result<Vec<ParameterDescriptor>> {
    guard::protect("list parameters", || {
        Ok((0..controller.parameter_count())
            .filter_map(|index| controller.parameter_info(index))
            .collect())
    })
}

/// Resolve `id` against the plugin's current list
fn find_descriptor(controller: &dyn Controller, id: ParamId) -> Result<ParameterDescriptor> {
    guard::protect("look up parameter", || {
        Ok((0..controller.parameter_count())
            .filter_map(|index| controller.parameter_info(index))
            .find(|p| p.id == id))
    })?
    .ok_or_else(|| Error::NotFound(format!("parameter {} not found", id)))
}

fn check_normalized(value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::InvalidArgument(format!(
            "value {} is out of range [0.0, 1.0]",
            value
        )));
    }
    Ok(())
}

/// Allocation-free copy of an audio-path error. Errors a processor returns
/// outside the audio-path set are reported as a rejected call.
fn realtime_copy(error: &Error) -> Error {
    match *error {
        Error::NotActive => Error::NotActive,
        Error::BlockTooLarge { requested, max } => Error::BlockTooLarge { requested, max },
        Error::BufferTooShort {
            channel,
            len,
            required,
        } => Error::BufferTooShort {
            channel,
            len,
            required,
        },
        Error::MissingInputChannel { channel } => Error::MissingInputChannel { channel },
        Error::ProcessRejected(result) => Error::ProcessRejected(result),
        Error::ProcessPanicked => Error::ProcessPanicked,
        _ => Error::ProcessRejected(-1),
    }
}
