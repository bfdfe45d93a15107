//! Note/MIDI events and the control-to-audio event queue
//!
//! Events are pushed from any control thread through an [`EventSender`] and
//! drained once at the start of every process call. Each event carries a
//! sample offset into the block it lands in; events that arrive before a
//! process call are delivered in exactly that call.

use crate::{
    error::{Error, Result},
    parameters::{ParamId, ParameterChange},
};
use crossbeam_queue::ArrayQueue;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// MIDI channel, stored 0-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MidiChannel(u8);

impl MidiChannel {
    /// Channel 1
    pub const CH1: MidiChannel = MidiChannel(0);
    /// Channel 10 (drums in General MIDI)
    pub const CH10: MidiChannel = MidiChannel(9);

    /// Create from a 0-based index (0-15)
    pub fn from_index(index: u8) -> Option<Self> {
        (index < 16).then_some(MidiChannel(index))
    }

    /// The channel as a 0-based index (0-15)
    pub fn as_index(&self) -> u8 {
        self.0
    }

    /// Iterate all 16 channels
    pub fn all() -> impl Iterator<Item = MidiChannel> {
        (0..16).map(MidiChannel)
    }
}

impl fmt::Display for MidiChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ch{}", self.0 + 1)
    }
}

/// Common MIDI control change numbers
pub mod cc {
    /// Modulation Wheel
    pub const MODULATION: u8 = 1;
    /// Channel Volume
    pub const VOLUME: u8 = 7;
    /// Pan
    pub const PAN: u8 = 10;
    /// Expression
    pub const EXPRESSION: u8 = 11;
    /// Sustain Pedal
    pub const SUSTAIN: u8 = 64;
    /// All Sounds Off
    pub const ALL_SOUNDS_OFF: u8 = 120;
    /// Reset All Controllers
    pub const RESET_ALL_CONTROLLERS: u8 = 121;
    /// All Notes Off
    pub const ALL_NOTES_OFF: u8 = 123;
}

/// MIDI event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    /// Note On event
    NoteOn {
        /// MIDI channel
        channel: MidiChannel,
        /// Note number (0-127)
        note: u8,
        /// Velocity (0-127)
        velocity: u8,
    },
    /// Note Off event
    NoteOff {
        /// MIDI channel
        channel: MidiChannel,
        /// Note number (0-127)
        note: u8,
        /// Velocity (0-127)
        velocity: u8,
    },
    /// Control Change event
    ControlChange {
        /// MIDI channel
        channel: MidiChannel,
        /// Controller number (0-127)
        controller: u8,
        /// Value (0-127)
        value: u8,
    },
    /// Program Change event
    ProgramChange {
        /// MIDI channel
        channel: MidiChannel,
        /// Program number (0-127)
        program: u8,
    },
    /// Pitch Bend event
    PitchBend {
        /// MIDI channel
        channel: MidiChannel,
        /// Pitch bend value (0-16383, center is 8192)
        value: u16,
    },
    /// Channel Aftertouch event
    ChannelAftertouch {
        /// MIDI channel
        channel: MidiChannel,
        /// Pressure value (0-127)
        pressure: u8,
    },
    /// Polyphonic Aftertouch event
    PolyAftertouch {
        /// MIDI channel
        channel: MidiChannel,
        /// Note number (0-127)
        note: u8,
        /// Pressure value (0-127)
        pressure: u8,
    },
}

impl MidiEvent {
    /// Build an event from the engine's compact form:
    /// `event_type` 0 = note on, 1 = note off, 2 = control change.
    pub fn from_raw(event_type: i32, channel: u8, data1: u8, data2: u8) -> Result<Self> {
        let channel = MidiChannel::from_index(channel).ok_or_else(|| {
            Error::InvalidArgument(format!("MIDI channel {} out of range (0-15)", channel))
        })?;
        let event = match event_type {
            0 => MidiEvent::NoteOn {
                channel,
                note: data1,
                velocity: data2,
            },
            1 => MidiEvent::NoteOff {
                channel,
                note: data1,
                velocity: data2,
            },
            2 => MidiEvent::ControlChange {
                channel,
                controller: data1,
                value: data2,
            },
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown MIDI event type {}",
                    other
                )))
            }
        };
        event.validate()?;
        Ok(event)
    }

    /// Channel of the event
    pub fn channel(&self) -> MidiChannel {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::ProgramChange { channel, .. }
            | MidiEvent::PitchBend { channel, .. }
            | MidiEvent::ChannelAftertouch { channel, .. }
            | MidiEvent::PolyAftertouch { channel, .. } => channel,
        }
    }

    /// Check data byte ranges
    pub fn validate(&self) -> Result<()> {
        let check = |name: &str, value: u8| {
            if value > 127 {
                Err(Error::InvalidArgument(format!(
                    "{} {} out of range (0-127)",
                    name, value
                )))
            } else {
                Ok(())
            }
        };
        match *self {
            MidiEvent::NoteOn { note, velocity, .. } | MidiEvent::NoteOff { note, velocity, .. } => {
                check("note", note)?;
                check("velocity", velocity)
            }
            MidiEvent::ControlChange {
                controller, value, ..
            } => {
                check("controller", controller)?;
                check("value", value)
            }
            MidiEvent::ProgramChange { program, .. } => check("program", program),
            MidiEvent::PitchBend { value, .. } => {
                if value > 16383 {
                    Err(Error::InvalidArgument(format!(
                        "pitch bend {} out of range (0-16383)",
                        value
                    )))
                } else {
                    Ok(())
                }
            }
            MidiEvent::ChannelAftertouch { pressure, .. } => check("pressure", pressure),
            MidiEvent::PolyAftertouch { note, pressure, .. } => {
                check("note", note)?;
                check("pressure", pressure)
            }
        }
    }
}

/// A MIDI event positioned inside a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedMidiEvent {
    /// Sample offset within the block
    pub sample_offset: u32,
    /// The event
    pub event: MidiEvent,
}

/// Payload of a queued host event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventPayload {
    /// Note/MIDI event
    Midi(MidiEvent),
    /// Parameter value change
    Parameter {
        /// Parameter ID
        id: ParamId,
        /// Normalized value
        value: f64,
    },
}

/// An event queued for the next process call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostEvent {
    /// Requested sample offset; clamped into the block on delivery
    pub sample_offset: u32,
    /// Payload
    pub payload: EventPayload,
}

struct Shared {
    queue: ArrayQueue<HostEvent>,
    displaced: AtomicU64,
}

/// Audio-side end of an instance's event queue
pub(crate) struct EventQueue {
    shared: Arc<Shared>,
}

impl EventQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: ArrayQueue::new(capacity.max(1)),
                displaced: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn sender(&self) -> EventSender {
        EventSender {
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    fn pop(&self) -> Option<HostEvent> {
        self.shared.queue.pop()
    }

    /// Discard everything still queued
    pub(crate) fn clear(&self) {
        while self.shared.queue.pop().is_some() {}
    }

    /// Discard queued MIDI, keeping parameter changes in order. Returns the
    /// number of events dropped.
    pub(crate) fn discard_midi(&self) -> usize {
        let mut discarded = 0;
        for _ in 0..self.shared.queue.len() {
            let Some(event) = self.shared.queue.pop() else {
                break;
            };
            match event.payload {
                EventPayload::Midi(_) => discarded += 1,
                EventPayload::Parameter { .. } => {
                    let _ = self.shared.queue.force_push(event);
                }
            }
        }
        discarded
    }
}

/// Control-side handle for queueing events into an instance
///
/// Cheap to clone and usable from any thread. Sending never blocks: when the
/// queue is full the oldest queued event is displaced and counted.
#[derive(Clone)]
pub struct EventSender {
    shared: Arc<Shared>,
}

impl EventSender {
    /// Queue an event. Returns `false` if an older event had to be displaced.
    pub fn send(&self, event: HostEvent) -> bool {
        match self.shared.queue.force_push(event) {
            None => true,
            Some(_) => {
                self.shared.displaced.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Queue a parameter change
    pub fn send_parameter(&self, id: ParamId, value: f64, sample_offset: u32) -> bool {
        self.send(HostEvent {
            sample_offset,
            payload: EventPayload::Parameter { id, value },
        })
    }

    /// Queue a MIDI event
    pub fn send_midi(&self, event: MidiEvent, sample_offset: u32) -> bool {
        self.send(HostEvent {
            sample_offset,
            payload: EventPayload::Midi(event),
        })
    }

    /// Events currently waiting
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Queue capacity
    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    /// Total events displaced by overflow since creation
    pub fn displaced(&self) -> u64 {
        self.shared.displaced.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender")
            .field("pending", &self.pending())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Per-block event scratch, allocated once and reused
pub(crate) struct EventBlock {
    midi: Vec<TimedMidiEvent>,
    params: Vec<ParameterChange>,
}

impl EventBlock {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            midi: Vec::with_capacity(capacity),
            params: Vec::with_capacity(capacity),
        }
    }

    /// Move everything queued into this block. Never allocates.
    pub(crate) fn drain(&mut self, queue: &EventQueue, num_frames: usize) {
        self.clear();
        let last = num_frames.saturating_sub(1).min(u32::MAX as usize) as u32;

        while self.midi.len() < self.midi.capacity() && self.params.len() < self.params.capacity()
        {
            let Some(event) = queue.pop() else {
                break;
            };
            let sample_offset = event.sample_offset.min(last);
            match event.payload {
                EventPayload::Midi(event) => self.midi.push(TimedMidiEvent {
                    sample_offset,
                    event,
                }),
                EventPayload::Parameter { id, value } => self.params.push(ParameterChange {
                    id,
                    value,
                    sample_offset,
                }),
            }
        }

        insertion_sort_by_key(&mut self.midi, |e| e.sample_offset as u64);
        insertion_sort_by_key(&mut self.params, |c| {
            ((c.sample_offset as u64) << 32) | c.id as u64
        });
        coalesce(&mut self.params);
    }

    pub(crate) fn clear(&mut self) {
        self.midi.clear();
        self.params.clear();
    }

    pub(crate) fn midi(&self) -> &[TimedMidiEvent] {
        &self.midi
    }

    pub(crate) fn parameter_changes(&self) -> &[ParameterChange] {
        &self.params
    }
}

/// Stable and allocation-free; blocks carry few events.
fn insertion_sort_by_key<T: Copy>(items: &mut [T], key: impl Fn(&T) -> u64) {
    for i in 1..items.len() {
        let current = items[i];
        let current_key = key(&current);
        let mut j = i;
        while j > 0 && key(&items[j - 1]) > current_key {
            items[j] = items[j - 1];
            j -= 1;
        }
        items[j] = current;
    }
}

/// Keep the last change per (offset, id). Input must be sorted by that pair.
fn coalesce(changes: &mut Vec<ParameterChange>) {
    let mut write = 0;
    for read in 0..changes.len() {
        let change = changes[read];
        if write > 0
            && changes[write - 1].id == change.id
            && changes[write - 1].sample_offset == change.sample_offset
        {
            changes[write - 1] = change;
        } else {
            changes[write] = change;
            write += 1;
        }
    }
    changes.truncate(write);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_on(note: u8) -> MidiEvent {
        MidiEvent::NoteOn {
            channel: MidiChannel::CH1,
            note,
            velocity: 100,
        }
    }

    #[test]
    fn test_midi_channel() {
        assert_eq!(MidiChannel::CH1.as_index(), 0);
        assert_eq!(MidiChannel::from_index(15).map(|c| c.as_index()), Some(15));
        assert_eq!(MidiChannel::from_index(16), None);
        assert_eq!(MidiChannel::CH10.to_string(), "Ch10");
        assert_eq!(MidiChannel::all().count(), 16);
    }

    #[test]
    fn test_from_raw() {
        assert_eq!(MidiEvent::from_raw(0, 0, 60, 100).unwrap(), note_on(60));
        assert!(matches!(
            MidiEvent::from_raw(2, 3, cc::SUSTAIN, 127).unwrap(),
            MidiEvent::ControlChange { controller: 64, value: 127, .. }
        ));
        assert!(MidiEvent::from_raw(7, 0, 60, 100).is_err());
        assert!(MidiEvent::from_raw(0, 16, 60, 100).is_err());
        assert!(MidiEvent::from_raw(0, 0, 128, 100).is_err());
    }

    #[test]
    fn test_drain_sorts_and_clamps() {
        let queue = EventQueue::new(16);
        let sender = queue.sender();
        sender.send_midi(note_on(64), 100);
        sender.send_midi(note_on(60), 3);
        sender.send_midi(note_on(62), 3);

        let mut block = EventBlock::with_capacity(queue.capacity());
        block.drain(&queue, 32);

        let notes: Vec<(u32, MidiEvent)> =
            block.midi().iter().map(|e| (e.sample_offset, e.event)).collect();
        assert_eq!(
            notes,
            vec![(3, note_on(60)), (3, note_on(62)), (31, note_on(64))]
        );
        assert_eq!(sender.pending(), 0);
    }

    #[test]
    fn test_coalesces_same_offset_and_id() {
        let queue = EventQueue::new(16);
        let sender = queue.sender();
        sender.send_parameter(7, 0.1, 0);
        sender.send_parameter(7, 0.2, 0);
        sender.send_parameter(7, 0.3, 8);
        sender.send_parameter(2, 0.9, 0);

        let mut block = EventBlock::with_capacity(queue.capacity());
        block.drain(&queue, 64);

        let changes: Vec<(u32, ParamId, f64)> = block
            .parameter_changes()
            .iter()
            .map(|c| (c.sample_offset, c.id, c.value))
            .collect();
        assert_eq!(changes, vec![(0, 2, 0.9), (0, 7, 0.2), (8, 7, 0.3)]);
    }

    #[test]
    fn test_overflow_displaces_oldest() {
        let queue = EventQueue::new(2);
        let sender = queue.sender();
        assert!(sender.send_parameter(1, 0.1, 0));
        assert!(sender.send_parameter(2, 0.2, 0));
        assert!(!sender.send_parameter(3, 0.3, 0));
        assert_eq!(sender.displaced(), 1);

        let mut block = EventBlock::with_capacity(queue.capacity());
        block.drain(&queue, 16);
        let ids: Vec<ParamId> = block.parameter_changes().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_discard_midi_keeps_parameters() {
        let queue = EventQueue::new(8);
        let sender = queue.sender();
        sender.send_parameter(1, 0.1, 0);
        sender.send_midi(note_on(60), 0);
        sender.send_parameter(2, 0.2, 4);
        sender.send_midi(note_on(62), 0);

        assert_eq!(queue.discard_midi(), 2);
        assert_eq!(sender.pending(), 2);

        let mut block = EventBlock::with_capacity(queue.capacity());
        block.drain(&queue, 16);
        assert!(block.midi().is_empty());
        let ids: Vec<ParamId> = block.parameter_changes().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_clear_empties_block() {
        let queue = EventQueue::new(4);
        queue.sender().send_midi(note_on(60), 0);
        let mut block = EventBlock::with_capacity(4);
        block.drain(&queue, 16);
        assert_eq!(block.midi().len(), 1);
        block.clear();
        assert!(block.midi().is_empty());
        block.drain(&queue, 16);
        assert!(block.midi().is_empty());
    }
}
