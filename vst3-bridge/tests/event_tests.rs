mod common;

use common::*;
use std::thread;
use vst3_bridge::prelude::*;
use vst3_bridge::TimedMidiEvent;

fn render(plugin: &mut PluginInstance, probe: &Probe, frames: usize) -> BlockRecord {
    let mut left = vec![0.0f32; frames];
    let mut right = vec![0.0f32; frames];
    plugin
        .process_stereo(None, None, &mut left, &mut right, frames)
        .unwrap();
    probe.last_block().unwrap()
}

#[test]
fn test_events_are_seen_exactly_once() {
    let host = test_host();
    let (mut plugin, probe) = active(&host, MockSpec::instrument());

    plugin
        .send_midi_event_at(
            MidiEvent::NoteOn {
                channel: MidiChannel::CH1,
                note: 60,
                velocity: 100,
            },
            32,
        )
        .unwrap();
    plugin.send_midi_note(64, 90, MidiChannel::CH1).unwrap();
    plugin.schedule_parameter(GAIN, 0.1, 16).unwrap();

    let block = render(&mut plugin, &probe, 64);
    let offsets: Vec<u32> = block.midi.iter().map(|e| e.sample_offset).collect();
    assert_eq!(offsets, vec![0, 32]);
    assert_eq!(block.params.len(), 1);
    assert_eq!(block.params[0].sample_offset, 16);

    let block = render(&mut plugin, &probe, 64);
    assert!(block.midi.is_empty());
    assert!(block.params.is_empty());
}

#[test]
fn test_midi_queued_while_inactive_is_discarded() {
    let host = test_host();
    let (mut plugin, probe) = load(&host, MockSpec::instrument());
    plugin.initialize(48000.0, 256).unwrap();

    plugin.send_midi_note(60, 100, MidiChannel::CH1).unwrap();
    plugin.set_parameter(GAIN, 0.4).unwrap();
    plugin.activate().unwrap();

    // a stale note is dropped, the parameter value still reaches the processor
    let block = render(&mut plugin, &probe, 64);
    assert!(block.midi.is_empty());
    assert_eq!(block.params.len(), 1);
    assert_eq!(block.params[0].value, 0.4);

    // same across a deactivate/activate cycle
    plugin.send_midi_note(62, 100, MidiChannel::CH1).unwrap();
    plugin.deactivate().unwrap();
    plugin.activate().unwrap();
    assert!(render(&mut plugin, &probe, 64).midi.is_empty());

    // nothing queued while active is touched
    plugin.send_midi_note(64, 100, MidiChannel::CH1).unwrap();
    assert_eq!(render(&mut plugin, &probe, 64).midi.len(), 1);
}

#[test]
fn test_offsets_are_clamped_into_the_block() {
    let host = test_host();
    let (mut plugin, probe) = active(&host, MockSpec::instrument());
    plugin.send_midi_note_off(60, MidiChannel::CH1).unwrap();
    plugin
        .send_midi_event_at(
            MidiEvent::NoteOn {
                channel: MidiChannel::CH1,
                note: 61,
                velocity: 1,
            },
            10_000,
        )
        .unwrap();

    let block = render(&mut plugin, &probe, 48);
    assert_eq!(block.midi.last().unwrap().sample_offset, 47);
}

#[test]
fn test_same_offset_parameter_changes_coalesce() {
    let host = test_host();
    let (mut plugin, probe) = active(&host, MockSpec::instrument());
    plugin.schedule_parameter(GAIN, 0.1, 8).unwrap();
    plugin.schedule_parameter(GAIN, 0.2, 8).unwrap();
    plugin.schedule_parameter(GAIN, 0.3, 4).unwrap();
    plugin.schedule_parameter(MODE, 1.0, 8).unwrap();

    let block = render(&mut plugin, &probe, 64);
    let changes: Vec<(u32, ParamId, f64)> = block
        .params
        .iter()
        .map(|c| (c.sample_offset, c.id, c.value))
        .collect();
    assert_eq!(changes, vec![(4, GAIN, 0.3), (8, MODE, 1.0), (8, GAIN, 0.2)]);
}

#[test]
fn test_overflow_displaces_oldest() {
    let host = test_host();
    let (mut plugin, probe) = active(&host, MockSpec::instrument());
    let capacity = plugin.event_sender().capacity();
    assert_eq!(capacity, 64);

    for note in 0..70u8 {
        plugin.send_midi_note(note, 100, MidiChannel::CH1).unwrap();
    }
    assert_eq!(plugin.displaced_events(), 6);

    let block = render(&mut plugin, &probe, 128);
    assert_eq!(block.midi.len(), 64);
    let first = match block.midi[0].event {
        MidiEvent::NoteOn { note, .. } => note,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(first, 6);
}

#[test]
fn test_sender_feeds_from_another_thread() {
    let host = test_host();
    let (mut plugin, probe) = active(&host, MockSpec::instrument());
    let sender = plugin.event_sender();

    thread::spawn(move || {
        for value in [0.25, 0.5] {
            sender.send_parameter(MODE, value, 0);
        }
        sender.send_midi(
            MidiEvent::ControlChange {
                channel: MidiChannel::CH10,
                controller: cc::SUSTAIN,
                value: 127,
            },
            3,
        );
    })
    .join()
    .unwrap();

    let block = render(&mut plugin, &probe, 16);
    assert_eq!(block.params.len(), 1);
    assert_eq!(block.params[0].value, 0.5);
    assert_eq!(
        block.midi,
        vec![TimedMidiEvent {
            sample_offset: 3,
            event: MidiEvent::ControlChange {
                channel: MidiChannel::CH10,
                controller: cc::SUSTAIN,
                value: 127,
            },
        }]
    );
}

#[test]
fn test_raw_midi_form() {
    let host = test_host();
    let (mut plugin, probe) = active(&host, MockSpec::instrument());

    plugin.send_raw_midi(0, 0, 60, 100, 0).unwrap();
    plugin.send_raw_midi(1, 0, 60, 0, 5).unwrap();
    plugin.send_raw_midi(2, 15, cc::MODULATION, 64, 9).unwrap();

    assert_eq!(
        plugin.send_raw_midi(3, 0, 60, 100, 0).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        plugin.send_raw_midi(0, 16, 60, 100, 0).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        plugin.send_raw_midi(0, 0, 128, 100, 0).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );

    let block = render(&mut plugin, &probe, 16);
    assert_eq!(block.midi.len(), 3);
    assert!(matches!(block.midi[0].event, MidiEvent::NoteOn { note: 60, .. }));
    assert!(matches!(block.midi[1].event, MidiEvent::NoteOff { note: 60, .. }));
    assert!(matches!(
        block.midi[2].event,
        MidiEvent::ControlChange {
            controller: cc::MODULATION,
            value: 64,
            ..
        }
    ));
}

#[test]
fn test_midi_helpers_validate() {
    let host = test_host();
    let (mut plugin, probe) = active(&host, MockSpec::instrument());

    assert!(plugin.send_midi_note(128, 100, MidiChannel::CH1).is_err());
    assert!(plugin.send_pitch_bend(16384, MidiChannel::CH1).is_err());
    plugin.send_pitch_bend(8192, MidiChannel::CH1).unwrap();
    plugin.send_program_change(5, MidiChannel::CH1).unwrap();
    plugin.send_aftertouch(40, MidiChannel::CH1).unwrap();

    let block = render(&mut plugin, &probe, 16);
    assert_eq!(block.midi.len(), 3);
}

#[test]
fn test_midi_panic_covers_all_channels() {
    let host = test_host();
    let (mut plugin, probe) = active(&host, MockSpec::instrument());
    plugin.midi_panic().unwrap();

    let block = render(&mut plugin, &probe, 16);
    assert_eq!(block.midi.len(), 48);
    for channel in MidiChannel::all() {
        let per_channel = block
            .midi
            .iter()
            .filter(|e| e.event.channel() == channel)
            .count();
        assert_eq!(per_channel, 3);
    }
}

#[test]
fn test_events_rejected_after_terminate() {
    let host = test_host();
    let (mut plugin, _probe) = active(&host, MockSpec::instrument());
    plugin.terminate().unwrap();

    assert_eq!(
        plugin
            .send_midi_note(60, 100, MidiChannel::CH1)
            .unwrap_err()
            .kind(),
        ErrorKind::NotInitialized
    );
}
