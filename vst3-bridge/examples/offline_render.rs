//! Render a short phrase through a plugin without an audio device
//!
//! ```text
//! cargo run --example offline_render -- /path/to/Synth.vst3 [seconds]
//! ```

use vst3_bridge::prelude::*;

const SAMPLE_RATE: f64 = 48000.0;
const BLOCK: usize = 256;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let path = args
        .next()
        .ok_or("usage: offline_render <plugin.vst3> [seconds]")?;
    let seconds: f64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(4.0);

    let host = HostContext::builder()
        .name("offline renderer")
        .sample_rate(SAMPLE_RATE)
        .max_block_size(BLOCK)
        .build()?;

    let mut plugin = host.load_plugin(&path)?;
    println!("Loaded '{}'", plugin.class().name);
    plugin.initialize_offline(SAMPLE_RATE, BLOCK)?;
    plugin.activate()?;
    plugin.set_tempo(120.0);
    plugin.set_playing(true);

    if let Some(layout) = plugin.bus_layout() {
        println!(
            "Buses: {} in / {} out channels, latency {} samples",
            layout.input_channels(),
            layout.output_channels(),
            plugin.latency_samples()
        );
    }

    // A major triad, one note every half second
    let notes = [60u8, 64, 67, 72];
    let note_frames = (SAMPLE_RATE / 2.0) as usize;
    let total_frames = (seconds * SAMPLE_RATE) as usize;

    let mut left = vec![0.0f32; BLOCK];
    let mut right = vec![0.0f32; BLOCK];
    let mut rendered = 0usize;
    let mut peak = 0.0f32;
    let mut failed = 0usize;

    while rendered < total_frames {
        let frames = BLOCK.min(total_frames - rendered);

        let step = rendered / note_frames;
        let offset = rendered % note_frames;
        if offset < frames {
            if step > 0 {
                if let Some(&note) = notes.get((step - 1) % notes.len()) {
                    plugin.send_midi_note_off(note, MidiChannel::CH1)?;
                }
            }
            let note = notes[step % notes.len()];
            plugin.send_midi_event_at(
                MidiEvent::NoteOn {
                    channel: MidiChannel::CH1,
                    note,
                    velocity: 100,
                },
                offset as u32,
            )?;
        }

        match plugin.process_stereo(None, None, &mut left, &mut right, frames) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::PluginRejected => failed += 1,
            Err(e) => return Err(e.into()),
        }
        peak = left[..frames]
            .iter()
            .chain(right[..frames].iter())
            .fold(peak, |acc, s| acc.max(s.abs()));

        rendered += frames;
        if rendered % (SAMPLE_RATE as usize) < frames {
            if let Some(levels) = plugin.output_levels() {
                let rms: Vec<String> = levels
                    .channels
                    .iter()
                    .map(|c| format!("{:.3}", c.rms))
                    .collect();
                println!("{:>5.1}s  rms [{}]", rendered as f64 / SAMPLE_RATE, rms.join(", "));
            }
        }
    }

    plugin.midi_panic()?;
    println!(
        "Rendered {} frames, peak {:.3}, {} failed blocks",
        rendered, peak, failed
    );

    plugin.terminate()?;
    Ok(())
}
