//! Real-time audio bridge
//!
//! The bus layout is negotiated once at initialize. From then on every block
//! is marshaled through pointer tables and scratch buffers allocated up front,
//! so the process path never allocates, locks or logs.

use crate::{
    error::{Error, Result},
    events::{EventBlock, EventQueue, TimedMidiEvent},
    interfaces::Processor,
    internal::guard,
    parameters::ParameterChange,
};
use std::marker::PhantomData;

/// Channel count of every audio bus, in bus order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusLayout {
    /// Channels per input bus
    pub inputs: Vec<usize>,
    /// Channels per output bus
    pub outputs: Vec<usize>,
}

impl BusLayout {
    /// Total input channels across all buses
    pub fn input_channels(&self) -> usize {
        self.inputs.iter().sum()
    }

    /// Total output channels across all buses
    pub fn output_channels(&self) -> usize {
        self.outputs.iter().sum()
    }

    /// Whether the plugin takes no audio input (instrument)
    pub fn is_instrument(&self) -> bool {
        self.input_channels() == 0
    }
}

/// Flat channel index of `channel` on `bus`
fn flat_index(buses: &[usize], bus: usize, channel: usize) -> Option<usize> {
    let count = *buses.get(bus)?;
    (channel < count).then(|| buses[..bus].iter().sum::<usize>() + channel)
}

/// Transport state passed with every block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessContext {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Project position in samples
    pub project_time_samples: i64,
    /// Project position in quarter notes
    pub project_time_music: f64,
    /// Tempo in BPM
    pub tempo: f64,
    /// Time signature numerator
    pub time_sig_numerator: i32,
    /// Time signature denominator
    pub time_sig_denominator: i32,
    /// Transport running
    pub playing: bool,
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new(44100.0)
    }
}

impl ProcessContext {
    /// Stopped transport at 120 BPM, 4/4
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            project_time_samples: 0,
            project_time_music: 0.0,
            tempo: 120.0,
            time_sig_numerator: 4,
            time_sig_denominator: 4,
            playing: false,
        }
    }

    /// Move the position forward by `frames` while playing
    pub fn advance(&mut self, frames: usize) {
        if !self.playing || frames == 0 {
            return;
        }
        self.project_time_samples += frames as i64;
        if self.sample_rate > 0.0 {
            self.project_time_music += frames as f64 / self.sample_rate * self.tempo / 60.0;
        }
    }
}

/// One block as seen by a [`Processor`]
///
/// Channels are addressed either per bus or by flat index across buses in
/// bus order.
pub struct ProcessData<'a> {
    num_frames: usize,
    layout: &'a BusLayout,
    inputs: &'a [*mut f32],
    outputs: &'a [*mut f32],
    context: &'a ProcessContext,
    midi: &'a [TimedMidiEvent],
    parameter_changes: &'a [ParameterChange],
    _buffers: PhantomData<&'a mut [f32]>,
}

impl<'a> ProcessData<'a> {
    /// Frames in this block
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Negotiated bus layout
    pub fn layout(&self) -> &'a BusLayout {
        self.layout
    }

    /// Transport state
    pub fn context(&self) -> &'a ProcessContext {
        self.context
    }

    /// Note/MIDI events of this block, sorted by sample offset
    pub fn midi_events(&self) -> &'a [TimedMidiEvent] {
        self.midi
    }

    /// Parameter changes of this block, sorted by sample offset then id
    pub fn parameter_changes(&self) -> &'a [ParameterChange] {
        self.parameter_changes
    }

    /// Total input channels
    pub fn input_channel_count(&self) -> usize {
        self.inputs.len()
    }

    /// Total output channels
    pub fn output_channel_count(&self) -> usize {
        self.outputs.len()
    }

    /// Input channel by flat index
    pub fn input(&self, index: usize) -> Option<&'a [f32]> {
        let ptr = *self.inputs.get(index)?;
        // SAFETY: input pointers refer to bridge-owned scratch of at least
        // `num_frames` samples that nothing else touches during the call.
        Some(unsafe { std::slice::from_raw_parts(ptr, self.num_frames) })
    }

    /// Output channel by flat index
    pub fn output(&mut self, index: usize) -> Option<&mut [f32]> {
        let ptr = *self.outputs.get(index)?;
        // SAFETY: output pointers are distinct, hold at least `num_frames`
        // samples and are exclusively lent to this call.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr, self.num_frames) })
    }

    /// Input channel `channel` of bus `bus`
    pub fn bus_input(&self, bus: usize, channel: usize) -> Option<&'a [f32]> {
        self.input(flat_index(&self.layout.inputs, bus, channel)?)
    }

    /// Output channel `channel` of bus `bus`
    pub fn bus_output(&mut self, bus: usize, channel: usize) -> Option<&mut [f32]> {
        let index = flat_index(&self.layout.outputs, bus, channel)?;
        self.output(index)
    }

    pub(crate) fn raw_inputs(&self) -> &'a [*mut f32] {
        self.inputs
    }

    pub(crate) fn raw_outputs(&self) -> &'a [*mut f32] {
        self.outputs
    }
}

/// Level information for a single channel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelLevel {
    /// Peak level (1.0 = 0dB)
    pub peak: f32,
    /// RMS level
    pub rms: f32,
    /// Highest peak since the last reset
    pub peak_hold: f32,
}

impl ChannelLevel {
    /// Peak level in decibels
    pub fn peak_db(&self) -> f32 {
        if self.peak <= 0.0 {
            f32::NEG_INFINITY
        } else {
            20.0 * self.peak.log10()
        }
    }

    /// Check if the signal is clipping (> 0dB)
    pub fn is_clipping(&self) -> bool {
        self.peak > 1.0
    }
}

/// Output levels of the last processed block
#[derive(Debug, Clone, Default)]
pub struct AudioLevels {
    /// Level information for each plugin output channel
    pub channels: Vec<ChannelLevel>,
}

impl AudioLevels {
    /// Levels for the given number of channels
    pub fn new(channel_count: usize) -> Self {
        Self {
            channels: vec![ChannelLevel::default(); channel_count],
        }
    }

    fn update<'b>(&mut self, buffers: impl Iterator<Item = &'b [f32]>) {
        for (channel, buffer) in self.channels.iter_mut().zip(buffers) {
            if buffer.is_empty() {
                continue;
            }
            let peak = buffer.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));
            let sum_squares: f32 = buffer.iter().map(|&x| x * x).sum();
            channel.peak = peak;
            channel.rms = (sum_squares / buffer.len() as f32).sqrt();
            if peak > channel.peak_hold {
                channel.peak_hold = peak;
            }
        }
    }

    /// Reset peak hold values
    pub fn reset_peak_hold(&mut self) {
        for channel in &mut self.channels {
            channel.peak_hold = channel.peak;
        }
    }

    /// Check if any channel is clipping
    pub fn is_clipping(&self) -> bool {
        self.channels.iter().any(|ch| ch.is_clipping())
    }
}

/// Pre-allocated marshaling state of one initialized instance
pub(crate) struct AudioBridge {
    layout: BusLayout,
    max_block_size: usize,
    input_scratch: Vec<Vec<f32>>,
    output_scratch: Vec<Vec<f32>>,
    input_ptrs: Vec<*mut f32>,
    output_ptrs: Vec<*mut f32>,
    events: EventBlock,
    levels: AudioLevels,
    failed_blocks: u64,
}

// SAFETY: the pointer tables only hold addresses while a block is being
// processed on the thread that owns the bridge; between calls they are stale
// and never dereferenced.
unsafe impl Send for AudioBridge {}

impl AudioBridge {
    pub(crate) fn new(layout: BusLayout, max_block_size: usize, event_capacity: usize) -> Self {
        let inputs = layout.input_channels();
        let outputs = layout.output_channels();
        Self {
            input_scratch: vec![vec![0.0; max_block_size]; inputs],
            output_scratch: vec![vec![0.0; max_block_size]; outputs],
            input_ptrs: vec![std::ptr::null_mut(); inputs],
            output_ptrs: vec![std::ptr::null_mut(); outputs],
            events: EventBlock::with_capacity(event_capacity),
            levels: AudioLevels::new(outputs),
            failed_blocks: 0,
            layout,
            max_block_size,
        }
    }

    pub(crate) fn layout(&self) -> &BusLayout {
        &self.layout
    }

    pub(crate) fn levels(&self) -> &AudioLevels {
        &self.levels
    }

    pub(crate) fn reset_peak_hold(&mut self) {
        self.levels.reset_peak_hold();
    }

    pub(crate) fn failed_blocks(&self) -> u64 {
        self.failed_blocks
    }

    fn check_frames(&self, num_frames: usize) -> Result<()> {
        if num_frames > self.max_block_size {
            return Err(Error::BlockTooLarge {
                requested: num_frames,
                max: self.max_block_size,
            });
        }
        Ok(())
    }

    /// Planar host buffers, one slice per channel
    pub(crate) fn process_planar(
        &mut self,
        processor: &mut dyn Processor,
        context: &ProcessContext,
        queue: &EventQueue,
        inputs: Option<&[&[f32]]>,
        outputs: &mut [&mut [f32]],
        num_frames: usize,
    ) -> Result<()> {
        self.check_frames(num_frames)?;
        for (channel, buffer) in inputs.unwrap_or_default().iter().enumerate() {
            check_len(channel, buffer.len(), num_frames)?;
        }
        for (channel, buffer) in outputs.iter().enumerate() {
            check_len(channel, buffer.len(), num_frames)?;
        }

        for buffer in outputs.iter_mut() {
            buffer[..num_frames].fill(0.0);
        }
        for (channel, scratch) in self.input_scratch.iter_mut().enumerate() {
            let dst = &mut scratch[..num_frames];
            match inputs.and_then(|inputs| inputs.get(channel)) {
                Some(src) => dst.copy_from_slice(&src[..num_frames]),
                None => dst.fill(0.0),
            }
            self.input_ptrs[channel] = scratch.as_mut_ptr();
        }
        for (channel, ptr) in self.output_ptrs.iter_mut().enumerate() {
            *ptr = match outputs.get_mut(channel) {
                Some(buffer) => buffer.as_mut_ptr(),
                None => {
                    let scratch = &mut self.output_scratch[channel];
                    scratch[..num_frames].fill(0.0);
                    scratch.as_mut_ptr()
                }
            };
        }

        let result = self.render(processor, context, queue, num_frames);

        if result.is_err() {
            for buffer in outputs.iter_mut() {
                buffer[..num_frames].fill(0.0);
            }
        }
        self.levels
            .update(outputs.iter().map(|buffer| &buffer[..num_frames]));
        result
    }

    /// Interleaved host buffers with the plugin's own channel counts
    pub(crate) fn process_interleaved(
        &mut self,
        processor: &mut dyn Processor,
        context: &ProcessContext,
        queue: &EventQueue,
        input: Option<&[f32]>,
        output: &mut [f32],
        num_frames: usize,
    ) -> Result<()> {
        self.check_frames(num_frames)?;
        let in_channels = self.input_scratch.len();
        let out_channels = self.output_scratch.len();
        if let Some(input) = input {
            check_len(0, input.len(), num_frames * in_channels)?;
        }
        check_len(0, output.len(), num_frames * out_channels)?;

        for (channel, scratch) in self.input_scratch.iter_mut().enumerate() {
            let dst = &mut scratch[..num_frames];
            match input {
                Some(input) => {
                    for (frame, sample) in dst.iter_mut().enumerate() {
                        *sample = input[frame * in_channels + channel];
                    }
                }
                None => dst.fill(0.0),
            }
            self.input_ptrs[channel] = scratch.as_mut_ptr();
        }
        for (scratch, ptr) in self.output_scratch.iter_mut().zip(self.output_ptrs.iter_mut()) {
            scratch[..num_frames].fill(0.0);
            *ptr = scratch.as_mut_ptr();
        }

        let result = self.render(processor, context, queue, num_frames);

        let output = &mut output[..num_frames * out_channels];
        if result.is_ok() {
            for (channel, scratch) in self.output_scratch.iter().enumerate() {
                for (frame, sample) in scratch[..num_frames].iter().enumerate() {
                    output[frame * out_channels + channel] = *sample;
                }
            }
        } else {
            output.fill(0.0);
            for scratch in &mut self.output_scratch {
                scratch[..num_frames].fill(0.0);
            }
        }
        self.levels.update(
            self.output_scratch
                .iter()
                .map(|scratch| &scratch[..num_frames]),
        );
        result
    }

    fn render(
        &mut self,
        processor: &mut dyn Processor,
        context: &ProcessContext,
        queue: &EventQueue,
        num_frames: usize,
    ) -> Result<()> {
        self.events.drain(queue, num_frames);
        let result = {
            let mut data = ProcessData {
                num_frames,
                layout: &self.layout,
                inputs: &self.input_ptrs,
                outputs: &self.output_ptrs,
                context,
                midi: self.events.midi(),
                parameter_changes: self.events.parameter_changes(),
                _buffers: PhantomData,
            };
            guard::protect_process(|| processor.process(&mut data))
        };
        self.events.clear();
        if result.is_err() {
            self.failed_blocks += 1;
        }
        result
    }
}

fn check_len(channel: usize, len: usize, required: usize) -> Result<()> {
    if len < required {
        return Err(Error::BufferTooShort {
            channel,
            len,
            required,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_counts() {
        let layout = BusLayout {
            inputs: vec![],
            outputs: vec![2, 1],
        };
        assert!(layout.is_instrument());
        assert_eq!(layout.output_channels(), 3);
        assert_eq!(flat_index(&layout.outputs, 1, 0), Some(2));
        assert_eq!(flat_index(&layout.outputs, 1, 1), None);
        assert_eq!(flat_index(&layout.outputs, 2, 0), None);
    }

    #[test]
    fn test_context_advances_only_while_playing() {
        let mut context = ProcessContext::new(48000.0);
        context.advance(480);
        assert_eq!(context.project_time_samples, 0);

        context.playing = true;
        context.advance(24000);
        assert_eq!(context.project_time_samples, 24000);
        // half a second at 120 BPM is one quarter note
        assert!((context.project_time_music - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_levels() {
        let mut levels = AudioLevels::new(2);
        let left = [0.5f32, -1.5];
        let right = [0.0f32; 2];
        levels.update([&left[..], &right[..]].into_iter());
        assert_eq!(levels.channels[0].peak, 1.5);
        assert!(levels.is_clipping());
        assert_eq!(levels.channels[1].peak_db(), f32::NEG_INFINITY);
    }
}
