//! # vst3-bridge
//!
//! Lifecycle, real-time audio and editor bridge for hosting VST3 plugins
//! inside an audio engine.
//!
//! ## Quick Start
//!
//! ```no_run
//! use vst3_bridge::prelude::*;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! // One host context per process
//! let host = HostContext::init()?;
//!
//! // Load a plugin and bring it up
//! let mut plugin = host.load_plugin("/Library/Audio/Plug-Ins/VST3/Synth.vst3")?;
//! plugin.initialize(48000.0, 256)?;
//! plugin.activate()?;
//!
//! // Queue a note for the next block and render it
//! plugin.send_midi_note(60, 100, MidiChannel::CH1)?;
//! let mut left = vec![0.0f32; 256];
//! let mut right = vec![0.0f32; 256];
//! plugin.process_stereo(None, None, &mut left, &mut right, 256)?;
//!
//! // Tear down explicitly (also happens on drop)
//! plugin.terminate()?;
//! HostContext::shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Threads
//!
//! Lifecycle, parameter, state and editor calls belong to one control thread.
//! The `process*` methods belong to the audio thread and never allocate, lock
//! or log. Events reach the audio thread through a bounded lock-free queue
//! ([`EventSender`]) that can be fed from any thread.

#![warn(missing_docs)]

pub mod audio;
pub mod config;
pub mod discovery;
pub mod editor;
pub mod error;
pub mod events;
pub mod host;
pub mod interfaces;
pub mod lifecycle;
pub mod module;
pub mod parameters;
pub mod plugin;
pub mod state;
pub mod window;

mod internal;

pub use audio::{AudioLevels, BusLayout, ChannelLevel, ProcessContext, ProcessData};
pub use config::HostConfig;
pub use discovery::{PluginInfo, PluginKind, Scanner};
pub use editor::{EditorFrame, EditorState, PlatformType, ResizeHandler, ViewRect, WindowHandle};
pub use error::{Error, ErrorKind, Result};
pub use events::{cc, EventSender, MidiChannel, MidiEvent, TimedMidiEvent};
pub use host::{last_error, HostContext, HostContextBuilder};
pub use lifecycle::LifecycleState;
pub use module::{BinaryModule, ClassDescriptor, ClassId};
pub use parameters::{ParamId, ParameterChange, ParameterDescriptor, ParameterFlags};
pub use plugin::PluginInstance;
pub use state::MemoryStream;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        audio::{AudioLevels, BusLayout, ProcessContext},
        config::HostConfig,
        discovery::PluginInfo,
        editor::{EditorState, WindowHandle},
        error::{Error, ErrorKind, Result},
        events::{cc, EventSender, MidiChannel, MidiEvent},
        host::{HostContext, HostContextBuilder},
        lifecycle::LifecycleState,
        parameters::{ParamId, ParameterDescriptor},
        plugin::PluginInstance,
    };
}
