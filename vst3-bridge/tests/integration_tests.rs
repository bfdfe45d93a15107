//! Tests against real VST3 plugins installed on the system
//!
//! Ignored by default. Run with:
//! ```text
//! cargo test --test integration_tests -- --ignored
//! ```

use vst3_bridge::prelude::*;

/// Prefer well-known free plugins, otherwise take whatever is installed
fn find_test_plugin(host: &HostContext, want_instrument: bool) -> Option<PluginInfo> {
    let preferred = [
        "Vital",
        "Surge XT Effects",
        "Surge XT",
        "Dexed",
        "TAL-NoiseMaker",
        "OB-Xd",
    ];

    let mut plugins = Vec::new();
    host.scan_standard_locations(|info| plugins.push(info.clone()))
        .ok()?;
    plugins.retain(|p| p.is_instrument == want_instrument);

    for name in &preferred {
        if let Some(plugin) = plugins.iter().find(|p| p.name.contains(name)) {
            println!("Found test plugin: {} by {}", plugin.name, plugin.vendor);
            return Some(plugin.clone());
        }
    }
    plugins.into_iter().next()
}

fn host() -> std::sync::Arc<HostContext> {
    let _ = env_logger::builder().is_test(true).try_init();
    HostContext::builder()
        .name("integration tests")
        .build()
        .expect("host context")
}

#[test]
#[ignore = "Requires VST3 plugins to be installed"]
fn test_scan_standard_locations() {
    let host = host();
    let mut plugins = Vec::new();
    let count = host
        .scan_standard_locations(|info| plugins.push(info.clone()))
        .unwrap();

    assert_eq!(count, plugins.len());
    for plugin in plugins.iter().take(5) {
        println!("  {} by {} [{}]", plugin.name, plugin.vendor, plugin.category);
        assert!(plugin.path.exists());
        assert_eq!(plugin.class_id.len(), 32);
        assert_ne!(plugin.is_instrument, plugin.is_effect);
    }
}

#[test]
#[ignore = "Requires VST3 plugins to be installed"]
fn test_instrument_renders() {
    let host = host();
    let Some(info) = find_test_plugin(&host, true) else {
        println!("No instrument installed");
        return;
    };

    let mut plugin = host.load_plugin(&info.path).unwrap();
    plugin.initialize(48000.0, 512).unwrap();
    plugin.activate().unwrap();
    println!(
        "'{}': {} parameters, latency {}",
        plugin.class().name,
        plugin.parameter_count(),
        plugin.latency_samples()
    );

    plugin.send_midi_note(60, 100, MidiChannel::CH1).unwrap();
    let mut left = vec![0.0f32; 512];
    let mut right = vec![0.0f32; 512];
    let mut heard = false;
    for _ in 0..40 {
        plugin
            .process_stereo(None, None, &mut left, &mut right, 512)
            .unwrap();
        heard |= left.iter().chain(right.iter()).any(|s| s.abs() > 1e-6);
    }
    plugin.send_midi_note_off(60, MidiChannel::CH1).unwrap();
    println!("Audible output: {}", heard);
    assert!(left.iter().all(|s| s.is_finite()));

    plugin.terminate().unwrap();
}

#[test]
#[ignore = "Requires VST3 plugins to be installed"]
fn test_effect_state_round_trip() {
    let host = host();
    let Some(info) = find_test_plugin(&host, false) else {
        println!("No effect installed");
        return;
    };

    let mut plugin = host.load_plugin(&info.path).unwrap();
    plugin.initialize(44100.0, 256).unwrap();
    let blob = plugin.save_state().unwrap();
    if !blob.is_empty() {
        plugin.load_state(&blob).unwrap();
    }

    let mut second = host.load_plugin(&info.path).unwrap();
    if !blob.is_empty() {
        second.load_state(&blob).unwrap();
    }
    for parameter in plugin.parameters().unwrap().iter().take(10) {
        let a = plugin.get_parameter(parameter.id).unwrap();
        let b = second.get_parameter(parameter.id).unwrap();
        assert!((a - b).abs() < 1e-6, "{} differs", parameter.title);
    }
}

#[test]
#[ignore = "Requires VST3 plugins to be installed"]
fn test_editor_probe() {
    let host = host();
    let Some(info) = find_test_plugin(&host, true) else {
        return;
    };

    let mut plugin = host.load_plugin(&info.path).unwrap();
    if plugin.has_editor() {
        assert_eq!(plugin.editor_state(), EditorState::NoView);
        plugin.open_editor().unwrap();
        let (width, height) = plugin.editor_size().unwrap();
        println!("Editor size: {}x{}", width, height);
        assert!(width > 0 && height > 0);
        plugin.close_editor();
    }
}
