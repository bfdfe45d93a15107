mod common;

use common::*;
use vst3_bridge::prelude::*;

fn resizing_host(resizer: RecordingResizer) -> std::sync::Arc<HostContext> {
    HostContext::builder()
        .name("editor host")
        .resize_handler(resizer)
        .build()
        .unwrap()
}

#[test]
fn test_probe_leaves_state_untouched() {
    let host = test_host();
    let (mut plugin, probe) = load(&host, MockSpec::default());

    assert!(plugin.has_editor());
    assert_eq!(plugin.editor_state(), EditorState::NoView);
    assert!(!plugin.is_editor_open());
    assert_eq!(probe.count("view.create"), 1);
    assert_eq!(probe.count("view.release"), 1);

    let (mut silent, _) = load(
        &host,
        MockSpec {
            has_editor: false,
            ..MockSpec::default()
        },
    );
    assert!(!silent.has_editor());
}

#[test]
fn test_open_and_close() {
    let host = test_host();
    let (mut plugin, probe) = load(&host, MockSpec::default());

    plugin.open_editor().unwrap();
    assert_eq!(plugin.editor_state(), EditorState::ViewCreated);
    assert_eq!(plugin.editor_size().unwrap(), (640, 480));

    let err = plugin.open_editor().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(probe.count("view.create"), 1);

    plugin.close_editor();
    plugin.close_editor();
    assert_eq!(plugin.editor_state(), EditorState::NoView);
    assert_eq!(probe.count("view.release"), 1);
    assert_eq!(
        plugin.editor_size().unwrap_err().kind(),
        ErrorKind::NotInitialized
    );
}

#[test]
fn test_plugin_without_editor() {
    let host = test_host();
    let (mut plugin, _probe) = load(
        &host,
        MockSpec {
            has_editor: false,
            ..MockSpec::default()
        },
    );
    assert_eq!(
        plugin.open_editor().unwrap_err().kind(),
        ErrorKind::Unsupported
    );
    assert_eq!(plugin.editor_state(), EditorState::NoView);
}

#[test]
fn test_attach_moves_between_windows() {
    let host = test_host();
    let (mut plugin, probe) = load(&host, MockSpec::default());
    plugin.open_editor().unwrap();

    plugin.attach_editor(window(0xa0)).unwrap();
    assert_eq!(plugin.editor_state(), EditorState::Attached);
    assert_eq!(plugin.editor_parent(), Some(window(0xa0)));

    // same window again is a no-op
    plugin.attach_editor(window(0xa0)).unwrap();
    assert_eq!(probe.count("view.attached 0xa0"), 1);

    probe.clear_journal();
    plugin.attach_editor(window(0xb0)).unwrap();
    assert_eq!(
        probe.journal(),
        vec![
            "view.removed",
            "view.set_frame none",
            "view.set_frame some",
            "view.attached 0xb0",
        ]
    );
    assert_eq!(plugin.editor_parent(), Some(window(0xb0)));

    plugin.detach_editor().unwrap();
    assert_eq!(plugin.editor_state(), EditorState::Detached);
    assert_eq!(plugin.editor_parent(), None);
    plugin.detach_editor().unwrap();
}

#[test]
fn test_attach_rejections() {
    let host = test_host();
    let (mut plugin, _probe) = load(&host, MockSpec::default());

    assert_eq!(
        plugin.attach_editor(window(0xa0)).unwrap_err().kind(),
        ErrorKind::NotInitialized
    );

    plugin.open_editor().unwrap();
    assert_eq!(
        plugin.attach_editor(window(0)).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(plugin.editor_state(), EditorState::ViewCreated);

    let (mut foreign, probe) = load(
        &host,
        MockSpec {
            platform_supported: false,
            ..MockSpec::default()
        },
    );
    foreign.open_editor().unwrap();
    assert_eq!(
        foreign.attach_editor(window(0xa0)).unwrap_err().kind(),
        ErrorKind::Unsupported
    );
    assert_eq!(foreign.editor_state(), EditorState::ViewCreated);
    assert_eq!(probe.count("view.set_frame some"), 0);
}

#[test]
fn test_plugin_initiated_resize() {
    let resizer = RecordingResizer::default();
    let host = resizing_host(resizer.clone());
    let (mut plugin, probe) = load(&host, MockSpec::default());
    plugin.open_editor().unwrap();
    plugin.attach_editor(window(0xc0)).unwrap();

    let frame = probe.frame.lock().clone().unwrap();
    assert_eq!(frame.parent(), window(0xc0));
    frame.request_resize(800, 600).unwrap();
    assert_eq!(*resizer.calls.lock(), vec![(0xc0, 800, 600)]);

    // the frame is withdrawn on detach
    plugin.detach_editor().unwrap();
    assert!(probe.frame.lock().is_none());
}

#[test]
fn test_terminate_closes_editor_first() {
    let host = test_host();
    let (mut plugin, probe) = active(&host, MockSpec::default());
    plugin.open_editor().unwrap();
    plugin.attach_editor(window(0xd0)).unwrap();

    plugin.terminate().unwrap();
    assert_eq!(plugin.editor_state(), EditorState::NoView);
    assert!(probe.position("view.release").unwrap() < probe.position("controller.terminate").unwrap());
    assert!(!plugin.has_editor());
}
