//! Plugin editor (GUI view) bridge
//!
//! ```text
//! NoView -> ViewCreated -> Attached <-> Detached -> (close) -> NoView
//! ```
//!
//! An open view belongs to exactly one instance and is attached to at most one
//! native window at a time. Closing always happens before the plugin is
//! terminated.

use crate::{
    error::{Error, Result},
    host::HostContext,
    interfaces::{Controller, PlugView},
    internal::guard,
};
use std::ffi::c_void;
use std::sync::Weak;

/// Native parent window handle (`NSView*`, `HWND` or an X11 window id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(*mut c_void);

// SAFETY: the handle is an opaque token; it is only dereferenced by the
// platform window system on the thread that owns the window.
unsafe impl Send for WindowHandle {}
unsafe impl Sync for WindowHandle {}

impl WindowHandle {
    /// Create from a raw window handle
    ///
    /// # Safety
    /// The pointer must be a valid window handle for the platform and outlive
    /// every editor attached to it.
    pub unsafe fn from_raw(handle: *mut c_void) -> Self {
        Self(handle)
    }

    /// The raw handle
    pub fn as_ptr(&self) -> *mut c_void {
        self.0
    }

    /// Whether the handle is null
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

/// Native window system an editor is embedded into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformType {
    /// Win32 `HWND`
    Hwnd,
    /// Cocoa `NSView*`
    NsView,
    /// X11 window id
    X11EmbedWindowId,
}

impl PlatformType {
    /// Platform type of the current build target
    pub fn native() -> Self {
        if cfg!(target_os = "windows") {
            PlatformType::Hwnd
        } else if cfg!(target_os = "macos") {
            PlatformType::NsView
        } else {
            PlatformType::X11EmbedWindowId
        }
    }

    /// NUL-terminated platform type string used by VST3 views
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            PlatformType::Hwnd => b"HWND\0",
            PlatformType::NsView => b"NSView\0",
            PlatformType::X11EmbedWindowId => b"X11EmbedWindowID\0",
        }
    }
}

/// Rectangle in view coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewRect {
    /// Left edge
    pub left: i32,
    /// Top edge
    pub top: i32,
    /// Right edge
    pub right: i32,
    /// Bottom edge
    pub bottom: i32,
}

impl ViewRect {
    /// Rectangle at the origin
    pub fn with_size(width: i32, height: i32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width,
            bottom: height,
        }
    }

    /// `right - left`
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    /// `bottom - top`
    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Resizes a native window on behalf of an editor
pub trait ResizeHandler: Send + Sync {
    /// Resize `handle` to the given content size, keeping its origin
    fn resize(&self, handle: WindowHandle, width: i32, height: i32) -> Result<()>;
}

/// Resize channel handed to an attached view
///
/// A view calls [`EditorFrame::request_resize`] when it wants a different
/// size; the request is routed through the host context's resize handler.
#[derive(Clone)]
pub struct EditorFrame {
    parent: WindowHandle,
    host: Weak<HostContext>,
}

impl EditorFrame {
    pub(crate) fn new(parent: WindowHandle, host: Weak<HostContext>) -> Self {
        Self { parent, host }
    }

    /// Window the view is attached to
    pub fn parent(&self) -> WindowHandle {
        self.parent
    }

    /// Ask the host to resize the parent window
    pub fn request_resize(&self, width: i32, height: i32) -> Result<()> {
        if width <= 0 || height <= 0 {
            return Err(Error::InvalidArgument(format!(
                "editor size {}x{} is not positive",
                width, height
            )));
        }
        let host = self
            .host
            .upgrade()
            .ok_or_else(|| Error::NotInitialized("host context has been shut down".to_string()))?;
        host.resize_window(self.parent, width, height)
    }
}

/// Observable editor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditorState {
    /// No view exists
    NoView,
    /// View created, never attached
    ViewCreated,
    /// View embedded in a window
    Attached,
    /// View removed from its window, still alive
    Detached,
}

pub(crate) struct EditorBridge {
    view: Option<Box<dyn PlugView>>,
    attached_to: Option<WindowHandle>,
    state: EditorState,
    platform: PlatformType,
}

impl EditorBridge {
    pub(crate) fn new() -> Self {
        Self {
            view: None,
            attached_to: None,
            state: EditorState::NoView,
            platform: PlatformType::native(),
        }
    }

    pub(crate) fn state(&self) -> EditorState {
        self.state
    }

    pub(crate) fn is_open(&self) -> bool {
        self.view.is_some()
    }

    pub(crate) fn attached_to(&self) -> Option<WindowHandle> {
        self.attached_to
    }

    /// Create a view and release it immediately
    pub(crate) fn probe(controller: &mut dyn Controller) -> bool {
        guard::protect("create editor view", || Ok(controller.create_view()))
            .ok()
            .flatten()
            .is_some()
    }

    pub(crate) fn open(&mut self, controller: Option<&mut (dyn Controller + 'static)>) -> Result<()> {
        if self.view.is_some() {
            return Err(Error::InvalidArgument("editor is already open".to_string()));
        }
        let controller = controller
            .ok_or_else(|| Error::Unsupported("plugin has no edit controller".to_string()))?;
        let view = guard::protect("create editor view", || Ok(controller.create_view()))?
            .ok_or_else(|| Error::Unsupported("plugin has no editor".to_string()))?;

        log::debug!("Editor view created");
        self.view = Some(view);
        self.state = EditorState::ViewCreated;
        Ok(())
    }

    pub(crate) fn attach(&mut self, parent: WindowHandle, host: Weak<HostContext>) -> Result<()> {
        if self.view.is_none() {
            return Err(Error::NotInitialized("editor is not open".to_string()));
        }
        if parent.is_null() {
            return Err(Error::InvalidArgument("window handle is null".to_string()));
        }
        if self.attached_to == Some(parent) {
            return Ok(());
        }

        let platform = self.platform;
        let supported = self
            .view
            .as_ref()
            .map(|view| view.is_platform_type_supported(platform))
            .unwrap_or(false);
        if !supported {
            return Err(Error::Unsupported(format!(
                "editor does not support {:?} windows",
                platform
            )));
        }

        if self.attached_to.is_some() {
            if let Err(e) = self.detach() {
                log::warn!("Editor reported an error while detaching: {}", e);
            }
        }

        let Some(view) = self.view.as_mut() else {
            return Err(Error::NotInitialized("editor is not open".to_string()));
        };
        let result = guard::protect("attach editor", || {
            view.set_frame(Some(EditorFrame::new(parent, host)))?;
            view.attached(parent, platform)
        });
        match result {
            Ok(()) => {
                log::debug!("Editor attached to {:?}", parent.as_ptr());
                self.attached_to = Some(parent);
                self.state = EditorState::Attached;
                Ok(())
            }
            Err(e) => {
                let _ = guard::protect("clear editor frame", || view.set_frame(None));
                Err(e)
            }
        }
    }

    pub(crate) fn detach(&mut self) -> Result<()> {
        if self.attached_to.take().is_none() {
            return Ok(());
        }
        self.state = EditorState::Detached;
        let Some(view) = self.view.as_mut() else {
            return Ok(());
        };
        let removed = guard::protect("detach editor", || view.removed());
        let _ = guard::protect("clear editor frame", || view.set_frame(None));
        removed
    }

    pub(crate) fn size(&self) -> Result<(i32, i32)> {
        let view = self
            .view
            .as_ref()
            .ok_or_else(|| Error::NotInitialized("editor is not open".to_string()))?;
        let rect = guard::protect("query editor size", || view.size())?;
        Ok((rect.width(), rect.height()))
    }

    /// Detach, release the view and return to `NoView`. Safe to repeat.
    pub(crate) fn close(&mut self) {
        if let Err(e) = self.detach() {
            log::warn!("Editor reported an error while closing: {}", e);
        }
        if self.view.take().is_some() {
            log::debug!("Editor view released");
        }
        self.state = EditorState::NoView;
    }
}

impl Drop for EditorBridge {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_rect() {
        let rect = ViewRect {
            left: 10,
            top: 20,
            right: 410,
            bottom: 320,
        };
        assert_eq!((rect.width(), rect.height()), (400, 300));
        assert_eq!(ViewRect::with_size(5, 6).bottom, 6);
    }

    #[test]
    fn test_platform_strings_are_nul_terminated() {
        for platform in [
            PlatformType::Hwnd,
            PlatformType::NsView,
            PlatformType::X11EmbedWindowId,
        ] {
            assert_eq!(platform.as_bytes().last(), Some(&0));
        }
    }

    #[test]
    fn test_closed_bridge_rejects_size_and_attach() {
        let mut bridge = EditorBridge::new();
        assert_eq!(
            bridge.size().unwrap_err().kind(),
            crate::ErrorKind::NotInitialized
        );
        let handle = unsafe { WindowHandle::from_raw(0x10 as *mut c_void) };
        assert!(bridge.attach(handle, Weak::new()).is_err());
        bridge.close();
        bridge.close();
        assert_eq!(bridge.state(), EditorState::NoView);
    }

    #[test]
    fn test_frame_without_host() {
        let handle = unsafe { WindowHandle::from_raw(0x10 as *mut c_void) };
        let frame = EditorFrame::new(handle, Weak::new());
        assert_eq!(
            frame.request_resize(100, 100).unwrap_err().kind(),
            crate::ErrorKind::NotInitialized
        );
        assert_eq!(
            frame.request_resize(0, 100).unwrap_err().kind(),
            crate::ErrorKind::InvalidArgument
        );
    }
}
