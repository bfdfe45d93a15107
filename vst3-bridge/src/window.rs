//! Native window resizing for plugin editors
//!
//! The host owns the window an editor is embedded in. When the editor asks for
//! a new size the window is resized so its content area matches, keeping the
//! top-left corner where it was.

use crate::{
    editor::{ResizeHandler, WindowHandle},
    error::{Error, Result},
};

#[cfg(target_os = "macos")]
use cocoa::{
    base::{id, nil, YES},
    foundation::{NSPoint, NSRect, NSSize},
};
#[cfg(target_os = "macos")]
use objc::{msg_send, sel, sel_impl};

#[cfg(target_os = "windows")]
use winapi::{
    shared::{minwindef::FALSE, windef::HWND, windef::RECT},
    um::winuser::{
        AdjustWindowRect, GetWindowLongW, GetWindowRect, SetWindowPos, GWL_STYLE, SWP_NOACTIVATE,
        SWP_NOZORDER, WS_CAPTION,
    },
};

/// Resize handler backed by the platform window system
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeResizer;

impl ResizeHandler for NativeResizer {
    fn resize(&self, handle: WindowHandle, width: i32, height: i32) -> Result<()> {
        resize_window(handle, width, height)
    }
}

/// Resize the window behind `handle` so its content area is `width` x `height`
pub fn resize_window(handle: WindowHandle, width: i32, height: i32) -> Result<()> {
    if handle.is_null() {
        return Err(Error::InvalidArgument("window handle is null".to_string()));
    }
    if width <= 0 || height <= 0 {
        return Err(Error::InvalidArgument(format!(
            "window size {}x{} is not positive",
            width, height
        )));
    }
    log::debug!("Resizing editor window to {}x{}", width, height);
    resize_native(handle, width, height)
}

#[cfg(target_os = "windows")]
fn resize_native(handle: WindowHandle, width: i32, height: i32) -> Result<()> {
    let hwnd = handle.as_ptr() as HWND;
    unsafe {
        let mut current: RECT = std::mem::zeroed();
        if GetWindowRect(hwnd, &mut current) == 0 {
            return Err(Error::IoFailure("GetWindowRect failed".to_string()));
        }

        let mut rect = RECT {
            left: 0,
            top: 0,
            right: width,
            bottom: height,
        };
        let style = GetWindowLongW(hwnd, GWL_STYLE) as u32;
        if style & WS_CAPTION != 0 {
            AdjustWindowRect(&mut rect, style, FALSE);
        }

        let ok = SetWindowPos(
            hwnd,
            std::ptr::null_mut(),
            current.left,
            current.top,
            rect.right - rect.left,
            rect.bottom - rect.top,
            SWP_NOZORDER | SWP_NOACTIVATE,
        );
        if ok == 0 {
            return Err(Error::IoFailure("SetWindowPos failed".to_string()));
        }
    }
    Ok(())
}

#[cfg(target_os = "macos")]
fn resize_native(handle: WindowHandle, width: i32, height: i32) -> Result<()> {
    let view = handle.as_ptr() as id;
    let size = NSSize::new(width as f64, height as f64);
    unsafe {
        let _: () = msg_send![view, setFrameSize: size];

        let window: id = msg_send![view, window];
        if window == nil {
            return Ok(());
        }
        let frame: NSRect = msg_send![window, frame];
        let content = NSRect::new(NSPoint::new(0.0, 0.0), size);
        let mut new_frame: NSRect = msg_send![window, frameRectForContentRect: content];
        // Cocoa's origin is bottom-left; keep the top edge fixed.
        new_frame.origin = NSPoint::new(
            frame.origin.x,
            frame.origin.y + frame.size.height - new_frame.size.height,
        );
        let _: () = msg_send![window, setFrame: new_frame display: YES];
    }
    Ok(())
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn resize_native(_handle: WindowHandle, _width: i32, _height: i32) -> Result<()> {
    Err(Error::Unsupported(
        "editor window resizing is not supported on this platform".to_string(),
    ))
}
