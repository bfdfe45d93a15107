//! Panic containment at the plugin boundary

use crate::error::{Error, Result};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run a control-thread call into plugin code, turning a panic into
/// [`Error::PluginRejected`].
pub(crate) fn protect<R>(what: &str, f: impl FnOnce() -> Result<R>) -> Result<R> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        log::error!("Plugin panicked during {}: {}", what, message);
        Err(Error::PluginRejected(format!(
            "{} (plugin panicked: {})",
            what, message
        )))
    })
}

/// Audio-thread variant: no logging, no formatting.
pub(crate) fn protect_process(f: impl FnOnce() -> Result<()>) -> Result<()> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| Err(Error::ProcessPanicked))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
