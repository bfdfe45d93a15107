//! Internal implementation details

pub(crate) mod com_implementations;
pub(crate) mod guard;
pub(crate) mod utils;
pub(crate) mod vst3;
