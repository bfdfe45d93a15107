//! Host-side COM objects handed to VST3 plugins
//!
//! The process-time objects (event list, parameter changes) are filled by the
//! host right before `IAudioProcessor::process` and read by the plugin during
//! it. Both happen on the audio thread, one after the other, so their storage
//! lives in `UnsafeCell`s that are sized once and never grow.

use crate::{
    editor::EditorFrame, events::EventSender, internal::utils, parameters::ParameterChange,
    state::MemoryStream,
};
use parking_lot::Mutex;
use std::cell::{Cell, UnsafeCell};
use std::ffi::c_void;
use std::io::{Read, Seek, SeekFrom, Write};
use std::ptr;
use std::sync::Arc;
use vst3::Steinberg::Vst::*;
use vst3::Steinberg::*;
use vst3::{Class, ComPtr, ComRef, ComWrapper};

/// Points reserved for a queue the plugin opens itself
pub const PLUGIN_POINTS_PER_QUEUE: usize = 16;

// IHostApplication

pub struct HostApplication {
    name: String128,
}

impl HostApplication {
    pub fn new(name: &str) -> Self {
        Self {
            name: utils::string_to_vst_string(name),
        }
    }
}

impl Class for HostApplication {
    type Interfaces = (IHostApplication,);
}

impl IHostApplicationTrait for HostApplication {
    unsafe fn getName(&self, name: *mut String128) -> tresult {
        if name.is_null() {
            return kInvalidArgument;
        }
        *name = self.name;
        kResultOk
    }

    unsafe fn createInstance(
        &self,
        _cid: *mut TUID,
        _iid: *mut TUID,
        obj: *mut *mut c_void,
    ) -> tresult {
        if !obj.is_null() {
            *obj = ptr::null_mut();
        }
        kNotImplemented
    }
}

/// The host application object passed to `initialize`, kept alive with the
/// host context that owns it
pub(crate) struct HostApplicationHandle {
    unknown: ComPtr<FUnknown>,
    _app: ComWrapper<HostApplication>,
}

// SAFETY: HostApplication is immutable after construction; plugins may call
// getName from any thread.
unsafe impl Send for HostApplicationHandle {}
unsafe impl Sync for HostApplicationHandle {}

impl HostApplicationHandle {
    pub(crate) fn new(name: &str) -> Option<Self> {
        let app = ComWrapper::new(HostApplication::new(name));
        let unknown = app.to_com_ptr::<FUnknown>()?;
        Some(Self { unknown, _app: app })
    }

    pub(crate) fn as_ptr(&self) -> *mut FUnknown {
        self.unknown.as_ptr()
    }
}

// IComponentHandler

/// Receives edits made in the plugin's own GUI and queues them for the
/// audio thread
pub struct ComponentHandler {
    sink: EventSender,
}

impl ComponentHandler {
    pub fn new(sink: EventSender) -> Self {
        Self { sink }
    }
}

impl Class for ComponentHandler {
    type Interfaces = (IComponentHandler,);
}

impl IComponentHandlerTrait for ComponentHandler {
    unsafe fn beginEdit(&self, id: ParamID) -> tresult {
        log::trace!("Begin edit for parameter {}", id);
        kResultOk
    }

    unsafe fn performEdit(&self, id: ParamID, value_normalized: ParamValue) -> tresult {
        log::trace!("Perform edit for parameter {} = {}", id, value_normalized);
        self.sink.send_parameter(id, value_normalized, 0);
        kResultOk
    }

    unsafe fn endEdit(&self, id: ParamID) -> tresult {
        log::trace!("End edit for parameter {}", id);
        kResultOk
    }

    unsafe fn restartComponent(&self, flags: int32) -> tresult {
        log::debug!("Plugin requested restart with flags {:#x} (ignored)", flags);
        kResultOk
    }
}

// IEventList

pub struct HostEventList {
    events: UnsafeCell<Vec<Event>>,
}

impl HostEventList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: UnsafeCell::new(Vec::with_capacity(capacity)),
        }
    }

    /// # Safety
    /// No plugin call may be reading the list concurrently.
    pub unsafe fn clear(&self) {
        (*self.events.get()).clear();
    }

    /// Append without growing. Returns `false` when full.
    ///
    /// # Safety
    /// No plugin call may be reading the list concurrently.
    pub unsafe fn push(&self, event: Event) -> bool {
        let events = &mut *self.events.get();
        if events.len() == events.capacity() {
            return false;
        }
        events.push(event);
        true
    }
}

impl Class for HostEventList {
    type Interfaces = (IEventList,);
}

impl IEventListTrait for HostEventList {
    unsafe fn getEventCount(&self) -> int32 {
        (*self.events.get()).len() as int32
    }

    unsafe fn getEvent(&self, index: int32, event: *mut Event) -> tresult {
        if event.is_null() || index < 0 {
            return kInvalidArgument;
        }
        match (&(*self.events.get())).get(index as usize) {
            Some(e) => {
                *event = *e;
                kResultOk
            }
            None => kResultFalse,
        }
    }

    unsafe fn addEvent(&self, event: *mut Event) -> tresult {
        if event.is_null() {
            return kInvalidArgument;
        }
        if self.push(*event) {
            kResultOk
        } else {
            kResultFalse
        }
    }
}

// IParamValueQueue

/// Point storage shared by every queue of one `ParameterChanges`. Each open
/// queue owns a contiguous run of it for the current block.
struct PointPool {
    points: UnsafeCell<Vec<(int32, ParamValue)>>,
    used: Cell<usize>,
}

impl PointPool {
    fn new(capacity: usize) -> Self {
        Self {
            points: UnsafeCell::new(vec![(0, 0.0); capacity]),
            used: Cell::new(0),
        }
    }

    fn capacity(&self) -> usize {
        // SAFETY: the length never changes after construction.
        unsafe { (*self.points.get()).len() }
    }

    /// Hand out up to `wanted` points from the unused tail
    fn reserve(&self, wanted: usize) -> (usize, usize) {
        let start = self.used.get();
        let len = wanted.min(self.capacity() - start);
        self.used.set(start + len);
        (start, len)
    }
}

pub struct ParameterValueQueue {
    param_id: Cell<ParamID>,
    start: Cell<usize>,
    len: Cell<usize>,
    cap: Cell<usize>,
    pool: Arc<PointPool>,
}

impl ParameterValueQueue {
    fn new(pool: Arc<PointPool>) -> Self {
        Self {
            param_id: Cell::new(0),
            start: Cell::new(0),
            len: Cell::new(0),
            cap: Cell::new(0),
            pool,
        }
    }

    fn reset(&self, id: ParamID, start: usize, cap: usize) {
        self.param_id.set(id);
        self.start.set(start);
        self.len.set(0);
        self.cap.set(cap);
    }

    /// Insert keeping points ordered by offset; a point at an existing
    /// offset replaces it.
    unsafe fn insert(&self, sample_offset: int32, value: ParamValue) -> Option<usize> {
        let len = self.len.get();
        let start = self.start.get();
        let run = &mut (&mut (*self.pool.points.get()))[start..start + self.cap.get()];
        let pos = run[..len].partition_point(|&(offset, _)| offset < sample_offset);
        if pos < len && run[pos].0 == sample_offset {
            run[pos].1 = value;
            return Some(pos);
        }
        if len == run.len() {
            return None;
        }
        run[pos..=len].rotate_right(1);
        run[pos] = (sample_offset, value);
        self.len.set(len + 1);
        Some(pos)
    }

    unsafe fn point(&self, index: usize) -> Option<(int32, ParamValue)> {
        if index < self.len.get() {
            (&(*self.pool.points.get())).get(self.start.get() + index).copied()
        } else {
            None
        }
    }
}

impl Class for ParameterValueQueue {
    type Interfaces = (IParamValueQueue,);
}

impl IParamValueQueueTrait for ParameterValueQueue {
    unsafe fn getParameterId(&self) -> ParamID {
        self.param_id.get()
    }

    unsafe fn getPointCount(&self) -> int32 {
        self.len.get() as int32
    }

    unsafe fn getPoint(
        &self,
        index: int32,
        sample_offset: *mut int32,
        value: *mut ParamValue,
    ) -> tresult {
        if index < 0 {
            return kInvalidArgument;
        }
        let Some((offset, val)) = self.point(index as usize) else {
            return kResultFalse;
        };
        if !sample_offset.is_null() {
            *sample_offset = offset;
        }
        if !value.is_null() {
            *value = val;
        }
        kResultOk
    }

    unsafe fn addPoint(&self, sample_offset: int32, value: ParamValue, index: *mut int32) -> tresult {
        match self.insert(sample_offset, value) {
            Some(pos) => {
                if !index.is_null() {
                    *index = pos as int32;
                }
                kResultOk
            }
            None => kResultFalse,
        }
    }
}

// IParameterChanges

pub struct ParameterChanges {
    count: Cell<usize>,
    queues: Vec<ComWrapper<ParameterValueQueue>>,
    pool: Arc<PointPool>,
}

impl ParameterChanges {
    /// Room for `max_queues` parameters and `max_points` points in total
    pub fn with_capacity(max_queues: usize, max_points: usize) -> Self {
        let pool = Arc::new(PointPool::new(max_points));
        Self {
            count: Cell::new(0),
            queues: (0..max_queues)
                .map(|_| ComWrapper::new(ParameterValueQueue::new(pool.clone())))
                .collect(),
            pool,
        }
    }

    /// # Safety
    /// No plugin call may be reading the changes concurrently.
    pub unsafe fn clear(&self) {
        self.count.set(0);
        self.pool.used.set(0);
    }

    /// Replace the contents with `changes`, which hold at most one point per
    /// (offset, id). Every id gets a run of exactly the points it needs.
    /// Returns how many changes did not fit.
    ///
    /// # Safety
    /// No plugin call may be reading the changes concurrently.
    pub unsafe fn load(&self, changes: &[ParameterChange]) -> usize {
        self.clear();

        // count points per id, using `cap` as the tally
        let mut dropped = 0;
        for change in changes {
            match self.find(change.id) {
                Some(index) => {
                    let queue = &self.queues[index];
                    queue.cap.set(queue.cap.get() + 1);
                }
                None => match self.open(change.id, 0) {
                    Some(index) => self.queues[index].cap.set(1),
                    None => dropped += 1,
                },
            }
        }
        for queue in &self.queues[..self.count.get()] {
            let (start, cap) = self.pool.reserve(queue.cap.get());
            queue.reset(queue.param_id.get(), start, cap);
        }
        for change in changes {
            if let Some(index) = self.find(change.id) {
                let inserted = self.queues[index].insert(change.sample_offset as i32, change.value);
                if inserted.is_none() {
                    dropped += 1;
                }
            }
        }
        dropped
    }

    fn find(&self, id: ParamID) -> Option<usize> {
        self.queues[..self.count.get()]
            .iter()
            .position(|queue| queue.param_id.get() == id)
    }

    /// Open a queue for `id` with room for `points` points
    fn open(&self, id: ParamID, points: usize) -> Option<usize> {
        let count = self.count.get();
        let queue = self.queues.get(count)?;
        let (start, cap) = self.pool.reserve(points);
        queue.reset(id, start, cap);
        self.count.set(count + 1);
        Some(count)
    }

    /// Queue for `id`, opened on first use with a plugin-sized run
    fn queue_for(&self, id: ParamID) -> Option<usize> {
        self.find(id)
            .or_else(|| self.open(id, PLUGIN_POINTS_PER_QUEUE))
    }

    fn queue_ptr(&self, index: usize) -> *mut IParamValueQueue {
        self.queues
            .get(index)
            .and_then(|queue| queue.as_com_ref::<IParamValueQueue>())
            .map(|queue| queue.as_ptr())
            .unwrap_or(ptr::null_mut())
    }
}

impl Class for ParameterChanges {
    type Interfaces = (IParameterChanges,);
}

impl IParameterChangesTrait for ParameterChanges {
    unsafe fn getParameterCount(&self) -> int32 {
        self.count.get() as int32
    }

    unsafe fn getParameterData(&self, index: int32) -> *mut IParamValueQueue {
        if index < 0 || index as usize >= self.count.get() {
            return ptr::null_mut();
        }
        self.queue_ptr(index as usize)
    }

    unsafe fn addParameterData(&self, id: *const ParamID, index: *mut int32) -> *mut IParamValueQueue {
        if id.is_null() {
            return ptr::null_mut();
        }
        match self.queue_for(*id) {
            Some(slot) => {
                if !index.is_null() {
                    *index = slot as int32;
                }
                self.queue_ptr(slot)
            }
            None => ptr::null_mut(),
        }
    }
}

// IBStream

/// Plugin state stream backed by a [`MemoryStream`]
pub struct HostStream {
    inner: Mutex<MemoryStream>,
}

impl HostStream {
    pub fn new(stream: MemoryStream) -> Self {
        Self {
            inner: Mutex::new(stream),
        }
    }

    pub fn take(&self) -> MemoryStream {
        std::mem::take(&mut *self.inner.lock())
    }
}

impl Class for HostStream {
    type Interfaces = (IBStream,);
}

impl IBStreamTrait for HostStream {
    unsafe fn read(&self, buffer: *mut c_void, num_bytes: int32, num_bytes_read: *mut int32) -> tresult {
        if buffer.is_null() || num_bytes < 0 {
            return kInvalidArgument;
        }
        let buf = std::slice::from_raw_parts_mut(buffer as *mut u8, num_bytes as usize);
        let Ok(read) = self.inner.lock().read(buf) else {
            return kResultFalse;
        };
        if !num_bytes_read.is_null() {
            *num_bytes_read = read as int32;
        }
        kResultOk
    }

    unsafe fn write(
        &self,
        buffer: *mut c_void,
        num_bytes: int32,
        num_bytes_written: *mut int32,
    ) -> tresult {
        if buffer.is_null() || num_bytes < 0 {
            return kInvalidArgument;
        }
        let buf = std::slice::from_raw_parts(buffer as *const u8, num_bytes as usize);
        if self.inner.lock().write_all(buf).is_err() {
            return kResultFalse;
        }
        if !num_bytes_written.is_null() {
            *num_bytes_written = num_bytes;
        }
        kResultOk
    }

    unsafe fn seek(&self, pos: int64, mode: int32, result: *mut int64) -> tresult {
        let target = match mode {
            m if m == IBStream_::IStreamSeekMode_::kIBSeekSet as int32 => {
                if pos < 0 {
                    return kInvalidArgument;
                }
                SeekFrom::Start(pos as u64)
            }
            m if m == IBStream_::IStreamSeekMode_::kIBSeekCur as int32 => SeekFrom::Current(pos),
            m if m == IBStream_::IStreamSeekMode_::kIBSeekEnd as int32 => SeekFrom::End(pos),
            _ => return kInvalidArgument,
        };
        match self.inner.lock().seek(target) {
            Ok(position) => {
                if !result.is_null() {
                    *result = position as int64;
                }
                kResultOk
            }
            Err(_) => kResultFalse,
        }
    }

    unsafe fn tell(&self, pos: *mut int64) -> tresult {
        if pos.is_null() {
            return kInvalidArgument;
        }
        *pos = self.inner.lock().position() as int64;
        kResultOk
    }
}

// IPlugFrame

/// Routes an editor's resize requests to the host window
pub struct PlugFrame {
    frame: EditorFrame,
}

impl PlugFrame {
    pub fn new(frame: EditorFrame) -> Self {
        Self { frame }
    }
}

impl Class for PlugFrame {
    type Interfaces = (IPlugFrame,);
}

impl IPlugFrameTrait for PlugFrame {
    unsafe fn resizeView(&self, view: *mut IPlugView, new_size: *mut ViewRect) -> tresult {
        if view.is_null() || new_size.is_null() {
            return kInvalidArgument;
        }
        let rect = *new_size;
        let (width, height) = (rect.right - rect.left, rect.bottom - rect.top);
        if let Err(e) = self.frame.request_resize(width, height) {
            log::warn!("Editor resize to {}x{} failed: {}", width, height, e);
            return kResultFalse;
        }
        if let Some(view) = ComRef::<IPlugView>::from_raw(view) {
            view.onSize(new_size);
        }
        kResultOk
    }
}
