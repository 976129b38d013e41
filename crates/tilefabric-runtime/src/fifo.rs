//! Blocking object FIFO shared between worker threads.
//!
//! The slot ring and its protocol cursor sit behind one `parking_lot::Mutex`.
//! An acquire the cursor answers with `NotReady` parks the caller on the
//! FIFO's condition variable until the opposite side releases, the run is
//! aborted, or the whole run stands still for the deadlock timeout.

use parking_lot::{Condvar, Mutex};
use tilefabric_core::{ElementHandle, ErrorKind, FifoCursor, ObjectFifo, Port};

use crate::element::Element;
use crate::error::{Result, RuntimeError};
use crate::fabric::RunControl;

struct FifoState<T> {
    cursor: FifoCursor,
    slots: Vec<Vec<T>>,
}

pub(crate) struct SharedFifo<T> {
    name: String,
    element_len: usize,
    state: Mutex<FifoState<T>>,
    changed: Condvar,
}

impl<T: Element> SharedFifo<T> {
    pub fn new(fifo: &ObjectFifo) -> Result<Self> {
        let element_len = fifo.element.num_elements();
        Ok(Self {
            name: fifo.name.clone(),
            element_len,
            state: Mutex::new(FifoState {
                cursor: FifoCursor::for_channel(fifo)?,
                slots: vec![vec![T::default(); element_len]; fifo.depth],
            }),
            changed: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scalars per element
    pub fn element_len(&self) -> usize {
        self.element_len
    }

    /// Block until `count` slots can be claimed on `port`.
    pub fn acquire(&self, port: Port, count: usize, waiter: &str, control: &RunControl) -> Result<Vec<ElementHandle>> {
        let mut watchdog = control.watchdog();
        let mut state = self.state.lock();
        loop {
            if control.is_aborted() {
                return Err(RuntimeError::Aborted);
            }
            match state.cursor.acquire(port, count) {
                Ok(handles) => {
                    if control.trace_elements() {
                        tracing::debug!(
                            channel = %self.name,
                            port = %port,
                            waiter,
                            first = handles.first().map_or(0, |h| h.sequence),
                            count,
                            "acquire"
                        );
                    }
                    return Ok(handles);
                }
                Err(err) if err.kind() != ErrorKind::NotReady => return Err(err.into()),
                Err(_) => {}
            }
            if watchdog.expired() {
                return Err(control.deadlock(format!("{waiter} acquire({count}) on '{}' {port}", self.name)));
            }
            self.changed.wait_until(&mut state, watchdog.deadline());
        }
    }

    /// Release the oldest `count` held slots on `port` and wake the other side.
    pub fn release(&self, port: Port, count: usize, waiter: &str, control: &RunControl) -> Result<()> {
        let mut state = self.state.lock();
        state.cursor.release(port, count)?;
        if control.trace_elements() {
            tracing::debug!(
                channel = %self.name,
                port = %port,
                waiter,
                count,
                released = state.cursor.released(port),
                "release"
            );
        }
        drop(state);
        control.note_progress();
        self.changed.notify_all();
        Ok(())
    }

    /// Copy of a whole element
    pub fn read(&self, slot: usize) -> Vec<T> {
        self.state.lock().slots[slot].clone()
    }

    /// Overwrite a whole element; `data` must be exactly one element long.
    pub fn write(&self, slot: usize, data: &[T]) -> Result<()> {
        if data.len() != self.element_len {
            return Err(RuntimeError::program(
                format!("channel '{}'", self.name),
                ErrorKind::SizeMismatch,
                format!("element holds {} scalars, got {}", self.element_len, data.len()),
            ));
        }
        self.state.lock().slots[slot].copy_from_slice(data);
        Ok(())
    }

    pub fn read_scalar(&self, slot: usize, index: usize) -> Option<T> {
        self.state.lock().slots[slot].get(index).copied()
    }

    /// Returns `false` when `index` lies outside the element.
    pub fn write_scalar(&self, slot: usize, index: usize, value: T) -> bool {
        match self.state.lock().slots[slot].get_mut(index) {
            Some(target) => {
                *target = value;
                true
            }
            None => false,
        }
    }

    /// Wake every parked waiter so it can observe an abort.
    pub fn wake_all(&self) {
        let _state = self.state.lock();
        self.changed.notify_all();
    }

    pub fn released(&self, port: Port) -> u64 {
        self.state.lock().cursor.released(port)
    }
}
