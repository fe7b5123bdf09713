//! Binary command protocol spoken with the mobile app over the Nordic UART
//! service (NUS).

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, pipe::Pipe};

use crate::{
    events::{Event, EventGroup},
    scheduler::{Tcb, TICK_MAX},
};

pub mod command;
pub mod dispatch;
pub mod frame;
pub mod replies;
pub mod task;

pub use frame::{Frame, FrameBuilder, Framer, TxFrame};
pub use task::ProtocolTask;

pub const RX_QUEUE_LEN: usize = 512;

/// Bytes received from the link, filled from the radio callback and drained
/// by the protocol task.
pub struct RxQueue(Pipe<CriticalSectionRawMutex, RX_QUEUE_LEN>);

impl RxQueue {
    pub const fn new() -> Self {
        Self(Pipe::new())
    }

    /// Queue as much of `bytes` as fits. Returns how many were taken.
    pub fn push(&self, bytes: &[u8]) -> usize {
        let mut taken = 0;
        while taken < bytes.len() {
            match self.0.try_write(&bytes[taken..]) {
                Ok(n) => taken += n,
                Err(_) => break,
            }
        }
        taken
    }

    pub fn pop(&self) -> Option<u8> {
        let mut byte = [0u8; 1];
        match self.0.try_read(&mut byte) {
            Ok(1) => Some(byte[0]),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&self) {
        self.0.clear();
    }
}

impl Default for RxQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive right to put a frame on the link. Released on drop.
#[must_use]
pub struct NusGuard<'a>(&'a EventGroup);

impl<'a> NusGuard<'a> {
    pub fn try_take(events: &'a EventGroup) -> Option<Self> {
        events.try_set(Event::NusTaken).then_some(Self(events))
    }
}

impl Drop for NusGuard<'_> {
    fn drop(&mut self) {
        self.0.clear(Event::NusTaken);
    }
}

/// Task-held slot for a [`NusGuard`] that may have to be waited for.
#[derive(Default)]
pub struct NusLock(Option<NusGuard<'static>>);

impl NusLock {
    /// Same yielding contract as [`Tcb::wait`].
    pub fn take(&mut self, tcb: &mut Tcb, events: &'static EventGroup) -> bool {
        if self.0.is_some() {
            return true;
        }

        if !tcb.wait(!events.any(Event::NusTaken), TICK_MAX) {
            return false;
        }

        self.0 = NusGuard::try_take(events);
        self.0.is_some()
    }

    pub fn give(&mut self) {
        self.0 = None;
    }

    pub fn is_held(&self) -> bool {
        self.0.is_some()
    }
}
