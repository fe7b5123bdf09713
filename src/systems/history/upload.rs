//! Sends requested half pages of the log to the app.

use crate::{
    bsp::Board,
    context::Context,
    events::{Event, Events},
    scheduler::{ms, secs, Run, Step, Task, Tcb, TICK_MAX},
    systems::protocol::{replies, NusLock},
};

use super::{
    area::StorageArea,
    flashlog::{read_half_page, FlashLease},
    record::{HalfPage, HALF_PAGE_SIZE},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum State {
    #[default]
    Wait,
    Read,
    ReadRelease,
    Send,
    Sent,
}

pub struct UploadTask {
    state: State,
    lease: FlashLease,
    nus: NusLock,
    half_page: u16,
    address: u32,
    data: Option<HalfPage>,
}

impl UploadTask {
    pub fn new() -> Self {
        Self {
            state: State::Wait,
            lease: FlashLease::default(),
            nus: NusLock::default(),
            half_page: 0,
            address: 0,
            data: None,
        }
    }

    fn done<B: Board>(&mut self, cx: &mut Context<'_, B>) {
        cx.clear(Event::RequestHistory);
        self.data = None;
        self.state = State::Wait;
    }
}

impl Default for UploadTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for UploadTask {
    fn restart(&mut self) {
        self.state = State::Wait;
        self.lease.abandon();
        self.nus.give();
        self.data = None;
    }
}

impl<'a, B: Board> Run<Context<'a, B>> for UploadTask {
    fn step(&mut self, tcb: &mut Tcb, cx: &mut Context<'a, B>) -> Step {
        loop {
            match self.state {
                State::Wait => {
                    if !tcb.wait(cx.any(Event::RequestHistory), TICK_MAX) {
                        return Step::Yield;
                    }

                    if cx.any(Events::BATTERY_LOW) {
                        log::info!("History upload refused on low battery");
                        cx.clear(Event::RequestHistory);
                        return tcb.delay(ms(1000));
                    }

                    self.half_page = cx.history.requested_half_page();
                    match StorageArea::from_half_page(self.half_page) {
                        Some((_, address)) => {
                            self.address = address;
                            self.state = State::Read;
                        }
                        None => {
                            log::warn!("Half page {} out of range", self.half_page);
                            self.done(cx);
                        }
                    }
                }
                State::Read => {
                    if !self.lease.acquire(tcb, &cx.shared.bus) {
                        return Step::Yield;
                    }
                    self.data = match read_half_page(cx.board.flash(), self.address) {
                        Ok(data) => Some(data),
                        Err(e) => {
                            log::error!("Half page {} read failed: {:?}", self.half_page, e);
                            None
                        }
                    };
                    self.state = State::ReadRelease;
                }
                State::ReadRelease => {
                    if !self.lease.release(tcb, cx.board.flash()) {
                        return Step::Yield;
                    }
                    if self.data.is_some() {
                        self.state = State::Send;
                    } else {
                        self.done(cx);
                    }
                }
                State::Send => {
                    if !self.nus.take(tcb, cx.events()) {
                        return Step::Yield;
                    }

                    let data = self
                        .data
                        .take()
                        .unwrap_or(HalfPage([0xFF; HALF_PAGE_SIZE]));
                    cx.clear(Event::NusTxRdy);
                    if cx.send(&replies::history(self.half_page, &data)) {
                        self.state = State::Sent;
                    } else {
                        self.nus.give();
                        self.done(cx);
                    }
                }
                State::Sent => {
                    if !tcb.wait(cx.any(Event::NusTxRdy), secs(1)) {
                        return Step::Yield;
                    }
                    if tcb.timeout_expired() {
                        log::warn!("No transmit confirmation for half page {}", self.half_page);
                    }
                    cx.clear(Event::NusTxRdy);
                    self.nus.give();
                    self.done(cx);
                }
            }
        }
    }
}
