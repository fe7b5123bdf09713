use heapless::Vec;

use crate::{
    bsp::Board,
    context::Context,
    scheduler::{ms, Run, Step, Task, Tcb},
};

use super::{dispatch::dispatch, frame::RX_FRAME_LEN, Framer, NusLock};

/// A partial frame is dropped after this long without new bytes.
const RX_IDLE_MS: u32 = 1000;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum State {
    #[default]
    Wait,
    Receive,
    Dispatch,
}

/// Reassembles frames from the receive queue and executes them.
#[derive(Default)]
pub struct ProtocolTask {
    state: State,
    framer: Framer,
    frame: Vec<u8, RX_FRAME_LEN>,
    nus: NusLock,
}

impl Task for ProtocolTask {
    fn restart(&mut self) {
        *self = Self::default();
    }
}

impl<'a, B: Board> Run<Context<'a, B>> for ProtocolTask {
    fn step(&mut self, tcb: &mut Tcb, cx: &mut Context<'a, B>) -> Step {
        loop {
            match self.state {
                State::Wait => {
                    if !tcb.wait(!cx.shared.rx.is_empty(), ms(RX_IDLE_MS)) {
                        return Step::Yield;
                    }
                    if tcb.timeout_expired() {
                        if self.framer.pending() > 0 {
                            log::debug!("Dropping {} stale bytes", self.framer.pending());
                        }
                        self.framer.reset();
                        continue;
                    }
                    self.state = State::Receive;
                }
                State::Receive => {
                    self.state = State::Wait;
                    while let Some(byte) = cx.shared.rx.pop() {
                        if let Some(frame) = self.framer.push(byte) {
                            self.frame.clear();
                            // The framer never yields more than RX_FRAME_LEN bytes.
                            let _ = self.frame.extend_from_slice(frame);
                            self.state = State::Dispatch;
                            break;
                        }
                    }
                }
                State::Dispatch => {
                    if !self.nus.take(tcb, cx.events()) {
                        return Step::Yield;
                    }
                    dispatch(cx, &self.frame);
                    self.nus.give();
                    self.state = State::Wait;
                }
            }
        }
    }
}
