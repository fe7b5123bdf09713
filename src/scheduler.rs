//! Cooperative run-to-yield scheduler.
//!
//! Every task is a state machine implementing [`Run`]. The main loop calls
//! [`Scheduled::run`] for each task in a fixed order; the tick interrupt (via
//! [`crate::clock::TickClock`]) drives [`Scheduled::tick`]. A task only ever
//! pauses at a `delay`, `wait` or `wait_sync` point, by returning [`Step::Yield`]
//! after recording the state it resumes from.

/// Scheduler time unit.
pub type Ticks = u32;

/// "Never" for timeouts; timers holding this value are not decremented.
pub const TICK_MAX: Ticks = u32::MAX;

/// Tick period in normal operation.
pub const TICK_MS: u32 = 10;

/// Tick period while the battery is low.
pub const SLOW_TICK_MS: u32 = 200;

/// Converts milliseconds to ticks at the normal tick rate.
pub const fn ms(ms: u32) -> Ticks {
    ms / TICK_MS
}

/// Converts seconds to ticks at the normal tick rate.
pub const fn secs(secs: u32) -> Ticks {
    secs * 1000 / TICK_MS
}

const SUSPEND: u8 = 1 << 0;
const WAIT: u8 = 1 << 1;
const NOTIFY: u8 = 1 << 2;
const STOP: u8 = 1 << 3;
const RUNNING: u8 = 1 << 4;
const EXPIRED: u8 = 1 << 5;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Step {
    /// Resume later from the recorded state.
    Yield,
    /// The task body finished.
    Exit,
}

/// Task control block.
#[derive(Debug)]
pub struct Tcb {
    tick: Ticks,
    ctrl: u8,
}

impl Tcb {
    pub const fn new() -> Self {
        Self {
            tick: 0,
            ctrl: RUNNING,
        }
    }

    pub fn ticks(&self) -> Ticks {
        self.tick
    }

    pub fn is_waiting(&self) -> bool {
        self.ctrl & WAIT != 0
    }

    pub fn is_suspended(&self) -> bool {
        self.ctrl & SUSPEND != 0
    }

    pub fn is_stopped(&self) -> bool {
        self.ctrl & STOP != 0
    }

    pub fn is_running(&self) -> bool {
        self.ctrl & STOP == 0 && self.ctrl & RUNNING != 0
    }

    fn runnable(&self) -> bool {
        self.ctrl & (SUSPEND | STOP) == 0
            && self.ctrl & RUNNING != 0
            && (self.tick == 0 || self.ctrl & WAIT != 0)
    }

    /// Sleep for at least `ticks`. The caller records its next state first.
    pub fn delay(&mut self, ticks: Ticks) -> Step {
        self.tick = ticks;
        Step::Yield
    }

    /// Wait until `condition` holds or `timeout` ticks pass.
    ///
    /// Returns `false` while the caller must keep yielding. The first call arms
    /// the wait and always yields; later calls re-check `condition`. Once this
    /// returns `true`, [`Tcb::timeout_expired`] tells whether the timer ran out.
    pub fn wait(&mut self, condition: bool, timeout: Ticks) -> bool {
        if self.ctrl & WAIT == 0 {
            self.tick = timeout;
            self.ctrl |= WAIT;
            return false;
        }

        if self.tick != 0 && !condition {
            return false;
        }

        self.finish_wait();
        true
    }

    /// Leave a completed wait with a clear timer, so a caller that yields
    /// without a new delay runs again on the next pass.
    fn finish_wait(&mut self) {
        if self.tick == 0 {
            self.ctrl |= EXPIRED;
        } else {
            self.ctrl &= !EXPIRED;
        }
        self.ctrl &= !WAIT;
        self.tick = 0;
    }

    /// Whether the last completed wait ran out of time.
    pub fn timeout_expired(&self) -> bool {
        self.ctrl & EXPIRED != 0
    }

    /// Drive `other` to completion from its initial state, one step per poll.
    ///
    /// Same yielding contract as [`Tcb::wait`]. `other` only advances when it
    /// would have been runnable on its own, so its delays are honoured.
    pub fn wait_sync<C, T: Run<C>>(
        &mut self,
        other: &mut Scheduled<T>,
        cx: &mut C,
        timeout: Ticks,
    ) -> bool {
        if self.ctrl & WAIT == 0 {
            other.reset();
            self.tick = timeout;
            self.ctrl |= WAIT;
            return false;
        }

        if self.tick != 0 {
            if other.tcb.is_suspended() || (other.tcb.tick != 0 && !other.tcb.is_waiting()) {
                return false;
            }

            if other.step(cx) != Step::Exit {
                return false;
            }
        }

        self.finish_wait();
        true
    }

    /// Wait for [`Scheduled::notify`], consuming the notification.
    pub fn wait_notify(&mut self, timeout: Ticks) -> bool {
        let notified = self.ctrl & NOTIFY != 0;
        if !self.wait(notified, timeout) {
            return false;
        }
        self.ctrl &= !NOTIFY;
        true
    }

    /// Suspend the calling task until [`Scheduled::resume`].
    pub fn suspend(&mut self) -> Step {
        self.ctrl |= SUSPEND;
        Step::Yield
    }
}

impl Default for Tcb {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle hooks shared by every task.
pub trait Task {
    /// Return to the initial state; the next step starts from the top.
    fn restart(&mut self);

    /// Forward a scheduler tick to tasks owned by this one.
    fn tick_children(&mut self) {}
}

/// One resumable step of a task against the context `C`.
pub trait Run<C>: Task {
    fn step(&mut self, tcb: &mut Tcb, cx: &mut C) -> Step;
}

/// A task paired with its control block.
pub struct Scheduled<T> {
    tcb: Tcb,
    task: T,
}

impl<T> Scheduled<T> {
    pub const fn new(task: T) -> Self {
        Self {
            tcb: Tcb::new(),
            task,
        }
    }

    pub fn tcb(&self) -> &Tcb {
        &self.tcb
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn task_mut(&mut self) -> &mut T {
        &mut self.task
    }

    pub fn suspend(&mut self) {
        self.tcb.ctrl |= SUSPEND;
    }

    pub fn resume(&mut self) {
        self.tcb.ctrl &= !SUSPEND;
    }

    pub fn notify(&mut self) {
        self.tcb.ctrl |= NOTIFY;
    }

    /// Cut a pending delay or wait short.
    pub fn abort_delay(&mut self) {
        self.tcb.tick = 0;
    }

    /// Halt without touching the resume state; only [`Scheduled::start`] revives it.
    pub fn stop(&mut self) {
        self.tcb.ctrl |= STOP;
        self.tcb.ctrl &= !RUNNING;
        self.tcb.tick = 0;
    }
}

impl<T: Task> Scheduled<T> {
    /// (Re)start from the top.
    pub fn start(&mut self) {
        self.tcb.ctrl &= !(STOP | WAIT);
        self.tcb.ctrl |= RUNNING;
        self.tcb.tick = 0;
        self.task.restart();
    }

    /// Back to the top without changing the running state.
    pub fn reset(&mut self) {
        self.tcb.ctrl &= !WAIT;
        self.tcb.tick = 0;
        self.task.restart();
    }

    fn exit(&mut self) {
        self.tcb.tick = TICK_MAX;
        self.tcb.ctrl &= !(RUNNING | WAIT);
        self.tcb.ctrl |= STOP;
        self.task.restart();
    }

    /// Called once per scheduler tick.
    pub fn tick(&mut self) {
        if !self.tcb.is_suspended() && self.tcb.tick > 0 && self.tcb.tick < TICK_MAX {
            self.tcb.tick -= 1;
        }
        self.task.tick_children();
    }

    /// Step the task if it is due. Returns what it did, or `None` if it was not due.
    pub fn run<C>(&mut self, cx: &mut C) -> Option<Step>
    where
        T: Run<C>,
    {
        if !self.tcb.runnable() {
            return None;
        }

        Some(self.step(cx))
    }

    fn step<C>(&mut self, cx: &mut C) -> Step
    where
        T: Run<C>,
    {
        let step = self.task.step(&mut self.tcb, cx);
        if step == Step::Exit {
            self.exit();
        }
        step
    }
}
