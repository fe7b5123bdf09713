//! The main loop: owns the task set and applies the once-per-second
//! housekeeping in main loop context.

use crate::{
    bsp::Board,
    clock::AscCheck,
    context::{Context, Device},
    events::Event,
    scheduler::Scheduled,
    shared::Shared,
    systems::{
        alarm::AlarmTask,
        battery::BatteryTask,
        config::{Config, PowerMode, Settings},
        history::{record::RecordType, History, PopulateTask, StorageTask, UploadTask},
        protocol::{replies, NusGuard, ProtocolTask},
        sensor::{asc::run_daily_check, calibration::CalibrationTask, read::ReadTask},
    },
};

struct Tasks {
    protocol: Scheduled<ProtocolTask>,
    calibration: Scheduled<CalibrationTask>,
    read: Scheduled<ReadTask>,
    alarm: Scheduled<AlarmTask>,
    battery: Scheduled<BatteryTask>,
    storage: Scheduled<StorageTask>,
    upload: Scheduled<UploadTask>,
    populate: Scheduled<PopulateTask>,
}

impl Tasks {
    fn new() -> Self {
        Self {
            protocol: Scheduled::new(ProtocolTask::default()),
            calibration: Scheduled::new(CalibrationTask::default()),
            read: Scheduled::new(ReadTask::default()),
            alarm: Scheduled::new(AlarmTask::default()),
            battery: Scheduled::new(BatteryTask::default()),
            storage: Scheduled::new(StorageTask::new()),
            upload: Scheduled::new(UploadTask::new()),
            populate: Scheduled::new(PopulateTask::default()),
        }
    }

    fn tick(&mut self) {
        self.protocol.tick();
        self.calibration.tick();
        self.read.tick();
        self.alarm.tick();
        self.battery.tick();
        self.storage.tick();
        self.upload.tick();
        self.populate.tick();
    }

    /// One pass in the fixed poll order.
    fn run<B: Board>(&mut self, cx: &mut Context<'_, B>) {
        self.protocol.run(cx);
        self.calibration.run(cx);
        self.read.run(cx);
        self.alarm.run(cx);
        self.battery.run(cx);
        self.storage.run(cx);
        self.upload.run(cx);
        self.populate.run(cx);
    }

    /// Bring back the tasks that exit on a low battery.
    fn restart_measuring(&mut self) {
        log::info!("Restarting measurement tasks");
        self.read.start();
        self.storage.start();
        self.alarm.start();
    }
}

pub struct App<B: Board> {
    shared: &'static Shared,
    board: B,
    config: Config<B::ConfigFlash>,
    history: History,
    device: Device,
    tasks: Tasks,
}

impl<B: Board> App<B> {
    pub fn new(shared: &'static Shared, board: B, config: Config<B::ConfigFlash>) -> Self {
        let settings = config.settings();
        let device = Device::new(settings.auto_calibrate != 0, settings.calib_target);

        let mut app = Self {
            shared,
            board,
            config,
            history: History::new(),
            device,
            tasks: Tasks::new(),
        };

        let reason = app.board.reset_reason();
        log::info!("Reset reason: {:#06x}", reason);
        app.context().record(RecordType::ResetReason, reason);

        app
    }

    pub fn board(&mut self) -> &mut B {
        &mut self.board
    }

    fn context(&mut self) -> Context<'_, B> {
        Context {
            shared: self.shared,
            board: &mut self.board,
            config: &mut self.config,
            history: &mut self.history,
            device: &mut self.device,
        }
    }

    /// Apply elapsed ticks and seconds, then give every due task one step.
    pub fn poll(&mut self) {
        let Self {
            shared,
            board,
            config,
            history,
            device,
            tasks,
        } = self;
        let shared = *shared;

        for _ in 0..shared.clock.take_ticks() {
            tasks.tick();
        }

        let mut cx = Context {
            shared,
            board,
            config,
            history,
            device,
        };

        for _ in 0..shared.clock.take_seconds() {
            on_second(&mut cx);
        }

        if core::mem::take(&mut cx.device.restart_requested) {
            tasks.restart_measuring();
        }

        tasks.run(&mut cx);
    }
}

fn on_second<B: Board>(cx: &mut Context<'_, B>) {
    advance_clock(cx);
    if cx.device.clock.accumulate_drift() {
        advance_clock(cx);
    }
}

fn advance_clock<B: Board>(cx: &mut Context<'_, B>) {
    cx.device.clock.inc_second();

    if cx.device.clock.is_minute_boundary() && !cx.battery_low() {
        cx.set(Event::TimeUpdate | Event::BatteryAdcEn);
    }

    if cx.battery_low() {
        return;
    }

    let now = cx.now();
    let flight_mode = cx.config.settings().flight_mode();
    if cx.device.housekeeping.flight_mode_expired(now, flight_mode) {
        end_flight_mode(cx);
    }

    let on_demand = cx.config.settings().power_mode() == PowerMode::OnDemand;
    let device = &mut *cx.device;
    match device.housekeeping.asc_due(&device.clock, on_demand) {
        Some(AscCheck::Daily) => run_daily_check(cx, true),
        Some(AscCheck::Periodic) => run_daily_check(cx, false),
        None => {}
    }

    let fast = cx.device.connection.on_second();
    cx.set_fast_connection(fast);
}

fn end_flight_mode<B: Board>(cx: &mut Context<'_, B>) {
    log::info!("Flight mode auto-disabled");
    cx.config.update(|s| Settings {
        flight_mode: 0,
        ..s
    });
    let now = cx.now();
    cx.device.housekeeping.update_flight_mode_activation(now, false);
    cx.record(RecordType::FlightMode, 0);
    cx.set(Event::Co2UpHis | Event::FlightModeUpdate);

    match NusGuard::try_take(cx.events()) {
        Some(_guard) => {
            let frame = replies::device_state(cx.config.settings(), cx.any(Event::ScreenForceOn));
            cx.send(&frame);
        }
        None => log::debug!("Link busy, device state not pushed"),
    }
}
