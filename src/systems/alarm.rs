//! CO2 threshold alarms and the find-device beeper.

use crate::{
    bsp::{Annunciator, Board},
    clock::WallClock,
    context::Context,
    events::{Event, Events},
    scheduler::{ms, Run, Step, Task, Tcb, TICK_MAX},
    systems::config::{AdvancedAlarm, Settings, ADVANCED_ALARM_COUNT},
};

const BEEP_MS: u32 = 250;
const FIND_DEVICE_BEEPS: u8 = 10;

/// Whether the do-not-disturb window covers the current wall clock time.
pub fn is_dnd(settings: &Settings, clock: &WallClock) -> bool {
    if settings.dnd_mode == 0 || !clock.is_set() {
        return false;
    }

    let (start, end) = (settings.dnd_start_hour, settings.dnd_end_hour);
    let hour = clock.hour();
    if start < end {
        (start..end).contains(&hour)
    } else if start > end {
        hour >= start || hour < end
    } else {
        (settings.dnd_start_minute..settings.dnd_end_minute).contains(&clock.minute())
    }
}

/// Yellow and red transitions, used while no advanced alarm is configured.
fn basic_repeats(settings: &Settings, value: u16, last: u16, falling: bool) -> u8 {
    let (yellow, red) = (settings.yellow_start, settings.red_start);

    if value >= yellow && last < yellow {
        1
    } else if value >= red && last < red {
        2
    } else if falling && settings.alarm_co2_falling != 0 {
        if last >= red && value < red {
            2
        } else if last >= yellow && value < yellow {
            1
        } else {
            0
        }
    } else {
        0
    }
}

/// Repeats for falling below `alarms[index]`: those of the next lower active
/// level, or its own when there is none.
fn falling_repeats(alarms: &[AdvancedAlarm], index: usize) -> u8 {
    let level = alarms[index].co2_level;
    alarms
        .iter()
        .filter(|a| a.is_active() && a.co2_level < level)
        .max_by_key(|a| a.co2_level)
        .unwrap_or(&alarms[index])
        .repeats
}

/// Alarm evaluation state carried between readings.
#[derive(Debug, Default)]
pub struct AlarmState {
    last: u16,
    /// Per level: the reading that raised it, 0 once it is below again.
    rising: [u16; ADVANCED_ALARM_COUNT],
    /// Per level: set once the falling alarm fired.
    falling: [u16; ADVANCED_ALARM_COUNT],
}

impl AlarmState {
    /// Feed a reading. Returns how often to beep.
    pub fn evaluate(&mut self, settings: &Settings, value: u16, dnd: bool) -> u8 {
        let last = core::mem::replace(&mut self.last, value);
        if dnd {
            log::debug!("Alarm skipped, do not disturb");
            return 0;
        }

        let falling = last != 0 && value < last;
        if falling && settings.alarm_co2_falling == 0 {
            return 0;
        }

        let repeats = if settings.advanced_alarms.iter().any(AdvancedAlarm::is_active) {
            self.advanced(settings, value, last, falling)
        } else {
            basic_repeats(settings, value, last, falling)
        };
        log::debug!("Alarm for {} (last {}): {} repeats", value, last, repeats);
        repeats
    }

    fn advanced(&mut self, settings: &Settings, value: u16, last: u16, falling: bool) -> u8 {
        let alarms = &settings.advanced_alarms;
        let mut repeats = 0;

        for (i, alarm) in alarms.iter().enumerate() {
            if !alarm.is_active() {
                self.rising[i] = 0;
                self.falling[i] = 0;
                continue;
            }

            if value >= alarm.co2_level {
                if self.rising[i] == 0 {
                    log::info!("CO2 {} rose above {}", value, alarm.co2_level);
                    repeats = repeats.max(alarm.repeats);
                    self.rising[i] = value;
                }
                self.falling[i] = 0;
            } else {
                self.rising[i] = 0;
                if settings.alarm_co2_falling != 0
                    && falling
                    && last >= alarm.co2_level
                    && self.falling[i] == 0
                {
                    log::info!("CO2 {} fell below {}", value, alarm.co2_level);
                    repeats = repeats.max(falling_repeats(alarms, i));
                    self.falling[i] = alarm.co2_level;
                }
            }
        }

        repeats
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum State {
    #[default]
    Wait,
    On,
    Off,
}

#[derive(Default)]
pub struct AlarmTask {
    state: State,
    alarm: AlarmState,
    remaining: u8,
    buzzer: bool,
    vibrator: bool,
}

impl Task for AlarmTask {
    fn restart(&mut self) {
        *self = Self::default();
    }
}

impl<'a, B: Board> Run<Context<'a, B>> for AlarmTask {
    fn step(&mut self, tcb: &mut Tcb, cx: &mut Context<'a, B>) -> Step {
        loop {
            match self.state {
                State::Wait => {
                    let wake = Event::Co2UpAlarm | Event::FindDevice | Events::BATTERY_LOW;
                    if !tcb.wait(cx.any(wake), TICK_MAX) {
                        return Step::Yield;
                    }

                    if cx.battery_low() {
                        log::info!("Alarms off, battery low");
                        cx.board.annunciator().off();
                        return Step::Exit;
                    }

                    let settings = *cx.config.settings();
                    if cx.any(Event::Co2UpAlarm) {
                        cx.clear(Event::Co2UpAlarm);

                        let dnd = is_dnd(&settings, &cx.device.clock);
                        let repeats = self.alarm.evaluate(&settings, cx.device.co2.value, dnd);
                        if repeats > 0 && settings.illuminate_on_alarm != 0 {
                            cx.set(Event::ScreenOnOnetime);
                        }

                        self.buzzer = settings.buzzer != 0;
                        self.vibrator = settings.vibrator != 0;
                        self.remaining = if self.buzzer || self.vibrator { repeats } else { 0 };
                    } else {
                        cx.clear(Event::FindDevice);
                        log::info!("Find device");
                        self.buzzer = true;
                        self.vibrator = true;
                        self.remaining = FIND_DEVICE_BEEPS;
                    }

                    if self.remaining > 0 {
                        self.state = State::On;
                    }
                }
                State::On => {
                    cx.board.annunciator().set(self.buzzer, self.vibrator);
                    self.state = State::Off;
                    return tcb.delay(ms(BEEP_MS));
                }
                State::Off => {
                    cx.board.annunciator().off();
                    self.remaining -= 1;
                    if cx.battery_low() {
                        self.remaining = 0;
                    }
                    self.state = if self.remaining > 0 { State::On } else { State::Wait };
                    return tcb.delay(ms(BEEP_MS));
                }
            }
        }
    }
}
