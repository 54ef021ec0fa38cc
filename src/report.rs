//! Human-readable diagnostics: what was committed, and what it really costs.
//!
//! [`LoadReport`] is returned by the engines' `start` with the numbers the
//! feasibility gate and the rate controller settled on. [`measure_load`]
//! complements the estimate with a ground-truth measurement by timing a
//! reference busy loop with the callback armed and again suspended.

use crate::engine::SuspendGuard;
use crate::load::LoadEstimate;
use crate::time::{TimeDuration, TimeInstant, TimeSource};
use crate::timer::{PwmTimer, TimerSetting};

/// Everything a successful start committed.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoadReport {
    /// The accepted feasibility estimate.
    pub estimate: LoadEstimate,

    /// Prescaler/compare pair armed on the timer.
    pub setting: TimerSetting,

    /// Requested refresh frequency, in Hz.
    pub refresh_hz: u32,

    /// Callback frequency the timer setting actually produces, in Hz.
    pub actual_tick_hz: u32,
}

impl LoadReport {
    /// Brightness levels of the committed configuration.
    pub fn brightness_levels(&self) -> u32 {
        if self.refresh_hz == 0 {
            0
        } else {
            self.estimate.tick_hz / self.refresh_hz
        }
    }

    /// Refresh frequency the timer setting actually produces, in Hz.
    pub fn achieved_refresh_hz(&self) -> u32 {
        let levels = self.brightness_levels();
        if levels == 0 {
            0
        } else {
            self.actual_tick_hz / levels
        }
    }
}

impl core::fmt::Display for LoadReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "estimated load: {}", self.estimate.load)?;
        writeln!(
            f,
            "callback frequency: {} Hz (achieved {} Hz)",
            self.estimate.tick_hz, self.actual_tick_hz
        )?;
        writeln!(
            f,
            "PWM frequency: {} Hz (achieved {} Hz)",
            self.refresh_hz,
            self.achieved_refresh_hz()
        )?;
        write!(
            f,
            "timer: prescaler {}, compare value {}",
            self.setting.prescaler, self.setting.compare
        )
    }
}

/// Callback load measured against a reference busy loop.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MeasuredLoad {
    /// Fraction of CPU time the callback consumed during the measurement.
    pub load: f32,

    /// Busy-loop duration with the callback armed, in microseconds.
    pub with_callback_us: u64,

    /// Busy-loop duration with the callback suspended, in microseconds.
    pub without_callback_us: u64,
}

impl core::fmt::Display for MeasuredLoad {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "measured load: {} ({} us with callback, {} us without)",
            self.load, self.with_callback_us, self.without_callback_us
        )
    }
}

/// Times `busy` once with the periodic callback armed and once suspended and
/// derives the callback's load from the difference.
///
/// Run the same fixed amount of work in `busy` on both passes - a calibrated
/// delay loop long enough to span many callback periods gives a stable
/// number. Returns `None` when the callback is not armed, since there would
/// be nothing to measure.
pub fn measure_load<T, I, S, F>(timer: &mut T, time_source: &S, mut busy: F) -> Option<MeasuredLoad>
where
    T: PwmTimer,
    I: TimeInstant,
    S: TimeSource<I>,
    F: FnMut(),
{
    if !timer.is_enabled() {
        return None;
    }

    let start = time_source.now();
    busy();
    let with_callback_us = time_source.now().duration_since(start).as_micros();

    let without_callback_us = {
        let _guard = SuspendGuard::new(timer);
        let start = time_source.now();
        busy();
        time_source.now().duration_since(start).as_micros()
    };

    let load = if with_callback_us == 0 {
        0.0
    } else {
        with_callback_us.saturating_sub(without_callback_us) as f32 / with_callback_us as f32
    };

    Some(MeasuredLoad {
        load,
        with_callback_us,
        without_callback_us,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::LoadModel;
    use crate::timer::TimerWidth;
    extern crate std;
    use core::cell::Cell;
    use core::cell::RefCell;
    use std::format;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct TestDuration(u64);

    impl TimeDuration for TestDuration {
        const ZERO: Self = TestDuration(0);

        fn as_micros(&self) -> u64 {
            self.0
        }

        fn saturating_sub(self, other: Self) -> Self {
            TestDuration(self.0.saturating_sub(other.0))
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct TestInstant(u64);

    impl TimeInstant for TestInstant {
        type Duration = TestDuration;

        fn duration_since(&self, earlier: Self) -> Self::Duration {
            TestDuration(self.0 - earlier.0)
        }
    }

    struct MockTimeSource {
        current: Cell<u64>,
    }

    impl MockTimeSource {
        fn new() -> Self {
            Self {
                current: Cell::new(0),
            }
        }

        fn advance(&self, micros: u64) {
            self.current.set(self.current.get() + micros);
        }
    }

    impl TimeSource<TestInstant> for MockTimeSource {
        fn now(&self) -> TestInstant {
            TestInstant(self.current.get())
        }
    }

    struct MockTimer {
        enabled: Rc<RefCell<bool>>,
    }

    impl PwmTimer for MockTimer {
        fn configure(&mut self, _setting: TimerSetting) {}
        fn enable(&mut self) {
            *self.enabled.borrow_mut() = true;
        }
        fn disable(&mut self) {
            *self.enabled.borrow_mut() = false;
        }
        fn is_enabled(&self) -> bool {
            *self.enabled.borrow()
        }
    }

    #[test]
    fn measures_the_slowdown_caused_by_the_callback() {
        let enabled = Rc::new(RefCell::new(true));
        let mut timer = MockTimer {
            enabled: enabled.clone(),
        };
        let time = MockTimeSource::new();

        // The busy loop takes 1000 us with the callback stealing cycles and
        // 800 us without.
        let measured = measure_load(&mut timer, &time, || {
            let cost = if *enabled.borrow() { 1000 } else { 800 };
            time.advance(cost);
        })
        .unwrap();

        assert_eq!(measured.with_callback_us, 1000);
        assert_eq!(measured.without_callback_us, 800);
        assert!((measured.load - 0.2).abs() < 1e-6);

        // The callback was re-armed after the measurement.
        assert!(timer.is_enabled());
    }

    #[test]
    fn returns_none_when_callback_not_armed() {
        let mut timer = MockTimer {
            enabled: Rc::new(RefCell::new(false)),
        };
        let time = MockTimeSource::new();

        assert!(measure_load(&mut timer, &time, || {}).is_none());
    }

    #[test]
    fn zero_duration_measurement_reports_zero_load() {
        let mut timer = MockTimer {
            enabled: Rc::new(RefCell::new(true)),
        };
        let time = MockTimeSource::new();

        let measured = measure_load(&mut timer, &time, || {}).unwrap();
        assert_eq!(measured.load, 0.0);
    }

    #[test]
    fn report_derives_brightness_levels_and_achieved_refresh() {
        let estimate = LoadEstimate::linear(LoadModel::SERIAL, 16_000_000, 75, 255, 6);
        let setting = TimerSetting::select(16_000_000, estimate.tick_hz, TimerWidth::Bits16);
        let report = LoadReport {
            estimate,
            setting,
            refresh_hz: 75,
            actual_tick_hz: setting.actual_tick_hz(16_000_000),
        };

        assert_eq!(report.brightness_levels(), 256);
        // 16 MHz / 833 = 19207 Hz -> 75 Hz after dividing out the levels.
        assert_eq!(report.achieved_refresh_hz(), 75);
    }

    #[test]
    fn report_formats_all_settings_for_display() {
        let estimate = LoadEstimate::linear(LoadModel::SERIAL, 16_000_000, 75, 255, 6);
        let setting = TimerSetting::select(16_000_000, estimate.tick_hz, TimerWidth::Bits16);
        let report = LoadReport {
            estimate,
            setting,
            refresh_hz: 75,
            actual_tick_hz: setting.actual_tick_hz(16_000_000),
        };

        let text = format!("{}", report);
        assert!(text.contains("estimated load"));
        assert!(text.contains("19200 Hz"));
        assert!(text.contains("PWM frequency: 75 Hz"));
        assert!(text.contains("prescaler 1"));
        assert!(text.contains("compare value 832"));
    }
}
