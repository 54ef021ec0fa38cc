//! Periodic-callback timing: the hardware timer seam and the divisor search.
//!
//! The engine needs one compare-match interrupt per brightness step. This
//! module picks the prescaler/compare pair that lands closest to the target
//! rate within the counter's bit width, and defines the [`PwmTimer`] trait
//! the platform implements to arm that rate.

/// Trait for abstracting the periodic callback source.
///
/// Implement this for your hardware timer in compare-match (or equivalent
/// auto-reload) mode. The engine always configures before enabling and never
/// leaves an enabled timer with a half-applied setting.
pub trait PwmTimer {
    /// Applies a prescaler/compare pair. Must not enable the interrupt.
    fn configure(&mut self, setting: TimerSetting);

    /// Arms the periodic callback.
    fn enable(&mut self);

    /// Disarms the periodic callback.
    fn disable(&mut self);

    /// Whether the periodic callback is currently armed.
    fn is_enabled(&self) -> bool;
}

/// Bit width of the timer's counter register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerWidth {
    /// 8-bit counter; needs the prescaler ladder for low rates.
    Bits8,

    /// 16-bit counter; usually runs unprescaled for best accuracy.
    Bits16,
}

impl TimerWidth {
    fn max_compare(self) -> u32 {
        match self {
            TimerWidth::Bits8 => 0xFF,
            TimerWidth::Bits16 => 0xFFFF,
        }
    }
}

/// Prescaler candidates, smallest (most precise) first.
const PRESCALERS: [u16; 6] = [1, 8, 32, 64, 128, 256];

/// A committed prescaler/compare pair.
///
/// The callback fires every `prescaler * (compare + 1)` CPU cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerSetting {
    /// Clock divisor ahead of the counter.
    pub prescaler: u16,

    /// Compare-match value; the counter counts 0..=compare.
    pub compare: u16,
}

impl TimerSetting {
    /// Picks the smallest prescaler whose compare value fits the counter.
    ///
    /// `compare = round(cpu_hz / (prescaler * tick_hz)) - 1`, rounded half-up
    /// in integer arithmetic. If even the largest prescaler overflows the
    /// counter, the compare value is clamped: the callback then runs slower
    /// than requested. That is accepted with reduced accuracy rather than
    /// treated as an error - there is no richer error channel at this layer.
    pub fn select(cpu_hz: u32, tick_hz: u32, width: TimerWidth) -> Self {
        let max = width.max_compare();

        // A zero rate cannot be expressed; fall through to the slowest
        // setting rather than divide by zero.
        if tick_hz == 0 {
            return Self {
                prescaler: PRESCALERS[PRESCALERS.len() - 1],
                compare: max as u16,
            };
        }

        for prescaler in PRESCALERS {
            let compare = Self::compare_for(cpu_hz, prescaler, tick_hz);
            if compare <= max {
                return Self {
                    prescaler,
                    compare: compare as u16,
                };
            }
        }

        // Out of range even at the largest prescaler: clamp and lose accuracy.
        Self {
            prescaler: PRESCALERS[PRESCALERS.len() - 1],
            compare: max as u16,
        }
    }

    fn compare_for(cpu_hz: u32, prescaler: u16, tick_hz: u32) -> u32 {
        let divisor = u32::from(prescaler) * tick_hz;
        let period = (cpu_hz + divisor / 2) / divisor;
        period.saturating_sub(1)
    }

    /// The callback rate this setting actually produces.
    pub fn actual_tick_hz(&self, cpu_hz: u32) -> u32 {
        cpu_hz / (u32::from(self.prescaler) * (u32::from(self.compare) + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPU_HZ: u32 = 16_000_000;

    #[test]
    fn sixteen_bit_timer_runs_unprescaled() {
        // 75 Hz * 256 levels = 19200 Hz -> compare 832 fits 16 bits directly.
        let setting = TimerSetting::select(CPU_HZ, 19_200, TimerWidth::Bits16);
        assert_eq!(setting.prescaler, 1);
        assert_eq!(setting.compare, 832);
    }

    #[test]
    fn eight_bit_timer_climbs_the_prescaler_ladder() {
        // compare at /1 is 832, at /8 it is 103 which fits 8 bits.
        let setting = TimerSetting::select(CPU_HZ, 19_200, TimerWidth::Bits8);
        assert_eq!(setting.prescaler, 8);
        assert_eq!(setting.compare, 103);
    }

    #[test]
    fn smallest_fitting_prescaler_wins() {
        // High tick rate fits without any prescaling even on 8 bits.
        let setting = TimerSetting::select(CPU_HZ, 100_000, TimerWidth::Bits8);
        assert_eq!(setting.prescaler, 1);
        assert_eq!(setting.compare, 159);
    }

    #[test]
    fn out_of_range_rate_clamps_to_largest_prescaler() {
        // 10 Hz needs a period of 1.6M cycles; /256 still wants compare 6249.
        let setting = TimerSetting::select(CPU_HZ, 10, TimerWidth::Bits8);
        assert_eq!(setting.prescaler, 256);
        assert_eq!(setting.compare, 0xFF);

        // The achieved rate is higher than requested, not a failure.
        assert!(setting.actual_tick_hz(CPU_HZ) > 10);
    }

    #[test]
    fn zero_rate_selects_the_slowest_setting() {
        for width in [TimerWidth::Bits8, TimerWidth::Bits16] {
            let setting = TimerSetting::select(CPU_HZ, 0, width);
            assert_eq!(setting.prescaler, 256);
            assert_eq!(u32::from(setting.compare), width.max_compare());
        }
    }

    #[test]
    fn compare_value_rounds_half_up() {
        // 16 MHz / 4100 Hz = 3902.4 -> compare 3901;
        // 16 MHz / 4500 Hz = 3555.6 -> rounds to 3556 -> compare 3555.
        assert_eq!(
            TimerSetting::select(CPU_HZ, 4_100, TimerWidth::Bits16).compare,
            3901
        );
        assert_eq!(
            TimerSetting::select(CPU_HZ, 4_500, TimerWidth::Bits16).compare,
            3555
        );
    }

    #[test]
    fn actual_rate_round_trips_close_to_target() {
        let target = 19_200;
        let setting = TimerSetting::select(CPU_HZ, target, TimerWidth::Bits16);
        let actual = setting.actual_tick_hz(CPU_HZ);
        let error = actual.abs_diff(target);
        assert!(error * 1000 < target); // within 0.1%
    }
}
