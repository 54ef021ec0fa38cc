//! Linear output engine: the periodic callback and its gated configuration.
//!
//! [`PwmEngine`] owns the duty store, the brightness counter, the serial bus,
//! the latch line and the hardware timer. The application registers its timer
//! interrupt and calls [`PwmEngine::tick`] from it; everything else happens in
//! the foreground through feasibility-gated operations.
//!
//! One engine instance drives one periodic callback slot. The engine is an
//! ordinary owned object - place it wherever your interrupt handler can reach
//! it (a critical-section cell, a static, an RTIC resource) and do not share
//! a timer slot between two engines.

use crate::duty::DutyStore;
use crate::line::{BitOrder, OutputLine, ShiftBus};
use crate::load::{LoadEstimate, LoadModel};
use crate::report::{self, LoadReport, MeasuredLoad};
use crate::time::{TimeInstant, TimeSource};
use crate::timer::{PwmTimer, TimerSetting, TimerWidth};

/// Comparison-counter advance applied per register when load balancing.
///
/// Staggers the switching instant of each register group across the
/// brightness period so supply-current transients do not pile up at counter
/// wraparound. The value is one register's worth of outputs.
pub const PHASE_OFFSET: u8 = 8;

/// Construction-time engine options.
///
/// Everything that is fixed for the lifetime of the engine. The run-time
/// parameters (refresh rate, brightness levels, register count) go through
/// the gated operations instead.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineConfig {
    /// CPU clock feeding the timer and the load estimate, in Hz.
    pub cpu_hz: u32,

    /// Counter width of the timer behind the periodic callback.
    pub timer_width: TimerWidth,

    /// Drive outputs active-low: the duty comparison flips from
    /// `duty > counter` to `duty <= counter`.
    pub invert_outputs: bool,

    /// Stagger the comparison counter by [`PHASE_OFFSET`] per register.
    pub balance_load: bool,

    /// Bit order of the byte handed to the bus per register.
    pub bit_order: BitOrder,

    /// Override for the bus's cycle-cost model. Leave `None` to use the
    /// model the bus reports; set re-measured coefficients for your target
    /// when the built-in constants do not apply.
    pub load_model: Option<LoadModel>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cpu_hz: 16_000_000,
            timer_width: TimerWidth::Bits16,
            invert_outputs: false,
            balance_load: false,
            bit_order: BitOrder::LsbFirst,
            load_model: None,
        }
    }
}

/// Errors from the gated configuration operations.
///
/// Every rejection is all-or-nothing: the previous configuration keeps
/// running unchanged and the callback stays in whatever armed state it was.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The requested combination would push the callback load at or past the
    /// safety threshold. Carries the numbers for reporting.
    LoadTooHigh(LoadEstimate),

    /// The requested output count exceeds the store's compile-time capacity.
    CapacityExceeded {
        /// Outputs the request needed.
        requested: usize,
        /// `MAX_OUTPUTS` of this engine.
        capacity: usize,
    },

    /// The requested callback rate works out to zero: a refresh rate of 0,
    /// or a matrix engine started before any rows were configured.
    ZeroRate,

    /// A matrix geometry with rows but no column registers (or the other
    /// way around) drives nothing and is refused.
    InvalidGeometry {
        /// Rows the request asked for.
        rows: usize,
        /// Column registers the request asked for.
        column_registers: usize,
    },
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::LoadTooHigh(estimate) => {
                write!(f, "configuration rejected: {}, which is too high", estimate)
            }
            ConfigError::CapacityExceeded {
                requested,
                capacity,
            } => {
                write!(
                    f,
                    "requested {} outputs but capacity is {}",
                    requested, capacity
                )
            }
            ConfigError::ZeroRate => {
                write!(f, "requested callback rate is zero")
            }
            ConfigError::InvalidGeometry {
                rows,
                column_registers,
            } => {
                write!(
                    f,
                    "matrix geometry of {} rows x {} column registers has a zero dimension",
                    rows, column_registers
                )
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

/// Disables the periodic callback for a scope, restoring the prior armed
/// state on every exit path.
pub(crate) struct SuspendGuard<'a, T: PwmTimer> {
    timer: &'a mut T,
    was_enabled: bool,
}

impl<'a, T: PwmTimer> SuspendGuard<'a, T> {
    pub(crate) fn new(timer: &'a mut T) -> Self {
        let was_enabled = timer.is_enabled();
        if was_enabled {
            timer.disable();
        }
        Self { timer, was_enabled }
    }
}

impl<T: PwmTimer> Drop for SuspendGuard<'_, T> {
    fn drop(&mut self) {
        if self.was_enabled {
            self.timer.enable();
        }
    }
}

/// Shifts one full comparison frame: every register, last to first, 8 duty
/// comparisons assembled into a byte each. Shared with the matrix engine.
pub(crate) fn shift_compare_frame<B: ShiftBus>(
    bus: &mut B,
    duties: &[u8],
    counter: u8,
    invert: bool,
    balance: bool,
    bit_order: BitOrder,
) {
    let mut counter = counter;

    for register in duties.chunks_exact(8).rev() {
        if balance {
            counter = counter.wrapping_add(PHASE_OFFSET);
        }

        let mut byte = 0u8;
        for (bit, &duty) in register.iter().enumerate() {
            let on = if invert {
                duty <= counter
            } else {
                duty > counter
            };
            if on {
                byte |= match bit_order {
                    BitOrder::LsbFirst => 1 << bit,
                    BitOrder::MsbFirst => 1 << (7 - bit),
                };
            }
        }
        bus.write_byte(byte);
    }
}

/// Software PWM engine for a linear chain of output registers.
///
/// # Type Parameters
/// * `B` - Serial path into the register chain
/// * `L` - Latch line type
/// * `T` - Periodic callback source
/// * `MAX_OUTPUTS` - Compile-time output capacity (registers x 8)
pub struct PwmEngine<B: ShiftBus, L: OutputLine, T: PwmTimer, const MAX_OUTPUTS: usize> {
    bus: B,
    latch: L,
    timer: T,
    config: EngineConfig,
    duties: DutyStore<MAX_OUTPUTS>,
    refresh_hz: u32,
    max_brightness: u8,
    counter: u8,
}

impl<B: ShiftBus, L: OutputLine, T: PwmTimer, const MAX_OUTPUTS: usize>
    PwmEngine<B, L, T, MAX_OUTPUTS>
{
    /// Creates an engine with no outputs configured and the callback unarmed.
    ///
    /// The latch is parked high (no frame in progress).
    pub fn new(bus: B, mut latch: L, timer: T, config: EngineConfig) -> Self {
        latch.set(true);

        Self {
            bus,
            latch,
            timer,
            config,
            duties: DutyStore::new(),
            refresh_hz: 0,
            max_brightness: 0,
            counter: 0,
        }
    }

    /// Read access to the duty thresholds.
    pub fn duties(&self) -> &DutyStore<MAX_OUTPUTS> {
        &self.duties
    }

    /// Write access to the duty thresholds (the foreground duty API).
    pub fn duties_mut(&mut self) -> &mut DutyStore<MAX_OUTPUTS> {
        &mut self.duties
    }

    /// Currently configured number of output registers.
    pub fn registers(&self) -> usize {
        self.duties.len() / 8
    }

    /// Committed refresh frequency, 0 before the first successful start.
    pub fn refresh_hz(&self) -> u32 {
        self.refresh_hz
    }

    /// Committed brightness ceiling (levels minus one).
    pub fn max_brightness(&self) -> u8 {
        self.max_brightness
    }

    /// Whether the periodic callback is armed.
    pub fn is_running(&self) -> bool {
        self.timer.is_enabled()
    }

    fn load_model(&self) -> LoadModel {
        self.config.load_model.unwrap_or_else(|| self.bus.load_model())
    }

    fn estimate(&self, refresh_hz: u32, max_brightness: u8, registers: usize) -> LoadEstimate {
        LoadEstimate::linear(
            self.load_model(),
            self.config.cpu_hz,
            refresh_hz,
            max_brightness,
            registers,
        )
    }

    /// Starts (or retunes) the periodic callback.
    ///
    /// Gated on the feasibility model: a refresh rate of zero is refused
    /// outright, and a rejected combination returns the offending estimate.
    /// Either way the previous configuration keeps running exactly as
    /// before. On success the timer is configured before it is enabled and a
    /// [`LoadReport`] describes what was committed.
    pub fn start(&mut self, refresh_hz: u32, max_brightness: u8) -> Result<LoadReport, ConfigError> {
        let estimate = self.estimate(refresh_hz, max_brightness, self.registers());
        if estimate.tick_hz == 0 {
            return Err(ConfigError::ZeroRate);
        }
        if !estimate.is_acceptable() {
            return Err(ConfigError::LoadTooHigh(estimate));
        }

        let setting = TimerSetting::select(self.config.cpu_hz, estimate.tick_hz, self.config.timer_width);

        self.refresh_hz = refresh_hz;
        self.max_brightness = max_brightness;
        self.duties.set_max_brightness(max_brightness);
        self.counter = 0;

        self.timer.configure(setting);
        self.timer.enable();

        Ok(LoadReport {
            estimate,
            setting,
            refresh_hz,
            actual_tick_hz: setting.actual_tick_hz(self.config.cpu_hz),
        })
    }

    /// Disarms the periodic callback. Duty values and configuration remain.
    pub fn stop(&mut self) {
        self.timer.disable();
    }

    /// Resizes the register chain, feasibility-gated.
    ///
    /// On acceptance the callback is suspended for the duration of the
    /// resize, so it never observes a partially resized store; previously
    /// set duty values below the overlap survive and new outputs read 0.
    pub fn set_register_count(&mut self, registers: usize) -> Result<(), ConfigError> {
        let requested = registers.saturating_mul(8);
        if requested > MAX_OUTPUTS {
            return Err(ConfigError::CapacityExceeded {
                requested,
                capacity: MAX_OUTPUTS,
            });
        }

        let estimate = self.estimate(self.refresh_hz, self.max_brightness, registers);
        if !estimate.is_acceptable() {
            return Err(ConfigError::LoadTooHigh(estimate));
        }

        let _guard = SuspendGuard::new(&mut self.timer);
        self.duties
            .resize(requested)
            .map_err(|_| ConfigError::CapacityExceeded {
                requested,
                capacity: MAX_OUTPUTS,
            })
    }

    /// The periodic callback body. Call this from your timer interrupt.
    ///
    /// Runs one complete transmission frame and advances the brightness
    /// counter; straight-line code with no waiting beyond the bus's bounded
    /// per-byte completion. Non-reentrant by construction: it needs
    /// `&mut self`, and only one callback slot may drive this engine.
    pub fn tick(&mut self) {
        let counter = self.counter;

        self.latch.set(false);
        shift_compare_frame(
            &mut self.bus,
            self.duties.as_slice(),
            counter,
            self.config.invert_outputs,
            self.config.balance_load,
            self.config.bit_order,
        );
        self.latch.set(true);

        if self.counter < self.max_brightness {
            self.counter += 1;
        } else {
            self.counter = 0;
        }
    }

    /// Bring-up sweep: ramps every output up to full and back down, one
    /// output at a time, calling `step` between brightness increments.
    ///
    /// Pass a delay closure tuned to taste; every output ends at 0.
    pub fn walk_outputs(&mut self, mut step: impl FnMut()) {
        self.duties.set_all(0);

        for index in 0..self.duties.len() {
            for value in 0..self.max_brightness {
                let _ = self.duties.set(index, value);
                step();
            }
            for value in (0..=self.max_brightness).rev() {
                let _ = self.duties.set(index, value);
                step();
            }
        }
    }

    /// Measures the real callback load by timing `busy` with the callback
    /// armed and again suspended. `None` when the callback is not armed.
    pub fn measure_load<I, S, F>(&mut self, time_source: &S, busy: F) -> Option<MeasuredLoad>
    where
        I: TimeInstant,
        S: TimeSource<I>,
        F: FnMut(),
    {
        report::measure_load(&mut self.timer, time_source, busy)
    }

    /// Releases the owned hardware.
    pub fn free(self) -> (B, L, T) {
        (self.bus, self.latch, self.timer)
    }
}
