//! Callback-load feasibility model.
//!
//! Every configuration change is gated on an estimate of how much CPU time
//! the periodic callback will consume. The estimate is a pure function of the
//! configuration: a fixed overhead plus a linear per-register term, times the
//! callback frequency, over the CPU clock. Anything at or above
//! [`MAX_LOAD`] is rejected so the foreground keeps at least 10% of the CPU.

/// Highest acceptable callback load fraction.
///
/// A deliberate safety margin, not a physical limit: above this the
/// foreground program would be starved of CPU time.
pub const MAX_LOAD: f32 = 0.9;

/// Cycle-cost coefficients of one callback invocation.
///
/// The built-in constants were measured on the original AVR target and only
/// hold there. On other silicon either re-measure and pass your own model
/// through the engine configuration, or treat the estimate as a rough guide.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoadModel {
    /// Fixed per-invocation overhead, in CPU cycles.
    pub overhead_cycles: f32,

    /// Additional cycles per register shifted out.
    pub cycles_per_register: f32,
}

impl LoadModel {
    /// Cost of the synchronous-serial-peripheral path.
    pub const SERIAL: Self = Self {
        overhead_cycles: 97.0,
        cycles_per_register: 43.0,
    };

    /// Cost of the manual data/clock toggling path, roughly 2.5x the
    /// per-register cost of [`Self::SERIAL`].
    pub const BIT_BANG: Self = Self {
        overhead_cycles: 96.0,
        cycles_per_register: 108.0,
    };

    /// Estimated duration of one callback shifting `registers` bytes.
    pub fn cycles_per_tick(&self, registers: usize) -> f32 {
        self.overhead_cycles + self.cycles_per_register * registers as f32
    }
}

/// Result of a feasibility evaluation.
///
/// Deterministic for identical inputs; returned to the caller on rejection so
/// the numbers can be reported.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoadEstimate {
    /// Estimated duration of one callback, in CPU cycles.
    pub cycles_per_tick: f32,

    /// Callback frequency for the evaluated configuration, in Hz.
    pub tick_hz: u32,

    /// Fraction of CPU time the callback would consume.
    pub load: f32,
}

impl LoadEstimate {
    /// Evaluates the load for a linear (non-matrix) configuration.
    ///
    /// The callback runs once per brightness step:
    /// `tick_hz = refresh_hz * (max_brightness + 1)`.
    pub fn linear(
        model: LoadModel,
        cpu_hz: u32,
        refresh_hz: u32,
        max_brightness: u8,
        registers: usize,
    ) -> Self {
        let tick_hz = u64::from(refresh_hz) * (u64::from(max_brightness) + 1);
        Self::at_tick_rate(model, cpu_hz, tick_hz, registers)
    }

    /// Evaluates the load for a matrix configuration.
    ///
    /// One callback per row-column-subframe:
    /// `tick_hz = refresh_hz * (max_brightness + 1) * rows`, with the
    /// per-register cost over the column registers only.
    pub fn matrix(
        model: LoadModel,
        cpu_hz: u32,
        refresh_hz: u32,
        max_brightness: u8,
        rows: usize,
        column_registers: usize,
    ) -> Self {
        let tick_hz = u64::from(refresh_hz) * (u64::from(max_brightness) + 1) * rows as u64;
        Self::at_tick_rate(model, cpu_hz, tick_hz, column_registers)
    }

    fn at_tick_rate(model: LoadModel, cpu_hz: u32, tick_hz: u64, registers: usize) -> Self {
        // Saturate absurd rates so the estimate stays enormous and gets
        // rejected instead of wrapping back into the acceptable range.
        let tick_hz = u32::try_from(tick_hz).unwrap_or(u32::MAX);
        let cycles_per_tick = model.cycles_per_tick(registers);
        let load = cycles_per_tick * tick_hz as f32 / cpu_hz as f32;

        Self {
            cycles_per_tick,
            tick_hz,
            load,
        }
    }

    /// Whether this configuration may be committed.
    pub fn is_acceptable(&self) -> bool {
        self.load < MAX_LOAD
    }
}

impl core::fmt::Display for LoadEstimate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "estimated {} cycles per callback at {} Hz, load {}",
            self.cycles_per_tick, self.tick_hz, self.load
        )
    }
}
