//! Row/column-multiplexed output engine for LED matrices.
//!
//! Columns are driven exactly like the linear engine, but scoped to one row
//! at a time; a second, single-bit shift register walks the active row. Each
//! row gets one full brightness cycle before the scan advances, so only one
//! row is ever electrically lit and perceived brightness drops by a factor
//! of `rows` in exchange for drastically fewer drive lines.

use crate::duty::DutyStore;
use crate::engine::{shift_compare_frame, ConfigError, SuspendGuard};
use crate::line::{BitOrder, OutputLine, ShiftBus};
use crate::load::{LoadEstimate, LoadModel};
use crate::report::LoadReport;
use crate::timer::{PwmTimer, TimerSetting, TimerWidth};

/// The three control lines of the row-select shift register.
pub struct RowSelect<D: OutputLine, C: OutputLine, L: OutputLine> {
    data: D,
    clock: C,
    latch: L,
}

impl<D: OutputLine, C: OutputLine, L: OutputLine> RowSelect<D, C, L> {
    /// Bundles the row data, clock and latch lines.
    ///
    /// Data and clock are parked low, the latch high.
    pub fn new(mut data: D, mut clock: C, mut latch: L) -> Self {
        data.set(false);
        clock.set(false);
        latch.set(true);

        Self { data, clock, latch }
    }

    fn pulse_clock(&mut self) {
        self.clock.set(false);
        self.clock.set(true);
    }

    /// Releases the underlying lines.
    pub fn free(self) -> (D, C, L) {
        (self.data, self.clock, self.latch)
    }
}

/// Construction-time matrix engine options.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MatrixConfig {
    /// CPU clock feeding the timer and the load estimate, in Hz.
    pub cpu_hz: u32,

    /// Counter width of the timer behind the periodic callback.
    pub timer_width: TimerWidth,

    /// Column outputs are active-low: the duty comparison flips.
    pub invert_columns: bool,

    /// Row-select outputs are active-low: the injected scan bit flips.
    pub invert_rows: bool,

    /// Bit order of the byte handed to the column bus per register.
    pub bit_order: BitOrder,

    /// Override for the column bus's cycle-cost model.
    pub load_model: Option<LoadModel>,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            cpu_hz: 16_000_000,
            timer_width: TimerWidth::Bits16,
            invert_columns: false,
            invert_rows: false,
            bit_order: BitOrder::LsbFirst,
            load_model: None,
        }
    }
}

/// Software PWM engine for a row/column-multiplexed matrix.
///
/// Duty thresholds are stored row-major: output `row * column_registers * 8
/// + column`. The row-scan state (current row, sub-counter) is owned by the
/// periodic callback and never read elsewhere.
///
/// # Type Parameters
/// * `B` - Serial path into the column registers
/// * `CL` - Column latch line
/// * `RD`, `RC`, `RL` - Row-select data, clock and latch lines
/// * `T` - Periodic callback source
/// * `MAX_OUTPUTS` - Compile-time capacity (rows x column registers x 8)
pub struct MatrixEngine<B, CL, RD, RC, RL, T, const MAX_OUTPUTS: usize>
where
    B: ShiftBus,
    CL: OutputLine,
    RD: OutputLine,
    RC: OutputLine,
    RL: OutputLine,
    T: PwmTimer,
{
    bus: B,
    column_latch: CL,
    row_select: RowSelect<RD, RC, RL>,
    timer: T,
    config: MatrixConfig,
    duties: DutyStore<MAX_OUTPUTS>,
    rows: usize,
    column_registers: usize,
    refresh_hz: u32,
    max_brightness: u8,
    counter: u8,
    current_row: usize,
}

impl<B, CL, RD, RC, RL, T, const MAX_OUTPUTS: usize> MatrixEngine<B, CL, RD, RC, RL, T, MAX_OUTPUTS>
where
    B: ShiftBus,
    CL: OutputLine,
    RD: OutputLine,
    RC: OutputLine,
    RL: OutputLine,
    T: PwmTimer,
{
    /// Creates a matrix engine with no geometry configured and the callback
    /// unarmed.
    pub fn new(
        bus: B,
        mut column_latch: CL,
        row_select: RowSelect<RD, RC, RL>,
        timer: T,
        config: MatrixConfig,
    ) -> Self {
        column_latch.set(true);

        Self {
            bus,
            column_latch,
            row_select,
            timer,
            config,
            duties: DutyStore::new(),
            rows: 0,
            column_registers: 0,
            refresh_hz: 0,
            max_brightness: 0,
            counter: 0,
            current_row: 0,
        }
    }

    /// Read access to the duty thresholds (row-major).
    pub fn duties(&self) -> &DutyStore<MAX_OUTPUTS> {
        &self.duties
    }

    /// Write access to the duty thresholds (the foreground duty API).
    pub fn duties_mut(&mut self) -> &mut DutyStore<MAX_OUTPUTS> {
        &mut self.duties
    }

    /// Configured number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Configured number of column registers per row.
    pub fn column_registers(&self) -> usize {
        self.column_registers
    }

    /// Committed refresh frequency, 0 before the first successful start.
    pub fn refresh_hz(&self) -> u32 {
        self.refresh_hz
    }

    /// Whether the periodic callback is armed.
    pub fn is_running(&self) -> bool {
        self.timer.is_enabled()
    }

    fn load_model(&self) -> LoadModel {
        self.config.load_model.unwrap_or_else(|| self.bus.load_model())
    }

    fn estimate(
        &self,
        refresh_hz: u32,
        max_brightness: u8,
        rows: usize,
        column_registers: usize,
    ) -> LoadEstimate {
        LoadEstimate::matrix(
            self.load_model(),
            self.config.cpu_hz,
            refresh_hz,
            max_brightness,
            rows,
            column_registers,
        )
    }

    /// Starts (or retunes) the periodic callback, feasibility-gated.
    ///
    /// The matrix callback rate is `refresh_hz * (max_brightness + 1) *
    /// rows` - one invocation per row-column-subframe. Starting with a zero
    /// refresh rate or before any geometry is configured is refused
    /// outright. Rejection retains the previous configuration and the
    /// callback's prior armed state.
    pub fn start(&mut self, refresh_hz: u32, max_brightness: u8) -> Result<LoadReport, ConfigError> {
        let estimate = self.estimate(refresh_hz, max_brightness, self.rows, self.column_registers);
        if estimate.tick_hz == 0 {
            return Err(ConfigError::ZeroRate);
        }
        if !estimate.is_acceptable() {
            return Err(ConfigError::LoadTooHigh(estimate));
        }

        let setting =
            TimerSetting::select(self.config.cpu_hz, estimate.tick_hz, self.config.timer_width);

        self.refresh_hz = refresh_hz;
        self.max_brightness = max_brightness;
        self.duties.set_max_brightness(max_brightness);
        self.counter = 0;
        self.current_row = 0;

        // Park the row data line inactive so the pre-rollover clock pulses
        // shift blanks, not stray selections, through the row register.
        self.row_select.data.set(self.config.invert_rows);

        self.timer.configure(setting);
        self.timer.enable();

        Ok(LoadReport {
            estimate,
            setting,
            refresh_hz,
            actual_tick_hz: setting.actual_tick_hz(self.config.cpu_hz),
        })
    }

    /// Disarms the periodic callback. Duty values and geometry remain.
    pub fn stop(&mut self) {
        self.timer.disable();
    }

    /// Resizes the matrix geometry, feasibility-gated.
    ///
    /// The callback is suspended for the duration of the resize. Duty values
    /// in the overlapping (row-major) range survive; new outputs read 0.
    /// A geometry with only one zero dimension is refused; `(0, 0)` clears
    /// the geometry.
    pub fn set_matrix_size(&mut self, rows: usize, column_registers: usize) -> Result<(), ConfigError> {
        if (rows == 0) != (column_registers == 0) {
            return Err(ConfigError::InvalidGeometry {
                rows,
                column_registers,
            });
        }

        let requested = rows.saturating_mul(column_registers).saturating_mul(8);
        if requested > MAX_OUTPUTS {
            return Err(ConfigError::CapacityExceeded {
                requested,
                capacity: MAX_OUTPUTS,
            });
        }

        let estimate = self.estimate(self.refresh_hz, self.max_brightness, rows, column_registers);
        if !estimate.is_acceptable() {
            return Err(ConfigError::LoadTooHigh(estimate));
        }

        let _guard = SuspendGuard::new(&mut self.timer);
        self.duties
            .resize(requested)
            .map_err(|_| ConfigError::CapacityExceeded {
                requested,
                capacity: MAX_OUTPUTS,
            })?;

        self.rows = rows;
        self.column_registers = column_registers;
        if self.current_row >= rows {
            self.current_row = 0;
        }
        Ok(())
    }

    /// The periodic callback body. Call this from your timer interrupt.
    ///
    /// While the sub-counter is below the brightness ceiling this is a
    /// column tick: the current row's duty slice is compared and shifted
    /// exactly like the linear engine. When the ceiling is reached the
    /// columns are blanked, the row-select register advances (injecting a
    /// fresh active bit on rollover), and the sub-counter resets.
    pub fn tick(&mut self) {
        if self.counter < self.max_brightness {
            self.column_tick();
            self.counter += 1;
        } else {
            self.advance_row();
            self.counter = 0;
        }
    }

    fn column_tick(&mut self) {
        let columns = self.column_registers * 8;
        let base = self.current_row * columns;
        let slice = &self.duties.as_slice()[base..base + columns];

        self.column_latch.set(false);
        shift_compare_frame(
            &mut self.bus,
            slice,
            self.counter,
            self.config.invert_columns,
            false,
            self.config.bit_order,
        );
        self.column_latch.set(true);
    }

    fn advance_row(&mut self) {
        // Blank the columns before switching rows - the outgoing row must
        // not flash the incoming row's pattern.
        let blank = if self.config.invert_columns { 0xFF } else { 0x00 };
        self.column_latch.set(false);
        for _ in 0..self.column_registers {
            self.bus.write_byte(blank);
        }
        self.column_latch.set(true);

        self.row_select.latch.set(false);
        if self.current_row + 1 >= self.rows {
            // Rollover: shift a fresh active bit in, then release the data
            // line so exactly one bit travels the register.
            self.row_select.data.set(!self.config.invert_rows);
            self.row_select.pulse_clock();
            self.row_select.data.set(self.config.invert_rows);
            self.current_row = 0;
        } else {
            self.row_select.pulse_clock();
            self.current_row += 1;
        }
        self.row_select.latch.set(true);
    }

    /// Releases the owned hardware.
    pub fn free(self) -> (B, CL, RowSelect<RD, RC, RL>, T) {
        (self.bus, self.column_latch, self.row_select, self.timer)
    }
}
