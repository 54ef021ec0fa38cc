//! Hardware abstraction for control lines and the serial output path.
//!
//! The engine core never touches pins or peripheral registers directly. It
//! drives everything through two seams: [`OutputLine`] for single digital
//! control lines (latch, row clock, row data) and [`ShiftBus`] for the
//! byte-serial path into the register chain. Implement these for your
//! platform; keep the implementations `#[inline]` and the compiler will fold
//! them down to direct port writes.

use crate::load::LoadModel;

/// Trait for abstracting a single digital output line.
///
/// Implement this for your GPIO type. The engine calls it from the periodic
/// callback, so the implementation must be cheap and must not block. Handle
/// any hardware errors internally - this method cannot fail.
pub trait OutputLine {
    /// Drives the line high (`true`) or low (`false`).
    fn set(&mut self, high: bool);
}

/// Bit order used when assembling a register's 8 compare results into the
/// byte handed to the [`ShiftBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitOrder {
    /// Bit 0 of the byte is the register's lowest-numbered output.
    #[default]
    LsbFirst,

    /// Bit 7 of the byte is the register's lowest-numbered output.
    MsbFirst,
}

/// Trait for the serial path that shifts bytes into the register chain.
///
/// Two strategies exist: wrap your synchronous serial peripheral (SPI or
/// similar) in an implementation of this trait, or use [`BitBangBus`] to
/// toggle a data and a clock line manually. The choice is made once at
/// construction; the engine only sees the trait.
///
/// `write_byte` must not return until the byte has been fully shifted out.
/// For a peripheral implementation this means polling the transfer-complete
/// flag before returning - a bounded wait of one fixed byte time.
pub trait ShiftBus {
    /// Shifts one byte into the register chain, blocking until done.
    fn write_byte(&mut self, byte: u8);

    /// Cycle-cost model of this path, consumed by the feasibility gate.
    ///
    /// Return [`LoadModel::SERIAL`] for a peripheral-backed implementation or
    /// re-measured coefficients for your target. [`BitBangBus`] reports
    /// [`LoadModel::BIT_BANG`].
    fn load_model(&self) -> LoadModel;
}

/// Manual data/clock strategy for targets without a free serial peripheral.
///
/// Shifts each byte out MSB-first: data is set up while the clock is low and
/// registered on the rising clock edge, matching the 74HC595 family. Costs
/// roughly 2.5x the per-register time of a peripheral-backed bus, which the
/// reported [`LoadModel::BIT_BANG`] accounts for.
pub struct BitBangBus<D: OutputLine, C: OutputLine> {
    data: D,
    clock: C,
}

impl<D: OutputLine, C: OutputLine> BitBangBus<D, C> {
    /// Creates a bit-bang bus over a data and a clock line.
    ///
    /// Both lines are driven low so the first rising clock edge is clean.
    pub fn new(mut data: D, mut clock: C) -> Self {
        data.set(false);
        clock.set(false);

        Self { data, clock }
    }

    /// Releases the underlying lines.
    pub fn free(self) -> (D, C) {
        (self.data, self.clock)
    }
}

impl<D: OutputLine, C: OutputLine> ShiftBus for BitBangBus<D, C> {
    fn write_byte(&mut self, byte: u8) {
        for bit in (0..8).rev() {
            self.clock.set(false);
            self.data.set(byte & (1 << bit) != 0);
            self.clock.set(true);
        }
        self.clock.set(false);
    }

    fn load_model(&self) -> LoadModel {
        LoadModel::BIT_BANG
    }
}
