#![cfg_attr(not(feature = "std"), no_std)]
#![doc = include_str!("../README.md")]

//! # Core Concepts
//!
//! - **`PwmEngine`**: drives a linear chain of output registers from a periodic callback
//! - **`MatrixEngine`**: the row/column-multiplexed variant for LED matrices
//! - **`DutyStore`**: per-output duty thresholds with grouped, RGB and HSV writes
//! - **`LoadModel` / `LoadEstimate`**: the feasibility gate every configuration change passes
//! - **`TimerSetting`**: prescaler/compare selection for the callback rate
//! - **`OutputLine` / `ShiftBus` / `PwmTimer`**: traits to implement for your hardware
//! - **`LoadReport` / `measure_load`**: estimated and measured callback load
//!
//! The engine object is ordinary owned data: place it where your timer
//! interrupt can reach it and call `tick()` from the handler. One engine
//! instance per callback slot.

pub mod duty;
pub mod engine;
pub mod line;
pub mod load;
pub mod matrix;
pub mod report;
pub mod time;
pub mod timer;

pub use duty::{DutyError, DutyStore};
pub use engine::{ConfigError, EngineConfig, PwmEngine, PHASE_OFFSET};
pub use line::{BitBangBus, BitOrder, OutputLine, ShiftBus};
pub use load::{LoadEstimate, LoadModel, MAX_LOAD};
pub use matrix::{MatrixConfig, MatrixEngine, RowSelect};
pub use report::{measure_load, LoadReport, MeasuredLoad};
pub use time::{TimeDuration, TimeInstant, TimeSource};
pub use timer::{PwmTimer, TimerSetting, TimerWidth};

#[cfg(test)]
mod tests {
    use super::*;

    // Basic compilation tests - component behavior is tested per module.
    #[test]
    fn types_compile() {
        let _ = BitOrder::LsbFirst;
        let _ = TimerWidth::Bits16;
        let _ = LoadModel::SERIAL;
        let _ = EngineConfig::default();
        let _ = MatrixConfig::default();
    }
}
