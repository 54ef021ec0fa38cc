//! The duty store: per-output PWM thresholds and the convenience write API.
//!
//! One unsigned byte per output, compared against the running brightness
//! counter every tick. The store is written by the foreground and read by the
//! periodic callback; individual writes need no locking (the callback only
//! reads, a mid-frame write is at worst one frame of jitter). Resizing is the
//! single structural mutation and is only reachable through the engine, which
//! suspends the callback around it.

use heapless::Vec;
use palette::{FromColor, Hsv, Srgb};

/// Errors reported by duty writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DutyError {
    /// A write addressed an output at or beyond the current output count.
    /// The write was dropped; no value changed.
    IndexOutOfRange {
        /// Highest output index the write would have touched.
        index: usize,
        /// Current number of outputs, numbered `0..count`.
        count: usize,
    },
}

impl core::fmt::Display for DutyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DutyError::IndexOutOfRange { index, count } => {
                write!(
                    f,
                    "output index {} out of range: {} outputs, numbered 0-{}",
                    index,
                    count,
                    count.saturating_sub(1)
                )
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DutyError {}

/// Duty thresholds for every output in the register chain.
///
/// `MAX_OUTPUTS` is the compile-time capacity; the active length follows the
/// committed register configuration and changes only through the engine.
///
/// Output index `i` addresses bit `i % 8` of register `i / 8`, register 0
/// being the one electrically closest to the driver (the last byte shifted
/// each frame).
pub struct DutyStore<const MAX_OUTPUTS: usize> {
    values: Vec<u8, MAX_OUTPUTS>,
    grouping: usize,
    max_brightness: u8,
}

impl<const MAX_OUTPUTS: usize> DutyStore<MAX_OUTPUTS> {
    pub(crate) fn new() -> Self {
        Self {
            values: Vec::new(),
            grouping: 1,
            max_brightness: 255,
        }
    }

    /// Current number of outputs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no outputs are configured yet.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Reads one duty threshold, `None` when out of range.
    pub fn get(&self, index: usize) -> Option<u8> {
        self.values.get(index).copied()
    }

    /// All current thresholds in output-index order.
    pub fn as_slice(&self) -> &[u8] {
        &self.values
    }

    /// Grows or shrinks to `count` outputs. Overlapping indices keep their
    /// values; new slots read 0. Fails when `count` exceeds the capacity.
    pub(crate) fn resize(&mut self, count: usize) -> Result<(), ()> {
        self.values.resize(count, 0).map_err(|_| ())
    }

    pub(crate) fn set_max_brightness(&mut self, max_brightness: u8) {
        self.max_brightness = max_brightness;
    }

    /// Sets the interleave factor for grouped and color writes.
    ///
    /// A grouping of 1 means channels alternate per output (RGBRGB...); a
    /// grouping of 3 means three consecutive outputs share a channel
    /// (RRRGGGBBB...). Zero is treated as 1.
    pub fn set_grouping(&mut self, grouping: usize) {
        self.grouping = grouping.max(1);
    }

    /// Current interleave factor.
    pub fn grouping(&self) -> usize {
        self.grouping
    }

    fn check(&self, index: usize) -> Result<(), DutyError> {
        if index < self.values.len() {
            Ok(())
        } else {
            Err(DutyError::IndexOutOfRange {
                index,
                count: self.values.len(),
            })
        }
    }

    /// Sets the duty threshold of a single output.
    pub fn set(&mut self, index: usize, value: u8) -> Result<(), DutyError> {
        self.check(index)?;
        self.values[index] = value;
        Ok(())
    }

    /// Sets every output to the same duty threshold.
    pub fn set_all(&mut self, value: u8) {
        self.values.fill(value);
    }

    /// Writes one value per channel into an interleaved group of outputs.
    ///
    /// With grouping factor `g`, group index `k` and `n = values.len()`, the
    /// write lands on indices `k + skip + offset + j*g` for `j in 0..n`,
    /// where `skip = (n - 1) * g * (k / g)` (integer division). With `g = 1`
    /// and a single value this is exactly [`Self::set`].
    ///
    /// The whole write is dropped if its highest index is out of range.
    pub fn set_group(&mut self, group: usize, values: &[u8], offset: usize) -> Result<(), DutyError> {
        let Some(last) = values.len().checked_sub(1) else {
            return Ok(());
        };

        let g = self.grouping;
        let skip = last * g * (group / g);
        let base = group + skip + offset;
        self.check(base + last * g)?;

        for (j, &value) in values.iter().enumerate() {
            self.values[base + j * g] = value;
        }
        Ok(())
    }

    /// Sets the red, green and blue channels of one LED.
    ///
    /// Channel values are linearly scaled from 0-255 into the configured
    /// brightness range: `(value * max_brightness) >> 8`.
    pub fn set_rgb(&mut self, led: usize, r: u8, g: u8, b: u8, offset: usize) -> Result<(), DutyError> {
        self.set_group(led, &[self.scale(r), self.scale(g), self.scale(b)], offset)
    }

    /// Sets every LED in the chain to the same RGB color.
    ///
    /// Trailing outputs that do not complete a full RGB triple are left
    /// untouched.
    pub fn set_all_rgb(&mut self, r: u8, g: u8, b: u8) {
        let g_factor = self.grouping;
        let (r, g_val, b) = (self.scale(r), self.scale(g), self.scale(b));

        let mut k = 0;
        while k + 3 * g_factor <= self.values.len() {
            for l in 0..g_factor {
                self.values[k + l] = r;
                self.values[k + l + g_factor] = g_val;
                self.values[k + l + 2 * g_factor] = b;
            }
            k += 3 * g_factor;
        }
    }

    /// Sets one LED from hue (degrees), saturation and value, all via a
    /// linear HSV to RGB conversion feeding [`Self::set_rgb`].
    pub fn set_hsv(
        &mut self,
        led: usize,
        hue: f32,
        saturation: f32,
        value: f32,
        offset: usize,
    ) -> Result<(), DutyError> {
        let (r, g, b) = hsv_to_rgb(hue, saturation, value);
        self.set_rgb(led, r, g, b, offset)
    }

    /// Sets every LED to the same HSV color.
    pub fn set_all_hsv(&mut self, hue: f32, saturation: f32, value: f32) {
        let (r, g, b) = hsv_to_rgb(hue, saturation, value);
        self.set_all_rgb(r, g, b);
    }

    fn scale(&self, value: u8) -> u8 {
        ((u16::from(value) * u16::from(self.max_brightness)) >> 8) as u8
    }
}

/// Converts HSV (hue in degrees) to 8-bit RGB.
fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> (u8, u8, u8) {
    let rgb: Srgb<u8> = Srgb::from_color(Hsv::new(hue, saturation, value)).into_format();
    (rgb.red, rgb.green, rgb.blue)
}
