//! Two-line display layout
//!
//! Converts sensor readings into the fixed 2×16 character grid of the LCD.
//! Every rendered line is exactly [`LINE_WIDTH`] characters; the hardware
//! relies on this to overwrite the previous frame completely.

use crate::device::{DefaultDevice, LcdDevice};
use crate::SensorReading;
use std::fmt;

/// Characters per display line
pub const LINE_WIDTH: usize = DefaultDevice::COLUMNS;

/// One rendered display line: exactly [`LINE_WIDTH`] printable ASCII characters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayLine(String);

impl DisplayLine {
    /// Render `text` into a line, right-padding with spaces or truncating
    ///
    /// Characters outside printable ASCII are replaced with `?`, since the
    /// controller consumes raw ASCII bytes.
    pub fn new(text: &str) -> Self {
        let mut line: String = text
            .chars()
            .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { '?' })
            .take(LINE_WIDTH)
            .collect();

        while line.len() < LINE_WIDTH {
            line.push(' ');
        }

        Self(line)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Format the CPU and GPU readings into the two display lines
///
/// Line layout: `<label> <current>C <max>C`, one decimal place each.
/// Absent or non-finite values are shown as `0.0`.
pub fn format_readings(
    cpu: Option<&SensorReading>,
    gpu: Option<&SensorReading>,
) -> [DisplayLine; 2] {
    [format_line("CPU", cpu), format_line("GPU", gpu)]
}

fn format_line(label: &str, reading: Option<&SensorReading>) -> DisplayLine {
    let (current, max) = reading.map_or((0.0, 0.0), |r| (r.current, r.max));
    DisplayLine::new(&format!(
        "{} {:.1}C {:.1}C",
        label,
        finite_or_zero(current),
        finite_or_zero(max)
    ))
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
