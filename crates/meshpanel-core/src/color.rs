// ── Color representation and conversions ──
//
// The display only understands sRGB triples. The state store may report
// color as RGB, RGBW(W), hue/saturation or CIE xy.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::MappingError;

/// An 8-bit sRGB color, rendered on the wire as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Self = Self { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// Read the first three channels of a JSON array (`rgb_color`,
    /// `rgbw_color`, `rgbww_color`).
    pub fn from_json_channels(value: &Value) -> Option<Self> {
        let channels = value.as_array()?;
        let mut it = channels.iter().map(|c| c.as_f64().map(channel));
        Some(Self::new(it.next()??, it.next()??, it.next()??))
    }

    /// Hue in degrees, saturation in percent, at full value.
    pub fn from_hs(hue: f64, saturation: f64) -> Self {
        let h = hue.rem_euclid(360.0) / 60.0;
        let s = (saturation / 100.0).clamp(0.0, 1.0);
        let c = s;
        let x = c * (1.0 - (h.rem_euclid(2.0) - 1.0).abs());
        let m = 1.0 - c;

        let (r, g, b) = match h {
            h if h < 1.0 => (c, x, 0.0),
            h if h < 2.0 => (x, c, 0.0),
            h if h < 3.0 => (0.0, c, x),
            h if h < 4.0 => (0.0, x, c),
            h if h < 5.0 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        Self::new(
            channel((r + m) * 255.0),
            channel((g + m) * 255.0),
            channel((b + m) * 255.0),
        )
    }

    /// CIE 1931 xy chromaticity at full brightness (Wide RGB D65).
    pub fn from_xy(x: f64, y: f64) -> Self {
        let y = if y == 0.0 { 1e-11 } else { y };
        let lum = 1.0;
        let big_x = (lum / y) * x;
        let big_z = (lum / y) * (1.0 - x - y);

        let linear = [
            big_x * 1.656_492 - lum * 0.354_851 - big_z * 0.255_038,
            -big_x * 0.707_196 + lum * 1.655_397 + big_z * 0.036_152,
            big_x * 0.051_713 - lum * 0.121_364 + big_z * 1.011_530,
        ];

        let gamma = linear.map(|v| {
            let v = if v <= 0.003_130_8 {
                12.92 * v
            } else {
                1.055 * v.powf(1.0 / 2.4) - 0.055
            };
            v.max(0.0)
        });
        let peak = gamma.iter().copied().fold(0.0_f64, f64::max);
        let scale = if peak > 1.0 { peak } else { 1.0 };
        let [r, g, b] = gamma.map(|v| channel(v / scale * 255.0));
        Self::new(r, g, b)
    }
}

fn channel(value: f64) -> u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
    let c = value.round().clamp(0.0, 255.0) as u8;
    c
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Rgb {
    type Err = MappingError;

    /// Accepts `#rrggbb`, `rrggbb`, `r,g,b` and `[r, g, b]`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let invalid = |reason: &str| MappingError::InvalidColor {
            reason: format!("{raw:?}: {reason}"),
        };

        let hex = raw.strip_prefix('#').unwrap_or(raw);
        if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            let byte = |i: usize| {
                hex.get(i..i + 2)
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| invalid("bad hex digits"))
            };
            return Ok(Self::new(byte(0)?, byte(2)?, byte(4)?));
        }

        let list = raw
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .unwrap_or(raw);
        let parts: Vec<&str> = list.split(',').map(str::trim).collect();
        let [r, g, b] = parts.as_slice() else {
            return Err(invalid("expected #rrggbb or three channels"));
        };
        let parse = |c: &str| {
            c.parse::<u8>()
                .map_err(|_| invalid("channels must be integers in 0..=255"))
        };
        Ok(Self::new(parse(r)?, parse(g)?, parse(b)?))
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
