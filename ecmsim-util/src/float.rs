//! General float formatting

// Imports
use std::fmt;

/// Formats a float with a number of significant digits, switching between
/// fixed and scientific notation the way `printf`'s `%g` does.
///
/// Trailing zeros (and a trailing decimal point) are removed.
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct GeneralFloat {
	/// Value
	value: f64,

	/// Significant digits, at least 1
	precision: usize,
}

impl GeneralFloat {
	/// Creates a new general float with `precision` significant digits
	#[must_use]
	pub fn new(value: f64, precision: usize) -> Self {
		Self {
			value,
			precision: precision.max(1),
		}
	}

	/// Creates a general float with 2 significant digits, as used in ECM summaries
	#[must_use]
	pub fn short(value: f64) -> Self {
		Self::new(value, 2)
	}
}

impl fmt::Display for GeneralFloat {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if !self.value.is_finite() {
			return write!(f, "{}", self.value);
		}
		if self.value == 0.0 {
			return f.write_str("0");
		}

		// Note: We round through the scientific representation first, since the
		//       rounding might bump the exponent (e.g. `9.96` -> `1.0e1`).
		let scientific = format!("{:.*e}", self.precision - 1, self.value);
		let (mantissa, exp) = scientific.split_once('e').ok_or(fmt::Error)?;
		let exp = exp.parse::<i32>().map_err(|_| fmt::Error)?;

		match exp < -4 || exp >= self.precision as i32 {
			true => {
				let sign = if exp < 0 { '-' } else { '+' };
				write!(f, "{}e{sign}{:02}", trim_fraction(mantissa), exp.abs())
			},
			false => {
				let decimals = (self.precision as i32 - 1 - exp).max(0) as usize;
				let fixed = format!("{:.*}", decimals, self.value);
				f.write_str(trim_fraction(&fixed))
			},
		}
	}
}

/// Removes trailing zeros from the fractional part of `s`, along with the point.
fn trim_fraction(s: &str) -> &str {
	match s.contains('.') {
		true => s.trim_end_matches('0').trim_end_matches('.'),
		false => s,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn short(value: f64) -> String {
		GeneralFloat::short(value).to_string()
	}

	#[test]
	fn fixed_notation() {
		assert_eq!(short(2.0), "2");
		assert_eq!(short(12.3), "12");
		assert_eq!(short(0.5), "0.5");
		assert_eq!(short(1.24), "1.2");
		assert_eq!(short(-3.0), "-3");
		assert_eq!(short(0.0), "0");
	}

	#[test]
	fn rounding_bumps_exponent() {
		assert_eq!(short(9.96), "10");
		assert_eq!(short(99.6), "1e+02");
	}

	#[test]
	fn scientific_notation() {
		assert_eq!(short(123.0), "1.2e+02");
		assert_eq!(short(0.00001234), "1.2e-05");
		assert_eq!(GeneralFloat::new(1234.5, 6).to_string(), "1234.5");
	}

	#[test]
	fn non_finite() {
		assert_eq!(short(f64::INFINITY), "inf");
	}
}
