use serde::{Deserialize, Deserializer};

use crate::error::SideriteError;

/// Returns the factor that converts one unit of `symbol` into base SI units
///
/// # Arguments
/// * `symbol` - The unit symbol, e.g. "GPa" or "kN"
///
/// # Returns
/// The multiplier into base units (m, Pa, N, kg/m**3)
pub fn base_factor(symbol: &str) -> Result<f64, SideriteError> {
    let factor = match symbol {
        // length
        "m" => 1.0,
        "cm" => 1e-2,
        "mm" => 1e-3,
        // pressure
        "Pa" => 1.0,
        "kPa" => 1e3,
        "MPa" => 1e6,
        "GPa" => 1e9,
        // force
        "N" => 1.0,
        "kN" => 1e3,
        "MN" => 1e6,
        // density
        "kg/m**3" | "kg/m^3" => 1.0,
        "t/m**3" | "t/m^3" => 1e3,
        // dimensionless
        "" | "1" => 1.0,
        other => {
            return Err(SideriteError::Input(format!(
                "Unrecognized unit symbol '{other}'"
            )))
        }
    };

    Ok(factor)
}

/// Converts a magnitude expressed in `symbol` into base units
///
/// # Arguments
/// * `magnitude` - The value to convert
/// * `symbol` - The unit symbol the value is expressed in
///
/// # Returns
/// The magnitude in base units
pub fn convert(magnitude: f64, symbol: &str) -> Result<f64, SideriteError> {
    Ok(magnitude * base_factor(symbol)?)
}

/// A scalar quantity from the input file. Plain numbers are taken as base
/// units; strings like "30 GPa" are converted on load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity(pub f64);

impl Quantity {
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl From<f64> for Quantity {
    fn from(value: f64) -> Self {
        Quantity(value)
    }
}

/// Parses a quantity string of the form "<magnitude> <symbol>"
///
/// # Arguments
/// * `text` - The quantity string, e.g. "2400 kg/m**3"
///
/// # Returns
/// The magnitude in base units
pub fn parse_quantity(text: &str) -> Result<f64, SideriteError> {
    let mut parts = text.split_whitespace();

    let magnitude: f64 = match parts.next() {
        Some(raw) => raw.parse().map_err(|_| {
            SideriteError::Input(format!("Non-float magnitude in quantity '{text}'"))
        })?,
        None => {
            return Err(SideriteError::Input("Empty quantity string".to_owned()));
        }
    };

    let symbol = parts.next().unwrap_or("");

    if parts.next().is_some() {
        return Err(SideriteError::Input(format!(
            "Malformed quantity '{text}'; expected '<magnitude> <symbol>'"
        )));
    }

    convert(magnitude, symbol)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Magnitude(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawQuantity::deserialize(deserializer)?;
        let value = match raw {
            RawQuantity::Magnitude(m) => m,
            RawQuantity::Text(text) => {
                parse_quantity(&text).map_err(serde::de::Error::custom)?
            }
        };
        Ok(Quantity(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn converts_common_symbols() {
        assert_relative_eq!(convert(30.0, "GPa").unwrap(), 30.0e9);
        assert_relative_eq!(convert(1.0, "kN").unwrap(), 1_000.0);
        assert_relative_eq!(convert(50.0, "mm").unwrap(), 0.05);
        assert_relative_eq!(convert(2400.0, "kg/m**3").unwrap(), 2400.0);
    }

    #[test]
    fn rejects_unknown_symbol() {
        assert!(convert(1.0, "furlong").is_err());
    }

    #[test]
    fn parses_quantity_strings() {
        assert_relative_eq!(parse_quantity("210 GPa").unwrap(), 210.0e9);
        assert_relative_eq!(parse_quantity("0.2").unwrap(), 0.2);
        assert!(parse_quantity("fast GPa").is_err());
        assert!(parse_quantity("1 2 3").is_err());
    }

    #[test]
    fn deserializes_numbers_and_strings() {
        let q: Quantity = serde_json::from_str("2.5").unwrap();
        assert_relative_eq!(q.value(), 2.5);

        let q: Quantity = serde_json::from_str("\"20 cm\"").unwrap();
        assert_relative_eq!(q.value(), 0.2);
    }
}
