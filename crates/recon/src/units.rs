//! Unit conversion lookup table.
//!
//! One entry per `(from, to)` pair. Every registered conversion also
//! registers its inverse. There is no transitive search: a pair is either in
//! the table or it is an `UnknownUnit`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ReconError;

/// `canonical = value * scale + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

impl Conversion {
    pub const IDENTITY: Conversion = Conversion { scale: 1.0, offset: 0.0 };

    pub fn linear(scale: f64) -> Self {
        Self { scale, offset: 0.0 }
    }

    pub fn affine(scale: f64, offset: f64) -> Self {
        Self { scale, offset }
    }

    pub fn apply(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    pub fn inverse(&self) -> Self {
        Self {
            scale: 1.0 / self.scale,
            offset: -self.offset / self.scale,
        }
    }
}

/// Canonical spelling of a unit string.
pub fn normalize_unit(unit: &str) -> String {
    let mut u = unit.trim().replace('³', "3").replace(' ', "");
    for (long, short) in [("/day", "/d"), ("/Day", "/d"), ("°C", "degC"), ("°F", "degF")] {
        u = u.replace(long, short);
    }
    u
}

/// Built-in conversions (oilfield SI ↔ imperial).
const BUILTIN: &[(&str, &str, f64, f64)] = &[
    ("m3/d", "bbl/d", 6.289_811, 0.0),
    ("m3", "bbl", 6.289_811, 0.0),
    ("m3/m3", "scf/bbl", 5.614_583, 0.0),
    ("m3/m3", "bbl/bbl", 1.0, 0.0),
    ("e3m3/d", "mscf/d", 35.314_67, 0.0),
    ("e3m3", "mmscf", 0.035_314_67, 0.0),
    ("m", "ft", 3.280_84, 0.0),
    ("mm", "in", 1.0 / 25.4, 0.0),
    ("km", "mi", 0.621_371, 0.0),
    ("kPa", "psi", 0.145_037_7, 0.0),
    ("MPa", "psi", 145.037_7, 0.0),
    ("degC", "degF", 1.8, 32.0),
    ("K", "degF", 1.8, -459.67),
    ("fraction", "percent", 100.0, 0.0),
];

#[derive(Debug, Clone)]
pub struct ConversionTable {
    entries: BTreeMap<(String, String), Conversion>,
}

impl Default for ConversionTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ConversionTable {
    pub fn empty() -> Self {
        Self { entries: BTreeMap::new() }
    }

    pub fn builtin() -> Self {
        let mut table = Self::empty();
        for &(from, to, scale, offset) in BUILTIN {
            table.register(from, to, Conversion::affine(scale, offset));
        }
        table
    }

    /// Register `from → to` and its inverse. Later registrations win.
    pub fn register(&mut self, from: &str, to: &str, conversion: Conversion) {
        let (from, to) = (normalize_unit(from), normalize_unit(to));
        self.entries
            .insert((to.clone(), from.clone()), conversion.inverse());
        self.entries.insert((from, to), conversion);
    }

    pub fn lookup(&self, from: &str, to: &str) -> Result<Conversion, ReconError> {
        let (from, to) = (normalize_unit(from), normalize_unit(to));
        if from == to {
            return Ok(Conversion::IDENTITY);
        }
        self.entries
            .get(&(from.clone(), to.clone()))
            .copied()
            .ok_or(ReconError::UnknownUnit { from, to })
    }

    pub fn convert(&self, value: f64, from: &str, to: &str) -> Result<f64, ReconError> {
        Ok(self.lookup(from, to)?.apply(value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6 * b.abs().max(1.0)
    }

    #[test]
    fn builtin_volume_rate() {
        let t = ConversionTable::builtin();
        let bbl = t.convert(15.9, "m3/day", "bbl/day").unwrap();
        assert!(approx(bbl, 100.008_0), "got {bbl}");
    }

    #[test]
    fn inverse_is_registered() {
        let t = ConversionTable::builtin();
        let m3 = t.convert(6.289_811, "bbl/d", "m3/d").unwrap();
        assert!(approx(m3, 1.0));
    }

    #[test]
    fn affine_temperature_round_trip() {
        let t = ConversionTable::builtin();
        assert!(approx(t.convert(100.0, "degC", "degF").unwrap(), 212.0));
        assert!(approx(t.convert(212.0, "°F", "°C").unwrap(), 100.0));
    }

    #[test]
    fn identity_without_entry() {
        let t = ConversionTable::empty();
        assert_eq!(t.convert(42.0, "psi", " psi ").unwrap(), 42.0);
    }

    #[test]
    fn unknown_pair_is_an_error() {
        let t = ConversionTable::builtin();
        let err = t.lookup("m3/d", "psi").unwrap_err();
        assert!(matches!(err, ReconError::UnknownUnit { .. }));
    }

    #[test]
    fn no_transitive_lookup() {
        // kPa→psi and MPa→psi exist, kPa→MPa does not.
        let t = ConversionTable::builtin();
        assert!(t.lookup("kPa", "MPa").is_err());
    }

    #[test]
    fn user_entry_overrides_builtin() {
        let mut t = ConversionTable::builtin();
        t.register("m3/d", "bbl/d", Conversion::linear(6.29));
        assert!(approx(t.convert(1.0, "m3/d", "bbl/d").unwrap(), 6.29));
    }
}
