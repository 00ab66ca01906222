//! # Constants and type definitions for virtobs
//!
//! This module centralizes the **photometric constants**, **unit conversion factors**, and
//! **common type aliases** used throughout the crate.
//!
//! ## Overview
//!
//! - Photometric zero point and magnitude/flux conversion factors
//! - Time conversions (JD ↔ MJD, days ↔ seconds)
//! - Byte multipliers used by the histogram memory estimates
//! - Type aliases shared by the datasets, the reducer and the fetcher

use serde_json::{Map, Value};

// -------------------------------------------------------------------------------------------------
// Photometry and time
// -------------------------------------------------------------------------------------------------

/// Photometric zero point: `flux = 10^(-0.4 * (mag - PHOT_ZP))` gives fluxes in microJansky.
pub const PHOT_ZP: f64 = 23.9;

/// 2.5 / ln(10), converts a magnitude error into a relative flux error (and back).
pub const MAG_TO_FLUX_ERR: f64 = 1.085_736_204_758_129_6;

/// Number of seconds in a day
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Conversion factor between Julian Date and Modified Julian Date
pub const JDTOMJD: f64 = 2400000.5;

/// Scale factor turning a median absolute deviation into a Gaussian sigma
pub const MAD_TO_SIGMA: f64 = 1.482_602_218_505_602;

// -------------------------------------------------------------------------------------------------
// Environment and storage
// -------------------------------------------------------------------------------------------------

/// Environment variable overriding the root folder of all data files.
pub const DATA_ROOT_ENV: &str = "VIRTOBS_DATA";

/// Folder used when a dataset has neither a folder nor an observatory name.
pub const DEFAULT_DATA_FOLDER: &str = "DATA";

/// Extension of the on-disk containers written by [`crate::tables::TableStore`].
pub const CONTAINER_EXTENSION: &str = "tables";

/// Appended to the raw container stem to name the lightcurve container.
pub const LIGHTCURVE_SUFFIX: &str = "_lcs";

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Modified Julian Date (days)
pub type MJD = f64;
/// Angle in degrees
pub type Degree = f64;
/// Astronomical magnitude
pub type Magnitude = f64;

/// Free-form side-channel metadata attached to a dataset (and to its file key).
pub type AltData = Map<String, Value>;

/// Return the number of bytes in one `units` (`"kb"`, `"mb"`, `"gb"`, plural accepted).
///
/// Anything else, including `"bytes"`, returns 1 (no conversion).
///
/// Arguments
/// -----------------
/// * `units`: Unit name, case insensitive.
///
/// Return
/// ----------
/// * The byte multiplier for that unit.
pub fn unit_convert_bytes(units: &str) -> f64 {
    let lower = units.to_lowercase();
    let units = lower.strip_suffix('s').unwrap_or(&lower);
    match units {
        "kb" => 1024.0,
        "mb" => 1024.0_f64.powi(2),
        "gb" => 1024.0_f64.powi(3),
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_convert_bytes() {
        assert_eq!(unit_convert_bytes("kb"), 1024.0);
        assert_eq!(unit_convert_bytes("MB"), 1_048_576.0);
        assert_eq!(unit_convert_bytes("gbs"), 1_073_741_824.0);
        assert_eq!(unit_convert_bytes("bytes"), 1.0);
        assert_eq!(unit_convert_bytes("furlongs"), 1.0);
    }
}
