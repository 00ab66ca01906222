//! Sky coordinate conversions between decimal degrees and sexagesimal strings.
use crate::constants::Degree;
use crate::virtobs_errors::VirtObsError;

/// Split a sexagesimal string (`HH:MM:SS.S` or `HH MM SS.S`) into its three components.
fn split_sexagesimal(value: &str) -> Option<(bool, f64, f64, f64)> {
    let parts: Vec<&str> = value
        .split(|c: char| c == ':' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 3 {
        return None;
    }

    let negative = parts[0].starts_with('-');
    let first: f64 = parts[0].trim_start_matches(&['-', '+'][..]).parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    Some((negative, first, minutes, seconds))
}

/// Parse a right ascension string to degrees
///
/// Arguments
/// ---------
/// * `ra`: either decimal degrees (`"271.3"`) or a sexagesimal string in **hours**
///   (`"18:23:21.1"` or `"18 23 21.1"`)
///
/// Returns
/// -------
/// * The right ascension in degrees, or a [`VirtObsError::InvalidInputValue`] if the string
///   cannot be parsed or falls outside `[0, 360)`.
pub fn ra2deg(ra: &str) -> Result<Degree, VirtObsError> {
    let ra = ra.trim();
    let deg = match ra.parse::<f64>() {
        Ok(v) => v,
        Err(_) => {
            let (_, h, m, s) = split_sexagesimal(ra).ok_or_else(|| {
                VirtObsError::InvalidInputValue(format!("Cannot parse RA value '{ra}'"))
            })?;
            (h + m / 60.0 + s / 3600.0) * 15.0
        }
    };

    if !(0.0..360.0).contains(&deg) {
        return Err(VirtObsError::InvalidInputValue(format!(
            "Value of RA ({deg}) is outside range (0 -> 360)."
        )));
    }
    Ok(deg)
}

/// Parse a declination string to degrees
///
/// Arguments
/// ---------
/// * `dec`: either decimal degrees (`"-22.56"`) or a sexagesimal string in degrees
///   (`"+12:34:56.7"` or `"-00 30 14.2"`)
///
/// Returns
/// -------
/// * The declination in degrees, or a [`VirtObsError::InvalidInputValue`] if the string
///   cannot be parsed or falls outside `[-90, 90]`.
pub fn dec2deg(dec: &str) -> Result<Degree, VirtObsError> {
    let dec = dec.trim();
    let deg = match dec.parse::<f64>() {
        Ok(v) => v,
        Err(_) => {
            let (negative, d, m, s) = split_sexagesimal(dec).ok_or_else(|| {
                VirtObsError::InvalidInputValue(format!("Cannot parse Dec value '{dec}'"))
            })?;
            let sign = if negative { -1.0 } else { 1.0 };
            sign * (d + m / 60.0 + s / 3600.0)
        }
    };

    if !(-90.0..=90.0).contains(&deg) {
        return Err(VirtObsError::InvalidInputValue(format!(
            "Value of dec ({deg}) is outside range (-90 -> +90)."
        )));
    }
    Ok(deg)
}

/// Format a right ascension in degrees as `HH:MM:SS.SS`.
pub fn ra2sex(ra: Degree) -> Result<String, VirtObsError> {
    if !(0.0..=360.0).contains(&ra) {
        return Err(VirtObsError::InvalidInputValue("RA out of range.".into()));
    }
    let hours = ra / 15.0;
    let h = hours.trunc();
    let minutes = (hours - h) * 60.0;
    let m = minutes.trunc();
    let s = (minutes - m) * 60.0;
    Ok(format!("{:02}:{:02}:{:05.2}", h as u32, m as u32, s))
}

/// Format a declination in degrees as `±DD:MM:SS.S`.
pub fn dec2sex(dec: Degree) -> Result<String, VirtObsError> {
    if !(-90.0..=90.0).contains(&dec) {
        return Err(VirtObsError::InvalidInputValue("Dec out of range.".into()));
    }
    let sign = if dec < 0.0 { '-' } else { '+' };
    let abs = dec.abs();
    let d = abs.trunc();
    let minutes = (abs - d) * 60.0;
    let m = minutes.trunc();
    let s = (minutes - m) * 60.0;
    Ok(format!("{sign}{:02}:{:02}:{:04.1}", d as u32, m as u32, s))
}

/// Positional components used to group datasets into files on disk.
///
/// The right ascension is split into its integer degree, and optionally the integer arc
/// minutes and arc seconds within that degree.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RaComponents {
    pub ra_deg: Option<u32>,
    pub ra_minute: Option<u32>,
    pub ra_second: Option<u32>,
}

/// Compute the [`RaComponents`] of a right ascension.
///
/// Arguments
/// -----------------
/// * `ra`: Right ascension in degrees, `None` when the source position is unknown.
/// * `with_minutes`: Also keep the arc minutes.
/// * `with_seconds`: Also keep the arc seconds (implies minutes are computed).
///
/// Return
/// ----------
/// * The floored components; all `None` when `ra` is `None`.
pub fn ra_components(ra: Option<Degree>, with_minutes: bool, with_seconds: bool) -> RaComponents {
    let Some(ra) = ra else {
        return RaComponents::default();
    };

    let deg = ra.floor();
    let minute = ((ra - deg) * 60.0).floor();
    let second = ((ra - deg - minute / 60.0) * 3600.0).floor();

    RaComponents {
        ra_deg: Some(deg as u32),
        ra_minute: with_minutes.then_some(minute as u32),
        ra_second: with_seconds.then_some(second as u32),
    }
}

#[cfg(test)]
mod conversion_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ra2deg() {
        assert_relative_eq!(ra2deg("22 52 23.37").unwrap(), 343.097375, epsilon = 1e-9);
        assert_relative_eq!(ra2deg("04:41:04.77").unwrap(), 70.269875, epsilon = 1e-9);
        assert_eq!(ra2deg("271.3").unwrap(), 271.3);
        assert!(ra2deg("400").is_err());
        assert!(ra2deg("1 2").is_err());
    }

    #[test]
    fn test_dec2deg() {
        assert_relative_eq!(
            dec2deg("-00 30 14.2").unwrap(),
            -0.5039444444444444,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            dec2deg("+13:55:42.7").unwrap(),
            13.928527777777777,
            epsilon = 1e-9
        );
        assert!(dec2deg("-91").is_err());
    }

    #[test]
    fn test_sexagesimal_formatting() {
        assert_eq!(ra2sex(343.097375).unwrap(), "22:52:23.37");
        assert_eq!(dec2sex(-14.784833333333333).unwrap(), "-14:47:05.4");
        assert!(ra2sex(-1.0).is_err());
    }

    #[test]
    fn test_ra_components() {
        let c = ra_components(Some(123.51), true, true);
        assert_eq!(c.ra_deg, Some(123));
        assert_eq!(c.ra_minute, Some(30));
        assert_eq!(c.ra_second, Some(36));

        let c = ra_components(Some(123.51), false, false);
        assert_eq!(c.ra_minute, None);
        assert_eq!(ra_components(None, true, true), RaComponents::default());
    }
}
