//! Typed access to the columns of a [`RecordBatch`].
//!
//! Observatories deliver heterogeneous column types (integer flags, float32 magnitudes,
//! dictionary encoded filters...). These helpers cast once to the type the reducer works
//! with. Nulls read as `NaN`, `false` or an empty string.
use arrow_array::cast::AsArray;
use arrow_array::types::Float64Type;
use arrow_array::{Array, RecordBatch};
use arrow_cast::cast;
use arrow_schema::DataType as ArrowType;

use crate::virtobs_errors::VirtObsError;

/// Accepted names of the time column. Anything but `mjd` holds Julian Dates.
pub const TIME_COLUMNS: [&str; 4] = ["mjd", "jd", "hjd", "bjd"];

pub fn has_column(batch: &RecordBatch, name: &str) -> bool {
    batch.schema().column_with_name(name).is_some()
}

/// First column of `candidates` present in the batch.
pub fn find_column<'a>(batch: &RecordBatch, candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().copied().find(|c| has_column(batch, c))
}

/// The time column of the batch and whether it holds Julian Dates.
pub fn time_column(batch: &RecordBatch) -> Option<(&'static str, bool)> {
    find_column(batch, &TIME_COLUMNS).map(|name| (name, name != "mjd"))
}

pub fn f64_column(batch: &RecordBatch, name: &str) -> Result<Option<Vec<f64>>, VirtObsError> {
    let Some(col) = batch.column_by_name(name) else {
        return Ok(None);
    };
    let col = cast(col, &ArrowType::Float64)?;
    let values = col.as_primitive::<Float64Type>();
    Ok(Some(
        (0..values.len())
            .map(|i| {
                if values.is_null(i) {
                    f64::NAN
                } else {
                    values.value(i)
                }
            })
            .collect(),
    ))
}

/// Non-zero numbers and `true` read as flagged.
pub fn flag_column(batch: &RecordBatch, name: &str) -> Result<Option<Vec<bool>>, VirtObsError> {
    let Some(col) = batch.column_by_name(name) else {
        return Ok(None);
    };
    let col = cast(col, &ArrowType::Boolean)?;
    let values = col.as_boolean();
    Ok(Some(
        (0..values.len())
            .map(|i| !values.is_null(i) && values.value(i))
            .collect(),
    ))
}

pub fn str_column(batch: &RecordBatch, name: &str) -> Result<Option<Vec<String>>, VirtObsError> {
    let Some(col) = batch.column_by_name(name) else {
        return Ok(None);
    };
    let col = cast(col, &ArrowType::Utf8)?;
    let values = col.as_string::<i32>();
    Ok(Some(
        (0..values.len())
            .map(|i| {
                if values.is_null(i) {
                    String::new()
                } else {
                    values.value(i).to_string()
                }
            })
            .collect(),
    ))
}

/// Time column converted to MJD, `None` if the batch has no time column.
pub fn mjd_column(batch: &RecordBatch) -> Result<Option<Vec<f64>>, VirtObsError> {
    let Some((name, is_jd)) = time_column(batch) else {
        return Ok(None);
    };
    let values = f64_column(batch, name)?.unwrap_or_default();
    if is_jd {
        Ok(Some(
            values
                .into_iter()
                .map(|t| t - crate::constants::JDTOMJD)
                .collect(),
        ))
    } else {
        Ok(Some(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{ArrayRef, Float32Array, Int32Array, StringArray};
    use std::sync::Arc;

    #[test]
    fn test_casts() {
        let jd: ArrayRef = Arc::new(Float32Array::from(vec![2457000.5, 2457001.5]));
        let flag: ArrayRef = Arc::new(Int32Array::from(vec![Some(0), Some(4)]));
        let filt: ArrayRef = Arc::new(StringArray::from(vec![Some("g"), None]));
        let batch =
            RecordBatch::try_from_iter(vec![("jd", jd), ("flag", flag), ("filter", filt)])
                .unwrap();

        assert_eq!(time_column(&batch), Some(("jd", true)));
        assert_eq!(mjd_column(&batch).unwrap().unwrap(), vec![57000.0, 57001.0]);
        assert_eq!(flag_column(&batch, "flag").unwrap().unwrap(), vec![false, true]);
        assert_eq!(
            str_column(&batch, "filter").unwrap().unwrap(),
            vec!["g".to_string(), String::new()]
        );
        assert!(f64_column(&batch, "mag").unwrap().is_none());
    }
}
