//! Write-side validation.
//!
//! Records are checked here before a mutation is allowed to open a remote
//! transaction. Reads never go through these checks: anything that parses is
//! kept, so documents written by older clients stay visible.

use crate::{
    error::Result, DoseKey, Elimination, Error, Feed, FeedSource, Measurement, Medication,
    Record, MAX_ELIMINATION_COUNT,
};

/// Validate any record.
pub fn validate_record(record: &Record) -> Result<()> {
    record.validate()
}

pub fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::MissingId);
    }
    Ok(())
}

pub fn validate_feed(feed: &Feed) -> Result<()> {
    validate_id(&feed.id)?;
    if let FeedSource::Bottle { amount_ml } = feed.source {
        non_negative("amountMl", amount_ml)?;
    }
    Ok(())
}

pub fn validate_elimination(elim: &Elimination) -> Result<()> {
    validate_id(&elim.id)?;
    for (field, count) in [
        ("peeCount", elim.pee_count),
        ("poopCount", elim.poop_count),
        ("vomitCount", elim.vomit_count),
    ] {
        if count > MAX_ELIMINATION_COUNT {
            return Err(Error::InvalidField {
                field: field.to_string(),
                reason: format!("must be between 0 and {MAX_ELIMINATION_COUNT}"),
            });
        }
    }
    Ok(())
}

pub fn validate_medication(med: &Medication) -> Result<()> {
    validate_id(&med.id)?;
    if med.dose_key == DoseKey::Other && med.name.trim().is_empty() {
        return Err(Error::MissingMedicationName(med.id.clone()));
    }
    Ok(())
}

pub fn validate_measurement(measurement: &Measurement) -> Result<()> {
    validate_id(&measurement.id)?;
    if !measurement.has_values() {
        return Err(Error::EmptyMeasurement(measurement.id.clone()));
    }

    let fields = [
        ("temperatureC", measurement.temperature_c),
        ("weightKg", measurement.weight_kg),
        ("heightCm", measurement.height_cm),
    ];
    for (field, value) in fields {
        if let Some(value) = value {
            non_negative(field, value)?;
        }
    }
    Ok(())
}

fn non_negative(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::InvalidField {
            field: field.to_string(),
            reason: "must be a finite number".to_string(),
        });
    }
    if value < 0.0 {
        return Err(Error::InvalidField {
            field: field.to_string(),
            reason: "must not be negative".to_string(),
        });
    }
    Ok(())
}
