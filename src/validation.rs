//! Field level validation of incoming observation payloads.
//!
//! All functions are pure. Payloads are accepted as raw JSON so the type of every value
//! can be checked before it is converted into an [`Observation`].
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::record::{Observation, ObservationField, ID_KEY};

#[derive(Error, Debug, Clone, PartialEq)]
#[error("'{value}' does not match the {expected} format")]
/// A date or time string that does not follow its strict format.
pub struct FormatError {
    pub value: String,
    pub expected: &'static str,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid date or time format")]
    Format(#[from] FormatError),

    #[error("Invalid data format")]
    InvalidField(ObservationField),

    #[error("Invalid data format")]
    InvalidId,
}

fn timezone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^UTC[+-]\d{2}:\d{2}$").expect("static regex"))
}

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static regex"))
}

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{2}:\d{2}:\d{2}$").expect("static regex"))
}

/// Returns `true` if `offset` looks like `UTC+HH:MM` or `UTC-HH:MM`.
pub fn validate_timezone_offset(offset: &str) -> bool {
    timezone_pattern().is_match(offset)
}

/// Returns `true` if `coordinates` is a `lat,lon` pair inside the valid ranges.
pub fn validate_coordinates(coordinates: &str) -> bool {
    let parts: Vec<&str> = coordinates.split(',').collect();
    if parts.len() != 2 {
        return false;
    }

    let latitude = match parts[0].trim().parse::<f64>() {
        Ok(value) => value,
        Err(_) => return false,
    };
    let longitude = match parts[1].trim().parse::<f64>() {
        Ok(value) => value,
        Err(_) => return false,
    };

    (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)
}

/// Returns `true` for JSON integers and floats. Booleans do not count as numbers.
pub fn validate_numeric(value: &Value) -> bool {
    value.is_number()
}

/// Parses a zero padded `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Result<NaiveDate, FormatError> {
    let error = || FormatError {
        value: value.to_string(),
        expected: "YYYY-MM-DD",
    };
    if !date_pattern().is_match(value) {
        return Err(error());
    }
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        // There is no year zero in the calendar postgres stores.
        Ok(date) if date.year() >= 1 => Ok(date),
        _ => Err(error()),
    }
}

/// Parses a zero padded `HH:MM:SS` time of day.
pub fn parse_time(value: &str) -> Result<NaiveTime, FormatError> {
    let error = || FormatError {
        value: value.to_string(),
        expected: "HH:MM:SS",
    };
    if !time_pattern().is_match(value) {
        return Err(error());
    }
    match NaiveTime::parse_from_str(value, "%H:%M:%S") {
        // chrono represents a leap second `:60` as a nanosecond overflow.
        Ok(time) if time.nanosecond() < 1_000_000_000 => Ok(time),
        _ => Err(error()),
    }
}

fn date_value(value: Option<&Value>) -> Result<NaiveDate, ValidationError> {
    match value.and_then(Value::as_str) {
        Some(raw) => Ok(parse_date(raw)?),
        None => Err(FormatError {
            value: value.map(Value::to_string).unwrap_or_default(),
            expected: "YYYY-MM-DD",
        }
        .into()),
    }
}

fn time_value(value: Option<&Value>) -> Result<NaiveTime, ValidationError> {
    match value.and_then(Value::as_str) {
        Some(raw) => Ok(parse_time(raw)?),
        None => Err(FormatError {
            value: value.map(Value::to_string).unwrap_or_default(),
            expected: "HH:MM:SS",
        }
        .into()),
    }
}

fn text_value<'a>(
    field: ObservationField,
    value: Option<&'a Value>,
    check: fn(&str) -> bool,
) -> Result<&'a str, ValidationError> {
    match value.and_then(Value::as_str) {
        Some(text) if check(text) => Ok(text),
        _ => Err(ValidationError::InvalidField(field)),
    }
}

fn number_value(field: ObservationField, value: Option<&Value>) -> Result<f64, ValidationError> {
    match value {
        Some(number) if validate_numeric(number) => {
            number.as_f64().ok_or(ValidationError::InvalidField(field))
        }
        _ => Err(ValidationError::InvalidField(field)),
    }
}

/// Reads the optional identifier of a payload.
///
/// An identifier that is present must be a non empty string.
pub fn observation_id(payload: &Map<String, Value>) -> Result<Option<String>, ValidationError> {
    match payload.get(ID_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) if !id.is_empty() => Ok(Some(id.clone())),
        Some(_) => Err(ValidationError::InvalidId),
    }
}

/// Builds a complete observation from a payload.
///
/// Date and time are checked before every other field so that a malformed timestamp is
/// always reported as a format error.
///
/// # Errors
///
/// * `ValidationError::Format` - date or time is missing or malformed.
///
/// * `ValidationError::InvalidField` - the first other field that is missing or invalid.
pub fn build_observation(id: String, payload: &Map<String, Value>) -> Result<Observation, ValidationError> {
    let field = |field: ObservationField| payload.get(field.key());

    let date = date_value(field(ObservationField::Date))?;
    let time = time_value(field(ObservationField::Time))?;

    let timezone_offset = text_value(
        ObservationField::TimezoneOffset,
        field(ObservationField::TimezoneOffset),
        validate_timezone_offset,
    )?;
    let coordinates = text_value(
        ObservationField::Coordinates,
        field(ObservationField::Coordinates),
        validate_coordinates,
    )?;

    let number = |kind: ObservationField| number_value(kind, field(kind));

    Ok(Observation {
        id,
        date,
        time,
        timezone_offset: timezone_offset.to_string(),
        coordinates: coordinates.to_string(),
        water_temp: number(ObservationField::WaterTemp)?,
        air_temp: number(ObservationField::AirTemp)?,
        humidity: number(ObservationField::Humidity)?,
        wind_speed: number(ObservationField::WindSpeed)?,
        wind_direction: number(ObservationField::WindDirection)?,
        precipitation: number(ObservationField::Precipitation)?,
        haze: number(ObservationField::Haze)?,
        becquerel: number(ObservationField::Becquerel)?,
    })
}

/// Validates a single value and writes it into `observation`.
///
/// The record is left untouched when the value is rejected.
pub fn apply_field(
    observation: &mut Observation,
    field: ObservationField,
    value: &Value,
) -> Result<(), ValidationError> {
    let value = Some(value);
    match field {
        ObservationField::Date => observation.date = date_value(value)?,
        ObservationField::Time => observation.time = time_value(value)?,
        ObservationField::TimezoneOffset => {
            observation.timezone_offset = text_value(field, value, validate_timezone_offset)?.to_string()
        }
        ObservationField::Coordinates => {
            observation.coordinates = text_value(field, value, validate_coordinates)?.to_string()
        }
        ObservationField::WaterTemp => observation.water_temp = number_value(field, value)?,
        ObservationField::AirTemp => observation.air_temp = number_value(field, value)?,
        ObservationField::Humidity => observation.humidity = number_value(field, value)?,
        ObservationField::WindSpeed => observation.wind_speed = number_value(field, value)?,
        ObservationField::WindDirection => observation.wind_direction = number_value(field, value)?,
        ObservationField::Precipitation => observation.precipitation = number_value(field, value)?,
        ObservationField::Haze => observation.haze = number_value(field, value)?,
        ObservationField::Becquerel => observation.becquerel = number_value(field, value)?,
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn valid_payload() -> Map<String, Value> {
        match json!({
            "observation_date": "2024-12-10",
            "observation_time": "12:00:00",
            "observation_timeZone": "UTC+00:00",
            "observation_coordinates": "51.5074,-0.1278",
            "observation_waterTemp": 15.5,
            "observation_airTemp": 20.0,
            "observation_humidity": 60,
            "observation_windSpeed": 5.5,
            "observation_windDirection": 180,
            "observation_precipitation": 10,
            "observation_haze": 0.1,
            "observation_becquerel": 200
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn timezone_offsets() {
        assert!(validate_timezone_offset("UTC+00:00"));
        assert!(validate_timezone_offset("UTC-05:30"));
        assert!(!validate_timezone_offset("UTC+5:30"));
        assert!(!validate_timezone_offset("GMT+00:00"));
        assert!(!validate_timezone_offset("UTC+00:00 "));
        assert!(!validate_timezone_offset("UTC00:00"));
    }

    #[test]
    fn coordinate_ranges() {
        assert!(validate_coordinates("51.5074,-0.1278"));
        assert!(validate_coordinates("-90,180"));
        assert!(validate_coordinates(" 10.5 , 20 "));
        assert!(!validate_coordinates("90.1,0"));
        assert!(!validate_coordinates("0,-180.5"));
        assert!(!validate_coordinates("51.5074"));
        assert!(!validate_coordinates("1,2,3"));
        assert!(!validate_coordinates("north,south"));
        assert!(!validate_coordinates("NaN,0"));
        assert!(validate_coordinates(&format!("51.{},-0.1278", "5".repeat(120))));
    }

    #[test]
    fn numeric_values() {
        assert!(validate_numeric(&json!(1)));
        assert!(validate_numeric(&json!(-3.25)));
        assert!(!validate_numeric(&json!("1")));
        assert!(!validate_numeric(&json!(true)));
        assert!(!validate_numeric(&Value::Null));
    }

    #[test]
    fn strict_date_and_time() {
        assert_eq!(parse_date("2024-12-10").unwrap(), NaiveDate::from_ymd_opt(2024, 12, 10).unwrap());
        assert!(parse_date("2024-1-5").is_err());
        assert!(parse_date("2024-02-30").is_err());
        assert!(parse_date("10/12/2024").is_err());
        assert!(parse_date("0000-01-01").is_err());
        assert_eq!(parse_date("0001-01-01").unwrap(), NaiveDate::from_ymd_opt(1, 1, 1).unwrap());
        assert_eq!(parse_time("23:59:59").unwrap(), NaiveTime::from_hms_opt(23, 59, 59).unwrap());
        assert!(parse_time("24:00:00").is_err());
        assert!(parse_time("12:00").is_err());
        assert!(parse_time("12:00:00.5").is_err());
        assert!(parse_time("12:00:60").is_err());
        assert!(parse_time("23:59:60").is_err());
    }

    #[test]
    fn builds_a_valid_payload() {
        let observation = build_observation("a".to_string(), &valid_payload()).unwrap();
        assert_eq!(observation.id, "a");
        assert_eq!(observation.water_temp, 15.5);
        assert_eq!(observation.humidity, 60.0);
        assert_eq!(observation.coordinates, "51.5074,-0.1278");
    }

    #[test]
    fn date_errors_take_precedence() {
        let mut payload = valid_payload();
        payload.insert("observation_date".to_string(), json!("10-12-2024"));
        payload.insert("observation_haze".to_string(), json!("thick"));
        let err = build_observation("a".to_string(), &payload).unwrap_err();
        assert!(matches!(err, ValidationError::Format(_)));
        assert_eq!(err.to_string(), "Invalid date or time format");

        let mut payload = valid_payload();
        payload.remove("observation_time");
        assert!(matches!(
            build_observation("a".to_string(), &payload),
            Err(ValidationError::Format(_))
        ));
    }

    #[test]
    fn every_field_is_required() {
        for field in ObservationField::ALL.iter().skip(2) {
            let mut payload = valid_payload();
            payload.remove(field.key());
            assert_eq!(
                build_observation("a".to_string(), &payload),
                Err(ValidationError::InvalidField(*field))
            );
        }
    }

    #[test]
    fn rejects_strings_for_numbers() {
        let mut payload = valid_payload();
        payload.insert("observation_becquerel".to_string(), json!("200"));
        let err = build_observation("a".to_string(), &payload).unwrap_err();
        assert_eq!(err, ValidationError::InvalidField(ObservationField::Becquerel));
        assert_eq!(err.to_string(), "Invalid data format");
    }

    #[test]
    fn optional_identifier() {
        let mut payload = valid_payload();
        assert_eq!(observation_id(&payload), Ok(None));
        payload.insert(ID_KEY.to_string(), json!("abc"));
        assert_eq!(observation_id(&payload), Ok(Some("abc".to_string())));
        payload.insert(ID_KEY.to_string(), json!(12));
        assert_eq!(observation_id(&payload), Err(ValidationError::InvalidId));
        payload.insert(ID_KEY.to_string(), json!(""));
        assert_eq!(observation_id(&payload), Err(ValidationError::InvalidId));

        let long_id = "x".repeat(200);
        payload.insert(ID_KEY.to_string(), json!(long_id.clone()));
        assert_eq!(observation_id(&payload), Ok(Some(long_id)));
    }

    #[test]
    fn apply_field_keeps_record_on_rejection() {
        let mut observation = build_observation("a".to_string(), &valid_payload()).unwrap();
        let before = observation.clone();
        assert!(apply_field(&mut observation, ObservationField::Coordinates, &json!("100,0")).is_err());
        assert_eq!(observation, before);

        apply_field(&mut observation, ObservationField::AirTemp, &json!(-4)).unwrap();
        assert_eq!(observation.air_temp, -4.0);
        apply_field(&mut observation, ObservationField::Time, &json!("06:30:00")).unwrap();
        assert_eq!(observation.time, NaiveTime::from_hms_opt(6, 30, 0).unwrap());
    }
}
