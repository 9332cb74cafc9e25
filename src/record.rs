//! Module that contains the observation record and the closed set of its fields.
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// JSON key of the observation identifier.
pub const ID_KEY: &str = "observation_id";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Struct representing one environmental reading taken at a specific place and time.
pub struct Observation
{
    /// Unique identifier of the observation.
    #[serde(rename = "observation_id")]
    pub id: String,
    /// Calendar date the observation was taken.
    #[serde(rename = "observation_date")]
    pub date: NaiveDate,
    /// Local time of day the observation was taken.
    #[serde(rename = "observation_time", with = "time_format")]
    pub time: NaiveTime,
    /// Offset of the local time, formatted as `UTC+HH:MM`.
    #[serde(rename = "observation_timeZone")]
    pub timezone_offset: String,
    /// Position formatted as `lat,lon`.
    #[serde(rename = "observation_coordinates")]
    pub coordinates: String,
    /// Water temperature in celsius.
    #[serde(rename = "observation_waterTemp")]
    pub water_temp: f64,
    /// Air temperature in celsius.
    #[serde(rename = "observation_airTemp")]
    pub air_temp: f64,
    /// Relative humidity value.
    #[serde(rename = "observation_humidity")]
    pub humidity: f64,
    /// Wind speed.
    #[serde(rename = "observation_windSpeed")]
    pub wind_speed: f64,
    /// Wind direction in degrees.
    #[serde(rename = "observation_windDirection")]
    pub wind_direction: f64,
    /// Precipitation.
    #[serde(rename = "observation_precipitation")]
    pub precipitation: f64,
    /// Haze.
    #[serde(rename = "observation_haze")]
    pub haze: f64,
    /// Radioactivity in becquerel.
    #[serde(rename = "observation_becquerel")]
    pub becquerel: f64,
}

/// Every field of an observation except the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationField {
    Date,
    Time,
    TimezoneOffset,
    Coordinates,
    WaterTemp,
    AirTemp,
    Humidity,
    WindSpeed,
    WindDirection,
    Precipitation,
    Haze,
    Becquerel,
}

impl ObservationField {
    /// All fields in declaration order.
    pub const ALL: [ObservationField; 12] = [
        ObservationField::Date,
        ObservationField::Time,
        ObservationField::TimezoneOffset,
        ObservationField::Coordinates,
        ObservationField::WaterTemp,
        ObservationField::AirTemp,
        ObservationField::Humidity,
        ObservationField::WindSpeed,
        ObservationField::WindDirection,
        ObservationField::Precipitation,
        ObservationField::Haze,
        ObservationField::Becquerel,
    ];

    /// The JSON key the field is (de)serialized with.
    pub fn key(self) -> &'static str {
        match self {
            ObservationField::Date => "observation_date",
            ObservationField::Time => "observation_time",
            ObservationField::TimezoneOffset => "observation_timeZone",
            ObservationField::Coordinates => "observation_coordinates",
            ObservationField::WaterTemp => "observation_waterTemp",
            ObservationField::AirTemp => "observation_airTemp",
            ObservationField::Humidity => "observation_humidity",
            ObservationField::WindSpeed => "observation_windSpeed",
            ObservationField::WindDirection => "observation_windDirection",
            ObservationField::Precipitation => "observation_precipitation",
            ObservationField::Haze => "observation_haze",
            ObservationField::Becquerel => "observation_becquerel",
        }
    }

    /// Suffix of the patch route that overwrites this field.
    pub fn route_suffix(self) -> &'static str {
        match self {
            ObservationField::Date => "date",
            ObservationField::Time => "time",
            ObservationField::TimezoneOffset => "timezone",
            ObservationField::Coordinates => "coordinates",
            ObservationField::WaterTemp => "water_temp",
            ObservationField::AirTemp => "air_temp",
            ObservationField::Humidity => "humidity",
            ObservationField::WindSpeed => "wind_speed",
            ObservationField::WindDirection => "wind_direction",
            ObservationField::Precipitation => "precipitation",
            ObservationField::Haze => "haze",
            ObservationField::Becquerel => "becquerel",
        }
    }

    pub fn from_key(key: &str) -> Option<ObservationField> {
        ObservationField::ALL.iter().copied().find(|field| field.key() == key)
    }
}

/// Times are written as `HH:MM:SS`, fractional seconds are never emitted.
mod time_format {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M:%S";

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}
