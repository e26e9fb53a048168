//! Observation building: telemetry statistics in, activity-log payload out.
//!
//! Pure mapping. A variable key is classified by substring into a
//! [`Category`], and the category decides the observed property, the unit
//! and the activity type of the payload.

use serde::Deserialize;

use crate::model::{Category, ObservationPayload, ObservationTime, QuantityValue, Summary};

const TEMPERATURE_PROPERTY: &str = "https://vocab.nerc.ac.uk/standard_name/air_temperature/";
const MOISTURE_PROPERTY: &str =
    "http://vocab.nerc.ac.uk/standard_name/moisture_content_of_soil_layer/";
const ACIDITY_PROPERTY: &str = "http://vocab.nerc.ac.uk/standard_name/pH_of_soil_layer/";

const DEG_C: &str = "http://qudt.org/vocab/unit/DEG_C";
const PERCENT: &str = "http://qudt.org/vocab/unit/PERCENT";
const UNITLESS: &str = "http://qudt.org/vocab/unit/UNITLESS";

const ACTIVITY_TYPE_URN: &str = "urn:farmcalendar:FarmActivityType:";

/// Substrings that place a variable key in a category.
///
/// Categories are checked in the order temperature, moisture, acidity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Vocabulary {
    pub temperature: Vec<String>,
    pub moisture: Vec<String>,
    pub acidity: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        let tokens = |ts: &[&str]| ts.iter().map(|t| (*t).to_string()).collect();
        Self {
            temperature: tokens(&["TEMP", "temp", "Temp"]),
            moisture: tokens(&["water", "WATER", "moisture", "MOISTURE", "HUM", "humidity"]),
            acidity: tokens(&["PH", "pH"]),
        }
    }
}

/// Activity-type identifiers on the activity log, one per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ActivityTypes {
    pub temperature: String,
    pub moisture: String,
    pub acidity: String,
}

/// Builds observation payloads from variable keys and statistics.
#[derive(Debug, Clone, Default)]
pub struct ObservationBuilder {
    vocabulary: Vocabulary,
    activity_types: ActivityTypes,
}

impl ObservationBuilder {
    pub fn new(vocabulary: Vocabulary, activity_types: ActivityTypes) -> Self {
        Self {
            vocabulary,
            activity_types,
        }
    }

    /// Classifies a variable key. `None` when no token matches.
    pub fn classify(&self, key: &str) -> Option<Category> {
        let matches = |tokens: &[String]| tokens.iter().any(|t| !t.is_empty() && key.contains(t));

        if matches(&self.vocabulary.temperature) {
            Some(Category::Temperature)
        } else if matches(&self.vocabulary.moisture) {
            Some(Category::Moisture)
        } else if matches(&self.vocabulary.acidity) {
            Some(Category::Acidity)
        } else {
            None
        }
    }

    /// Builds the payload for one variable.
    ///
    /// `time` defaults to the current minute. An unclassified key yields a
    /// payload with empty property, unit and activity type.
    pub fn build(
        &self,
        key: &str,
        summary: &Summary,
        time: Option<ObservationTime>,
    ) -> ObservationPayload {
        let (property, unit, activity_type) = match self.classify(key) {
            Some(Category::Temperature) => (
                TEMPERATURE_PROPERTY,
                DEG_C,
                self.activity_types.temperature.as_str(),
            ),
            Some(Category::Moisture) => (
                MOISTURE_PROPERTY,
                PERCENT,
                self.activity_types.moisture.as_str(),
            ),
            Some(Category::Acidity) => (
                ACIDITY_PROPERTY,
                UNITLESS,
                self.activity_types.acidity.as_str(),
            ),
            None => ("", "", ""),
        };

        let activity_type = if activity_type.is_empty() {
            String::new()
        } else {
            format!("{ACTIVITY_TYPE_URN}{activity_type}")
        };

        let details = match (summary.min, summary.max) {
            (Some(min), Some(max)) => Some(format!("MIN: {min} to MAX: {max}")),
            _ => None,
        };

        ObservationPayload {
            kind: "Observation".to_string(),
            observed_property: property.to_string(),
            activity_type,
            phenomenon_time: time.unwrap_or_else(ObservationTime::now),
            details,
            has_result: QuantityValue {
                kind: "QuantityValue".to_string(),
                has_value: summary.mean,
                unit: unit.to_string(),
            },
        }
    }
}
