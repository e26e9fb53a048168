//! Compost status heuristic: phase, expected duration and a recommendation.
//!
//! A downstream consumer of the day's telemetry. Nothing here touches the
//! outbox or the delivery guarantees.

use jiff::civil::Date;
use serde::{Deserialize, Serialize};

/// Days of hot composting for a pile of average materials.
const HOT_PHASE_DAYS: f64 = 60.0;

/// Age assumed when no start date is configured.
const DEFAULT_AGE_DAYS: i64 = 3;

const GREENS: &[&str] = &[
    "vegetable scraps",
    "grass clippings",
    "coffee grounds",
    "manure",
];
const WOODY: &[&str] = &["branches", "twigs", "wood chips", "sawdust", "straw"];

const GREEN_SPEED: f64 = 1.5;
const WOODY_SPEED: f64 = 1.0;
const UNKNOWN_SPEED: f64 = 1.0;

/// Heuristic inputs that do not come from telemetry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RecommendationSettings {
    /// What the pile is made of.
    pub materials: Vec<String>,

    /// When the pile was started.
    pub started_on: Option<Date>,

    /// Next-day forecast.
    pub forecast_temperature: f64,
    pub forecast_humidity: f64,
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            materials: vec![
                "grass clippings".into(),
                "twigs".into(),
                "wood chips".into(),
            ],
            started_on: None,
            forecast_temperature: 15.2,
            forecast_humidity: 10.0,
        }
    }
}

impl RecommendationSettings {
    /// Pile age in days on `today`.
    pub fn age_days(&self, today: Date) -> i64 {
        match self.started_on {
            Some(start) => today.since(start).map_or(0, |span| i64::from(span.get_days())),
            None => DEFAULT_AGE_DAYS,
        }
    }
}

/// One day's statistics for a variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    /// Population standard deviation.
    pub std: f64,
}

impl DailyStats {
    #[allow(clippy::cast_precision_loss)]
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let avg = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / n;
        Some(Self {
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            avg,
            std: variance.sqrt(),
        })
    }
}

/// The day's statistics by category. Temperature and moisture are required.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PileConditions {
    pub temperature: DailyStats,
    pub moisture: DailyStats,
    pub acidity: Option<DailyStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Active,
    Maturing,
    Curing,
}

/// The heuristic's verdict, published to the pile's asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompostStatus {
    pub compost_age_days: i64,
    pub speed_factor: f64,
    pub phase: Phase,
    pub total_duration: f64,
    pub estimated_days_remaining: f64,
    pub recommendation: String,
}

/// Average decomposition speed of a material mix.
///
/// Greens decompose at 1.5, woody and unknown materials at 1.0.
/// An empty mix is 1.0.
#[allow(clippy::cast_precision_loss)]
pub fn speed_factor(materials: &[String]) -> f64 {
    if materials.is_empty() {
        return 1.0;
    }
    let total: f64 = materials.iter().map(|m| material_speed(m)).sum();
    total / materials.len() as f64
}

fn material_speed(material: &str) -> f64 {
    if GREENS.contains(&material) {
        GREEN_SPEED
    } else if WOODY.contains(&material) {
        WOODY_SPEED
    } else {
        UNKNOWN_SPEED
    }
}

fn phase(conditions: &PileConditions) -> Phase {
    let temperature = conditions.temperature.avg;
    let moisture = conditions.moisture.avg;
    if temperature > 60.0 && moisture > 50.0 {
        Phase::Active
    } else if temperature > 40.0 && moisture < 50.0 {
        Phase::Maturing
    } else {
        Phase::Curing
    }
}

/// Assesses a pile from its conditions, age and settings.
#[allow(clippy::cast_precision_loss)]
pub fn analyze(
    conditions: &PileConditions,
    age_days: i64,
    settings: &RecommendationSettings,
) -> CompostStatus {
    let speed_factor = speed_factor(&settings.materials);
    let phase = phase(conditions);
    let total_duration = HOT_PHASE_DAYS * speed_factor;
    let estimated_days_remaining = (total_duration - age_days as f64).max(0.0);

    let low_ph = conditions.acidity.is_some_and(|ph| ph.avg < 6.0);
    let recommendation =
        if settings.forecast_temperature > 70.0 && settings.forecast_humidity > 60.0 {
            "Warning: High temperature and humidity expected. \
             Consider actively turning the compost pile."
        } else if low_ph {
            "Warning: pH level is low. Consider adding lime to balance pH."
        } else if phase == Phase::Active {
            "Continue to monitor moisture and temperature. Ensure pile is turning regularly."
        } else {
            "Monitor temperature closely for optimal results."
        };

    CompostStatus {
        compost_age_days: age_days,
        speed_factor,
        phase,
        total_duration,
        estimated_days_remaining,
        recommendation: recommendation.to_string(),
    }
}
