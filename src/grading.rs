use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Display text for a raw score with no matching band (secondary grade column).
pub const SECONDARY_MISSING_LABEL: &str = "-";
/// Display text for a fraction-of-total score with no matching band (primary report).
pub const PRIMARY_MISSING_LABEL: &str = "N/A";
pub const GRADE_POINT_PLACES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchoolLevel {
    Primary,
    Secondary,
}

impl SchoolLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub min_score: f64,
    pub max_score: f64,
    pub label: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub grade_point: f64,
}

impl GradeBand {
    /// Inclusive on both ends.
    pub fn contains(&self, score: f64) -> bool {
        self.min_score <= score && score <= self.max_score
    }

    fn overlaps(&self, other: &GradeBand) -> bool {
        self.min_score <= other.max_score && other.min_score <= self.max_score
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mark {
    pub id: String,
    pub student_ref: String,
    pub subject_ref: String,
    pub term: String,
    pub year: i64,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorTag {
    Success,
    Info,
    Warning,
    Danger,
    Neutral,
}

impl ColorTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Danger => "danger",
            Self::Neutral => "neutral",
        }
    }

    fn from_scale_percent(pct: f64) -> Self {
        if pct >= 75.0 {
            Self::Success
        } else if pct >= 50.0 {
            Self::Info
        } else if pct >= 25.0 {
            Self::Warning
        } else {
            Self::Danger
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BandError {
    #[error("band {index} has an empty label")]
    EmptyLabel { index: usize },
    #[error("band {index} has a non-finite score or grade point")]
    NonFinite { index: usize },
    #[error("band {index} has min_score {min} greater than max_score {max}")]
    InvertedRange { index: usize, min: f64, max: f64 },
    #[error("bands {first} ({first_label}) and {second} ({second_label}) overlap")]
    Overlap {
        first: usize,
        first_label: String,
        second: usize,
        second_label: String,
    },
}

impl BandError {
    pub fn details(&self) -> Value {
        match self {
            Self::EmptyLabel { index } | Self::NonFinite { index } => {
                serde_json::json!({ "index": index })
            }
            Self::InvertedRange { index, min, max } => {
                serde_json::json!({ "index": index, "minScore": min, "maxScore": max })
            }
            Self::Overlap {
                first,
                first_label,
                second,
                second_label,
            } => serde_json::json!({
                "first": first,
                "firstLabel": first_label,
                "second": second,
                "secondLabel": second_label,
            }),
        }
    }
}

/// Coerces a loosely-typed score from the display layer.
///
/// Numbers and numeric strings are accepted; everything else (null, blank,
/// booleans, containers, NaN/inf) means "no score" rather than an error.
pub fn parse_score(raw: &Value) -> Option<f64> {
    let v = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                return None;
            }
            t.parse::<f64>().ok()?
        }
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// First band (in slice order) whose inclusive range holds `score`.
pub fn resolve_grade(score: Option<f64>, bands: &[GradeBand]) -> Option<&GradeBand> {
    let score = score?;
    bands.iter().find(|b| b.contains(score))
}

pub fn percentage_of(score: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        score / total * 100.0
    }
}

/// Primary-level lookup: the score is normalized against `total` before
/// matching. Secondary callers match raw scores with [`resolve_grade`].
pub fn grade_for_fraction(
    score: Option<f64>,
    total: f64,
    bands: &[GradeBand],
) -> Option<&GradeBand> {
    let score = score?;
    resolve_grade(Some(percentage_of(score, total)), bands)
}

fn grade_point_range(bands: &[GradeBand]) -> Option<(f64, f64)> {
    let mut points = bands.iter().map(|b| b.grade_point);
    let first = points.next()?;
    Some(points.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p))))
}

pub fn resolve_color(score: Option<f64>, bands: &[GradeBand]) -> ColorTag {
    let Some(matched) = resolve_grade(score, bands) else {
        return ColorTag::Neutral;
    };
    let Some((min_point, max_point)) = grade_point_range(bands) else {
        return ColorTag::Neutral;
    };
    if max_point == min_point {
        return ColorTag::Success;
    }
    let pct = (matched.grade_point - min_point) * 100.0 / (max_point - min_point);
    if !pct.is_finite() {
        return ColorTag::Neutral;
    }
    ColorTag::from_scale_percent(pct)
}

pub fn total_score<I>(scores: I) -> f64
where
    I: IntoIterator<Item = Option<f64>>,
{
    scores.into_iter().flatten().sum()
}

/// `None` when nothing was recorded, which is not the same as an average of zero.
pub fn average_score<I>(scores: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut sum = 0.0_f64;
    let mut count: usize = 0;
    for s in scores.into_iter().flatten() {
        sum += s;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / (count as f64))
    }
}

/// Half-away-from-zero rounding to `places` decimals, applied to the shortest
/// decimal form of `x` so that `1.005` rounds to `1.01`.
pub fn round_to_places(x: f64, places: usize) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let factor = 10_f64.powi(places as i32);
    let shifted = format!("{}e{}", x, places)
        .parse::<f64>()
        .unwrap_or(x * factor);
    shifted.round() / factor
}

/// Scores outside every band are left out of both the sum and the count.
pub fn average_grade_points<I>(scores: I, bands: &[GradeBand]) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut total_points = 0.0_f64;
    let mut count: usize = 0;
    for score in scores.into_iter().flatten() {
        if let Some(band) = resolve_grade(Some(score), bands) {
            total_points += band.grade_point;
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    Some(round_to_places(total_points / (count as f64), GRADE_POINT_PLACES))
}

pub fn format_grade_points(value: Option<f64>) -> Option<String> {
    value.map(|v| format!("{:.*}", GRADE_POINT_PLACES, v))
}

pub fn grade_label(band: Option<&GradeBand>, missing: &str) -> String {
    band.map(|b| b.label.clone()).unwrap_or_else(|| missing.to_string())
}

pub fn grade_and_comment(band: Option<&GradeBand>, missing: &str) -> String {
    match band {
        None => missing.to_string(),
        Some(b) => match b.comment.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => format!("{} - {}", b.label, c),
            _ => b.label.clone(),
        },
    }
}

pub fn find_mark<'a>(marks: &'a [Mark], subject_ref: &str) -> Option<&'a Mark> {
    marks.iter().find(|m| m.subject_ref == subject_ref)
}

pub fn scores_of(marks: &[Mark]) -> impl Iterator<Item = Option<f64>> + '_ {
    marks.iter().map(|m| m.score)
}

/// Configuration-time checks for an administrator-maintained band table.
pub fn validate_bands(bands: &[GradeBand], reject_overlaps: bool) -> Result<(), BandError> {
    for (index, b) in bands.iter().enumerate() {
        if b.label.trim().is_empty() {
            return Err(BandError::EmptyLabel { index });
        }
        if !(b.min_score.is_finite() && b.max_score.is_finite() && b.grade_point.is_finite()) {
            return Err(BandError::NonFinite { index });
        }
        if b.min_score > b.max_score {
            return Err(BandError::InvertedRange {
                index,
                min: b.min_score,
                max: b.max_score,
            });
        }
    }
    if !reject_overlaps {
        return Ok(());
    }
    for (i, a) in bands.iter().enumerate() {
        for (j, b) in bands.iter().enumerate().skip(i + 1) {
            if a.overlaps(b) {
                return Err(BandError::Overlap {
                    first: i,
                    first_label: a.label.clone(),
                    second: j,
                    second_label: b.label.clone(),
                });
            }
        }
    }
    Ok(())
}
