//! Grade aggregation: attempt grades from traces, quiz grades from attempts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::trace::{AttemptTrace, NodeAttempt};

/// Weight sums below this are treated as zero.
const WEIGHT_EPSILON: f64 = 1e-9;

/// How several attempts combine into one quiz grade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeMethod {
    #[default]
    Highest,
    Average,
    FirstAttempt,
    LastAttempt,
}

impl fmt::Display for GradeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradeMethod::Highest => write!(f, "highest"),
            GradeMethod::Average => write!(f, "average"),
            GradeMethod::FirstAttempt => write!(f, "first_attempt"),
            GradeMethod::LastAttempt => write!(f, "last_attempt"),
        }
    }
}

impl FromStr for GradeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "highest" | "max" => Ok(GradeMethod::Highest),
            "average" | "avg" | "mean" => Ok(GradeMethod::Average),
            "first_attempt" | "first" => Ok(GradeMethod::FirstAttempt),
            "last_attempt" | "last" => Ok(GradeMethod::LastAttempt),
            other => Err(format!("unknown grade method: {other}")),
        }
    }
}

/// Round to two decimal places.
pub fn round_grade(grade: f64) -> f64 {
    (grade * 100.0).round() / 100.0
}

/// Scale `raw` out of `sum_of_weights` onto `0..=max_grade`.
pub fn rescale(raw: f64, sum_of_weights: f64, max_grade: f64) -> f64 {
    if sum_of_weights.abs() < WEIGHT_EPSILON {
        0.0
    } else {
        raw * max_grade / sum_of_weights
    }
}

/// Grade of one attempt from the node attempts on its path.
///
/// Only visited nodes count toward the denominator. A node attempt still
/// awaiting a grade contributes nothing but keeps its weight. When the
/// visited weight sums to zero the denominator is 1.
pub fn compute_attempt_grade(steps: &[NodeAttempt], max_grade: f64) -> f64 {
    let (earned, weight) = steps.iter().fold((0.0, 0.0), |(earned, weight), step| {
        (
            earned + step.grade.unwrap_or(0.0) * step.grade_weight,
            weight + step.grade_weight,
        )
    });
    let denominator = if weight.abs() < WEIGHT_EPSILON { 1.0 } else { weight };
    round_grade(earned / denominator * max_grade)
}

/// Combine per-attempt grades (in chronological order) under `method`.
///
/// `None` entries are attempts without a grade; they never count. Returns
/// `None` when no attempt has a grade.
pub fn best_grade(grades: &[Option<f64>], method: GradeMethod) -> Option<f64> {
    let mut graded = grades.iter().filter_map(|g| *g);
    match method {
        GradeMethod::Highest => graded.reduce(f64::max),
        GradeMethod::FirstAttempt => graded.next(),
        GradeMethod::LastAttempt => graded.last(),
        GradeMethod::Average => {
            let (sum, count) = graded.fold((0.0, 0usize), |(s, n), g| (s + g, n + 1));
            (count > 0).then(|| round_grade(sum / count as f64))
        }
    }
}

/// Quiz grade for one learner from their attempts.
///
/// Previews are ignored and unfinished attempts have no grade. Attempts are
/// ordered by creation time before first/last selection.
pub fn compute_best_grade(
    attempts: &[AttemptTrace],
    max_grade: f64,
    method: GradeMethod,
) -> Option<f64> {
    let mut counted: Vec<&AttemptTrace> =
        attempts.iter().filter(|t| !t.attempt.is_preview).collect();
    counted.sort_by_key(|t| t.attempt.created_at);
    let grades: Vec<Option<f64>> = counted
        .iter()
        .map(|t| {
            t.is_finished()
                .then(|| compute_attempt_grade(t.steps(), max_grade))
        })
        .collect();
    best_grade(&grades, method)
}
