use serde::Serialize;
use std::cmp::Ordering;

/// 2-decimal rounding used for every reported average:
/// `Int(100*x + 0.5) / 100`
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / (values.len() as f64))
}

/// Attendance share as a percentage. Zero recorded rows is a valid
/// "no data yet" state, reported as 0 rather than an error.
pub fn attendance_percent(present_count: usize, total_recorded: usize) -> f64 {
    if total_recorded == 0 {
        return 0.0;
    }
    round_off_2_decimals(100.0 * (present_count as f64) / (total_recorded as f64))
}

/// Competition ranking over averages sorted descending: tied values share a
/// rank, and the rank after a tie group skips by the group size, so
/// [90, 90, 80] ranks as [1, 1, 3] and [70, 60, 60, 50] as [1, 2, 2, 4].
pub fn competition_ranks(sorted_desc: &[f64]) -> Vec<i64> {
    let mut ranks = Vec::with_capacity(sorted_desc.len());
    for (i, value) in sorted_desc.iter().enumerate() {
        if i > 0 && *value == sorted_desc[i - 1] {
            let prev = ranks[i - 1];
            ranks.push(prev);
        } else {
            ranks.push((i as i64) + 1);
        }
    }
    ranks
}

pub fn sort_desc_by_average<T, F>(rows: &mut [T], average_of: F)
where
    F: Fn(&T) -> f64,
{
    rows.sort_by(|a, b| {
        average_of(b)
            .partial_cmp(&average_of(a))
            .unwrap_or(Ordering::Equal)
    });
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRanking {
    pub student_class_id: String,
    pub student_id: String,
    pub name: String,
    pub average: Option<f64>,
    pub rank: Option<i64>,
    pub score_count: usize,
    pub attendance_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub subject_id: String,
    pub name: String,
    pub average: Option<f64>,
    pub score_count: usize,
}
