use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{active_semester, fetch_class, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

fn analytics_class_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let class = fetch_class(conn, &class_id)?;
    let semester = active_semester(conn)?;

    let mut stmt = conn
        .prepare(
            "SELECT sc.id, s.id, s.name
             FROM student_classes sc
             JOIN students s ON s.id = sc.student_id
             WHERE sc.class_id = ?
             ORDER BY s.name",
        )
        .map_err(HandlerErr::db)?;
    let enrollments: Vec<(String, String, String)> = stmt
        .query_map([&class_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    // Recorded scores for the active semester, grouped per enrollment and
    // per subject in one pass.
    let mut stmt = conn
        .prepare(
            "SELECT sg.student_class_id, sub.id, sub.name, sg.score
             FROM student_grades sg
             JOIN grade_details gd ON gd.id = sg.grade_detail_id
             JOIN grade_categories gc ON gc.id = gd.grade_category_id
             JOIN subjects sub ON sub.id = gc.subject_id
             WHERE gc.class_id = ? AND gc.semester_id = ? AND sg.score IS NOT NULL",
        )
        .map_err(HandlerErr::db)?;
    let score_rows: Vec<(String, String, String, f64)> = stmt
        .query_map((&class_id, &semester.id), |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut scores_by_enrollment: HashMap<String, Vec<f64>> = HashMap::new();
    let mut scores_by_subject: HashMap<String, (String, Vec<f64>)> = HashMap::new();
    for (enrollment_id, subject_id, subject_name, score) in score_rows {
        scores_by_enrollment
            .entry(enrollment_id)
            .or_default()
            .push(score);
        scores_by_subject
            .entry(subject_id)
            .or_insert_with(|| (subject_name, Vec::new()))
            .1
            .push(score);
    }

    let mut stmt = conn
        .prepare(
            "SELECT a.student_class_id,
               SUM(CASE WHEN a.status = 'present' THEN 1 ELSE 0 END),
               COUNT(*)
             FROM attendances a
             JOIN student_classes sc ON sc.id = a.student_class_id
             WHERE sc.class_id = ? AND a.semester_id = ?
             GROUP BY a.student_class_id",
        )
        .map_err(HandlerErr::db)?;
    let attendance_rows: Vec<(String, i64, i64)> = stmt
        .query_map((&class_id, &semester.id), |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    let attendance_by_enrollment: HashMap<String, (i64, i64)> = attendance_rows
        .into_iter()
        .map(|(id, present, total)| (id, (present, total)))
        .collect();

    let mut ranked: Vec<calc::StudentRanking> = Vec::new();
    let mut unranked: Vec<calc::StudentRanking> = Vec::new();
    for (enrollment_id, student_id, name) in &enrollments {
        let (present, total) = attendance_by_enrollment
            .get(enrollment_id)
            .copied()
            .unwrap_or((0, 0));
        let scores = scores_by_enrollment
            .get(enrollment_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let row = calc::StudentRanking {
            student_class_id: enrollment_id.clone(),
            student_id: student_id.clone(),
            name: name.clone(),
            average: calc::mean(scores).map(calc::round_off_2_decimals),
            rank: None,
            score_count: scores.len(),
            attendance_percent: calc::attendance_percent(present as usize, total as usize),
        };
        if row.average.is_some() {
            ranked.push(row);
        } else {
            unranked.push(row);
        }
    }

    calc::sort_desc_by_average(&mut ranked, |r| r.average.unwrap_or(0.0));
    let averages: Vec<f64> = ranked.iter().filter_map(|r| r.average).collect();
    for (row, rank) in ranked.iter_mut().zip(calc::competition_ranks(&averages)) {
        row.rank = Some(rank);
    }
    ranked.extend(unranked);

    let mut subject_averages: Vec<calc::SubjectAverage> = scores_by_subject
        .into_iter()
        .map(|(subject_id, (name, scores))| calc::SubjectAverage {
            subject_id,
            name,
            average: calc::mean(&scores).map(calc::round_off_2_decimals),
            score_count: scores.len(),
        })
        .collect();
    subject_averages.sort_by(|a, b| a.name.cmp(&b.name));

    let rankings_json =
        serde_json::to_value(&ranked).map_err(|e| HandlerErr::new("internal", e.to_string()))?;
    let subjects_json = serde_json::to_value(&subject_averages)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;

    Ok(json!({
        "class": { "classId": class.id, "name": class.name, "yearId": class.academic_year_id },
        "semester": { "semesterId": semester.id, "name": semester.name },
        "studentCount": enrollments.len(),
        "studentRankings": rankings_json,
        "subjectAverages": subjects_json
    }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.classSummary" => Some(with_conn(state, req, analytics_class_summary)),
        _ => None,
    }
}
