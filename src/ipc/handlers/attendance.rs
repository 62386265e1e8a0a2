use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    active_semester, fetch_class, get_required_date, get_required_str, list_enrollments,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

pub const STATUS_NOT_SET: &str = "not_set";

fn is_valid_status(status: &str) -> bool {
    matches!(
        status,
        "present" | "excused" | "sick" | "absent" | "not_set"
    )
}

fn attendance_open_date(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_date(params, "date")?;
    fetch_class(conn, &class_id)?;
    let semester = active_semester(conn)?;

    let enrollments = list_enrollments(conn, &class_id)?;
    if enrollments.is_empty() {
        return Err(HandlerErr::new(
            "not_found",
            "no students enrolled in this class",
        ));
    }

    let existing: i64 = conn
        .query_row(
            "SELECT COUNT(*)
             FROM attendances a
             JOIN student_classes sc ON sc.id = a.student_class_id
             WHERE sc.class_id = ? AND a.semester_id = ? AND a.date = ?",
            (&class_id, &semester.id, &date),
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;
    if existing > 0 {
        return Err(HandlerErr::with_details(
            "conflict",
            "attendance already opened for this date",
            json!({ "date": date, "existingRows": existing }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for enrollment in &enrollments {
        tx.execute(
            "INSERT INTO attendances(id, student_class_id, semester_id, date, status)
             VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &enrollment.id,
                &semester.id,
                &date,
                STATUS_NOT_SET,
            ),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_insert_failed",
                e.to_string(),
                json!({ "table": "attendances" }),
            )
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "date": date,
        "semesterId": semester.id,
        "created": enrollments.len()
    }))
}

fn attendance_record_statuses(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_date(params, "date")?;
    fetch_class(conn, &class_id)?;
    let semester = active_semester(conn)?;

    let Some(raw_updates) = params.get("updates").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing updates"));
    };
    if raw_updates.is_empty() {
        return Err(HandlerErr::new("bad_params", "updates must not be empty"));
    }

    let mut updates: Vec<(String, String)> = Vec::with_capacity(raw_updates.len());
    let mut bad_statuses: Vec<String> = Vec::new();
    for entry in raw_updates {
        let Some(student_class_id) = entry.get("studentClassId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::new(
                "bad_params",
                "updates entries must carry studentClassId",
            ));
        };
        let Some(status) = entry.get("status").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::new(
                "bad_params",
                "updates entries must carry status",
            ));
        };
        if !is_valid_status(status) {
            bad_statuses.push(status.to_string());
        }
        updates.push((student_class_id.to_string(), status.to_string()));
    }
    if !bad_statuses.is_empty() {
        return Err(HandlerErr::with_details(
            "bad_params",
            "status must be one of: present, excused, sick, absent, not_set",
            json!({ "statuses": bad_statuses }),
        ));
    }

    // Every target must be an enrollment of the caller's class.
    let member_ids: HashSet<String> = list_enrollments(conn, &class_id)?
        .into_iter()
        .map(|e| e.id)
        .collect();
    let foreign: Vec<String> = updates
        .iter()
        .map(|(id, _)| id.clone())
        .filter(|id| !member_ids.contains(id))
        .collect();
    if !foreign.is_empty() {
        return Err(HandlerErr::with_details(
            "bad_params",
            "student class ids do not belong to this class",
            json!({ "studentClassIds": foreign }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let mut updated = 0usize;
    let mut not_found: Vec<String> = Vec::new();
    for (student_class_id, status) in &updates {
        // Rows are only ever created by openDate; a miss is reported back,
        // never auto-created.
        let changed = tx
            .execute(
                "UPDATE attendances SET status = ?
                 WHERE student_class_id = ? AND semester_id = ? AND date = ?",
                (status, student_class_id, &semester.id, &date),
            )
            .map_err(|e| {
                HandlerErr::with_details(
                    "db_update_failed",
                    e.to_string(),
                    json!({ "table": "attendances" }),
                )
            })?;
        if changed == 0 {
            not_found.push(student_class_id.clone());
        } else {
            updated += 1;
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    if updated == 0 {
        return Err(HandlerErr::with_details(
            "not_found",
            "no attendance rows matched the requested updates",
            json!({ "notFoundStudentClassIds": not_found }),
        ));
    }

    if not_found.is_empty() {
        Ok(json!({ "date": date, "updated": updated }))
    } else {
        Ok(json!({
            "date": date,
            "updated": updated,
            "partial": true,
            "notFoundStudentClassIds": not_found
        }))
    }
}

fn attendance_delete_date(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_date(params, "date")?;
    fetch_class(conn, &class_id)?;
    let semester = active_semester(conn)?;

    let removed = conn
        .execute(
            "DELETE FROM attendances
             WHERE semester_id = ? AND date = ?
               AND student_class_id IN (SELECT id FROM student_classes WHERE class_id = ?)",
            (&semester.id, &date, &class_id),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "attendances" }),
            )
        })?;
    if removed == 0 {
        return Err(HandlerErr::new(
            "not_found",
            "no attendance rows for this class and date",
        ));
    }

    Ok(json!({ "date": date, "removed": removed }))
}

fn attendance_list_date(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_date(params, "date")?;
    fetch_class(conn, &class_id)?;
    let semester = active_semester(conn)?;

    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.student_class_id, s.id, s.name, a.status
             FROM attendances a
             JOIN student_classes sc ON sc.id = a.student_class_id
             JOIN students s ON s.id = sc.student_id
             WHERE sc.class_id = ? AND a.semester_id = ? AND a.date = ?
             ORDER BY s.name",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((&class_id, &semester.id, &date), |r| {
            let id: String = r.get(0)?;
            let student_class_id: String = r.get(1)?;
            let student_id: String = r.get(2)?;
            let name: String = r.get(3)?;
            let status: String = r.get(4)?;
            Ok(json!({
                "attendanceId": id,
                "studentClassId": student_class_id,
                "studentId": student_id,
                "name": name,
                "status": status
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "date": date, "semesterId": semester.id, "rows": rows }))
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
        "attendance.openDate" => Some(with_conn(state, req, attendance_open_date)),
        "attendance.recordStatuses" => Some(with_conn(state, req, attendance_record_statuses)),
        "attendance.deleteDate" => Some(with_conn(state, req, attendance_delete_date)),
        "attendance.listDate" => Some(with_conn(state, req, attendance_list_date)),
        _ => None,
    }
}
