use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    active_semester, fetch_class, get_required_str, list_enrollments, row_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn evaluations_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let title = get_required_str(params, "title")?;
    fetch_class(conn, &class_id)?;
    let semester = active_semester(conn)?;

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM evaluations WHERE class_id = ? AND semester_id = ? AND title = ?",
            (&class_id, &semester.id, &title),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_some() {
        return Err(HandlerErr::with_details(
            "conflict",
            "evaluation title already exists for this class and semester",
            json!({ "title": title }),
        ));
    }

    let enrollments = list_enrollments(conn, &class_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let evaluation_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO evaluations(id, class_id, semester_id, title) VALUES(?, ?, ?, ?)",
        (&evaluation_id, &class_id, &semester.id, &title),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "evaluations" }),
        )
    })?;

    for enrollment in &enrollments {
        tx.execute(
            "INSERT INTO student_evaluations(id, evaluation_id, student_class_id, description)
             VALUES(?, ?, ?, NULL)",
            (Uuid::new_v4().to_string(), &evaluation_id, &enrollment.id),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_insert_failed",
                e.to_string(),
                json!({ "table": "student_evaluations" }),
            )
        })?;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "evaluationId": evaluation_id,
        "classId": class_id,
        "semesterId": semester.id,
        "title": title,
        "studentRowsCreated": enrollments.len()
    }))
}

fn evaluations_set_description(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_evaluation_id = get_required_str(params, "studentEvaluationId")?;
    let description = match params.get("description") {
        None => return Err(HandlerErr::new("bad_params", "missing description")),
        Some(v) if v.is_null() => None,
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::new(
                    "bad_params",
                    "description must be a string or null",
                ));
            };
            Some(s.to_string())
        }
    };

    let changed = conn
        .execute(
            "UPDATE student_evaluations SET description = ? WHERE id = ?",
            (&description, &student_evaluation_id),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_update_failed",
                e.to_string(),
                json!({ "table": "student_evaluations" }),
            )
        })?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "student evaluation not found"));
    }

    Ok(json!({ "studentEvaluationId": student_evaluation_id, "description": description }))
}

fn evaluations_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    fetch_class(conn, &class_id)?;
    let semester = active_semester(conn)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, title FROM evaluations
             WHERE class_id = ? AND semester_id = ?
             ORDER BY title",
        )
        .map_err(HandlerErr::db)?;
    let evaluations = stmt
        .query_map((&class_id, &semester.id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut rows = Vec::with_capacity(evaluations.len());
    for (evaluation_id, title) in evaluations {
        let mut stmt = conn
            .prepare(
                "SELECT se.id, se.student_class_id, s.name, se.description
                 FROM student_evaluations se
                 JOIN student_classes sc ON sc.id = se.student_class_id
                 JOIN students s ON s.id = sc.student_id
                 WHERE se.evaluation_id = ?
                 ORDER BY s.name",
            )
            .map_err(HandlerErr::db)?;
        let students = stmt
            .query_map([&evaluation_id], |r| {
                let id: String = r.get(0)?;
                let student_class_id: String = r.get(1)?;
                let name: String = r.get(2)?;
                let description: Option<String> = r.get(3)?;
                Ok(json!({
                    "studentEvaluationId": id,
                    "studentClassId": student_class_id,
                    "name": name,
                    "description": description
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db)?;
        rows.push(json!({
            "evaluationId": evaluation_id,
            "title": title,
            "students": students
        }));
    }

    Ok(json!({ "semesterId": semester.id, "evaluations": rows }))
}

fn evaluations_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let evaluation_id = get_required_str(params, "evaluationId")?;
    if !row_exists(conn, "evaluations", &evaluation_id)? {
        return Err(HandlerErr::new("not_found", "evaluation not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (sql, table) in [
        (
            "DELETE FROM student_evaluations WHERE evaluation_id = ?",
            "student_evaluations",
        ),
        ("DELETE FROM evaluations WHERE id = ?", "evaluations"),
    ] {
        tx.execute(sql, [&evaluation_id]).map_err(|e| {
            HandlerErr::with_details("db_delete_failed", e.to_string(), json!({ "table": table }))
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
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
        "evaluations.create" => Some(with_conn(state, req, evaluations_create)),
        "evaluations.setDescription" => Some(with_conn(state, req, evaluations_set_description)),
        "evaluations.list" => Some(with_conn(state, req, evaluations_list)),
        "evaluations.delete" => Some(with_conn(state, req, evaluations_delete)),
        _ => None,
    }
}
