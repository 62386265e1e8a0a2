use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    fetch_class, get_required_str, get_required_str_array, row_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn classes_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               c.academic_year_id,
               y.label,
               t.name,
               (SELECT COUNT(*) FROM student_classes sc WHERE sc.class_id = c.id) AS student_count
             FROM classes c
             JOIN academic_years y ON y.id = c.academic_year_id
             JOIN teachers t ON t.id = c.teacher_id
             ORDER BY y.label DESC, c.name",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let year_id: String = r.get(2)?;
            let year_label: String = r.get(3)?;
            let teacher_name: String = r.get(4)?;
            let student_count: i64 = r.get(5)?;
            Ok(json!({
                "classId": id,
                "name": name,
                "yearId": year_id,
                "yearLabel": year_label,
                "teacherName": teacher_name,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "classes": rows }))
}

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year_id = get_required_str(params, "yearId")?;
    let name = get_required_str(params, "name")?;
    let teacher_id = get_required_str(params, "teacherId")?;

    if !row_exists(conn, "academic_years", &year_id)? {
        return Err(HandlerErr::new("not_found", "academic year not found"));
    }
    if !row_exists(conn, "teachers", &teacher_id)? {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }

    let name_taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM classes WHERE name = ? AND academic_year_id = ?",
            (&name, &year_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if name_taken.is_some() {
        return Err(HandlerErr::with_details(
            "conflict",
            "class name already exists for this academic year",
            json!({ "name": name }),
        ));
    }

    // One class per teacher per year.
    let teacher_taken: Option<String> = conn
        .query_row(
            "SELECT name FROM classes WHERE teacher_id = ? AND academic_year_id = ?",
            (&teacher_id, &year_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if let Some(existing) = teacher_taken {
        return Err(HandlerErr::with_details(
            "conflict",
            "teacher already has a class for this academic year",
            json!({ "existingClassName": existing }),
        ));
    }

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, teacher_id, academic_year_id) VALUES(?, ?, ?, ?)",
        (&class_id, &name, &teacher_id, &year_id),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "classes" }),
        )
    })?;

    Ok(json!({ "classId": class_id, "name": name, "yearId": year_id, "teacherId": teacher_id }))
}

fn classes_list_students(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let class = fetch_class(conn, &class_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT sc.id, s.id, s.name, s.student_no
             FROM student_classes sc
             JOIN students s ON s.id = sc.student_id
             WHERE sc.class_id = ?
             ORDER BY s.name",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&class_id], |r| {
            let enrollment_id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let name: String = r.get(2)?;
            let student_no: Option<String> = r.get(3)?;
            Ok(json!({
                "studentClassId": enrollment_id,
                "studentId": student_id,
                "name": name,
                "studentNo": student_no
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({
        "classId": class.id,
        "className": class.name,
        "students": rows
    }))
}

fn classes_enroll_students(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_ids = get_required_str_array(params, "studentIds")?;
    let class = fetch_class(conn, &class_id)?;

    let mut seen = std::collections::HashSet::new();
    let student_ids: Vec<String> = student_ids
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect();

    let mut unknown: Vec<String> = Vec::new();
    for student_id in &student_ids {
        if !row_exists(conn, "students", student_id)? {
            unknown.push(student_id.clone());
        }
    }
    if !unknown.is_empty() {
        return Err(HandlerErr::with_details(
            "bad_params",
            "unknown student ids",
            json!({ "studentIds": unknown }),
        ));
    }

    // A student holds at most one enrollment among the year's classes.
    // Conflicts are collected and reported together so the caller can
    // surface them individually.
    let mut conflicting: Vec<String> = Vec::new();
    for student_id in &student_ids {
        let taken: Option<i64> = conn
            .query_row(
                "SELECT 1
                 FROM student_classes sc
                 JOIN classes c ON c.id = sc.class_id
                 WHERE sc.student_id = ? AND c.academic_year_id = ?",
                (student_id, &class.academic_year_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db)?;
        if taken.is_some() {
            conflicting.push(student_id.clone());
        }
    }
    if !conflicting.is_empty() {
        return Err(HandlerErr::with_details(
            "conflict",
            "students already enrolled in a class for this academic year",
            json!({ "studentIds": conflicting }),
        ));
    }

    // Existing gradeable events and evaluation titles of the class; every
    // new enrollment is provisioned against them so per-student rows never
    // need lazy backfill later.
    let mut stmt = conn
        .prepare(
            "SELECT gd.id
             FROM grade_details gd
             JOIN grade_categories gc ON gc.id = gd.grade_category_id
             WHERE gc.class_id = ?",
        )
        .map_err(HandlerErr::db)?;
    let detail_ids: Vec<String> = stmt
        .query_map([&class_id], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    let mut stmt = conn
        .prepare("SELECT id FROM evaluations WHERE class_id = ?")
        .map_err(HandlerErr::db)?;
    let evaluation_ids: Vec<String> = stmt
        .query_map([&class_id], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let mut grade_rows_created = 0usize;
    let mut evaluation_rows_created = 0usize;
    for student_id in &student_ids {
        let enrollment_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO student_classes(id, student_id, class_id) VALUES(?, ?, ?)",
            (&enrollment_id, student_id, &class_id),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_insert_failed",
                e.to_string(),
                json!({ "table": "student_classes" }),
            )
        })?;

        for detail_id in &detail_ids {
            tx.execute(
                "INSERT INTO student_grades(id, student_class_id, grade_detail_id, score)
                 VALUES(?, ?, ?, NULL)",
                (Uuid::new_v4().to_string(), &enrollment_id, detail_id),
            )
            .map_err(|e| {
                HandlerErr::with_details(
                    "db_insert_failed",
                    e.to_string(),
                    json!({ "table": "student_grades" }),
                )
            })?;
            grade_rows_created += 1;
        }
        for evaluation_id in &evaluation_ids {
            tx.execute(
                "INSERT INTO student_evaluations(id, evaluation_id, student_class_id, description)
                 VALUES(?, ?, ?, NULL)",
                (Uuid::new_v4().to_string(), evaluation_id, &enrollment_id),
            )
            .map_err(|e| {
                HandlerErr::with_details(
                    "db_insert_failed",
                    e.to_string(),
                    json!({ "table": "student_evaluations" }),
                )
            })?;
            evaluation_rows_created += 1;
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "enrolled": student_ids.len(),
        "gradeRowsCreated": grade_rows_created,
        "evaluationRowsCreated": evaluation_rows_created
    }))
}

fn classes_unenroll(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;

    let enrollment_id: Option<String> = conn
        .query_row(
            "SELECT id FROM student_classes WHERE class_id = ? AND student_id = ?",
            (&class_id, &student_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(enrollment_id) = enrollment_id else {
        return Err(HandlerErr::new(
            "not_found",
            "student is not enrolled in this class",
        ));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Dependency order (no ON DELETE CASCADE).
    for (sql, table) in [
        (
            "DELETE FROM student_grades WHERE student_class_id = ?",
            "student_grades",
        ),
        (
            "DELETE FROM attendances WHERE student_class_id = ?",
            "attendances",
        ),
        (
            "DELETE FROM student_evaluations WHERE student_class_id = ?",
            "student_evaluations",
        ),
        ("DELETE FROM student_classes WHERE id = ?", "student_classes"),
    ] {
        tx.execute(sql, [&enrollment_id]).map_err(|e| {
            HandlerErr::with_details("db_delete_failed", e.to_string(), json!({ "table": table }))
        })?;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
}

fn classes_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    // Existence check up front so a bogus id reports not_found rather
    // than a silent no-op delete.
    fetch_class(conn, &class_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    for (sql, table) in [
        (
            "DELETE FROM student_grades
             WHERE student_class_id IN (SELECT id FROM student_classes WHERE class_id = ?)",
            "student_grades",
        ),
        (
            "DELETE FROM grade_details
             WHERE grade_category_id IN (SELECT id FROM grade_categories WHERE class_id = ?)",
            "grade_details",
        ),
        (
            "DELETE FROM grade_categories WHERE class_id = ?",
            "grade_categories",
        ),
        (
            "DELETE FROM attendances
             WHERE student_class_id IN (SELECT id FROM student_classes WHERE class_id = ?)",
            "attendances",
        ),
        (
            "DELETE FROM student_evaluations
             WHERE evaluation_id IN (SELECT id FROM evaluations WHERE class_id = ?)",
            "student_evaluations",
        ),
        ("DELETE FROM evaluations WHERE class_id = ?", "evaluations"),
        (
            "DELETE FROM student_classes WHERE class_id = ?",
            "student_classes",
        ),
        ("DELETE FROM classes WHERE id = ?", "classes"),
    ] {
        tx.execute(sql, [&class_id]).map_err(|e| {
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
        "classes.list" => Some(with_conn(state, req, |c, _| classes_list(c))),
        "classes.create" => Some(with_conn(state, req, classes_create)),
        "classes.listStudents" => Some(with_conn(state, req, classes_list_students)),
        "classes.enrollStudents" => Some(with_conn(state, req, classes_enroll_students)),
        "classes.unenroll" => Some(with_conn(state, req, classes_unenroll)),
        "classes.delete" => Some(with_conn(state, req, classes_delete)),
        _ => None,
    }
}
