use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    active_semester, fetch_class, get_required_date, get_required_str, list_enrollments,
    row_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct CategoryRow {
    id: String,
    class_id: String,
}

fn fetch_category(conn: &Connection, category_id: &str) -> Result<CategoryRow, HandlerErr> {
    conn.query_row(
        "SELECT id, class_id FROM grade_categories WHERE id = ?",
        [category_id],
        |r| {
            Ok(CategoryRow {
                id: r.get(0)?,
                class_id: r.get(1)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::new("not_found", "grade category not found"))
}

fn grading_list_categories(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    fetch_class(conn, &class_id)?;
    let semester = active_semester(conn)?;

    let mut stmt = conn
        .prepare(
            "SELECT gc.id, gc.name, gc.subject_id, sub.name,
               (SELECT COUNT(*) FROM grade_details gd WHERE gd.grade_category_id = gc.id)
             FROM grade_categories gc
             JOIN subjects sub ON sub.id = gc.subject_id
             WHERE gc.class_id = ? AND gc.semester_id = ?
             ORDER BY sub.name, gc.name",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((&class_id, &semester.id), |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let subject_id: String = r.get(2)?;
            let subject_name: String = r.get(3)?;
            let detail_count: i64 = r.get(4)?;
            Ok(json!({
                "categoryId": id,
                "name": name,
                "subjectId": subject_id,
                "subjectName": subject_name,
                "detailCount": detail_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "semesterId": semester.id, "categories": rows }))
}

fn grading_create_category(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let name = get_required_str(params, "name")?;

    fetch_class(conn, &class_id)?;
    if !row_exists(conn, "subjects", &subject_id)? {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }
    // Categories are always scoped to the resolved active semester; a
    // caller-supplied semester id is never trusted here.
    let semester = active_semester(conn)?;

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM grade_categories
             WHERE class_id = ? AND subject_id = ? AND semester_id = ? AND name = ?",
            (&class_id, &subject_id, &semester.id, &name),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_some() {
        return Err(HandlerErr::with_details(
            "conflict",
            "grade category already exists for this class, subject and semester",
            json!({ "name": name }),
        ));
    }

    let category_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grade_categories(id, class_id, subject_id, semester_id, name)
         VALUES(?, ?, ?, ?, ?)",
        (&category_id, &class_id, &subject_id, &semester.id, &name),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "grade_categories" }),
        )
    })?;

    Ok(json!({
        "categoryId": category_id,
        "classId": class_id,
        "subjectId": subject_id,
        "semesterId": semester.id,
        "name": name
    }))
}

fn grading_delete_category(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let category_id = get_required_str(params, "categoryId")?;
    fetch_category(conn, &category_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (sql, table) in [
        (
            "DELETE FROM student_grades
             WHERE grade_detail_id IN (SELECT id FROM grade_details WHERE grade_category_id = ?)",
            "student_grades",
        ),
        (
            "DELETE FROM grade_details WHERE grade_category_id = ?",
            "grade_details",
        ),
        (
            "DELETE FROM grade_categories WHERE id = ?",
            "grade_categories",
        ),
    ] {
        tx.execute(sql, [&category_id]).map_err(|e| {
            HandlerErr::with_details("db_delete_failed", e.to_string(), json!({ "table": table }))
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
}

fn grading_create_detail(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let category_id = get_required_str(params, "categoryId")?;
    let name = get_required_str(params, "name")?;
    let date = get_required_date(params, "date")?;

    let category = fetch_category(conn, &category_id)?;

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM grade_details WHERE grade_category_id = ? AND name = ?",
            (&category.id, &name),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_some() {
        return Err(HandlerErr::with_details(
            "conflict",
            "grade detail already exists in this category",
            json!({ "name": name }),
        ));
    }

    let enrollments = list_enrollments(conn, &category.class_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let detail_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO grade_details(id, grade_category_id, name, date) VALUES(?, ?, ?, ?)",
        (&detail_id, &category.id, &name, &date),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "grade_details" }),
        )
    })?;

    // One blank score row per current enrollment, enrollment link set at
    // creation time so score writes never resolve it lazily.
    for enrollment in &enrollments {
        tx.execute(
            "INSERT INTO student_grades(id, student_class_id, grade_detail_id, score)
             VALUES(?, ?, ?, NULL)",
            (Uuid::new_v4().to_string(), &enrollment.id, &detail_id),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_insert_failed",
                e.to_string(),
                json!({ "table": "student_grades" }),
            )
        })?;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "detailId": detail_id,
        "categoryId": category.id,
        "name": name,
        "date": date,
        "gradeRowsCreated": enrollments.len()
    }))
}

fn grading_list_scores(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let detail_id = get_required_str(params, "detailId")?;
    if !row_exists(conn, "grade_details", &detail_id)? {
        return Err(HandlerErr::new("not_found", "grade detail not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT sg.id, sg.student_class_id, s.id, s.name, sg.score
             FROM student_grades sg
             JOIN student_classes sc ON sc.id = sg.student_class_id
             JOIN students s ON s.id = sc.student_id
             WHERE sg.grade_detail_id = ?
             ORDER BY s.name",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&detail_id], |r| {
            let id: String = r.get(0)?;
            let student_class_id: String = r.get(1)?;
            let student_id: String = r.get(2)?;
            let name: String = r.get(3)?;
            let score: Option<f64> = r.get(4)?;
            Ok(json!({
                "studentGradeId": id,
                "studentClassId": student_class_id,
                "studentId": student_id,
                "name": name,
                "score": score
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "detailId": detail_id, "scores": rows }))
}

fn grading_set_score(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_grade_id = get_required_str(params, "studentGradeId")?;

    let score = match params.get("score") {
        None => {
            return Err(HandlerErr::new("bad_params", "missing score"));
        }
        Some(v) if v.is_null() => None,
        Some(v) => {
            let Some(n) = v.as_f64() else {
                return Err(HandlerErr::new(
                    "bad_params",
                    "score must be a finite number or null",
                ));
            };
            if !n.is_finite() {
                return Err(HandlerErr::new(
                    "bad_params",
                    "score must be a finite number or null",
                ));
            }
            if n < 0.0 {
                return Err(HandlerErr::with_details(
                    "bad_params",
                    "negative scores are not allowed",
                    json!({ "score": n }),
                ));
            }
            Some(n)
        }
    };

    let changed = conn
        .execute(
            "UPDATE student_grades SET score = ? WHERE id = ?",
            (&score, &student_grade_id),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_update_failed",
                e.to_string(),
                json!({ "table": "student_grades" }),
            )
        })?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "student grade not found"));
    }

    Ok(json!({ "studentGradeId": student_grade_id, "score": score }))
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
        "grading.listCategories" => Some(with_conn(state, req, grading_list_categories)),
        "grading.createCategory" => Some(with_conn(state, req, grading_create_category)),
        "grading.deleteCategory" => Some(with_conn(state, req, grading_delete_category)),
        "grading.createDetail" => Some(with_conn(state, req, grading_create_detail)),
        "grading.listScores" => Some(with_conn(state, req, grading_list_scores)),
        "grading.setScore" => Some(with_conn(state, req, grading_set_score)),
        _ => None,
    }
}
