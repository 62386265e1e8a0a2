use crate::ipc::error::err;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn db(e: rusqlite::Error) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{} must not be empty", key),
        ));
    }
    Ok(trimmed.to_string())
}

pub fn get_required_str_array(
    params: &serde_json::Value,
    key: &str,
) -> Result<Vec<String>, HandlerErr> {
    let Some(raw) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", format!("missing {}", key)));
    };
    let mut out = Vec::with_capacity(raw.len());
    for v in raw {
        let Some(s) = v.as_str() else {
            return Err(HandlerErr::new(
                "bad_params",
                format!("{} must be an array of strings", key),
            ));
        };
        out.push(s.to_string());
    }
    if out.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{} must not be empty", key),
        ));
    }
    Ok(out)
}

pub fn get_required_date(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, key)?;
    match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        Ok(_) => Ok(raw),
        Err(_) => Err(HandlerErr::with_details(
            "bad_params",
            format!("{} must be YYYY-MM-DD", key),
            json!({ key: raw }),
        )),
    }
}

#[derive(Debug, Clone)]
pub struct YearRow {
    pub id: String,
    pub label: String,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct SemesterRow {
    pub id: String,
    pub academic_year_id: String,
    pub name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct ClassRow {
    pub id: String,
    pub name: String,
    pub teacher_id: String,
    pub academic_year_id: String,
}

#[derive(Debug, Clone)]
pub struct EnrollmentRow {
    pub id: String,
    pub student_id: String,
}

/// The single active academic year. Its absence is a hard precondition
/// failure for every period-scoped operation, not an empty result.
pub fn active_year(conn: &Connection) -> Result<YearRow, HandlerErr> {
    conn.query_row(
        "SELECT id, label, is_active FROM academic_years WHERE is_active = 1",
        [],
        |r| {
            Ok(YearRow {
                id: r.get(0)?,
                label: r.get(1)?,
                is_active: r.get::<_, i64>(2)? != 0,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::new("not_found", "no active academic year"))
}

/// The active semester, resolved through the active year. A semester whose
/// `is_active` flag survived a year deactivation is never returned.
pub fn active_semester(conn: &Connection) -> Result<SemesterRow, HandlerErr> {
    conn.query_row(
        "SELECT s.id, s.academic_year_id, s.name, s.is_active
         FROM semesters s
         JOIN academic_years y ON y.id = s.academic_year_id
         WHERE s.is_active = 1 AND y.is_active = 1",
        [],
        |r| {
            Ok(SemesterRow {
                id: r.get(0)?,
                academic_year_id: r.get(1)?,
                name: r.get(2)?,
                is_active: r.get::<_, i64>(3)? != 0,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::new("not_found", "no active semester"))
}

pub fn fetch_class(conn: &Connection, class_id: &str) -> Result<ClassRow, HandlerErr> {
    conn.query_row(
        "SELECT id, name, teacher_id, academic_year_id FROM classes WHERE id = ?",
        [class_id],
        |r| {
            Ok(ClassRow {
                id: r.get(0)?,
                name: r.get(1)?,
                teacher_id: r.get(2)?,
                academic_year_id: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::new("not_found", "class not found"))
}

pub fn row_exists(
    conn: &Connection,
    table: &str,
    id: &str,
) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::db)
}

pub fn list_enrollments(
    conn: &Connection,
    class_id: &str,
) -> Result<Vec<EnrollmentRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT sc.id, sc.student_id
             FROM student_classes sc
             JOIN students s ON s.id = sc.student_id
             WHERE sc.class_id = ?
             ORDER BY s.name",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([class_id], |r| {
        Ok(EnrollmentRow {
            id: r.get(0)?,
            student_id: r.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}
