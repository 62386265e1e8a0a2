use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub const SEMESTER_ODD: &str = "odd";
pub const SEMESTER_EVEN: &str = "even";

fn label_taken(
    conn: &Connection,
    label: &str,
    exclude_year_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM academic_years WHERE label = ?",
            [label],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    Ok(match found {
        Some(id) => exclude_year_id != Some(id.as_str()),
        None => false,
    })
}

fn semesters_json(conn: &Connection, year_id: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, is_active
             FROM semesters
             WHERE academic_year_id = ?
             ORDER BY name DESC",
        )
        .map_err(HandlerErr::db)?;
    // 'odd' sorts after 'even'; DESC keeps the odd semester first.
    stmt.query_map([year_id], |r| {
        let id: String = r.get(0)?;
        let name: String = r.get(1)?;
        let is_active: i64 = r.get(2)?;
        Ok(json!({
            "semesterId": id,
            "name": name,
            "isActive": is_active != 0
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn years_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, label, is_active FROM academic_years ORDER BY label DESC")
        .map_err(HandlerErr::db)?;
    let years = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut rows = Vec::with_capacity(years.len());
    for (id, label, is_active) in years {
        let semesters = semesters_json(conn, &id)?;
        rows.push(json!({
            "yearId": id,
            "label": label,
            "isActive": is_active,
            "semesters": semesters
        }));
    }
    Ok(json!({ "years": rows }))
}

fn years_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let label = get_required_str(params, "label")?;
    let make_active = params
        .get("isActive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if label_taken(conn, &label, None)? {
        return Err(HandlerErr::with_details(
            "conflict",
            "academic year label already exists",
            json!({ "label": label }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Activation first forces every other year and every semester inactive,
    // so the single-active invariant holds the moment the new rows land.
    if make_active {
        tx.execute(
            "UPDATE academic_years SET is_active = 0 WHERE is_active = 1",
            [],
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_update_failed",
                e.to_string(),
                json!({ "table": "academic_years" }),
            )
        })?;
        tx.execute("UPDATE semesters SET is_active = 0 WHERE is_active = 1", [])
            .map_err(|e| {
                HandlerErr::with_details(
                    "db_update_failed",
                    e.to_string(),
                    json!({ "table": "semesters" }),
                )
            })?;
    }

    let year_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO academic_years(id, label, is_active) VALUES(?, ?, ?)",
        (&year_id, &label, make_active as i64),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "academic_years" }),
        )
    })?;

    // Semesters come in a fixed odd/even pair; the odd one inherits the
    // year's active flag, the even one always starts inactive.
    let odd_id = Uuid::new_v4().to_string();
    let even_id = Uuid::new_v4().to_string();
    for (semester_id, name, is_active) in [
        (&odd_id, SEMESTER_ODD, make_active as i64),
        (&even_id, SEMESTER_EVEN, 0),
    ] {
        tx.execute(
            "INSERT INTO semesters(id, academic_year_id, name, is_active) VALUES(?, ?, ?, ?)",
            (semester_id, &year_id, name, is_active),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_insert_failed",
                e.to_string(),
                json!({ "table": "semesters" }),
            )
        })?;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "yearId": year_id,
        "label": label,
        "isActive": make_active,
        "semesters": [
            { "semesterId": odd_id, "name": SEMESTER_ODD, "isActive": make_active },
            { "semesterId": even_id, "name": SEMESTER_EVEN, "isActive": false }
        ]
    }))
}

fn years_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year_id = get_required_str(params, "yearId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "missing/invalid patch"));
    };

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM academic_years WHERE id = ?",
            [&year_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "academic year not found"));
    }

    let new_label = match patch.get("label") {
        None => None,
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::new("bad_params", "patch.label must be a string"));
            };
            let s = s.trim().to_string();
            if s.is_empty() {
                return Err(HandlerErr::new("bad_params", "label must not be empty"));
            }
            Some(s)
        }
    };
    let new_active = match patch.get("isActive") {
        None => None,
        Some(v) => {
            let Some(b) = v.as_bool() else {
                return Err(HandlerErr::new(
                    "bad_params",
                    "patch.isActive must be a boolean",
                ));
            };
            Some(b)
        }
    };
    if new_label.is_none() && new_active.is_none() {
        return Err(HandlerErr::new(
            "bad_params",
            "patch must include at least one field",
        ));
    }

    if let Some(label) = &new_label {
        if label_taken(conn, label, Some(&year_id))? {
            return Err(HandlerErr::with_details(
                "conflict",
                "academic year label already exists",
                json!({ "label": label }),
            ));
        }
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    match new_active {
        Some(true) => {
            // Activating a year demotes every other year. Their semester
            // flags are intentionally left alone; the semester resolver
            // only honors flags under the active year.
            tx.execute(
                "UPDATE academic_years SET is_active = 0 WHERE id != ? AND is_active = 1",
                [&year_id],
            )
            .map_err(|e| {
                HandlerErr::with_details(
                    "db_update_failed",
                    e.to_string(),
                    json!({ "table": "academic_years" }),
                )
            })?;
            tx.execute(
                "UPDATE academic_years SET is_active = 1 WHERE id = ?",
                [&year_id],
            )
            .map_err(|e| {
                HandlerErr::with_details(
                    "db_update_failed",
                    e.to_string(),
                    json!({ "table": "academic_years" }),
                )
            })?;
        }
        Some(false) => {
            // Deactivation cascades to the year's own semesters.
            tx.execute(
                "UPDATE academic_years SET is_active = 0 WHERE id = ?",
                [&year_id],
            )
            .map_err(|e| {
                HandlerErr::with_details(
                    "db_update_failed",
                    e.to_string(),
                    json!({ "table": "academic_years" }),
                )
            })?;
            tx.execute(
                "UPDATE semesters SET is_active = 0 WHERE academic_year_id = ?",
                [&year_id],
            )
            .map_err(|e| {
                HandlerErr::with_details(
                    "db_update_failed",
                    e.to_string(),
                    json!({ "table": "semesters" }),
                )
            })?;
        }
        None => {}
    }

    if let Some(label) = &new_label {
        tx.execute(
            "UPDATE academic_years SET label = ? WHERE id = ?",
            (label, &year_id),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_update_failed",
                e.to_string(),
                json!({ "table": "academic_years" }),
            )
        })?;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let (label, is_active): (String, i64) = conn
        .query_row(
            "SELECT label, is_active FROM academic_years WHERE id = ?",
            [&year_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(HandlerErr::db)?;
    let semesters = semesters_json(conn, &year_id)?;

    Ok(json!({
        "yearId": year_id,
        "label": label,
        "isActive": is_active != 0,
        "semesters": semesters
    }))
}

fn years_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year_id = get_required_str(params, "yearId")?;

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM academic_years WHERE id = ?",
            [&year_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "academic year not found"));
    }

    let class_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM classes WHERE academic_year_id = ?",
            [&year_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;
    if class_count > 0 {
        return Err(HandlerErr::with_details(
            "conflict",
            "classes still reference this academic year",
            json!({ "classCount": class_count }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM semesters WHERE academic_year_id = ?", [&year_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "semesters" }),
            )
        })?;
    tx.execute("DELETE FROM academic_years WHERE id = ?", [&year_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "academic_years" }),
            )
        })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
}

fn semesters_set_active(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let semester_id = get_required_str(params, "semesterId")?;
    let Some(is_active) = params.get("isActive").and_then(|v| v.as_bool()) else {
        return Err(HandlerErr::new("bad_params", "missing isActive"));
    };

    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT academic_year_id, name FROM semesters WHERE id = ?",
            [&semester_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((year_id, name)) = row else {
        return Err(HandlerErr::new("not_found", "semester not found"));
    };

    let year_active: i64 = conn
        .query_row(
            "SELECT is_active FROM academic_years WHERE id = ?",
            [&year_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;
    if year_active == 0 {
        return Err(HandlerErr::new(
            "invalid_state",
            "owning academic year is not active",
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if is_active {
        // Exactly one active semester per year: demote siblings first.
        tx.execute(
            "UPDATE semesters SET is_active = 0 WHERE academic_year_id = ? AND id != ?",
            (&year_id, &semester_id),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_update_failed",
                e.to_string(),
                json!({ "table": "semesters" }),
            )
        })?;
    }
    tx.execute(
        "UPDATE semesters SET is_active = ? WHERE id = ?",
        (is_active as i64, &semester_id),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_update_failed",
            e.to_string(),
            json!({ "table": "semesters" }),
        )
    })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "semesterId": semester_id,
        "yearId": year_id,
        "name": name,
        "isActive": is_active
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
        "years.list" => Some(with_conn(state, req, |c, _| years_list(c))),
        "years.create" => Some(with_conn(state, req, years_create)),
        "years.update" => Some(with_conn(state, req, years_update)),
        "years.delete" => Some(with_conn(state, req, years_delete)),
        "semesters.setActive" => Some(with_conn(state, req, semesters_set_active)),
        _ => None,
    }
}
