use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_sekolahd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sekolahd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "role": "admin",
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error body")
}

fn find_year<'a>(years: &'a [serde_json::Value], label: &str) -> &'a serde_json::Value {
    years
        .iter()
        .find(|y| y.get("label").and_then(|v| v.as_str()) == Some(label))
        .unwrap_or_else(|| panic!("year {} missing", label))
}

fn semester<'a>(year: &'a serde_json::Value, name: &str) -> &'a serde_json::Value {
    year.get("semesters")
        .and_then(|v| v.as_array())
        .and_then(|rows| {
            rows.iter()
                .find(|s| s.get("name").and_then(|v| v.as_str()) == Some(name))
        })
        .unwrap_or_else(|| panic!("semester {} missing", name))
}

fn is_active(v: &serde_json::Value) -> bool {
    v.get("isActive").and_then(|b| b.as_bool()).unwrap_or(false)
}

#[test]
fn active_year_creation_seeds_semester_pair() {
    let workspace = temp_dir("sekolah-period-pair");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "years.create",
        json!({ "label": "2025/2026", "isActive": true }),
    );
    assert_eq!(created.get("isActive").and_then(|v| v.as_bool()), Some(true));
    let semesters = created
        .get("semesters")
        .and_then(|v| v.as_array())
        .expect("semesters");
    assert_eq!(semesters.len(), 2);
    let odd = semesters
        .iter()
        .find(|s| s.get("name").and_then(|v| v.as_str()) == Some("odd"))
        .expect("odd semester");
    let even = semesters
        .iter()
        .find(|s| s.get("name").and_then(|v| v.as_str()) == Some("even"))
        .expect("even semester");
    assert!(is_active(odd), "odd semester inherits the active flag");
    assert!(!is_active(even), "even semester starts inactive");

    // An inactive year seeds two inactive semesters.
    let dormant = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "years.create",
        json!({ "label": "2023/2024" }),
    );
    for s in dormant.get("semesters").and_then(|v| v.as_array()).unwrap() {
        assert!(!is_active(s));
    }

    let error = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "years.create",
        json!({ "label": "2025/2026" }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("conflict"));
}

#[test]
fn activating_a_new_year_demotes_the_previous_one() {
    let workspace = temp_dir("sekolah-period-demote");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "years.create",
        json!({ "label": "2025/2026", "isActive": true }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "years.create",
        json!({ "label": "2024/2025", "isActive": true }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "4", "years.list", json!({}));
    let years = listed.get("years").and_then(|v| v.as_array()).unwrap();
    assert_eq!(years.len(), 2);

    let old = find_year(years, "2025/2026");
    assert!(!is_active(old), "previous year flips inactive");
    assert!(!is_active(semester(old, "odd")));
    assert!(!is_active(semester(old, "even")));

    let new = find_year(years, "2024/2025");
    assert!(is_active(new));
    assert!(is_active(semester(new, "odd")));
    assert!(!is_active(semester(new, "even")));

    let active_count = years.iter().filter(|y| is_active(y)).count();
    assert_eq!(active_count, 1);
}

#[test]
fn semester_activation_is_exclusive_and_gated_by_the_year() {
    let workspace = temp_dir("sekolah-period-semester");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let active = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "years.create",
        json!({ "label": "2025/2026", "isActive": true }),
    );
    let dormant = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "years.create",
        json!({ "label": "2023/2024" }),
    );

    let even_id = active
        .get("semesters")
        .and_then(|v| v.as_array())
        .and_then(|rows| {
            rows.iter()
                .find(|s| s.get("name").and_then(|v| v.as_str()) == Some("even"))
        })
        .and_then(|s| s.get("semesterId"))
        .and_then(|v| v.as_str())
        .expect("even semester id")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "semesters.setActive",
        json!({ "semesterId": even_id, "isActive": true }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "5", "years.list", json!({}));
    let years = listed.get("years").and_then(|v| v.as_array()).unwrap();
    let year = find_year(years, "2025/2026");
    assert!(!is_active(semester(year, "odd")), "sibling demoted");
    assert!(is_active(semester(year, "even")));

    // Semesters under an inactive year cannot be activated.
    let dormant_odd = dormant
        .get("semesters")
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .and_then(|s| s.get("semesterId"))
        .and_then(|v| v.as_str())
        .expect("dormant semester id")
        .to_string();
    let error = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "semesters.setActive",
        json!({ "semesterId": dormant_odd, "isActive": true }),
    );
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("invalid_state")
    );

    let error = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "semesters.setActive",
        json!({ "semesterId": "missing", "isActive": true }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("not_found"));
}

#[test]
fn deactivating_a_year_cascades_to_its_semesters() {
    let workspace = temp_dir("sekolah-period-deactivate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "years.create",
        json!({ "label": "2025/2026", "isActive": true }),
    );
    let year_id = created
        .get("yearId")
        .and_then(|v| v.as_str())
        .expect("yearId")
        .to_string();

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "years.update",
        json!({ "yearId": year_id, "patch": { "isActive": false } }),
    );
    assert_eq!(updated.get("isActive").and_then(|v| v.as_bool()), Some(false));
    for s in updated.get("semesters").and_then(|v| v.as_array()).unwrap() {
        assert!(!is_active(s), "semester flags cascade on deactivation");
    }

    // Reactivation restores the year but not any semester.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "years.update",
        json!({ "yearId": year_id, "patch": { "isActive": true } }),
    );
    assert_eq!(updated.get("isActive").and_then(|v| v.as_bool()), Some(true));
    for s in updated.get("semesters").and_then(|v| v.as_array()).unwrap() {
        assert!(!is_active(s), "reactivation does not resurrect semesters");
    }

    let error = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "years.update",
        json!({ "yearId": "missing", "patch": { "isActive": true } }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("not_found"));
}

#[test]
fn year_labels_stay_unique_through_updates_and_deletes() {
    let workspace = temp_dir("sekolah-period-labels");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "years.create",
        json!({ "label": "2025/2026", "isActive": true }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "years.create",
        json!({ "label": "2024/2025" }),
    );
    let second_id = second
        .get("yearId")
        .and_then(|v| v.as_str())
        .expect("yearId")
        .to_string();

    let error = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "years.update",
        json!({ "yearId": second_id, "patch": { "label": "2025/2026" } }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("conflict"));

    // Renaming to its own label is not a conflict.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "years.update",
        json!({ "yearId": second_id, "patch": { "label": "2024/2025" } }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "years.delete",
        json!({ "yearId": second_id }),
    );
    let error = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "years.delete",
        json!({ "yearId": second_id }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("not_found"));

    let first_id = first
        .get("yearId")
        .and_then(|v| v.as_str())
        .expect("yearId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "teachers.create",
        json!({ "name": "Bu Sari" }),
    );
    let teachers = request_ok(&mut stdin, &mut reader, "9", "teachers.list", json!({}));
    let teacher_id = teachers
        .get("teachers")
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .and_then(|t| t.get("teacherId"))
        .and_then(|v| v.as_str())
        .expect("teacherId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "classes.create",
        json!({ "yearId": first_id, "name": "7A", "teacherId": teacher_id }),
    );

    // Years referenced by classes cannot be removed.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "years.delete",
        json!({ "yearId": first_id }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("conflict"));
}
