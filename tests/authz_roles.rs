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

struct Client {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Client {
    fn new() -> Client {
        let (child, stdin, reader) = spawn_sidecar();
        Client {
            _child: child,
            stdin,
            reader,
            next_id: 0,
        }
    }

    fn request_as(
        &mut self,
        role: Option<&str>,
        method: &str,
        params: serde_json::Value,
    ) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(role) = role {
            payload["role"] = json!(role);
        }
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn ok_as(
        &mut self,
        role: &str,
        method: &str,
        params: serde_json::Value,
    ) -> serde_json::Value {
        let value = self.request_as(Some(role), method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} as {} failed: {}",
            method,
            role,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    fn code_as(&mut self, role: Option<&str>, method: &str, params: serde_json::Value) -> String {
        let value = self.request_as(role, method, params);
        if value.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            return "ok".to_string();
        }
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .expect("error code")
            .to_string()
    }
}

fn take_str(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

fn seed_class(client: &mut Client, prefix: &str) -> String {
    let workspace = temp_dir(prefix);
    let _ = client.ok_as(
        "admin",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let year = client.ok_as(
        "admin",
        "years.create",
        json!({ "label": "2025/2026", "isActive": true }),
    );
    let teacher = client.ok_as("admin", "teachers.create", json!({ "name": "Bu Sari" }));
    let class = client.ok_as(
        "admin",
        "classes.create",
        json!({
            "yearId": take_str(&year, "yearId"),
            "name": "7A",
            "teacherId": take_str(&teacher, "teacherId")
        }),
    );
    let class_id = take_str(&class, "classId");
    let student = client.ok_as("admin", "students.create", json!({ "name": "Aisyah" }));
    let _ = client.ok_as(
        "admin",
        "classes.enrollStudents",
        json!({ "classId": class_id, "studentIds": [take_str(&student, "studentId")] }),
    );
    class_id
}

#[test]
fn admin_writes_are_closed_to_other_roles() {
    let mut client = Client::new();
    let _ = seed_class(&mut client, "sekolah-authz-admin");

    for role in ["wali_kelas", "kepala_sekolah", "orang_tua"] {
        assert_eq!(
            client.code_as(Some(role), "years.create", json!({ "label": "2026/2027" })),
            "forbidden",
            "{} must not create years",
            role
        );
        assert_eq!(
            client.code_as(Some(role), "students.create", json!({ "name": "Dewi" })),
            "forbidden",
            "{} must not create students",
            role
        );
    }
}

#[test]
fn class_writes_are_open_to_the_homeroom_role() {
    let mut client = Client::new();
    let class_id = seed_class(&mut client, "sekolah-authz-homeroom");

    let _ = client.ok_as(
        "wali_kelas",
        "attendance.openDate",
        json!({ "classId": class_id, "date": "2025-09-01" }),
    );
    let _ = client.ok_as(
        "wali_kelas",
        "evaluations.create",
        json!({ "classId": class_id, "title": "Sikap" }),
    );

    assert_eq!(
        client.code_as(
            Some("kepala_sekolah"),
            "attendance.openDate",
            json!({ "classId": class_id, "date": "2025-09-02" })
        ),
        "forbidden"
    );
    assert_eq!(
        client.code_as(
            Some("orang_tua"),
            "evaluations.create",
            json!({ "classId": class_id, "title": "Lain" })
        ),
        "forbidden"
    );
}

#[test]
fn summaries_and_reads_follow_the_role_table() {
    let mut client = Client::new();
    let class_id = seed_class(&mut client, "sekolah-authz-reads");

    for role in ["admin", "wali_kelas", "kepala_sekolah"] {
        let _ = client.ok_as(
            role,
            "analytics.classSummary",
            json!({ "classId": class_id }),
        );
    }
    assert_eq!(
        client.code_as(
            Some("orang_tua"),
            "analytics.classSummary",
            json!({ "classId": class_id })
        ),
        "forbidden"
    );

    // Plain reads are open to every known role.
    for role in ["admin", "wali_kelas", "kepala_sekolah", "orang_tua"] {
        let _ = client.ok_as(role, "years.list", json!({}));
        let _ = client.ok_as(role, "classes.listStudents", json!({ "classId": class_id }));
    }
}

#[test]
fn unknown_or_missing_roles_are_rejected_everywhere_but_health() {
    let mut client = Client::new();
    let class_id = seed_class(&mut client, "sekolah-authz-unknown");

    assert_eq!(
        client.code_as(None, "years.list", json!({})),
        "forbidden",
        "missing role"
    );
    assert_eq!(
        client.code_as(Some("guru"), "years.list", json!({})),
        "forbidden",
        "unknown role"
    );
    assert_eq!(
        client.code_as(None, "classes.listStudents", json!({ "classId": class_id })),
        "forbidden"
    );

    // health stays reachable without any role.
    assert_eq!(client.code_as(None, "health", json!({})), "ok");
}
