//! Capability table resolving `(role, method) -> allow/deny` in one place,
//! so business handlers never branch on the caller's role.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    WaliKelas,
    KepalaSekolah,
    OrangTua,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Role> {
        match raw {
            "admin" => Some(Role::Admin),
            "wali_kelas" => Some(Role::WaliKelas),
            "kepala_sekolah" => Some(Role::KepalaSekolah),
            "orang_tua" => Some(Role::OrangTua),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capability {
    /// No role needed at all.
    Public,
    /// Workspace lifecycle, period transitions, directory writes.
    AdminOnly,
    /// Day-to-day class operations by the homeroom teacher.
    ClassWrite,
    /// Aggregated summaries for school leadership.
    Summary,
    /// Any authenticated role.
    Read,
}

fn capability_for(method: &str) -> Capability {
    match method {
        "health" => Capability::Public,

        "workspace.select" | "workspace.export" | "workspace.import" => Capability::AdminOnly,

        "years.create" | "years.update" | "years.delete" | "semesters.setActive" => {
            Capability::AdminOnly
        }

        "students.create" | "teachers.create" | "subjects.create" | "classes.create"
        | "classes.delete" => Capability::AdminOnly,

        "classes.enrollStudents"
        | "classes.unenroll"
        | "grading.createCategory"
        | "grading.deleteCategory"
        | "grading.createDetail"
        | "grading.setScore"
        | "attendance.openDate"
        | "attendance.recordStatuses"
        | "attendance.deleteDate"
        | "evaluations.create"
        | "evaluations.setDescription"
        | "evaluations.delete" => Capability::ClassWrite,

        "analytics.classSummary" => Capability::Summary,

        _ => Capability::Read,
    }
}

pub fn allows(role: Option<&str>, method: &str) -> bool {
    let capability = capability_for(method);
    if capability == Capability::Public {
        return true;
    }
    let Some(role) = role.and_then(Role::parse) else {
        return false;
    };
    match capability {
        Capability::Public => true,
        Capability::AdminOnly => role == Role::Admin,
        Capability::ClassWrite => matches!(role, Role::Admin | Role::WaliKelas),
        Capability::Summary => {
            matches!(role, Role::Admin | Role::WaliKelas | Role::KepalaSekolah)
        }
        Capability::Read => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_needs_no_role() {
        assert!(allows(None, "health"));
        assert!(allows(Some("orang_tua"), "health"));
    }

    #[test]
    fn period_transitions_are_admin_only() {
        assert!(allows(Some("admin"), "years.create"));
        assert!(!allows(Some("wali_kelas"), "years.create"));
        assert!(!allows(Some("kepala_sekolah"), "semesters.setActive"));
        assert!(!allows(None, "years.update"));
    }

    #[test]
    fn homeroom_teacher_runs_class_operations() {
        assert!(allows(Some("wali_kelas"), "attendance.openDate"));
        assert!(allows(Some("wali_kelas"), "grading.setScore"));
        assert!(!allows(Some("orang_tua"), "attendance.recordStatuses"));
        assert!(!allows(Some("kepala_sekolah"), "classes.enrollStudents"));
    }

    #[test]
    fn summary_excludes_parents() {
        assert!(allows(Some("kepala_sekolah"), "analytics.classSummary"));
        assert!(!allows(Some("orang_tua"), "analytics.classSummary"));
    }

    #[test]
    fn reads_allow_any_known_role_only() {
        assert!(allows(Some("orang_tua"), "evaluations.list"));
        assert!(allows(Some("kepala_sekolah"), "years.list"));
        assert!(!allows(Some("guru_honorer"), "years.list"));
        assert!(!allows(None, "years.list"));
    }
}
