use crate::schedule::RosterDirectory;
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "roster.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cohorts(
            id TEXT PRIMARY KEY,
            program_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(program_id) REFERENCES programs(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cohorts_program ON cohorts(program_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            student_no TEXT,
            grade TEXT,
            cohort_id TEXT,
            notes TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(cohort_id) REFERENCES cohorts(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_cohort ON students(cohort_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT,
            department TEXT,
            program_id TEXT,
            location TEXT,
            default_duration INTEGER,
            event_type TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(program_id) REFERENCES programs(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_program ON classes(program_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT,
            event_type TEXT NOT NULL,
            event_title TEXT NOT NULL,
            location TEXT NOT NULL,
            start_time TEXT NOT NULL,
            duration INTEGER NOT NULL,
            end_time TEXT NOT NULL,
            recurrence TEXT NOT NULL DEFAULT 'None',
            recurrence_end_date TEXT,
            notes TEXT,
            responsible_party TEXT NOT NULL,
            point_of_contact TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_student ON assignments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_start ON assignments(start_time)",
        [],
    )?;

    // Existing workspaces may predate the batch-import columns. Add them if needed.
    ensure_assignment_import_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_batch ON assignments(import_batch_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_assignment_import_columns(conn: &Connection) -> anyhow::Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(assignments)")?;
    let cols: Vec<String> = stmt
        .query_map([], |r| r.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;
    if !cols.iter().any(|c| c == "import_batch_id") {
        conn.execute("ALTER TABLE assignments ADD COLUMN import_batch_id TEXT", [])?;
    }
    if !cols.iter().any(|c| c == "import_source") {
        conn.execute("ALTER TABLE assignments ADD COLUMN import_source TEXT", [])?;
    }
    Ok(())
}

pub fn active_student_ids_in_cohort(
    conn: &Connection,
    cohort_id: &str,
) -> anyhow::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT id FROM students WHERE cohort_id = ? AND active = 1 ORDER BY id")?;
    let ids = stmt
        .query_map([cohort_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn cohort_ids_in_program(conn: &Connection, program_id: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT id FROM cohorts WHERE program_id = ? AND active = 1 ORDER BY id")?;
    let ids = stmt
        .query_map([program_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

impl RosterDirectory for Connection {
    fn active_student_ids_in_cohort(&self, cohort_id: &str) -> anyhow::Result<Vec<String>> {
        active_student_ids_in_cohort(self, cohort_id)
    }

    fn cohort_ids_in_program(&self, program_id: &str) -> anyhow::Result<Vec<String>> {
        cohort_ids_in_program(self, program_id)
    }
}
