//! SQLite store for enrolled students, their embeddings, and attendance rows.
//!
//! Student rows and embeddings are written in one transaction, so a reader
//! never sees a student with a half-replaced embedding set.

use crate::error::StoreError;
use chrono::NaiveDate;
use rollcall_core::{AttendError, AttendanceRecord, EmbeddingStore, Embedding, EnrolledStudent, RecordStore};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query_students(&self, class: Option<(&str, &str)>) -> Result<Vec<EnrolledStudent>, StoreError> {
        let conn = self.conn();
        // One read transaction: students and embeddings from the same snapshot.
        let tx = conn.unchecked_transaction()?;

        let mut students = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT usn, name, semester, section FROM students
                 WHERE (?1 IS NULL OR semester = ?1) AND (?2 IS NULL OR section = ?2)
                 ORDER BY rowid",
            )?;
            let (semester, section) = class.unzip();
            let rows = stmt.query_map(params![semester, section], |row| {
                Ok(EnrolledStudent {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    semester: row.get(2)?,
                    section: row.get(3)?,
                    embeddings: Vec::new(),
                })
            })?;
            for row in rows {
                students.push(row?);
            }
        }

        let mut by_usn: HashMap<String, Vec<Embedding>> = HashMap::new();
        {
            let mut stmt = tx.prepare(
                "SELECT e.usn, e.position, e.dim, e.data, e.model_version
                 FROM embeddings e JOIN students s ON s.usn = e.usn
                 WHERE (?1 IS NULL OR s.semester = ?1) AND (?2 IS NULL OR s.section = ?2)
                 ORDER BY e.usn, e.position",
            )?;
            let (semester, section) = class.unzip();
            let mut rows = stmt.query(params![semester, section])?;
            while let Some(row) = rows.next()? {
                let usn: String = row.get(0)?;
                let position: i64 = row.get(1)?;
                let dim: i64 = row.get(2)?;
                let blob: Vec<u8> = row.get(3)?;
                let values = decode_embedding_blob(&blob, dim as usize).ok_or_else(|| {
                    StoreError::CorruptEmbedding {
                        usn: usn.clone(),
                        position,
                        reason: format!("{} bytes for dimension {dim}", blob.len()),
                    }
                })?;
                by_usn.entry(usn).or_default().push(Embedding {
                    values,
                    model_version: row.get(4)?,
                });
            }
        }
        tx.commit()?;

        for student in &mut students {
            student.embeddings = by_usn.remove(&student.id).unwrap_or_default();
        }
        Ok(students)
    }

    fn upsert_student(&self, student: &EnrolledStudent) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let existed = tx
            .query_row(
                "SELECT 1 FROM students WHERE usn = ?1",
                params![student.id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        tx.execute(
            "INSERT INTO students(usn, name, semester, section) VALUES(?1, ?2, ?3, ?4)
             ON CONFLICT(usn) DO UPDATE SET
               name = excluded.name,
               semester = excluded.semester,
               section = excluded.section",
            params![student.id, student.name, student.semester, student.section],
        )?;
        tx.execute("DELETE FROM embeddings WHERE usn = ?1", params![student.id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO embeddings(usn, position, dim, data, model_version)
                 VALUES(?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, embedding) in student.embeddings.iter().enumerate() {
                stmt.execute(params![
                    student.id,
                    position as i64,
                    embedding.values.len() as i64,
                    encode_embedding_blob(&embedding.values),
                    embedding.model_version,
                ])?;
            }
        }
        tx.commit()?;
        Ok(existed)
    }

    fn insert_record(
        &self,
        subject: &str,
        semester: &str,
        section: &str,
        date: NaiveDate,
        sheet_id: Option<&str>,
        log_path: Option<&str>,
    ) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO attendance_records(date, semester, section, subject, sheet_id, log_path)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                date.format(DATE_FORMAT).to_string(),
                semester,
                section,
                subject,
                sheet_id,
                log_path
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_details(&self, record_id: i64, details: &[(String, bool)]) -> Result<usize, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO attendance_details(record_id, usn, present)
                 SELECT ?1, usn, ?3 FROM students WHERE usn = ?2
                 ON CONFLICT(record_id, usn) DO UPDATE SET present = excluded.present",
            )?;
            for (usn, present) in details {
                written += stmt.execute(params![record_id, usn, present])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn select_records(&self, semester: &str, section: &str, subject: &str) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, date, semester, section, subject, sheet_id, log_path
             FROM attendance_records
             WHERE semester = ?1 AND section = ?2 AND subject = ?3
             ORDER BY date DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![semester, section, subject], record_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn select_record(&self, id: i64) -> Result<Option<AttendanceRecord>, StoreError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT id, date, semester, section, subject, sheet_id, log_path
                 FROM attendance_records WHERE id = ?1",
                params![id],
                record_from_row,
            )
            .optional()?)
    }

    /// Number of enrolled students.
    pub fn student_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Present/absent details of one session, keyed by student id.
    pub fn attendance_details(&self, record_id: i64) -> Result<Vec<(String, bool)>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT usn, present FROM attendance_details WHERE record_id = ?1 ORDER BY usn",
        )?;
        let rows = stmt.query_map(params![record_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS students (
          usn TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          semester TEXT NOT NULL,
          section TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS embeddings (
          usn TEXT NOT NULL REFERENCES students(usn) ON DELETE CASCADE,
          position INTEGER NOT NULL,
          dim INTEGER NOT NULL,
          data BLOB NOT NULL,
          model_version TEXT,
          PRIMARY KEY (usn, position)
        );

        CREATE TABLE IF NOT EXISTS attendance_records (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          date TEXT NOT NULL,
          semester TEXT NOT NULL,
          section TEXT NOT NULL,
          subject TEXT NOT NULL,
          sheet_id TEXT,
          log_path TEXT
        );

        CREATE TABLE IF NOT EXISTS attendance_details (
          record_id INTEGER NOT NULL REFERENCES attendance_records(id) ON DELETE CASCADE,
          usn TEXT NOT NULL REFERENCES students(usn) ON DELETE CASCADE,
          present INTEGER NOT NULL,
          UNIQUE (record_id, usn)
        );

        CREATE INDEX IF NOT EXISTS idx_students_class ON students(semester, section);
        CREATE INDEX IF NOT EXISTS idx_records_class
          ON attendance_records(semester, section, subject);
        ",
    )?;
    Ok(())
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let date: String = row.get(1)?;
    let date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    Ok(AttendanceRecord {
        id: row.get(0)?,
        date,
        semester: row.get(2)?,
        section: row.get(3)?,
        subject: row.get(4)?,
        sheet_id: row.get(5)?,
        log_path: row.get(6)?,
    })
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding_blob(blob: &[u8], dim: usize) -> Option<Vec<f32>> {
    if blob.len() != dim.checked_mul(4)? {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

impl EmbeddingStore for SqliteStore {
    fn load_all(&self) -> Result<Vec<EnrolledStudent>, AttendError> {
        Ok(self.query_students(None)?)
    }

    fn upsert(&self, student: &EnrolledStudent) -> Result<bool, AttendError> {
        Ok(self.upsert_student(student)?)
    }

    fn load_roster(&self, semester: &str, section: &str) -> Result<Vec<EnrolledStudent>, AttendError> {
        Ok(self.query_students(Some((semester, section)))?)
    }
}

impl RecordStore for SqliteStore {
    fn create_session_record(
        &self,
        subject: &str,
        semester: &str,
        section: &str,
        date: NaiveDate,
        sheet_id: Option<&str>,
        log_path: Option<&str>,
    ) -> Result<i64, AttendError> {
        Ok(self.insert_record(subject, semester, section, date, sheet_id, log_path)?)
    }

    fn create_attendance_details(&self, record_id: i64, details: &[(String, bool)]) -> Result<usize, AttendError> {
        Ok(self.insert_details(record_id, details)?)
    }

    fn list_records(&self, semester: &str, section: &str, subject: &str) -> Result<Vec<AttendanceRecord>, AttendError> {
        Ok(self.select_records(semester, section, subject)?)
    }

    fn get_record(&self, id: i64) -> Result<AttendanceRecord, AttendError> {
        self.select_record(id)?
            .ok_or_else(|| AttendError::RecordNotFound(format!("attendance record {id}")))
    }
}
