//! Local attendance spreadsheets.
//!
//! A sheet is a directory named by its id; each tab is a JSON-lines file with
//! one array per row. The id of the sheet for a class and subject is kept in
//! `<subject>_<section>_<semester>_sheet_id.txt` next to the sheets.

use crate::error::StoreError;
use rollcall_core::{AttendError, SheetExporter};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const SHEET_TABS: [&str; 2] = ["Present", "Absent"];

pub struct LocalSheets {
    dir: PathBuf,
}

impl LocalSheets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn id_file(&self, subject: &str, section: &str, semester: &str) -> PathBuf {
        self.dir
            .join(format!("{subject}_{section}_{semester}_sheet_id.txt"))
    }

    fn sheet_dir(&self, sheet_id: &str) -> PathBuf {
        self.dir.join(sheet_id)
    }

    fn create_sheet(&self, subject: &str, section: &str, semester: &str) -> Result<String, StoreError> {
        let sheet_id = uuid::Uuid::new_v4().simple().to_string();
        let sheet_dir = self.sheet_dir(&sheet_id);
        fs::create_dir_all(&sheet_dir)?;

        let meta = serde_json::json!({
            "title": format!("Attendance_{semester}_{subject}_{section}"),
            "tabs": SHEET_TABS,
        });
        fs::write(sheet_dir.join("sheet.json"), serde_json::to_vec_pretty(&meta)?)?;
        for tab in SHEET_TABS {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(tab_path(&sheet_dir, tab))?;
        }
        fs::write(self.id_file(subject, section, semester), &sheet_id)?;

        tracing::info!(sheet_id = %sheet_id, subject, section, semester, "created attendance sheet");
        Ok(sheet_id)
    }

    fn find_sheet(&self, subject: &str, section: &str, semester: &str) -> Result<Option<String>, StoreError> {
        let id = match fs::read_to_string(self.id_file(subject, section, semester)) {
            Ok(id) => id.trim().to_string(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !id.is_empty() && self.sheet_dir(&id).is_dir() {
            return Ok(Some(id));
        }
        tracing::warn!(sheet_id = %id, "sheet recorded for class no longer exists; creating a new one");
        Ok(None)
    }

    fn append(&self, sheet_id: &str, range: &str, rows: &[Vec<String>]) -> Result<(), AttendError> {
        let sheet_dir = self.sheet_dir(sheet_id);
        if !sheet_dir.is_dir() {
            return Err(AttendError::RecordNotFound(format!("sheet {sheet_id}")));
        }
        let tab = range_tab(range)?;

        let mut block = String::new();
        for row in rows {
            block.push_str(&serde_json::to_string(row).map_err(StoreError::from)?);
            block.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(tab_path(&sheet_dir, tab))
            .map_err(StoreError::from)?;
        file.write_all(block.as_bytes()).map_err(StoreError::from)?;
        Ok(())
    }

    /// Every row appended to `tab` so far.
    pub fn read_rows(&self, sheet_id: &str, tab: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let file = fs::File::open(tab_path(&self.sheet_dir(sheet_id), tab))?;
        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.trim().is_empty() {
                rows.push(serde_json::from_str(&line)?);
            }
        }
        Ok(rows)
    }
}

fn tab_path(sheet_dir: &Path, tab: &str) -> PathBuf {
    sheet_dir.join(format!("{tab}.jsonl"))
}

/// `Present!A1` → `Present`.
fn range_tab(range: &str) -> Result<&str, AttendError> {
    let tab = range.split_once('!').map_or(range, |(tab, _)| tab).trim();
    if tab.is_empty() || tab.contains(|c: char| matches!(c, '/' | '\\' | '.')) {
        return Err(AttendError::InvalidField {
            field: "range",
            reason: format!("no sheet tab in {range:?}"),
        });
    }
    Ok(tab)
}

impl SheetExporter for LocalSheets {
    fn ensure_sheet(&self, subject: &str, section: &str, semester: &str) -> Result<String, AttendError> {
        fs::create_dir_all(&self.dir).map_err(StoreError::from)?;
        match self.find_sheet(subject, section, semester)? {
            Some(id) => Ok(id),
            None => Ok(self.create_sheet(subject, section, semester)?),
        }
    }

    fn append_rows(&self, sheet_id: &str, range: &str, rows: &[Vec<String>]) -> Result<(), AttendError> {
        self.append(sheet_id, range, rows)
    }

    fn sheet_url(&self, sheet_id: &str) -> String {
        format!("file://{}", self.sheet_dir(sheet_id).display())
    }
}
