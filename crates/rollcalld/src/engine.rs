use chrono::{Local, NaiveDateTime};
use rollcall_core::session_log::TIMESTAMP_FORMAT;
use rollcall_core::{
    compute_statistics, decode_photo, partition, AttendError, AttendanceOutcome, AttendanceRecord,
    EnrollRequest, EnrollStatus, FaceAnalyzer, FaceMatcher, RecordStore, Registry,
    ReportRenderer, SessionLogStore, SessionRecord, SheetExporter, StatisticsReport,
};
use rollcall_core::error::require_field;
use rollcall_store::{FileSessionLog, LocalSheets, SqliteStore, TextReport};
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Attend(#[from] AttendError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Stores and exporters the engine works against.
pub struct Services {
    pub registry: Registry<Arc<SqliteStore>>,
    pub records: Arc<dyn RecordStore>,
    pub logs: Box<dyn SessionLogStore>,
    pub sheets: Box<dyn SheetExporter>,
    pub renderer: Box<dyn ReportRenderer>,
    pub reports_dir: PathBuf,
}

impl Services {
    pub fn new(
        store: Arc<SqliteStore>,
        matcher: FaceMatcher,
        sessions_dir: PathBuf,
        sheets_dir: PathBuf,
        reports_dir: PathBuf,
    ) -> Self {
        Self {
            records: store.clone(),
            registry: Registry::new(store, matcher),
            logs: Box::new(FileSessionLog::new(sessions_dir)),
            sheets: Box::new(LocalSheets::new(sheets_dir)),
            renderer: Box::new(TextReport),
            reports_dir,
        }
    }
}

pub struct EnrollInput {
    pub id: String,
    pub name: String,
    pub semester: String,
    pub section: String,
    pub photos: Vec<PathBuf>,
}

pub struct AttendanceInput {
    pub subject: String,
    pub semester: String,
    pub section: String,
    pub photos: Vec<PathBuf>,
}

/// Result of one recorded attendance session.
#[derive(Debug)]
pub struct AttendanceSummary {
    pub record_id: i64,
    pub timestamp: NaiveDateTime,
    pub outcome: AttendanceOutcome,
    pub log_path: PathBuf,
    pub sheet_url: Option<String>,
}

/// A past session that can be picked for statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionListing {
    pub id: i64,
    pub name: String,
}

#[derive(Debug)]
pub struct StatisticsSummary {
    pub record: AttendanceRecord,
    pub report: StatisticsReport,
    pub report_path: Option<PathBuf>,
}

/// Daemon status snapshot.
#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub models_loaded: bool,
    pub students: usize,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        input: EnrollInput,
        reply: oneshot::Sender<Result<EnrollStatus, EngineError>>,
    },
    TakeAttendance {
        input: AttendanceInput,
        reply: oneshot::Sender<Result<AttendanceSummary, EngineError>>,
    },
    ListSessions {
        semester: String,
        section: String,
        subject: String,
        reply: oneshot::Sender<Result<Vec<SessionListing>, EngineError>>,
    },
    GenerateStatistics {
        record_id: i64,
        reply: oneshot::Sender<Result<StatisticsSummary, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn enroll(&self, input: EnrollInput) -> Result<EnrollStatus, EngineError> {
        self.call(|reply| EngineRequest::Enroll { input, reply }).await
    }

    pub async fn take_attendance(&self, input: AttendanceInput) -> Result<AttendanceSummary, EngineError> {
        self.call(|reply| EngineRequest::TakeAttendance { input, reply })
            .await
    }

    pub async fn list_sessions(
        &self,
        semester: String,
        section: String,
        subject: String,
    ) -> Result<Vec<SessionListing>, EngineError> {
        self.call(|reply| EngineRequest::ListSessions {
            semester,
            section,
            subject,
            reply,
        })
        .await
    }

    pub async fn generate_statistics(&self, record_id: i64) -> Result<StatisticsSummary, EngineError> {
        self.call(|reply| EngineRequest::GenerateStatistics { record_id, reply })
            .await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the analyzer, so ONNX inference never runs on the async
/// runtime, and handles one request at a time. Without an analyzer the
/// engine still serves session listings and statistics.
pub fn spawn_engine(
    services: Services,
    mut analyzer: Option<Box<dyn FaceAnalyzer + Send>>,
) -> std::io::Result<EngineHandle> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!(models_loaded = analyzer.is_some(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { input, reply } => {
                        let result = with_analyzer(&mut analyzer, |a| run_enroll(&services, a, input));
                        let _ = reply.send(result.map_err(EngineError::from));
                    }
                    EngineRequest::TakeAttendance { input, reply } => {
                        let now = Local::now().naive_local();
                        let result = with_analyzer(&mut analyzer, |a| {
                            run_take_attendance(&services, a, input, now)
                        });
                        let _ = reply.send(result.map_err(EngineError::from));
                    }
                    EngineRequest::ListSessions {
                        semester,
                        section,
                        subject,
                        reply,
                    } => {
                        let result = run_list_sessions(&services, &semester, &section, &subject);
                        let _ = reply.send(result.map_err(EngineError::from));
                    }
                    EngineRequest::GenerateStatistics { record_id, reply } => {
                        let result = run_generate_statistics(&services, record_id);
                        let _ = reply.send(result.map_err(EngineError::from));
                    }
                    EngineRequest::Status { reply } => {
                        let result = services
                            .registry
                            .store()
                            .student_count()
                            .map(|students| EngineStatus {
                                models_loaded: analyzer.is_some(),
                                students,
                            })
                            .map_err(AttendError::from);
                        let _ = reply.send(result.map_err(EngineError::from));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn with_analyzer<T>(
    analyzer: &mut Option<Box<dyn FaceAnalyzer + Send>>,
    f: impl FnOnce(&mut dyn FaceAnalyzer) -> Result<T, AttendError>,
) -> Result<T, AttendError> {
    match analyzer.as_deref_mut() {
        Some(a) => f(a),
        None => Err(AttendError::StoreUnavailable("face models not loaded".into())),
    }
}

fn read_photo(index: usize, path: &Path) -> Result<RgbImage, AttendError> {
    let unreadable = |reason: String| AttendError::UnreadablePhoto { photo: index, reason };
    let bytes = std::fs::read(path).map_err(|e| unreadable(format!("{}: {e}", path.display())))?;
    decode_photo(&bytes).map_err(|e| unreadable(e.to_string()))
}

/// Read and decode enrollment photos; any unreadable photo fails the request.
fn read_enrollment_photos(paths: &[PathBuf]) -> Result<Vec<RgbImage>, AttendError> {
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| read_photo(i + 1, path))
        .collect()
}

/// Read and decode classroom photos, skipping the ones that cannot be read.
/// Fails only when none can.
fn read_classroom_photos(paths: &[PathBuf]) -> Result<Vec<RgbImage>, AttendError> {
    let mut photos = Vec::with_capacity(paths.len());
    let mut first_error = None;
    for (i, path) in paths.iter().enumerate() {
        match read_photo(i + 1, path) {
            Ok(photo) => photos.push(photo),
            Err(e) => {
                tracing::warn!(photo = i + 1, error = %e, "attendance: skipping unreadable photo");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) if photos.is_empty() => Err(e),
        _ => Ok(photos),
    }
}

fn run_enroll(
    services: &Services,
    analyzer: &mut dyn FaceAnalyzer,
    input: EnrollInput,
) -> Result<EnrollStatus, AttendError> {
    let photos = read_enrollment_photos(&input.photos)?;
    let request = EnrollRequest {
        id: input.id,
        name: input.name,
        semester: input.semester,
        section: input.section,
        photos,
    };
    services.registry.enroll(analyzer, request)
}

/// Recognize, then record the session: session log first (statistics replay
/// it), then the relational rows, then the sheet. Sheet export failures only
/// warn.
fn run_take_attendance(
    services: &Services,
    analyzer: &mut dyn FaceAnalyzer,
    input: AttendanceInput,
    now: NaiveDateTime,
) -> Result<AttendanceSummary, AttendError> {
    let subject = require_field("subject", &input.subject)?;
    let semester = require_field("semester", &input.semester)?;
    let section = require_field("section", &input.section)?;
    if input.photos.is_empty() {
        return Err(AttendError::MissingRequiredField("class_images"));
    }

    let photos = read_classroom_photos(&input.photos)?;
    let outcome = services
        .registry
        .take_attendance(analyzer, semester, section, &photos)?;

    let record = SessionRecord::from_outcome(&outcome, now, subject, semester, section);
    let log_path = services.logs.append_session(&record)?;

    let sheet_id = export_to_sheet(services.sheets.as_ref(), &record);
    let log_path_str = log_path.to_string_lossy();
    let record_id = services.records.create_session_record(
        subject,
        semester,
        section,
        now.date(),
        sheet_id.as_deref(),
        Some(&log_path_str),
    )?;

    let details: Vec<(String, bool)> = outcome
        .present
        .iter()
        .map(|s| (s.id.clone(), true))
        .chain(outcome.absent.iter().map(|s| (s.id.clone(), false)))
        .collect();
    let written = services.records.create_attendance_details(record_id, &details)?;

    tracing::info!(
        record_id,
        subject,
        semester,
        section,
        present = outcome.present.len(),
        absent = outcome.absent.len(),
        details = written,
        "attendance: session recorded"
    );

    Ok(AttendanceSummary {
        record_id,
        timestamp: now,
        sheet_url: sheet_id.map(|id| services.sheets.sheet_url(&id)),
        outcome,
        log_path,
    })
}

/// Append the session's present and absent rows to the class sheet.
/// Returns the sheet id, or None when the export failed.
fn export_to_sheet(sheets: &dyn SheetExporter, record: &SessionRecord) -> Option<String> {
    let result = (|| {
        let sheet_id = sheets.ensure_sheet(&record.subject, &record.section, &record.semester)?;
        let timestamp = record.timestamp.format(TIMESTAMP_FORMAT).to_string();
        for (range, entries) in [("Present!A1", &record.present), ("Absent!A1", &record.absent)] {
            let row: Vec<String> = std::iter::once(timestamp.clone())
                .chain(entries.iter().cloned())
                .collect();
            sheets.append_rows(&sheet_id, range, &[row])?;
        }
        Ok::<_, AttendError>(sheet_id)
    })();

    match result {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(error = %e, subject = %record.subject, "attendance: sheet export failed");
            None
        }
    }
}

/// Log file behind a record: the path stored with it, else the class log
/// under the current layout.
fn record_log_path(services: &Services, record: &AttendanceRecord) -> PathBuf {
    match record.log_path.as_deref() {
        Some(path) => PathBuf::from(path),
        None => services
            .logs
            .log_path(&record.subject, &record.semester, &record.section),
    }
}

/// Sessions recorded for a class and subject, newest first. Records whose
/// log file no longer exists are left out.
fn run_list_sessions(
    services: &Services,
    semester: &str,
    section: &str,
    subject: &str,
) -> Result<Vec<SessionListing>, AttendError> {
    let semester = require_field("semester", semester)?;
    let section = require_field("section", section)?;
    let subject = require_field("subject", subject)?;

    Ok(services
        .records
        .list_records(semester, section, subject)?
        .into_iter()
        .filter(|r| record_log_path(services, r).exists())
        .map(|r| SessionListing {
            id: r.id,
            name: format!("{} - {}", r.date, r.subject),
        })
        .collect())
}

/// Replay the session log behind `record_id` into percentages and write the
/// report. An unparsable or empty log yields an empty report and no file.
fn run_generate_statistics(services: &Services, record_id: i64) -> Result<StatisticsSummary, AttendError> {
    let record = services.records.get_record(record_id)?;
    let log = services.logs.read_log_file(&record_log_path(services, &record))?;
    let report = partition(&compute_statistics(&log));

    let report_path = if report.is_empty() {
        None
    } else {
        write_report(services, &record, &report)
    };

    tracing::info!(
        record_id,
        above = report.above_75.len(),
        below = report.below_75.len(),
        "statistics: generated"
    );
    Ok(StatisticsSummary {
        record,
        report,
        report_path,
    })
}

fn write_report(services: &Services, record: &AttendanceRecord, report: &StatisticsReport) -> Option<PathBuf> {
    let path = services.reports_dir.join(format!(
        "attendance_report_{}_{}_{}.{}",
        record.semester,
        record.subject,
        record.section,
        services.renderer.extension()
    ));
    let title = format!("{} {} {}", record.semester, record.subject, record.section);
    let body = services.renderer.render(&title, report);

    let written = std::fs::create_dir_all(&services.reports_dir).and_then(|()| std::fs::write(&path, body));
    match written {
        Ok(()) => Some(path),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "statistics: report not written");
            None
        }
    }
}
