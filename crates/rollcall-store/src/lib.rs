//! rollcall-store — Persistence and export for the attendance engine.
//!
//! SQLite for students, embeddings and attendance rows; append-only text
//! session logs; local JSON-lines attendance sheets; text reports.

pub mod error;
pub mod report;
pub mod session_log;
pub mod sheets;
pub mod sqlite;

pub use error::StoreError;
pub use report::TextReport;
pub use session_log::FileSessionLog;
pub use sheets::LocalSheets;
pub use sqlite::SqliteStore;
