//! Persistent event store
//!
//! SQLite-backed records of detection events, per-class detections and
//! vision context rows. The schema is created on open; all writes are
//! short transactions on a single connection with a 10 s busy timeout.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection};
use tracing::debug;

use crate::detect::Detection;
use crate::error::VigilResult;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Vision context row for an event
#[derive(Debug, Clone)]
pub struct AiContextRecord {
    pub context_text: String,
    pub detected_classes: Vec<String>,
    pub source_model: String,
    pub prompt_used: String,
    pub response_time_seconds: f64,
    pub is_valid: bool,
}

/// Relational store for event bookkeeping
pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    /// Open (and if needed create) the database at `path`
    pub fn open(path: &Path) -> VigilResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store, for tests
    pub fn open_in_memory() -> VigilResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> VigilResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS detection_events (
                event_id            TEXT PRIMARY KEY,
                camera_id           TEXT NOT NULL,
                camera_name         TEXT,
                started_at          TEXT NOT NULL DEFAULT (datetime('now')),
                ended_at            TEXT,
                status              TEXT NOT NULL,
                recording_filename  TEXT,
                snapshot_filename   TEXT,
                duration_seconds    REAL,
                frames_processed    INTEGER,
                total_detections    INTEGER
            );

            CREATE TABLE IF NOT EXISTS detections (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id    TEXT NOT NULL,
                class_name  TEXT NOT NULL,
                confidence  REAL NOT NULL,
                bbox_x1     INTEGER,
                bbox_y1     INTEGER,
                bbox_x2     INTEGER,
                bbox_y2     INTEGER,
                detected_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS ai_vision_context (
                id                    INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id              TEXT NOT NULL,
                camera_id             TEXT NOT NULL,
                context_text          TEXT,
                source_model          TEXT,
                prompt_used           TEXT,
                detected_classes      TEXT,
                response_time_seconds REAL,
                is_valid              INTEGER,
                analyzed_at           TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a new event row in `recording` state
    pub fn create_event(
        &self,
        event_id: &str,
        camera_id: &str,
        recording_filename: &str,
        snapshot_filename: &str,
    ) -> VigilResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO detection_events
                 (event_id, camera_id, camera_name, status,
                  recording_filename, snapshot_filename)
             VALUES (?1, ?2, ?3, 'recording', ?4, ?5)",
            params![event_id, camera_id, camera_id, recording_filename, snapshot_filename],
        )?;
        debug!("Store: created event {} for {}", event_id, camera_id);
        Ok(())
    }

    /// Bulk-insert one row per detection
    pub fn log_detections(&self, event_id: &str, detections: &[Detection]) -> VigilResult<()> {
        if detections.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO detections
                     (event_id, class_name, confidence, bbox_x1, bbox_y1, bbox_x2, bbox_y2)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for det in detections {
                stmt.execute(params![
                    event_id,
                    det.class_name,
                    det.confidence as f64,
                    det.x1 as i64,
                    det.y1 as i64,
                    det.x2 as i64,
                    det.y2 as i64,
                ])?;
            }
        }
        tx.commit()?;
        debug!("Store: logged {} detections for {}", detections.len(), event_id);
        Ok(())
    }

    /// Mark an event completed with its final statistics
    pub fn complete_event(
        &self,
        event_id: &str,
        duration_seconds: f64,
        frames_processed: u64,
        detections_count: usize,
    ) -> VigilResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE detection_events
             SET ended_at = datetime('now'),
                 duration_seconds = ?2,
                 frames_processed = ?3,
                 total_detections = ?4,
                 status = 'completed'
             WHERE event_id = ?1",
            params![
                event_id,
                duration_seconds,
                frames_processed as i64,
                detections_count as i64
            ],
        )?;
        debug!(
            "Store: completed event {} ({:.1}s, {} detections)",
            event_id, duration_seconds, detections_count
        );
        Ok(())
    }

    /// Insert one vision context row
    pub fn log_ai_context(
        &self,
        event_id: &str,
        camera_id: &str,
        record: &AiContextRecord,
    ) -> VigilResult<()> {
        let classes = serde_json::to_string(&record.detected_classes).unwrap_or_default();
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO ai_vision_context
                 (event_id, camera_id, context_text, source_model, prompt_used,
                  detected_classes, response_time_seconds, is_valid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event_id,
                camera_id,
                record.context_text,
                record.source_model,
                record.prompt_used,
                classes,
                record.response_time_seconds,
                record.is_valid,
            ],
        )?;
        debug!("Store: logged AI context for {} (valid={})", event_id, record.is_valid);
        Ok(())
    }
}
