//! Turn transcript: one record per dispatched turn (structured input + outcome), kept for
//! audit and for classifier training feedback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::types::{DispatchOutcome, FlexIdentity, StructuredInput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub user_id: u64,
    pub identity: FlexIdentity,
    pub input: StructuredInput,
    pub outcome: DispatchOutcome,
}

impl TurnRecord {
    pub fn new(
        user_id: u64,
        identity: FlexIdentity,
        input: StructuredInput,
        outcome: DispatchOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            user_id,
            identity,
            input,
            outcome,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("transcript io: {0}")]
    Io(#[from] std::io::Error),
    #[error("transcript encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable turn log.
#[async_trait]
pub trait Transcript: Send + Sync {
    async fn save_turn(&self, record: &TurnRecord) -> Result<(), TranscriptError>;
}

/// Appends one JSON object per line.
pub struct JsonlTranscript {
    path: PathBuf,
    write: Mutex<()>,
}

impl JsonlTranscript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    /// Read every record back (for tooling and tests).
    pub async fn read_all(&self) -> Result<Vec<TurnRecord>, TranscriptError> {
        let s = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        s.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(TranscriptError::from))
            .collect()
    }
}

#[async_trait]
impl Transcript for JsonlTranscript {
    async fn save_turn(&self, record: &TurnRecord) -> Result<(), TranscriptError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let _write = self.write.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        f.write_all(line.as_bytes()).await?;
        f.flush().await?;
        Ok(())
    }
}

/// In-memory transcript; saving a record with an id already present replaces it.
#[derive(Default)]
pub struct MemoryTranscript {
    records: RwLock<Vec<TurnRecord>>,
}

impl MemoryTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<TurnRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl Transcript for MemoryTranscript {
    async fn save_turn(&self, record: &TurnRecord) -> Result<(), TranscriptError> {
        let mut g = self.records.write().await;
        match g.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => g.push(record.clone()),
        }
        Ok(())
    }
}
