use thiserror::Error;

use super::models::Stage;

#[derive(Error, Debug)]
pub enum AnkimineError {
    #[error("I/O error: {0}")]
    Io(Box<std::io::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Reqwest error: {0}")]
    Reqwest(Box<reqwest::Error>),

    #[error("Zip error: {0}")]
    Zip(Box<zip::result::ZipError>),

    #[error("XML error: {0}")]
    Xml(Box<quick_xml::DeError>),

    #[error("card {fingerprint} has out-of-range scores (importance {importance}, difficulty {difficulty})")]
    InvalidScore { fingerprint: String, importance: i64, difficulty: i64 },

    #[error("chapter {0} has no candidate cards")]
    EmptyChapter(usize),

    #[error("cannot compare card {0}: no comparable text")]
    SimilarityComputation(String),

    #[error("checkpoint at {path} is unreadable: {reason}")]
    CorruptCheckpoint { path: String, reason: String },

    #[error("no checkpoint found at {0}")]
    CheckpointNotFound(String),

    #[error("failed to write checkpoint: {0}")]
    PersistenceWrite(String),

    #[error("card generation failed for chapter {chapter}: {reason}")]
    Generation { chapter: usize, reason: String },

    #[error("chapter {chapter} is at stage {stage:?}: {operation} is not allowed from here")]
    StageViolation { chapter: usize, stage: Stage, operation: &'static str },

    #[error("not an EPUB: {0}")]
    NotAnEpub(String),

    #[error("AnkiConnect error: {0}")]
    AnkiConnect(String),

    #[error("AnkimineError: {0}")]
    Custom(String),
}

impl From<std::io::Error> for AnkimineError {
    fn from(error: std::io::Error) -> Self {
        AnkimineError::Io(Box::new(error))
    }
}

impl From<reqwest::Error> for AnkimineError {
    fn from(error: reqwest::Error) -> Self {
        AnkimineError::Reqwest(Box::new(error))
    }
}

impl From<zip::result::ZipError> for AnkimineError {
    fn from(error: zip::result::ZipError) -> Self {
        AnkimineError::Zip(Box::new(error))
    }
}

impl From<quick_xml::DeError> for AnkimineError {
    fn from(error: quick_xml::DeError) -> Self {
        AnkimineError::Xml(Box::new(error))
    }
}
