/// Error returned by a [`ChunkLoader`](crate::manifest::ChunkLoader).
#[derive(Debug)]
pub struct ChunkSourceError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ChunkSourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {source}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ChunkSourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl ChunkSourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Failure of a cache-driven chunk load.
///
/// Cloneable so one in-flight load can report the same outcome to every
/// caller awaiting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkLoadError {
    UnknownChunk { chunk_id: String },
    Fetch { chunk_id: String, message: String },
    TimedOut { chunk_id: String, timeout_ms: u64 },
}

impl ChunkLoadError {
    pub fn chunk_id(&self) -> &str {
        match self {
            ChunkLoadError::UnknownChunk { chunk_id }
            | ChunkLoadError::Fetch { chunk_id, .. }
            | ChunkLoadError::TimedOut { chunk_id, .. } => chunk_id,
        }
    }
}

impl std::fmt::Display for ChunkLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkLoadError::UnknownChunk { chunk_id } => {
                write!(f, "chunk {chunk_id} is not in the manifest")
            }
            ChunkLoadError::Fetch { chunk_id, message } => {
                write!(f, "chunk {chunk_id} failed to load: {message}")
            }
            ChunkLoadError::TimedOut {
                chunk_id,
                timeout_ms,
            } => write!(f, "chunk {chunk_id} did not load within {timeout_ms}ms"),
        }
    }
}

impl std::error::Error for ChunkLoadError {}
