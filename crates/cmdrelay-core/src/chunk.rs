//! Output chunks stored in a session's buffer.

use serde::Serialize;

/// Payload of a single unit of command output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ChunkKind {
    /// Text read from the child's stdout
    Stdout(String),
    /// Text read from the child's stderr
    Stderr(String),
    /// The process exited with this code
    Exit(i32),
    /// The process could not be started (or could not be waited on)
    Error(String),
}

impl ChunkKind {
    /// Exit and error chunks end a session's output.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exit(_) | Self::Error(_))
    }

    /// Exit code carried by this chunk, if any.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit(code) => Some(*code),
            _ => None,
        }
    }
}

/// A chunk tagged with its offset in the session buffer.
///
/// Offsets start at 0 and are gapless: the n-th appended chunk has offset n.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputChunk {
    /// Position in the session buffer
    pub offset: u64,
    /// Chunk payload
    #[serde(flatten)]
    pub kind: ChunkKind,
}

impl OutputChunk {
    /// Whether this chunk closes the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_kinds() {
        assert!(!ChunkKind::Stdout("a".into()).is_terminal());
        assert!(!ChunkKind::Stderr("a".into()).is_terminal());
        assert!(ChunkKind::Exit(0).is_terminal());
        assert!(ChunkKind::Error("boom".into()).is_terminal());
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(ChunkKind::Exit(3).exit_code(), Some(3));
        assert_eq!(ChunkKind::Error("x".into()).exit_code(), None);
        assert_eq!(ChunkKind::Stdout("x".into()).exit_code(), None);
    }

    #[test]
    fn test_chunk_serialization() {
        let chunk = OutputChunk {
            offset: 7,
            kind: ChunkKind::Stderr("warn\n".into()),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["offset"], 7);
        assert_eq!(json["kind"], "stderr");
        assert_eq!(json["value"], "warn\n");
    }
}
