//! Error taxonomy shared by parsers, generators, the normalizer and the pipeline.

use std::fmt;

/// 1-based line/column position inside a source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePos {
    pub line: usize,
    pub column: usize,
}

impl SourcePos {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// Position of byte `offset` within `text`. An offset inside a
    /// multi-byte character counts as that character.
    pub fn from_offset(text: &str, offset: usize) -> Self {
        let mut offset = offset.min(text.len());
        while !text.is_char_boundary(offset) {
            offset -= 1;
        }
        let before = &text[..offset];
        let line = before.matches('\n').count() + 1;
        let column = match before.rfind('\n') {
            Some(nl) => before[nl + 1..].chars().count() + 1,
            None => before.chars().count() + 1,
        };
        Self { line, column }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// Malformed source text. Fatal to one conversion, never to a batch.
    #[error("syntax error at {position}: {message}")]
    Syntax { position: SourcePos, message: String },

    /// Rendering or extraction failed or was skipped. Non-fatal.
    #[error("geometry unavailable: {0}")]
    GeometryUnavailable(String),

    /// An IR value breaks a structural invariant.
    #[error("schema violation at '{id}': {message}")]
    SchemaViolation { id: String, message: String },

    /// A persisted IR document is not valid JSON for the IR shape.
    #[error("invalid IR document: {0}")]
    InvalidDocument(#[from] serde_json::Error),
}

impl ConvertError {
    pub fn syntax(position: SourcePos, message: impl Into<String>) -> Self {
        Self::Syntax {
            position,
            message: message.into(),
        }
    }

    pub fn schema(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaViolation {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. })
    }

    pub fn is_schema_violation(&self) -> bool {
        matches!(self, Self::SchemaViolation { .. })
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
