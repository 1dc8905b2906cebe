//! Error types shared by the codecs and transforms

/// Expected per-file failures: bad input or an unrepresentable model.
///
/// Record labels read like "Vertex 3 in mesh 2" so the message points at the
/// offending section of the file.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// Underlying stream could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream ended while a mandatory record was still expected
    #[error("{record} is invalid! (line {line}: unexpected end of file)")]
    UnexpectedEof { record: String, line: usize },

    /// Fixed-arity record with the wrong number of fields
    #[error("{record} is invalid! (line {line}: expected {expected} fields, found {found})")]
    Arity {
        record: String,
        line: usize,
        expected: String,
        found: usize,
    },

    /// Field that should be numeric is not
    #[error("{record} is invalid! (line {line}: `{value}` is not a number)")]
    InvalidNumber {
        record: String,
        line: usize,
        value: String,
    },

    /// Required section keyword is missing
    #[error("{record} is invalid! (line {line}: expected `{expected}`, found `{found}`)")]
    MissingLiteral {
        record: String,
        line: usize,
        expected: String,
        found: String,
    },

    /// Element count is negative
    #[error("{record} is invalid! (line {line}: count {value} is negative)")]
    InvalidCount {
        record: String,
        line: usize,
        value: i64,
    },

    /// Quoted field without a closing quote
    #[error("{record} is invalid! (line {line}: unterminated quote)")]
    UnterminatedQuote { record: String, line: usize },

    /// Bone names a parent that was not declared before it
    #[error("Bone `{bone}` is invalid! (parent `{parent}` not found)")]
    UnknownParent { bone: String, parent: String },

    /// File was tagged by a failed export
    #[error("file is an aborted export (line {line})")]
    Aborted { line: usize },

    /// File ends without the terminal `end` marker
    #[error("file ends without `end` marker (line {line})")]
    MissingEnd { line: usize },

    /// Model content the target format cannot hold
    #[error("{0} cannot be represented in this format")]
    Unsupported(String),
}

/// Conditions that signal a logic bug or a malformed source asset.
///
/// These halt the conversion and are never folded into [`FormatError`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    /// Quantized bone weights did not reach exactly 255
    #[error("vertex {vertex} bone weights total {sum}, not 255")]
    WeightSum { vertex: usize, sum: i32 },

    /// Vertex without any skin weight in a format that forbids it
    #[error("mesh `{mesh}` has unweighted vertex {vertex}")]
    UnweightedVertex { mesh: String, vertex: usize },

    /// All 100 disambiguation counters for a prefix/suffix pair are taken
    #[error("no free name counter for `{prefix}`..`{suffix}`")]
    NameCounterExhausted { prefix: String, suffix: String },
}

/// Any failure raised while encoding a model
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Format(FormatError::Io(e))
    }
}
