use serde::Serialize;
use thiserror::Error;

/// Errors that make a blob unusable. All of them are recoverable by the caller:
/// the affected item is skipped, nothing else is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The fixed 16-byte header is missing or does not carry the magic signature.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// A length prefix or the first property block points past the end of the buffer.
    #[error("truncated buffer while reading {context} at offset {offset}")]
    TruncatedBuffer {
        context: &'static str,
        offset: usize,
    },

    /// The expected template id never appears after the header strings.
    #[error("template id {template_id} not found after offset {searched_from}")]
    AnchorNotFound {
        template_id: u32,
        searched_from: usize,
    },

    /// The property count following the anchor cannot fit in the remaining bytes.
    #[error("implausible property count {count} at offset {offset} ({remaining} bytes left)")]
    CorruptCount {
        count: u32,
        offset: usize,
        remaining: usize,
    },
}

/// Errors raised while building a property schema from static data.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The same property id was defined twice.
    #[error("property {0} defined more than once")]
    DuplicateId(u32),
}

/// Errors loading the item-name table.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("item table error: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors reading the persistence snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Snapshot file missing or not readable.
    #[error("snapshot unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by the external command channel.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ChannelError {
    /// The remote side answered and refused the command.
    #[error("command rejected: {0}")]
    Rejected(String),

    /// The request never got a usable answer (connection, auth, framing).
    #[error("transport error: {0}")]
    Transport(String),
}

/// Reasons a duplication request is refused before any command is issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DuplicationError {
    /// Partially decoded models are only good for read-only audit.
    #[error("source model for template {template_id} is truncated at offset {offset}")]
    IncompleteModel { template_id: u32, offset: usize },

    /// A batch worker task panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}
