use thiserror::Error;

pub type Result<T> = std::result::Result<T, MdxError>;

/// Errors produced while opening, indexing or querying MDX/MDD containers.
#[derive(Debug, Error)]
pub enum MdxError {
    #[error("corrupt header: {0}")]
    CorruptHeader(String),

    #[error("corrupt key catalog: {0}")]
    CorruptCatalog(String),

    #[error("corrupt block: {0}")]
    CorruptBlock(String),

    /// Raised for LZO blocks (tag 1) and any unknown compression tag.
    #[error("unsupported compression type {0}")]
    UnsupportedCompression(u32),

    #[error("unsupported encoding: {0}")]
    Encoding(String),

    #[error("index store error: {0}")]
    IndexStore(#[from] rusqlite::Error),

    #[error("metadata serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
