mod types;

pub use types::{BlobmuxError, Result};

// Re-export for convenience
pub use BlobmuxError as Error;
