use async_trait::async_trait;

use crate::error::BoxError;
use crate::format::Format;

/// Turns a format into a playable stream URL.
/// Implementations own whatever player context (signature/n-parameter functions) they need.
#[async_trait]
pub trait Decipher: Send + Sync {
    async fn decipher(&self, format: &Format) -> Result<String, BoxError>;
}
