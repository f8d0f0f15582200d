use thiserror::Error;

/// Error shape returned by the pluggable capabilities (HTTP, decipher).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No adaptive formats left to build a manifest from")]
    NoUsableFormats,

    #[error("Format {itag} is an OTF stream, but no HTTP fetcher was supplied to probe its segment durations")]
    NoProbeCapability { itag: u32 },

    #[error("Failed to extract the segment durations from OTF stream {url}: {reason}")]
    ProbeParse { url: String, reason: String },

    #[error("Index and init ranges not available for format {itag}")]
    MissingByteRange { itag: u32 },

    #[error("Format {itag} needs deciphering, but no decipherer was supplied")]
    NoDecipherCapability { itag: u32 },

    #[error("Probe request to {url} failed: {source}")]
    Probe {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("Deciphering format {itag} failed: {source}")]
    Decipher {
        itag: u32,
        #[source]
        source: BoxError,
    },

    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Document root must resolve to exactly one element")]
    InvalidRoot,

    #[error("Manifest assembly was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}
