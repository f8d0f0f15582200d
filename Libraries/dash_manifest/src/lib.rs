pub mod decipher;
pub mod error;
pub mod format;
pub mod manifest;
pub mod mpd;
pub mod segment;

pub use decipher::Decipher;
pub use error::{BoxError, Error, Result};
pub use format::{AudioTrack, ByteRange, Format};
pub use manifest::{build_manifest, to_dash, to_dash_with_cancellation, ManifestOptions};
pub use segment::fetcher::{FetchRequest, FetchResponse, HttpFetcher, ReqwestFetcher};
