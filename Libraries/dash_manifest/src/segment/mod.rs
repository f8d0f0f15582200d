//! Segment addressing helpers: the HTTP capability and OTF segment timing probes.

pub mod fetcher;
pub mod otf;
