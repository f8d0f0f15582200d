//! Adaptive stream variants as delivered by the streaming data of a video.
//! These are consumed read-only when building a manifest.

use serde::{Deserialize, Serialize};

/// Inclusive byte range inside a progressive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Audio track metadata, present when a video carries several audio languages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrack {
    /// Grouping id shared by every format of the same track (e.g. "en.4").
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub audio_is_default: bool,
    #[serde(default)]
    pub is_dubbed: bool,
    #[serde(default)]
    pub is_descriptive: bool,
}

/// One adaptive stream variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Format {
    pub itag: u32,
    /// Full mime type including the codecs parameter, e.g. `video/mp4; codecs="avc1.640028"`.
    pub mime_type: String,
    pub bitrate: u64,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub audio_sample_rate: Option<u32>,
    #[serde(default)]
    pub audio_channels: Option<u32>,
    #[serde(default)]
    pub audio_track: Option<AudioTrack>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub approx_duration_ms: u64,
    /// Segment timing is unknown and must be probed (OTF stream).
    #[serde(default)]
    pub is_type_otf: bool,
    #[serde(default)]
    pub index_range: Option<ByteRange>,
    #[serde(default)]
    pub init_range: Option<ByteRange>,
    /// Plain stream URL, when the service did not cipher it.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub signature_cipher: Option<String>,
}

impl Format {
    pub fn has_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }

    pub fn has_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }

    /// Mime type without its parameters (`video/mp4`).
    pub fn base_mime_type(&self) -> &str {
        self.mime_type.split(';').next().unwrap_or_default().trim()
    }

    /// Value of the `codecs="..."` parameter of the mime type, if any.
    pub fn codecs(&self) -> Option<&str> {
        let (_, rest) = self.mime_type.split_once("codecs=\"")?;
        rest.split_once('"').map(|(codecs, _)| codecs)
    }

    /// Both byte ranges of the static segment layout, if known.
    pub fn byte_ranges(&self) -> Option<(ByteRange, ByteRange)> {
        Some((self.index_range?, self.init_range?))
    }

    /// Whether the segments of this format can be addressed at all.
    pub fn is_addressable(&self) -> bool {
        self.is_type_otf || self.byte_ranges().is_some()
    }

    /// Whether the URL has to go through a decipherer before it can be played.
    pub fn needs_decipher(&self) -> bool {
        self.url.is_none() || self.signature_cipher.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_codecs_and_base_mime() {
        let format = Format {
            mime_type: "audio/webm; codecs=\"opus\"".to_string(),
            ..Default::default()
        };
        assert_eq!(format.codecs(), Some("opus"));
        assert_eq!(format.base_mime_type(), "audio/webm");
        assert!(format.has_audio());
        assert!(!format.has_video());
    }

    #[test]
    fn missing_codecs_parameter() {
        let format = Format {
            mime_type: "video/mp4".to_string(),
            ..Default::default()
        };
        assert_eq!(format.codecs(), None);
        assert_eq!(format.base_mime_type(), "video/mp4");
    }

    #[test]
    fn addressable_only_with_both_ranges_or_otf() {
        let mut format = Format {
            index_range: Some(ByteRange { start: 0, end: 10 }),
            ..Default::default()
        };
        assert!(!format.is_addressable());
        format.init_range = Some(ByteRange { start: 11, end: 20 });
        assert!(format.is_addressable());

        let otf = Format { is_type_otf: true, ..Default::default() };
        assert!(otf.is_addressable());
    }

    #[test]
    fn deserializes_with_sparse_fields() {
        let format: Format = serde_json::from_str(
            r#"{"itag": 140, "mime_type": "audio/mp4; codecs=\"mp4a.40.2\"", "bitrate": 130000,
                "init_range": {"start": 0, "end": 631}, "index_range": {"start": 632, "end": 1000}}"#,
        )
        .unwrap();
        assert_eq!(format.itag, 140);
        assert_eq!(format.init_range.unwrap().to_string(), "0-631");
        assert!(format.audio_track.is_none());
        assert!(format.needs_decipher());
    }
}
