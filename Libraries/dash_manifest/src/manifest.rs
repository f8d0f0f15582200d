//! Builds an MPEG-DASH manifest out of the adaptive formats of a video.
//!
//! Formats are bucketed by mime type, bucket order and in-bucket order follow the
//! input. When every format of an audio bucket carries track metadata, the bucket is
//! split further into one adaptation set per track so each set can carry its own
//! language, role and label.

use std::sync::Arc;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use crate::attrs;
use crate::decipher::Decipher;
use crate::error::{Error, Result};
use crate::format::{AudioTrack, Format};
use crate::mpd::render::serialize;
use crate::mpd::{create_element, fragment, pending, text, Attributes, Node};
use crate::segment::fetcher::HttpFetcher;
use crate::segment::otf::{append_query, probe_otf, stream_headers, OtfSegmentInfo};

const MPD_NAMESPACE: &str = "urn:mpeg:dash:schema:mpd:2011";
const MPD_PROFILE: &str = "urn:mpeg:dash:profile:isoff-main:2011";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const MPD_SCHEMA_LOCATION: &str = "urn:mpeg:dash:schema:mpd:2011 http://standards.iso.org/ittf/PubliclyAvailableStandards/MPEG-DASH_schema_files/DASH-MPD.xsd";
const ROLE_SCHEME: &str = "urn:mpeg:dash:role:2011";
const AUDIO_CHANNEL_SCHEME: &str = "urn:mpeg:dash:23003:3:audio_channel_configuration:2011";
const DEFAULT_AUDIO_CHANNELS: u32 = 2;
const DEFAULT_MIN_BUFFER_TIME: &str = "PT1.500S";

/// Returns true for formats that must be left out of the manifest.
pub type FormatFilter = Arc<dyn Fn(&Format) -> bool + Send + Sync>;
/// Post-processes every stream URL written to the manifest.
pub type UrlTransform = Arc<dyn Fn(Url) -> Url + Send + Sync>;

#[derive(Clone)]
pub struct ManifestOptions {
    reject_format: Option<FormatFilter>,
    transform_url: Option<UrlTransform>,
    cpn: String,
    decipher: Option<Arc<dyn Decipher>>,
    fetcher: Option<Arc<dyn HttpFetcher>>,
    probe_headers: Vec<(String, String)>,
    min_buffer_time: String,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            reject_format: None,
            transform_url: None,
            cpn: String::new(),
            decipher: None,
            fetcher: None,
            probe_headers: stream_headers(),
            min_buffer_time: DEFAULT_MIN_BUFFER_TIME.to_string(),
        }
    }
}

impl std::fmt::Debug for ManifestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestOptions")
            .field("reject_format", &self.reject_format.as_ref().map(|_| "<callback>"))
            .field("transform_url", &self.transform_url.as_ref().map(|_| "<callback>"))
            .field("cpn", &self.cpn)
            .field("decipher", &self.decipher.is_some())
            .field("fetcher", &self.fetcher.is_some())
            .field("probe_headers", &self.probe_headers)
            .field("min_buffer_time", &self.min_buffer_time)
            .finish()
    }
}

impl ManifestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /**
     * Set a predicate rejecting formats.
     * Rejected formats are not part of the manifest, and do not count towards its duration.
     */
    pub fn reject_format<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Format) -> bool + Send + Sync + 'static,
    {
        self.reject_format = Some(Arc::new(filter));
        self
    }

    /**
     * Set a hook applied to every stream URL, after the cpn has been set.
     */
    pub fn transform_url<F>(mut self, transform: F) -> Self
    where
        F: Fn(Url) -> Url + Send + Sync + 'static,
    {
        self.transform_url = Some(Arc::new(transform));
        self
    }

    /**
     * Set the content playback nonce written into the `cpn` query parameter of every stream URL.
     */
    pub fn cpn(mut self, cpn: impl Into<String>) -> Self {
        self.cpn = cpn.into();
        self
    }

    pub fn decipher(mut self, decipher: Arc<dyn Decipher>) -> Self {
        self.decipher = Some(decipher);
        self
    }

    /**
     * Set the HTTP capability used to probe OTF streams.
     * Without one, any OTF format fails the whole manifest.
     */
    pub fn fetcher(mut self, fetcher: Arc<dyn HttpFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn probe_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.probe_headers = headers;
        self
    }

    pub fn min_buffer_time(mut self, min_buffer_time: impl Into<String>) -> Self {
        self.min_buffer_time = min_buffer_time.into();
        self
    }

    fn is_rejected(&self, format: &Format) -> bool {
        self.reject_format.as_ref().is_some_and(|reject| reject(format))
    }
}

/// Role of an audio adaptation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Main,
    Dub,
    Description,
    Alternate,
}

impl Role {
    pub fn for_track(track: &AudioTrack) -> Self {
        if track.audio_is_default {
            Role::Main
        } else if track.is_dubbed {
            Role::Dub
        } else if track.is_descriptive {
            Role::Description
        } else {
            Role::Alternate
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Main => "main",
            Role::Dub => "dub",
            Role::Description => "description",
            Role::Alternate => "alternate",
        }
    }
}

/// Hands out adaptation set ids in emission order, document wide.
#[derive(Debug, Default)]
pub struct SetIdCounter {
    next: u32,
}

impl SetIdCounter {
    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn issued(&self) -> u32 {
        self.next
    }
}

/// Partitions formats by full mime type in first seen order, dropping formats whose
/// segments cannot be addressed.
fn bucket_by_mime_type<'a>(formats: &[&'a Format]) -> IndexMap<&'a str, Vec<&'a Format>> {
    let mut buckets: IndexMap<&str, Vec<&Format>> = IndexMap::new();
    for &format in formats {
        if !format.is_addressable() {
            debug!("Dropping format {} without index/init ranges", format.itag);
            continue;
        }
        buckets.entry(format.mime_type.as_str()).or_default().push(format);
    }
    buckets
}

/// Builds the manifest tree. Pending subtrees (deciphering, OTF probes) are left for the resolver.
#[instrument(skip_all, fields(formats = formats.len()))]
pub fn build_manifest(formats: &[Format], options: &ManifestOptions) -> Result<Node> {
    let formats: Vec<&Format> = formats.iter().filter(|format| !options.is_rejected(format)).collect();
    let first = formats.first().ok_or(Error::NoUsableFormats)?;
    let duration = first.approx_duration_ms as f64 / 1000.0;

    let buckets = bucket_by_mime_type(&formats);
    if buckets.is_empty() {
        return Err(Error::NoUsableFormats);
    }

    let options = Arc::new(options.clone());
    let mut set_ids = SetIdCounter::default();
    let mut sets = Vec::with_capacity(buckets.len());

    for (mime_type, formats) in &buckets {
        if formats.iter().all(|format| format.has_audio() && format.audio_track.is_some()) {
            debug!("Splitting {} formats of {} by audio track", formats.len(), mime_type);
            sets.push(multi_track_sets(formats, &options, &mut set_ids)?);
        } else {
            sets.push(adaptation_set(formats, &options, &mut set_ids)?);
        }
    }

    info!("Built {} adaptation sets out of {} formats", set_ids.issued(), formats.len());

    Ok(create_element(
        "mpd",
        attrs! {
            "xmlns" => MPD_NAMESPACE,
            "minBufferTime" => &options.min_buffer_time,
            "profiles" => MPD_PROFILE,
            "type" => "static",
            "mediaPresentationDuration" => format!("PT{}S", duration),
            "xmlns:xsi" => XSI_NAMESPACE,
            "xsi:schemaLocation" => MPD_SCHEMA_LOCATION,
        },
        vec![create_element("period", Attributes::new(), sets)],
    ))
}

fn adaptation_set(
    formats: &[&Format],
    options: &Arc<ManifestOptions>,
    set_ids: &mut SetIdCounter,
) -> Result<Node> {
    let set_id = set_ids.next_id();
    let representations = formats
        .iter()
        .map(|format| representation(format, None, options))
        .collect::<Result<Vec<_>>>()?;

    Ok(create_element(
        "adaptation-set",
        attrs! {
            "id" => set_id,
            "mimeType" => formats.first().map(|format| format.base_mime_type()),
            "startWithSAP" => "1",
            "subsegmentAlignment" => "true",
        },
        representations,
    ))
}

fn multi_track_sets(
    formats: &[&Format],
    options: &Arc<ManifestOptions>,
    set_ids: &mut SetIdCounter,
) -> Result<Node> {
    let mut tracks: IndexMap<&str, (&AudioTrack, Vec<&Format>)> = IndexMap::new();
    for &format in formats {
        if let Some(track) = &format.audio_track {
            tracks.entry(track.id.as_str()).or_insert_with(|| (track, Vec::new())).1.push(format);
        }
    }

    // lang and Role both live on the AdaptationSet, so every track gets its own set
    let mut sets = Vec::with_capacity(tracks.len());
    for (track_id, (track, formats)) in tracks {
        let set_id = set_ids.next_id();
        let language = formats.first().and_then(|format| format.language.clone());

        let mut children = vec![
            create_element(
                "role",
                attrs! { "schemeIdUri" => ROLE_SCHEME, "value" => Role::for_track(track).as_str() },
                vec![],
            ),
            create_element("label", attrs! { "id" => set_id }, vec![text(&track.display_name)]),
        ];
        for format in &formats {
            children.push(representation(format, Some(track_id), options)?);
        }

        sets.push(create_element(
            "adaptation-set",
            attrs! {
                "id" => set_id,
                "mimeType" => formats.first().map(|format| format.base_mime_type()),
                "startWithSAP" => "1",
                "subsegmentAlignment" => "true",
                "lang" => language,
                // Non standard, shaka reads this instead of the Label element
                "label" => &track.display_name,
            },
            children,
        ));
    }

    Ok(fragment(sets))
}

/// Builds the representation of one format.
///
/// Missing capabilities and byte ranges are reported right away; the stream URL and
/// the OTF segment timing are resolved later, concurrently with sibling representations.
pub fn representation(format: &Format, track_id: Option<&str>, options: &Arc<ManifestOptions>) -> Result<Node> {
    if format.is_type_otf {
        if options.fetcher.is_none() {
            return Err(Error::NoProbeCapability { itag: format.itag });
        }
    } else if format.byte_ranges().is_none() {
        return Err(Error::MissingByteRange { itag: format.itag });
    }
    if options.decipher.is_none() && format.needs_decipher() {
        return Err(Error::NoDecipherCapability { itag: format.itag });
    }

    let id = match track_id {
        Some(track_id) => format!("{}-{}", format.itag, track_id),
        None => format.itag.to_string(),
    };
    let format = format.clone();
    let options = Arc::clone(options);

    Ok(pending(async move {
        let url = playback_url(&format, &options).await?;
        let segment_info = segment_info(&format, url, &options)?;

        let node = if format.has_video() {
            create_element(
                "representation",
                attrs! {
                    "id" => id,
                    "codecs" => format.codecs(),
                    "bandwidth" => format.bitrate,
                    "width" => format.width,
                    "height" => format.height,
                    "maxPlayoutRate" => "1",
                    "frameRate" => format.fps,
                },
                vec![segment_info],
            )
        } else {
            create_element(
                "representation",
                attrs! {
                    "id" => id,
                    "codecs" => format.codecs(),
                    "bandwidth" => format.bitrate,
                    "audioSamplingRate" => format.audio_sample_rate,
                },
                vec![
                    create_element(
                        "audio-channel-configuration",
                        attrs! {
                            "schemeIdUri" => AUDIO_CHANNEL_SCHEME,
                            "value" => format.audio_channels.unwrap_or(DEFAULT_AUDIO_CHANNELS),
                        },
                        vec![],
                    ),
                    segment_info,
                ],
            )
        };
        Ok(node)
    }))
}

fn segment_info(format: &Format, url: String, options: &Arc<ManifestOptions>) -> Result<Node> {
    if format.is_type_otf {
        let fetcher = options
            .fetcher
            .clone()
            .ok_or(Error::NoProbeCapability { itag: format.itag })?;
        let headers = options.probe_headers.clone();

        return Ok(pending(async move {
            let info = probe_otf(fetcher.as_ref(), &url, &headers).await?;
            Ok(otf_segment_template(&info))
        }));
    }

    let (index_range, init_range) = format
        .byte_ranges()
        .ok_or(Error::MissingByteRange { itag: format.itag })?;

    Ok(fragment(vec![
        create_element("base-url", Attributes::new(), vec![text(url)]),
        create_element(
            "segment-base",
            attrs! { "indexRange" => index_range.to_string() },
            vec![create_element(
                "initialization",
                attrs! { "range" => init_range.to_string() },
                vec![],
            )],
        ),
    ]))
}

fn otf_segment_template(info: &OtfSegmentInfo) -> Node {
    let timeline = info
        .segment_durations
        .iter()
        .map(|duration| {
            create_element(
                "s",
                attrs! { "d" => duration.duration_ms, "r" => duration.repeat_count },
                vec![],
            )
        })
        .collect();

    create_element(
        "segment-template",
        attrs! {
            "startNumber" => "1",
            "timescale" => "1000",
            "initialization" => append_query(&info.resolved_url, "sq=0"),
            "media" => append_query(&info.resolved_url, "sq=$Number$"),
        },
        vec![create_element("segment-timeline", Attributes::new(), timeline)],
    )
}

/// Deciphers the stream URL and stamps the cpn on it.
#[instrument(skip_all, fields(itag = format.itag))]
async fn playback_url(format: &Format, options: &ManifestOptions) -> Result<String> {
    let raw = match (&options.decipher, &format.url) {
        (Some(decipher), _) => decipher.decipher(format).await.map_err(|source| Error::Decipher {
            itag: format.itag,
            source,
        })?,
        (None, Some(url)) if !format.needs_decipher() => url.clone(),
        (None, _) => return Err(Error::NoDecipherCapability { itag: format.itag }),
    };

    let mut url = Url::parse(&raw).map_err(|source| Error::InvalidUrl {
        url: raw.clone(),
        source,
    })?;
    set_query_param(&mut url, "cpn", &options.cpn);

    if let Some(transform) = &options.transform_url {
        url = transform(url);
    }
    Ok(url.to_string())
}

/// Sets `key` to `value`: the first occurrence is replaced in place, later ones are
/// dropped, and the pair is appended when missing.
fn set_query_param(url: &mut Url, key: &str, value: &str) {
    let mut replaced = false;
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .into_owned()
        .filter_map(|(name, existing)| {
            if name != key {
                return Some((name, existing));
            }
            if replaced {
                return None;
            }
            replaced = true;
            Some((name, value.to_string()))
        })
        .collect();

    let mut query = url.query_pairs_mut();
    query.clear().extend_pairs(pairs);
    if !replaced {
        query.append_pair(key, value);
    }
}

/// Builds and serializes the manifest for `formats`.
pub async fn to_dash(formats: &[Format], options: &ManifestOptions) -> Result<String> {
    let manifest = build_manifest(formats, options)?;
    serialize(manifest).await
}

/// Same as [`to_dash`], abandoning every in flight request once `token` is cancelled.
pub async fn to_dash_with_cancellation(
    formats: &[Format],
    options: &ManifestOptions,
    token: &CancellationToken,
) -> Result<String> {
    tokio::select! {
        biased;
        _ = token.cancelled() => {
            info!("Manifest assembly cancelled");
            Err(Error::Cancelled)
        }
        result = to_dash(formats, options) => result,
    }
}
