//! YouTube timed-text captions.
//!
//! The watch page embeds the player response, whose `captionTracks` array
//! lists one timed-text URL per available language. The selected track is
//! fetched as XML and flattened into [`CaptionSegment`]s.

use std::sync::OnceLock;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::backend::{excerpt, CaptionSegment, CaptionSource};
use crate::error::{AppError, Upstream};

const CAPTION_TRACKS_MARKER: &str = "\"captionTracks\":";

/// Caption source reading YouTube watch pages and timed text.
pub struct YoutubeCaptions {
    client: reqwest::Client,
    base_url: String,
}

impl YoutubeCaptions {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    async fn get_text(&self, url: &str) -> Result<(StatusCode, String), AppError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US")
            .send()
            .await
            .map_err(|err| {
                AppError::upstream(Upstream::Captions, format!("request to {url} failed: {err}"))
            })?;
        let status = response.status();
        let body = response.text().await.map_err(|err| {
            AppError::upstream(Upstream::Captions, format!("failed to read {url}: {err}"))
        })?;
        Ok((status, body))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionTrack {
    pub base_url: String,
    pub language_code: String,
    /// `"asr"` for automatically generated tracks.
    #[serde(default)]
    pub kind: Option<String>,
}

impl CaptionTrack {
    fn is_generated(&self) -> bool {
        self.kind.as_deref() == Some("asr")
    }

    fn is_english(&self) -> bool {
        self.language_code == "en" || self.language_code.starts_with("en-")
    }
}

#[async_trait]
impl CaptionSource for YoutubeCaptions {
    async fn fetch(&self, video_id: &str) -> Result<Vec<CaptionSegment>, AppError> {
        if !is_valid_video_id(video_id) {
            return Err(AppError::invalid_request(format!(
                "invalid video id {video_id:?}"
            )));
        }

        let watch_url = format!("{}/watch?v={video_id}", self.base_url);
        let (status, page) = self.get_text(&watch_url).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::not_found(format!("video {video_id:?} not found")));
        }
        if !status.is_success() {
            return Err(AppError::upstream(
                Upstream::Captions,
                format!("watch page for {video_id:?} returned {status}: {}", excerpt(&page)),
            ));
        }

        let tracks = extract_caption_tracks(&page)?;
        let track = select_track(&tracks).ok_or_else(|| {
            AppError::not_found(format!("no captions available for video {video_id:?}"))
        })?;
        debug!(
            video_id,
            language = %track.language_code,
            generated = track.is_generated(),
            "selected caption track"
        );

        let track_url = if track.base_url.starts_with("http") {
            track.base_url.clone()
        } else {
            format!("{}{}", self.base_url, track.base_url)
        };
        let (status, xml) = self.get_text(&track_url).await?;
        if !status.is_success() {
            return Err(AppError::upstream(
                Upstream::Captions,
                format!("timed text for {video_id:?} returned {status}"),
            ));
        }

        let segments = parse_timed_text(&xml)?;
        if segments.is_empty() {
            return Err(AppError::not_found(format!(
                "caption track for video {video_id:?} is empty"
            )));
        }
        Ok(segments)
    }
}

/// Accepts the 11-character id alphabet used by YouTube.
pub fn is_valid_video_id(video_id: &str) -> bool {
    static VIDEO_ID: OnceLock<Regex> = OnceLock::new();
    VIDEO_ID
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("static regex"))
        .is_match(video_id)
}

/// Reads the `captionTracks` array out of a watch page.
///
/// Returns an empty list when the page carries no captions.
pub fn extract_caption_tracks(page: &str) -> Result<Vec<CaptionTrack>, AppError> {
    let Some(offset) = page.find(CAPTION_TRACKS_MARKER) else {
        return Ok(Vec::new());
    };
    let rest = &page[offset + CAPTION_TRACKS_MARKER.len()..];

    serde_json::Deserializer::from_str(rest)
        .into_iter::<Vec<CaptionTrack>>()
        .next()
        .unwrap_or(Ok(Vec::new()))
        .map_err(|err| {
            AppError::upstream(
                Upstream::Captions,
                format!("malformed caption track list: {err}"),
            )
        })
}

/// Picks a manual English track, then any English track, then the first one.
pub fn select_track(tracks: &[CaptionTrack]) -> Option<&CaptionTrack> {
    tracks
        .iter()
        .find(|t| t.is_english() && !t.is_generated())
        .or_else(|| tracks.iter().find(|t| t.is_english()))
        .or_else(|| tracks.first())
}

/// Parses a timed-text XML document into caption segments.
pub fn parse_timed_text(xml: &str) -> Result<Vec<CaptionSegment>, AppError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut segments = Vec::new();
    let mut current: Option<(f64, f64)> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"text" => {
                let mut start = 0.0_f64;
                let mut duration = 0.0_f64;
                for attr in e.attributes().flatten() {
                    let value = attr.unescape_value().unwrap_or_default();
                    match attr.key.as_ref() {
                        b"start" => start = value.parse::<f64>().unwrap_or(0.0),
                        b"dur" => duration = value.parse::<f64>().unwrap_or(0.0),
                        _ => {}
                    }
                }
                current = Some((start, duration));
                text.clear();
            }
            Ok(Event::Text(e)) if current.is_some() => {
                let raw = e.unescape().unwrap_or_default();
                // Caption text is escaped twice, e.g. `&amp;#39;`.
                let unescaped = quick_xml::escape::unescape(&raw)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| raw.to_string());
                text.push_str(&unescaped);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"text" => {
                if let Some((start, duration)) = current.take() {
                    if !text.is_empty() {
                        segments.push(CaptionSegment {
                            text: std::mem::take(&mut text),
                            start,
                            duration,
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(AppError::upstream(
                    Upstream::Captions,
                    format!("malformed timed text: {err}"),
                ));
            }
            _ => {}
        }
    }

    Ok(segments)
}
