//! Metadata lookup for a media URL without downloading it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::validate_url;
use crate::supervisor::{ToolResolver, ToolStatus};
use crate::{Error, Result};

/// Number of audio formats included in [`MediaInfo::formats`].
const MAX_LISTED_FORMATS: usize = 5;

/// Summary of a media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    pub uploader: String,
    /// `m:ss`, or `unknown` when the source reports no duration.
    pub duration: String,
    pub view_count: Option<u64>,
    pub thumbnail: Option<String>,
    pub formats: Vec<AudioFormat>,
}

/// One audio-bearing format offered by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub format_id: String,
    pub ext: Option<String>,
    pub acodec: Option<String>,
    /// Average audio bitrate in kbit/s.
    pub abr: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    title: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    ext: Option<String>,
    acodec: Option<String>,
    abr: Option<f64>,
}

/// Format seconds as `m:ss`.
pub fn format_duration(seconds: Option<f64>) -> String {
    match seconds {
        Some(secs) if secs.is_finite() && secs >= 0.0 => {
            let total = secs.floor() as u64;
            format!("{}:{:02}", total / 60, total % 60)
        }
        _ => "unknown".to_string(),
    }
}

/// Parse the tool's `--dump-json` output.
pub fn parse_media_info(json: &str) -> Result<MediaInfo> {
    let raw: RawInfo = serde_json::from_str(json.trim())?;

    let formats = raw
        .formats
        .into_iter()
        .filter(|f| f.acodec.as_deref().is_some_and(|codec| codec != "none"))
        .take(MAX_LISTED_FORMATS)
        .map(|f| AudioFormat {
            format_id: f.format_id.unwrap_or_default(),
            ext: f.ext,
            acodec: f.acodec,
            abr: f.abr,
        })
        .collect();

    Ok(MediaInfo {
        title: raw.title.unwrap_or_else(|| "Untitled".to_string()),
        uploader: raw.uploader.unwrap_or_else(|| "Unknown".to_string()),
        duration: format_duration(raw.duration),
        view_count: raw.view_count,
        thumbnail: raw.thumbnail,
        formats,
    })
}

/// Fetch metadata for a single media item through the resolved tool.
pub async fn probe_media(
    resolver: &ToolResolver,
    url: &str,
    timeout: Duration,
) -> Result<MediaInfo> {
    let url = validate_url(url)?;

    let strategy = match resolver.resolve().await {
        ToolStatus::Available { strategy, .. } => strategy,
        ToolStatus::Unavailable { .. } => {
            return Err(Error::tool("extraction tool is not installed"));
        }
    };

    let mut args = strategy.args.clone();
    args.extend([
        "--dump-json".to_string(),
        "--no-playlist".to_string(),
        "--".to_string(),
        url.to_string(),
    ]);

    debug!(url = %url, strategy = %strategy, "Probing media info");
    let output = process_utils::run_captured(&strategy.program, &args, timeout)
        .await
        .map_err(|e| Error::tool(format!("failed to run {}: {}", strategy, e)))?;

    if !output.success() {
        let reason = output
            .stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("no error output");
        return Err(Error::tool(format!("failed to fetch media info: {}", reason.trim())));
    }

    parse_media_info(&output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Some(0.0)), "0:00");
        assert_eq!(format_duration(Some(65.9)), "1:05");
        assert_eq!(format_duration(Some(3725.0)), "62:05");
        assert_eq!(format_duration(None), "unknown");
        assert_eq!(format_duration(Some(f64::NAN)), "unknown");
    }

    #[test]
    fn test_parse_media_info() {
        let json = r#"{
            "title": "Song",
            "uploader": "Band",
            "duration": 212.4,
            "view_count": 1234,
            "thumbnail": "https://i.example.com/t.jpg",
            "formats": [
                {"format_id": "160", "ext": "mp4", "acodec": "none"},
                {"format_id": "139", "ext": "m4a", "acodec": "mp4a.40.5", "abr": 48.0},
                {"format_id": "251", "ext": "webm", "acodec": "opus", "abr": 160.0},
                {"format_id": "sb0", "ext": "mhtml"}
            ]
        }"#;

        let info = parse_media_info(json).unwrap();
        assert_eq!(info.title, "Song");
        assert_eq!(info.duration, "3:32");
        assert_eq!(info.view_count, Some(1234));
        let ids: Vec<_> = info.formats.iter().map(|f| f.format_id.as_str()).collect();
        assert_eq!(ids, vec!["139", "251"]);
    }

    #[test]
    fn test_parse_media_info_caps_formats_and_fills_defaults() {
        let formats: Vec<String> = (0..8)
            .map(|n| format!(r#"{{"format_id": "{n}", "acodec": "opus"}}"#))
            .collect();
        let json = format!(r#"{{"formats": [{}]}}"#, formats.join(","));

        let info = parse_media_info(&json).unwrap();
        assert_eq!(info.formats.len(), MAX_LISTED_FORMATS);
        assert_eq!(info.title, "Untitled");
        assert_eq!(info.duration, "unknown");
    }

    #[test]
    fn test_parse_media_info_rejects_garbage() {
        assert!(matches!(
            parse_media_info("not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_requires_available_tool() {
        let resolver = ToolResolver::with_status(ToolStatus::Unavailable { tried: vec![] });
        let err = probe_media(&resolver, "https://example.com/v", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(_)));

        let err = probe_media(&resolver, "", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
