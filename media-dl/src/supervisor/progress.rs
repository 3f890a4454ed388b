//! Parsers for the extraction tool's output lines.

use std::sync::LazyLock;

use regex::Regex;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").unwrap());

static DESTINATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(?:ExtractAudio|download|Merger)\]\s+(?:Destination:|Merging formats into)\s+(.+)$")
        .unwrap()
});

/// Parse a percentage-complete marker such as `[download]  42.3% of 3.2MiB`.
///
/// The value is clamped to `[0, 100]`. Lines without the marker yield `None`.
pub fn parse_progress(line: &str) -> Option<f64> {
    let caps = PERCENT_RE.captures(line)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(value.clamp(0.0, 100.0))
}

/// Parse the path of a file the tool announces it is writing.
pub fn parse_destination(line: &str) -> Option<&str> {
    let caps = DESTINATION_RE.captures(line.trim())?;
    let path = caps.get(1)?.as_str().trim().trim_matches('"');
    (!path.is_empty()).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress() {
        assert_eq!(
            parse_progress("[download]  42.3% of 3.20MiB at 1.00MiB/s ETA 00:02"),
            Some(42.3)
        );
        assert_eq!(parse_progress("[download] 100% of 3.20MiB in 00:03"), Some(100.0));
        assert_eq!(parse_progress("[download]   0.0% of ~ 5.00MiB"), Some(0.0));
    }

    #[test]
    fn test_parse_progress_ignores_other_lines() {
        assert_eq!(parse_progress("[youtube] abc: Downloading webpage"), None);
        assert_eq!(parse_progress("[download] Destination: out/a.webm"), None);
        assert_eq!(parse_progress("42%"), None);
        assert_eq!(parse_progress(""), None);
    }

    #[test]
    fn test_parse_progress_clamps() {
        assert_eq!(parse_progress("[download] 180.5%"), Some(100.0));
    }

    #[test]
    fn test_parse_destination() {
        assert_eq!(
            parse_destination("[ExtractAudio] Destination: downloads/Song.mp3"),
            Some("downloads/Song.mp3")
        );
        assert_eq!(
            parse_destination("[download] Destination: downloads/Song.webm"),
            Some("downloads/Song.webm")
        );
        assert_eq!(
            parse_destination("[Merger] Merging formats into \"downloads/Clip.mkv\""),
            Some("downloads/Clip.mkv")
        );
        assert_eq!(parse_destination("[download]  12.0% of 1MiB"), None);
    }
}
