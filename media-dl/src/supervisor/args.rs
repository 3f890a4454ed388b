//! Command-line construction for the extraction tool.

use crate::config::ToolConfig;
use crate::domain::JobOptions;

/// Output template rooted at the shared output directory.
pub fn output_template(config: &ToolConfig) -> String {
    config
        .output_dir
        .join(format!("%(title).{}B.%(ext)s", config.max_filename_bytes))
        .to_string_lossy()
        .into_owned()
}

/// Build the arguments for one job, ending with the source URL.
pub fn build_args(url: &str, options: &JobOptions, config: &ToolConfig) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--newline".into(),
        "--extract-audio".into(),
        "--audio-format".into(),
        options.format.clone(),
        "--audio-quality".into(),
        options.quality.clone(),
        "--output".into(),
        output_template(config),
        "--no-mtime".into(),
        "--embed-metadata".into(),
        "--add-metadata".into(),
    ];

    if options.is_playlist {
        args.extend([
            "--yes-playlist".into(),
            "--playlist-items".into(),
            format!("1:{}", config.playlist_item_cap),
        ]);
    } else {
        args.push("--no-playlist".into());
    }

    args.extend([
        "--retries".into(),
        config.retries.to_string(),
        "--socket-timeout".into(),
        config.socket_timeout_secs.to_string(),
        "--".into(),
        url.to_string(),
    ]);

    args
}
