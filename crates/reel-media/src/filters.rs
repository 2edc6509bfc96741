//! FFmpeg filter graph and demuxer text builders.

use std::path::{Path, PathBuf};

/// Largest title font size on the thumbnail.
const MAX_TITLE_FONT_SIZE: u32 = 150;
/// Font budget divided by the longest line length.
const TITLE_FONT_BUDGET: u32 = 3000;
/// Line lengths below this do not grow the font further.
const MIN_TITLE_LINE_LEN: usize = 10;

/// One voiceover track placed on the output timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub path: PathBuf,
    /// Offset from the start of the video, in seconds
    pub start_time: f64,
}

impl AudioTrack {
    pub fn new(path: impl Into<PathBuf>, start_time: f64) -> Self {
        Self {
            path: path.into(),
            start_time,
        }
    }

    /// Start offset rounded to whole milliseconds.
    pub fn delay_ms(&self) -> u64 {
        (self.start_time.max(0.0) * 1000.0).round() as u64
    }
}

/// Build the `filter_complex` that delays each track and mixes them without
/// volume normalization. Input 0 is the video; tracks are inputs 1..=n.
/// The mixed stream is labelled `[aout]`.
pub fn build_audio_mix_filter(tracks: &[AudioTrack]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(tracks.len() + 1);
    let mut labels = String::new();

    for (index, track) in tracks.iter().enumerate() {
        let delay = track.delay_ms();
        let label = format!("[a{}]", index);
        parts.push(format!("[{}:a]adelay={}|{}{}", index + 1, delay, delay, label));
        labels.push_str(&label);
    }

    parts.push(format!(
        "{}amix=inputs={}:duration=longest:normalize=0[aout]",
        labels,
        tracks.len()
    ));

    parts.join(";")
}

/// Escape text for a drawtext `text='...'` value.
pub fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\\\\\")
        .replace(':', "\\:")
        .replace('\'', "'\\''")
}

/// Split a title into two balanced lines at the word boundary nearest its middle.
pub fn split_title_lines(title: &str) -> (String, String) {
    let words: Vec<&str> = title.split_whitespace().collect();
    if words.len() < 2 {
        return (words.join(" "), String::new());
    }

    let total: usize = words.iter().map(|w| w.chars().count()).sum::<usize>() + words.len() - 1;
    let mut best_split = 1;
    let mut best_diff = usize::MAX;
    let mut first_len = 0;

    for (i, word) in words.iter().enumerate().take(words.len() - 1) {
        first_len += word.chars().count() + usize::from(i > 0);
        let second_len = total - first_len - 1;
        let diff = first_len.abs_diff(second_len);
        if diff < best_diff {
            best_diff = diff;
            best_split = i + 1;
        }
    }

    (words[..best_split].join(" "), words[best_split..].join(" "))
}

/// Font size for a two-line title: `min(150, 3000 / max(longest, 10))`.
pub fn title_font_size(line1: &str, line2: &str) -> u32 {
    let longest = line1
        .chars()
        .count()
        .max(line2.chars().count())
        .max(MIN_TITLE_LINE_LEN);
    MAX_TITLE_FONT_SIZE.min(TITLE_FONT_BUDGET / longest as u32)
}

/// Scale/crop a still to `width`x`height` and draw the title centered on it.
pub fn build_title_overlay_filter(title: &str, width: u32, height: u32) -> String {
    let (line1, line2) = split_title_lines(title);
    let font_size = title_font_size(&line1, &line2);

    let mut filter = format!(
        "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}",
        w = width,
        h = height
    );

    let text_style = format!(
        "fontcolor=white:fontsize={}:borderw=6:bordercolor=black:x=(w-text_w)/2",
        font_size
    );

    if line2.is_empty() {
        filter.push_str(&format!(
            ",drawtext=text='{}':{}:y=(h-text_h)/2",
            escape_drawtext(&line1),
            text_style
        ));
    } else {
        filter.push_str(&format!(
            ",drawtext=text='{}':{}:y=(h/2)-text_h-10",
            escape_drawtext(&line1),
            text_style
        ));
        filter.push_str(&format!(
            ",drawtext=text='{}':{}:y=(h/2)+10",
            escape_drawtext(&line2),
            text_style
        ));
    }

    filter
}

/// One concat demuxer manifest line for `path`.
///
/// Backslashes become forward slashes and single quotes are closed, escaped
/// and reopened.
pub fn concat_manifest_line(path: &Path) -> String {
    let normalized = path.to_string_lossy().replace('\\', "/");
    format!("file '{}'", normalized.replace('\'', "'\\''"))
}

/// Full manifest text for the ordered inputs.
pub fn build_concat_manifest(inputs: &[PathBuf]) -> String {
    let mut manifest = inputs
        .iter()
        .map(|p| concat_manifest_line(p))
        .collect::<Vec<_>>()
        .join("\n");
    manifest.push('\n');
    manifest
}
