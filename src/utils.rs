use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::image_processing::TransformResult;

/// Create a progress bar with consistent styling
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner:.blue} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg} ({eta})",
    )
    .map(|style| style.progress_chars("#>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Format duration in human-readable format
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs >= 60 {
        format!("{}m {}s", total_secs / 60, total_secs % 60)
    } else if total_secs > 0 {
        format!("{}.{:03}s", total_secs, millis)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Get file extension in lowercase
pub fn get_file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

pub fn has_valid_extension(path: &Path, extensions: &[String]) -> bool {
    match get_file_extension(path) {
        Some(ext) => extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext)),
        None => false,
    }
}

/// Mime type guessed from a file extension
pub fn mime_type_for_path(path: &Path) -> &'static str {
    match get_file_extension(path).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Make a name safe to use as one object-key segment.
///
/// Separators, reserved and control characters become `_`, runs of `_`
/// collapse, and the result is capped at 100 characters.
pub fn sanitize_object_name(name: &str) -> String {
    const MAX_NAME_LENGTH: usize = 100;

    let mut result = String::with_capacity(name.len());
    let mut prev_was_underscore = false;

    for ch in name.chars() {
        let ch = match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '#' | '%' => '_',
            c if c.is_control() || c.is_whitespace() => '_',
            c => c,
        };
        if ch == '_' {
            if !prev_was_underscore {
                result.push(ch);
            }
            prev_was_underscore = true;
        } else {
            result.push(ch);
            prev_was_underscore = false;
        }
    }

    let trimmed: String = result
        .trim_matches(|c| c == '_' || c == '.')
        .chars()
        .take(MAX_NAME_LENGTH)
        .collect();

    if trimmed.is_empty() {
        "image".to_string()
    } else {
        trimmed
    }
}

/// Output name for a processed file: sanitized original stem plus the new extension
pub fn processed_file_name(original_name: &str, extension: &str) -> String {
    // Browsers may submit a full client path
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    let stem = Path::new(base)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(base);

    format!("{}.{}", sanitize_object_name(stem), extension)
}

/// `name` with `-n` inserted before its extension (`photo.jpg` -> `photo-2.jpg`)
pub fn numbered_file_name(name: &str, n: usize) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => format!("{}-{}.{}", stem, n, extension),
        _ => format!("{}-{}", name, n),
    }
}

/// Generate a short, unique session id (16 hex chars)
pub fn generate_session_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let mut hasher = Sha256::new();
    hasher.update(nanos.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());

    digest[..16].to_string()
}

/// Processing statistics for one run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessingStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl ProcessingStats {
    pub fn from_results(results: &[TransformResult]) -> Self {
        let completed = results.iter().filter(|r| r.is_completed()).count();
        Self {
            total: results.len(),
            completed,
            failed: results.len() - completed,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }
}
