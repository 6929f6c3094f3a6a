//! Canonical track records and the cache keys derived from them.

use std::path::{Path, PathBuf};

const LYRICIST_LABELS: [&str; 2] = ["作词", "lyricist"];
const COMPOSER_LABELS: [&str; 2] = ["作曲", "composer"];
const AUDIO_EXTENSION: &str = "mp3";

/// Normalized search result. Title and author are always sanitized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRecord {
    title: String,
    author: String,
    picture_url: String,
    lyricist: String,
    composer: String,
    play_url: String,
}

impl TrackRecord {
    pub fn new(
        title: &str,
        author: &str,
        picture_url: impl Into<String>,
        lyricist: impl Into<String>,
        composer: impl Into<String>,
        play_url: impl Into<String>,
    ) -> Self {
        Self {
            title: sanitize_display_text(title),
            author: sanitize_display_text(author),
            picture_url: picture_url.into(),
            lyricist: lyricist.into(),
            composer: composer.into(),
            play_url: play_url.into(),
        }
    }

    /// Builds a record from raw provider fields, pulling credits out of the lyrics blob.
    pub fn from_provider_fields(
        title: &str,
        author: &str,
        picture_url: &str,
        lyrics: &str,
        play_url: &str,
    ) -> Self {
        Self::new(
            title,
            author,
            picture_url,
            extract_lyricist(lyrics),
            extract_composer(lyrics),
            play_url,
        )
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn picture_url(&self) -> &str {
        &self.picture_url
    }

    pub fn lyricist(&self) -> &str {
        &self.lyricist
    }

    pub fn composer(&self) -> &str {
        &self.composer
    }

    pub fn play_url(&self) -> &str {
        &self.play_url
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.title, &self.author)
    }

    pub fn display_label(&self) -> String {
        format!("{} - {}", self.title, self.author)
    }
}

/// `title--author`, the stem of every cached audio file for a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(title: &str, author: &str) -> Self {
        Self(format!(
            "{}--{}",
            sanitize_display_text(title),
            sanitize_display_text(author)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn audio_file_name(&self) -> String {
        format!("{}.{AUDIO_EXTENSION}", self.0)
    }

    pub fn audio_path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.audio_file_name())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_cjk_ideograph(ch: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&ch)
}

/// Keeps word characters, whitespace and CJK ideographs.
pub fn sanitize_display_text(value: &str) -> String {
    value
        .chars()
        .filter(|ch| {
            ch.is_alphanumeric() || *ch == '_' || ch.is_whitespace() || is_cjk_ideograph(*ch)
        })
        .collect()
}

fn extract_labeled_field(lyrics: &str, labels: &[&str]) -> String {
    // ASCII lowering keeps byte offsets aligned with the original text.
    let lowered = lyrics.to_ascii_lowercase();
    for label in labels {
        let mut search_from = 0usize;
        while let Some(found) = lowered[search_from..].find(label) {
            let after_label = search_from + found + label.len();
            let rest = &lyrics[after_label..];
            let trimmed = rest.trim_start_matches([' ', '\t']);
            let value = trimmed
                .strip_prefix(':')
                .or_else(|| trimmed.strip_prefix('：'));
            if let Some(value) = value {
                let line_end = value.find('\n').unwrap_or(value.len());
                return value[..line_end].trim().to_string();
            }
            search_from = after_label;
        }
    }
    String::new()
}

pub fn extract_lyricist(lyrics: &str) -> String {
    extract_labeled_field(lyrics, &LYRICIST_LABELS)
}

pub fn extract_composer(lyrics: &str) -> String {
    extract_labeled_field(lyrics, &COMPOSER_LABELS)
}

/// File name used for a cached thumbnail.
///
/// Catalog image urls look like `.../<hash>==/<id>.jpg?param=300x300`; the
/// `<id>.jpg` segment is reused when present, otherwise the url is hashed.
pub fn image_file_name(url: &str) -> String {
    let embedded = url.find("==/").and_then(|start| {
        let rest = &url[start + 3..];
        let end = rest.find(".jpg?")?;
        let name = &rest[..end + 4];
        let usable = end > 0 && !name.contains(['/', '\\']);
        usable.then(|| name.to_string())
    });
    embedded.unwrap_or_else(|| format!("{:x}.jpg", md5::compute(url.as_bytes())))
}
