//! Byte-pattern sniffing that tells binary media apart from text placeholders.
//!
//! The catalog sometimes answers an audio request with an HTML/JSON error page
//! and a 200 status. This is a heuristic, not a format parser.

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Number of leading bytes inspected.
pub const SAMPLE_SIZE: usize = 1024;

fn is_text_byte(byte: u8) -> bool {
    matches!(byte, 7 | 8 | 9 | 10 | 12 | 13 | 27) || (byte >= 0x20 && byte != 0x7f)
}

/// Returns `true` when the sample contains at least one non-text byte.
pub fn is_valid_media(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(SAMPLE_SIZE)];
    if sample.is_empty() {
        return false;
    }
    !sample.iter().copied().all(is_text_byte)
}

/// File-backed variant of [`is_valid_media`]; unreadable files are invalid.
pub fn is_valid_media_file(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut sample = Vec::with_capacity(SAMPLE_SIZE);
    if file
        .take(SAMPLE_SIZE as u64)
        .read_to_end(&mut sample)
        .is_err()
    {
        return false;
    }
    is_valid_media(&sample)
}
