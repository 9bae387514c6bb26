//! MIME type lookup for response-formatting helpers.
//!
//! A pure function over the configured extension map; the protocol state
//! machine never consults it.

use std::collections::HashMap;

const MIME_DEFAULT: &str = "application/octet-stream";

/// Resolve a path to `(extension, mime type)`.
///
/// The extension is the text after the last dot of the final path segment.
/// Unknown extensions fall back to the map's `default` entry, then to
/// `application/octet-stream`.
pub fn lookup_mime_type(mime_types: &HashMap<String, String>, path: &str) -> (String, String) {
    let file = path.rsplit('/').next().unwrap_or(path);
    let extension = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_string(),
        _ => String::new(),
    };

    let mime_type = mime_types
        .get(&extension)
        .or_else(|| mime_types.get("default"))
        .cloned()
        .unwrap_or_else(|| MIME_DEFAULT.to_string());

    (extension, mime_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("html".to_string(), "text/html".to_string());
        m.insert("css".to_string(), "text/css".to_string());
        m
    }

    #[test]
    fn known_extension() {
        let (ext, mime) = lookup_mime_type(&map(), "/static/site/index.html");
        assert_eq!(ext, "html");
        assert_eq!(mime, "text/html");
    }

    #[test]
    fn unknown_extension_falls_back() {
        let (ext, mime) = lookup_mime_type(&map(), "/archive.tar.zst");
        assert_eq!(ext, "zst");
        assert_eq!(mime, "application/octet-stream");
    }

    #[test]
    fn dot_in_directory_is_not_an_extension() {
        let (ext, mime) = lookup_mime_type(&map(), "/v1.2/README");
        assert_eq!(ext, "");
        assert_eq!(mime, "application/octet-stream");
    }

    #[test]
    fn default_entry_wins_over_builtin() {
        let mut m = map();
        m.insert("default".to_string(), "text/plain".to_string());
        let (_, mime) = lookup_mime_type(&m, "/notes");
        assert_eq!(mime, "text/plain");
    }
}
