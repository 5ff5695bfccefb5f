// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! MIME type resolution from file extensions
//!
//! Lookup order: the system `mime.types` table, then a built-in table, then
//! `application/octet-stream`.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Returned when neither table knows the extension
pub const OCTET_STREAM: &str = "application/octet-stream";

const SYSTEM_TABLES: &[&str] = &[
    "/etc/mime.types",
    "/etc/httpd/mime.types",
    "/etc/httpd/conf/mime.types",
    "/etc/apache/mime.types",
    "/etc/apache2/mime.types",
    "/usr/local/etc/httpd/conf/mime.types",
    "/usr/local/etc/mime.types",
];

static SYSTEM: Lazy<HashMap<String, String>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for file in SYSTEM_TABLES {
        if let Ok(content) = std::fs::read_to_string(file) {
            let before = table.len();
            parse_mime_types(&content, &mut table);
            debug!("Loaded {} MIME mappings from {}", table.len() - before, file);
        }
    }
    table
});

/// Parse the `type ext ext ...` format; later files win, like other readers of this format
fn parse_mime_types(content: &str, table: &mut HashMap<String, String>) {
    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("");
        let mut fields = line.split_whitespace();
        let Some(mime) = fields.next() else {
            continue;
        };
        for ext in fields {
            table.insert(ext.to_ascii_lowercase(), mime.to_string());
        }
    }
}

/// Built-in extension table covering common office, image, video, audio, archive and code types
fn builtin(ext: &str) -> Option<&'static str> {
    let mime = match ext {
        // Documents
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "odt" => "application/vnd.oasis.opendocument.text",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "rtf" => "application/rtf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "epub" => "application/epub+zip",

        // Images
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        "heic" => "image/heic",
        "ico" => "image/vnd.microsoft.icon",

        // Video
        "mp4" => "video/mp4",
        "avi" => "video/avi",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "wmv" => "video/x-ms-wmv",

        // Audio
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",

        // Archives
        "zip" => "application/zip",
        "rar" => "application/vnd.rar",
        "7z" => "application/x-7z-compressed",
        "tar" => "application/x-tar",
        "gz" => "application/gzip",
        "bz2" => "application/x-bzip2",
        "xz" => "application/x-xz",

        // Code
        "py" => "text/x-python",
        "rs" => "text/x-rust",
        "js" => "text/javascript",
        "ts" => "text/x-typescript",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "json" => "application/json",
        "xml" => "application/xml",
        "java" => "text/x-java",
        "c" | "h" => "text/x-c",
        "cpp" | "hpp" => "text/x-c++",
        "go" => "text/x-go",
        "rb" => "text/x-ruby",
        "php" => "application/x-httpd-php",
        "sh" => "application/x-sh",
        "swift" => "text/x-swift",
        "kt" => "text/x-kotlin",
        _ => return None,
    };
    Some(mime)
}

/// Lowercased final extension without the dot (`gz` for `archive.tar.gz`)
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Resolve the MIME type of a path from its extension
pub fn resolve(path: &Path) -> String {
    let Some(ext) = extension_of(path) else {
        return OCTET_STREAM.to_string();
    };

    if let Some(mime) = SYSTEM.get(&ext) {
        return mime.clone();
    }

    builtin(&ext).unwrap_or(OCTET_STREAM).to_string()
}
