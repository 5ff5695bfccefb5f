// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Destination path templates
//!
//! Recognised placeholders: `{{YYYY}} {{MM}} {{DD}} {{HH}} {{mm}} {{ss}}` (from the clock),
//! `{{BASENAME}} {{STEM}} {{EXT}}` (from the source path) and `{{HOME}}`.
//! Unknown placeholders are kept verbatim. Substituted values are never re-expanded.

use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Placeholder names understood by [`expand`]
pub const PLACEHOLDERS: &[&str] = &[
    "YYYY", "MM", "DD", "HH", "mm", "ss", "BASENAME", "STEM", "EXT", "HOME",
];

/// The user's home directory, or `.` when it cannot be determined
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Expand `template` for `source` at `now`, using the current user's home directory
pub fn expand(template: &str, source: &Path, now: NaiveDateTime) -> String {
    expand_with_home(template, source, now, &home_dir())
}

/// Expand `template` with an explicit home directory
pub fn expand_with_home(template: &str, source: &Path, now: NaiveDateTime, home: &Path) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];

        let substituted = after_open
            .find(CLOSE)
            .and_then(|end| value_of(&after_open[..end], source, now, home).map(|value| (end, value)));
        match substituted {
            Some((end, value)) => {
                out.push_str(&value);
                rest = &after_open[end + CLOSE.len()..];
            }
            // Not a placeholder: keep one brace and rescan, so `{{x/{{YYYY}}` still expands
            None => {
                out.push('{');
                rest = &rest[start + 1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn value_of(name: &str, source: &Path, now: NaiveDateTime, home: &Path) -> Option<String> {
    let value = match name {
        "YYYY" => now.format("%Y").to_string(),
        "MM" => now.format("%m").to_string(),
        "DD" => now.format("%d").to_string(),
        "HH" => now.format("%H").to_string(),
        "mm" => now.format("%M").to_string(),
        "ss" => now.format("%S").to_string(),
        "BASENAME" => lossy(source.file_name()),
        "STEM" => lossy(source.file_stem()),
        // Final suffix only: `.gz` for `archive.tar.gz`
        "EXT" => source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default(),
        "HOME" => home.to_string_lossy().into_owned(),
        _ => return None,
    };
    Some(value)
}

fn lossy(part: Option<&std::ffi::OsStr>) -> String {
    part.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Placeholders in `template` that [`expand`] will not substitute
pub fn unknown_placeholders(template: &str) -> Vec<String> {
    let mut unknown = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        let name = &after_open[..end];
        if name.contains('{') {
            rest = &rest[start + 1..];
            continue;
        }
        if !PLACEHOLDERS.contains(&name) {
            unknown.push(name.to_string());
        }
        rest = &after_open[end + CLOSE.len()..];
    }

    unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_date_placeholders_are_zero_padded() {
        let out = expand_with_home(
            "{{YYYY}}-{{MM}}-{{DD}}T{{HH}}:{{mm}}:{{ss}}",
            Path::new("/tmp/a.txt"),
            at(2024, 3, 7, 4, 5, 9),
            Path::new("/home/me"),
        );
        assert_eq!(out, "2024-03-07T04:05:09");
    }

    #[test]
    fn test_file_placeholders() {
        let out = expand_with_home(
            "{{HOME}}/X/{{STEM}}|{{BASENAME}}|{{EXT}}",
            Path::new("/downloads/report.final.pdf"),
            at(2024, 1, 1, 0, 0, 0),
            Path::new("/home/me"),
        );
        assert_eq!(out, "/home/me/X/report.final|report.final.pdf|.pdf");
    }

    #[test]
    fn test_ext_takes_last_suffix_only() {
        let out = expand_with_home(
            "{{HOME}}/X/{{EXT}}",
            Path::new("/downloads/archive.tar.gz"),
            at(2024, 1, 1, 0, 0, 0),
            Path::new("/home/me"),
        );
        assert_eq!(out, "/home/me/X/.gz");
    }

    #[test]
    fn test_repeated_and_unknown_placeholders() {
        let out = expand_with_home(
            "{{YYYY}}/{{NOPE}}/{{YYYY}}/{{unclosed",
            Path::new("/a/b.c"),
            at(2023, 12, 31, 23, 59, 59),
            Path::new("/h"),
        );
        assert_eq!(out, "2023/{{NOPE}}/2023/{{unclosed");
        assert_eq!(unknown_placeholders("{{YYYY}}/{{NOPE}}/{{home}}"), ["NOPE", "home"]);
    }

    #[test]
    fn test_stray_braces_do_not_hide_placeholders() {
        let out = expand_with_home(
            "/srv/{{draft/{{YYYY}}/{{BASENAME}}",
            Path::new("/in/a.pdf"),
            at(2024, 1, 15, 0, 0, 0),
            Path::new("/h"),
        );
        assert_eq!(out, "/srv/{{draft/2024/a.pdf");

        let out = expand_with_home("{{{MM}}}", Path::new("/in/a.pdf"), at(2024, 1, 15, 0, 0, 0), Path::new("/h"));
        assert_eq!(out, "{01}");

        assert_eq!(unknown_placeholders("/srv/{{draft/{{YYYY}}/{{NOPE}}"), ["NOPE"]);
    }

    #[test]
    fn test_substituted_values_are_not_reexpanded() {
        let out = expand_with_home(
            "{{BASENAME}}",
            Path::new("/a/{{YYYY}}.txt"),
            at(2024, 1, 1, 0, 0, 0),
            Path::new("/h"),
        );
        assert_eq!(out, "{{YYYY}}.txt");
    }

    #[test]
    fn test_expansion_is_pure() {
        let now = at(2024, 6, 15, 12, 30, 0);
        let a = expand_with_home("{{HOME}}/{{YYYY}}/{{BASENAME}}", Path::new("/x/y.z"), now, Path::new("/h"));
        let b = expand_with_home("{{HOME}}/{{YYYY}}/{{BASENAME}}", Path::new("/x/y.z"), now, Path::new("/h"));
        assert_eq!(a, b);
    }
}
