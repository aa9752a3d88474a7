//! Spec file discovery
//!
//! Walks the tests directory for `*.spec.{js,ts,cjs,mjs,cts,mts}` files and
//! reads the optional annotation comments near the top of each:
//!
//! ```text
//! // @runner-name: Navigation
//! // @runner-children: open=Open menu;save=Save draft (required)
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::path::Path;
use tracing::{debug, warn};

use crate::types::{DiscoveredTest, TestChild, SELF_CHILD_ID};
use crate::Result;

/// Default number of leading lines scanned for annotations
pub const DEFAULT_SCAN_LINES: usize = 30;

static SPEC_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.spec\.[cm]?[jt]s$").expect("valid spec file regex"));

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)@runner-name:\s*(.+)$").expect("valid name regex"));

static CHILDREN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)@runner-children:\s*(.+)$").expect("valid children regex"));

/// Whether a file name looks like a runnable spec
pub fn is_spec_file(name: &str) -> bool {
    SPEC_FILE_RE.is_match(name)
}

/// Discover every spec under `project_root/tests_dir`.
///
/// Ids are paths relative to `project_root` with forward slashes, sorted
/// with [`natural_cmp`]. A missing tests directory yields an empty list.
pub fn discover_tests(
    project_root: &Path,
    tests_dir: &Path,
    scan_lines: usize,
) -> Result<Vec<DiscoveredTest>> {
    let root = project_root.join(tests_dir);
    if !root.is_dir() {
        debug!(path = %root.display(), "tests directory missing");
        return Ok(Vec::new());
    }

    let mut found: Vec<(String, std::path::PathBuf)> = Vec::new();
    for entry in walkdir::WalkDir::new(&root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        if !is_spec_file(&name) {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(project_root).unwrap_or(path);
        found.push((to_id(relative), path.to_path_buf()));
    }

    found.sort_by(|a, b| natural_cmp(&a.0, &b.0));

    Ok(found
        .into_iter()
        .map(|(id, path)| describe(id, &path, scan_lines))
        .collect())
}

fn to_id(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn describe(id: String, path: &Path, scan_lines: usize) -> DiscoveredTest {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| id.clone());

    let header = match std::fs::read_to_string(path) {
        Ok(content) => content.lines().take(scan_lines).collect::<Vec<_>>().join("\n"),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read spec file");
            String::new()
        }
    };

    let display_name = NAME_RE
        .captures(&header)
        .map(|caps| caps[1].trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or(file_name);

    let mut children = CHILDREN_RE
        .captures(&header)
        .map(|caps| parse_children(&caps[1]))
        .unwrap_or_default();

    if children.is_empty() {
        children.push(TestChild {
            id: SELF_CHILD_ID.to_string(),
            label: display_name.clone(),
            required: false,
        });
    }

    DiscoveredTest {
        id,
        display_name,
        children,
    }
}

/// Parse `id=label;id2=label two (required)`.
///
/// A chunk without `=` is used as both id and label. Chunks with an empty
/// id are dropped.
pub fn parse_children(raw: &str) -> Vec<TestChild> {
    raw.split(';')
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .filter_map(|chunk| {
            let (id, label) = match chunk.split_once('=') {
                Some((id, label)) => (id.trim(), label.trim()),
                None => (chunk, chunk),
            };
            if id.is_empty() {
                return None;
            }
            Some(TestChild {
                id: id.to_string(),
                label: label.to_string(),
                required: label.to_ascii_lowercase().contains("(required)"),
            })
        })
        .collect()
}

/// Numeric-aware ordering: digit runs compare by value, everything else
/// case-insensitively, with a plain comparison as the final tie-break.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = Chunks::new(a);
    let mut right = Chunks::new(b);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (is_digits(x), is_digits(y)) {
                    (true, true) => cmp_numeric(x, y),
                    _ => cmp_text(x, y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn is_digits(s: &str) -> bool {
    s.bytes().next().is_some_and(|b| b.is_ascii_digit())
}

fn cmp_numeric(x: &str, y: &str) -> Ordering {
    let x = x.trim_start_matches('0');
    let y = y.trim_start_matches('0');
    x.len().cmp(&y.len()).then_with(|| x.cmp(y))
}

fn cmp_text(x: &str, y: &str) -> Ordering {
    x.chars()
        .flat_map(char::to_lowercase)
        .cmp(y.chars().flat_map(char::to_lowercase))
}

/// Alternating runs of ASCII digits and non-digits
struct Chunks<'a> {
    rest: &'a str,
}

impl<'a> Chunks<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let first = self.rest.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = self
            .rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() != digits)
            .map(|(i, _)| i)
            .unwrap_or(self.rest.len());
        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(chunk)
    }
}
