//! Patch parsing utilities for splitting GitHub patches into hunks.
//!
//! Hunks become the chunks of the structured view, and their line numbers
//! drive both view-zone placement in the plain view and the `position`
//! parameter of GitHub's comment API.

use crate::thread::{ChunkRanges, LineRange, Side};

/// Represents the type of a line in a diff patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineType {
    /// Line added in the new version (starts with +)
    Added,
    /// Line removed from the old version (starts with -)
    Removed,
    /// Context line, unchanged (starts with space)
    Context,
    /// Hunk header (@@ ... @@)
    Header,
    /// Metadata lines (diff --, +++, index, etc.)
    Meta,
}

/// Parsed `@@ -old_start,old_count +new_start,new_count @@` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkHeader {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
}

/// One line of a hunk with its line numbers on both sides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub line_type: LineType,
    pub content: String,
    pub old_line: Option<u32>,
    pub new_line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub header_text: String,
    pub header: HunkHeader,
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    /// 0 始まり・両端含みの行範囲（空側は None）
    pub fn ranges(&self) -> ChunkRanges {
        fn span(start: u32, count: u32) -> Option<LineRange> {
            if count == 0 {
                return None;
            }
            let first = start.saturating_sub(1);
            Some(LineRange::new(first, first + count - 1))
        }

        ChunkRanges {
            range: span(self.header.new_start, self.header.new_count),
            original_range: span(self.header.old_start, self.header.old_count),
        }
    }
}

/// Parse "start,count" or "start" (count defaults to 1)
fn parse_span(span: &str) -> Option<(u32, u32)> {
    match span.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((span.parse().ok()?, 1)),
    }
}

/// Parse a hunk header
/// Format: @@ -old_start,old_count +new_start,new_count @@
pub fn parse_hunk_header(line: &str) -> Option<HunkHeader> {
    let rest = line.strip_prefix("@@ ")?;
    let mut parts = rest.split_whitespace();
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;

    let (old_start, old_count) = parse_span(old)?;
    let (new_start, new_count) = parse_span(new)?;
    Some(HunkHeader {
        old_start,
        old_count,
        new_start,
        new_count,
    })
}

/// Classify a line and extract its content without the prefix
pub fn classify_line(line: &str) -> (LineType, &str) {
    if line.starts_with("@@") {
        (LineType::Header, line)
    } else if line.starts_with("+++")
        || line.starts_with("---")
        || line.starts_with("diff ")
        || line.starts_with("index ")
    {
        (LineType::Meta, line)
    } else if let Some(content) = line.strip_prefix('+') {
        (LineType::Added, content)
    } else if let Some(content) = line.strip_prefix('-') {
        (LineType::Removed, content)
    } else if let Some(content) = line.strip_prefix(' ') {
        (LineType::Context, content)
    } else {
        // Lines without prefix (shouldn't happen in valid patches, but handle gracefully)
        (LineType::Context, line)
    }
}

/// Split a patch into hunks, numbering every line on both sides.
///
/// Meta lines are skipped. Lines before the first parsable header are
/// ignored.
pub fn parse_hunks(patch: &str) -> Vec<Hunk> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut old_line = 0;
    let mut new_line = 0;

    for line in patch.lines() {
        let (line_type, content) = classify_line(line);
        match line_type {
            LineType::Meta => {}
            LineType::Header => {
                let Some(header) = parse_hunk_header(line) else {
                    tracing::warn!("Failed to parse hunk header: {}", line);
                    continue;
                };
                old_line = header.old_start;
                new_line = header.new_start;
                hunks.push(Hunk {
                    header_text: line.to_string(),
                    header,
                    lines: Vec::new(),
                });
            }
            LineType::Added | LineType::Removed | LineType::Context => {
                let Some(hunk) = hunks.last_mut() else {
                    continue;
                };
                let (old, new) = match line_type {
                    LineType::Added => (None, Some(new_line)),
                    LineType::Removed => (Some(old_line), None),
                    _ => (Some(old_line), Some(new_line)),
                };
                if old.is_some() {
                    old_line += 1;
                }
                if new.is_some() {
                    new_line += 1;
                }
                hunk.lines.push(DiffLine {
                    line_type,
                    content: content.to_string(),
                    old_line: old,
                    new_line: new,
                });
            }
        }
    }

    hunks
}

/// Convert a file line number to a patch position.
///
/// Head-side lines are matched against new line numbers and base-side lines
/// against old ones, so comments on deletion-only hunks resolve too.
/// Position counting: meta lines are skipped, the first `@@` is not counted
/// (position 1 is the line below it), and subsequent `@@` headers are counted.
pub fn line_number_to_position(patch: &str, side: Side, target_line: u32) -> Option<u32> {
    let mut old_line_number: Option<u32> = None;
    let mut new_line_number: Option<u32> = None;
    let mut position_counter: Option<u32> = None;

    for line in patch.lines() {
        let (line_type, _) = classify_line(line);

        let (old, new) = match line_type {
            LineType::Meta => continue,
            LineType::Header => {
                let header = parse_hunk_header(line);
                old_line_number = header.map(|h| h.old_start);
                new_line_number = header.map(|h| h.new_start);
                // First @@ initializes to 0 (not counted); subsequent @@ lines increment
                position_counter = Some(position_counter.map_or(0, |p| p + 1));
                continue;
            }
            LineType::Added => (None, new_line_number),
            LineType::Removed => (old_line_number, None),
            LineType::Context => (old_line_number, new_line_number),
        };

        position_counter = position_counter.map(|p| p + 1);
        let current = match side {
            Side::Modified => new,
            Side::Original => old,
        };
        if current == Some(target_line) {
            return position_counter;
        }
        if old.is_some() {
            old_line_number = old_line_number.map(|n| n + 1);
        }
        if new.is_some() {
            new_line_number = new_line_number.map(|n| n + 1);
        }
    }
    None
}
