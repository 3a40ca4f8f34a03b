//! Comment thread model shared by the plain and chunked diff views.
//!
//! A thread is an ordered list of comments anchored to one diff location.
//! The first comment is the root; everything after it is a reply in
//! submission order. A thread with no comments is a pending placeholder
//! that is waiting for its first comment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::github::comment::RawComment;

mod grouping;
mod store;

pub use grouping::{group_by_chunk, group_replies, ChunkSeed, ReplyGrouping, SeedThread};
pub use store::ThreadStore;

/// ストア内で払い出されるスレッドの識別子（diff ビューの生存期間中のみ有効）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the diff a thread belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Base side (`originalLine`)
    Original,
    /// Head side (`line`)
    #[default]
    Modified,
}

/// A range of lines inside one chunk (zero-based, inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    pub fn contains(&self, line: u32) -> bool {
        line >= self.start && line <= self.end
    }
}

/// チャンクに紐づく行範囲（新規スレッドの既定行の算出に使う）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkRanges {
    pub range: Option<LineRange>,
    pub original_range: Option<LineRange>,
}

impl ChunkRanges {
    /// 新規スレッドの既定位置
    ///
    /// head 側の範囲があればその末尾の次の行、なければ base 側の末尾の次の行。
    /// どちらもなければ base 側の 0 行目。
    pub fn default_anchor(&self) -> (Side, u32) {
        match (self.range, self.original_range) {
            (Some(range), _) => (Side::Modified, range.end + 1),
            (None, Some(original)) => (Side::Original, original.end + 1),
            (None, None) => (Side::Original, 0),
        }
    }
}

/// Where a thread is anchored in a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    /// A line in a single-pane (plain) diff
    Line { line: u32, side: Side },
    /// A line inside one chunk of a structured diff
    Chunk { index: usize, side: Side, line: u32 },
}

impl Location {
    pub fn line(&self) -> u32 {
        match self {
            Location::Line { line, .. } | Location::Chunk { line, .. } => *line,
        }
    }

    pub fn side(&self) -> Side {
        match self {
            Location::Line { side, .. } | Location::Chunk { side, .. } => *side,
        }
    }

    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            Location::Chunk { index, .. } => Some(*index),
            Location::Line { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub text: String,
    pub line_number: u32,
    pub author: Author,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Comment {
    /// API レスポンスを正規形に変換する
    pub fn from_raw(raw: &RawComment) -> Self {
        let updated_at = raw
            .updated_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Self {
            id: raw.id,
            text: raw.text.clone(),
            line_number: raw.line_number,
            author: Author {
                name: raw.user_name.clone(),
                avatar_url: raw.user_pic.clone(),
            },
            updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub id: ThreadId,
    pub pull_request_id: String,
    pub filename: String,
    pub location: Location,
    /// 先頭がルートコメント、以降は送信順の返信
    pub comments: Vec<Comment>,
}

impl Thread {
    /// コメントがまだ無い（入力待ちの）スレッドかどうか
    pub fn is_pending(&self) -> bool {
        self.comments.is_empty()
    }

    pub fn root(&self) -> Option<&Comment> {
        self.comments.first()
    }

    pub fn replies(&self) -> &[Comment] {
        self.comments.get(1..).unwrap_or(&[])
    }

    pub fn contains_comment(&self, comment_id: u64) -> bool {
        self.comments.iter().any(|c| c.id == comment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: u64, updated_at: Option<&str>) -> RawComment {
        RawComment {
            id,
            text: "hello".to_string(),
            line_number: 3,
            user_name: "alice".to_string(),
            user_pic: Some("a.png".to_string()),
            in_reply_to_id: None,
            updated_at: updated_at.map(str::to_string),
            side: Side::Modified,
        }
    }

    #[test]
    fn test_default_anchor_prefers_modified_range() {
        let ranges = ChunkRanges {
            range: Some(LineRange::new(2, 9)),
            original_range: Some(LineRange::new(0, 4)),
        };
        assert_eq!(ranges.default_anchor(), (Side::Modified, 10));
    }

    #[test]
    fn test_default_anchor_falls_back_to_original_then_zero() {
        let original_only = ChunkRanges {
            range: None,
            original_range: Some(LineRange::new(0, 4)),
        };
        assert_eq!(original_only.default_anchor(), (Side::Original, 5));
        assert_eq!(ChunkRanges::default().default_anchor(), (Side::Original, 0));
    }

    #[test]
    fn test_line_range_normalizes_bounds() {
        let range = LineRange::new(8, 3);
        assert_eq!(range.start, 3);
        assert_eq!(range.end, 8);
        assert!(range.contains(3));
        assert!(range.contains(8));
        assert!(!range.contains(9));
    }

    #[test]
    fn test_comment_from_raw_parses_timestamp() {
        let comment = Comment::from_raw(&raw(7, Some("2024-01-02T03:04:05Z")));
        assert_eq!(comment.id, 7);
        assert_eq!(comment.author.name, "alice");
        assert_eq!(comment.author.avatar_url.as_deref(), Some("a.png"));
        assert_eq!(
            comment.updated_at.map(|t| t.to_rfc3339()),
            Some("2024-01-02T03:04:05+00:00".to_string())
        );
    }

    #[test]
    fn test_comment_from_raw_tolerates_bad_timestamp() {
        let comment = Comment::from_raw(&raw(1, Some("yesterday")));
        assert!(comment.updated_at.is_none());
    }

    #[test]
    fn test_thread_replies_skip_root() {
        let thread = Thread {
            id: ThreadId(1),
            pull_request_id: "1".to_string(),
            filename: "a.rs".to_string(),
            location: Location::Line {
                line: 3,
                side: Side::Modified,
            },
            comments: vec![
                Comment::from_raw(&raw(1, None)),
                Comment::from_raw(&raw(2, None)),
            ],
        };
        assert_eq!(thread.root().map(|c| c.id), Some(1));
        assert_eq!(thread.replies().len(), 1);
        assert!(thread.contains_comment(2));
        assert!(!thread.is_pending());
    }
}
