use tracing::warn;

use super::{ChunkRanges, Comment, LineRange, Side};
use crate::github::comment::RawComment;

/// 返信をルートコメントの下にまとめた結果
#[derive(Debug, Clone, Default)]
pub struct ReplyGrouping {
    /// ルートの side/行番号を持つスレッド（comments の先頭がルート）
    pub threads: Vec<SeedThread>,
    /// 親が見つからず捨てた返信の id
    pub dropped: Vec<u64>,
}

/// Groups a flat, ordered comment listing into threads.
///
/// A reply joins the thread that already holds its parent. Replies whose
/// parent is not (yet) present are logged and dropped. Each thread takes its
/// side and line from the root.
pub fn group_replies(raws: &[RawComment]) -> ReplyGrouping {
    let mut grouping = ReplyGrouping::default();

    for raw in raws {
        let comment = Comment::from_raw(raw);
        let Some(parent_id) = raw.in_reply_to_id else {
            grouping.threads.push(SeedThread {
                side: raw.side,
                line: raw.line_number,
                comments: vec![comment],
            });
            continue;
        };

        match grouping
            .threads
            .iter_mut()
            .find(|thread| thread.comments.iter().any(|c| c.id == parent_id))
        {
            Some(thread) => thread.comments.push(comment),
            None => {
                warn!(
                    comment_id = raw.id,
                    parent_id, "dropping reply whose parent comment is not in this file"
                );
                grouping.dropped.push(raw.id);
            }
        }
    }

    grouping
}

/// 1 スレッド分の初期データ
#[derive(Debug, Clone)]
pub struct SeedThread {
    pub side: Side,
    pub line: u32,
    pub comments: Vec<Comment>,
}

/// One chunk's worth of persisted threads plus its line ranges
#[derive(Debug, Clone, Default)]
pub struct ChunkSeed {
    pub range: Option<LineRange>,
    pub original_range: Option<LineRange>,
    pub threads: Vec<SeedThread>,
}

/// Binds each thread to the first chunk whose range holds its root line.
///
/// Head-side threads try the head-side range first and fall back to the
/// base-side range. Base-side threads only match base-side ranges. Threads
/// that fit no chunk land in one extra trailing group reserved for metadata,
/// so the result always has `chunks.len() + 1` entries.
pub fn group_by_chunk(threads: Vec<SeedThread>, chunks: &[ChunkRanges]) -> Vec<ChunkSeed> {
    let mut seeds: Vec<ChunkSeed> = chunks
        .iter()
        .map(|ranges| ChunkSeed {
            range: ranges.range,
            original_range: ranges.original_range,
            threads: Vec::new(),
        })
        .collect();
    let mut trailing = ChunkSeed::default();

    for mut thread in threads {
        // API の行番号は 1 始まり、チャンク範囲は 0 始まり
        let zero_based = thread.line.saturating_sub(1);
        let in_original = |seed: &ChunkSeed| seed.original_range.is_some_and(|r| r.contains(zero_based));

        let placement = match thread.side {
            Side::Modified => seeds
                .iter()
                .position(|seed| seed.range.is_some_and(|r| r.contains(zero_based)))
                .map(|index| (index, Side::Modified))
                .or_else(|| seeds.iter().position(in_original).map(|index| (index, Side::Original))),
            Side::Original => seeds.iter().position(in_original).map(|index| (index, Side::Original)),
        };

        match placement {
            Some((index, side)) => {
                thread.side = side;
                seeds[index].threads.push(thread);
            }
            None => trailing.threads.push(thread),
        }
    }

    seeds.push(trailing);
    seeds
}
