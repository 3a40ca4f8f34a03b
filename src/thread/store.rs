use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use super::{ChunkRanges, ChunkSeed, Comment, Location, SeedThread, Side, Thread, ThreadId};

/// スレッドの格納単位
///
/// チャンク付き diff ではチャンク単位、プレーン diff では (side, line) 単位でまとめる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Bucket {
    Line(Side, u32),
    Chunk(usize),
}

impl From<&Location> for Bucket {
    fn from(location: &Location) -> Self {
        match *location {
            Location::Line { line, side } => Bucket::Line(side, line),
            Location::Chunk { index, .. } => Bucket::Chunk(index),
        }
    }
}

/// In-memory mapping from diff location to an ordered list of threads.
///
/// Pure data: nothing in here touches rendering.
#[derive(Debug, Clone)]
pub struct ThreadStore {
    pull_request_id: String,
    filename: String,
    buckets: BTreeMap<Bucket, Vec<Thread>>,
    /// thread id -> bucket（削除・追記時の逆引き用）
    index: HashMap<ThreadId, Bucket>,
    chunk_ranges: BTreeMap<usize, ChunkRanges>,
    next_id: u64,
}

impl ThreadStore {
    pub fn new(pull_request_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            pull_request_id: pull_request_id.into(),
            filename: filename.into(),
            buckets: BTreeMap::new(),
            index: HashMap::new(),
            chunk_ranges: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn pull_request_id(&self) -> &str {
        &self.pull_request_id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    fn mint_id(&mut self) -> ThreadId {
        let id = ThreadId(self.next_id);
        self.next_id += 1;
        id
    }

    /// 指定位置にスレッドを追加する（既存コメント付き）
    pub fn insert_thread(&mut self, location: Location, comments: Vec<Comment>) -> ThreadId {
        let id = self.mint_id();
        let bucket = Bucket::from(&location);
        let thread = Thread {
            id,
            pull_request_id: self.pull_request_id.clone(),
            filename: self.filename.clone(),
            location,
            comments,
        };
        self.buckets.entry(bucket).or_default().push(thread);
        self.index.insert(id, bucket);
        id
    }

    /// Opens a new empty thread at `location`.
    ///
    /// Returns `None` without touching the store when a pending thread
    /// already exists there.
    pub fn add_pending_thread(&mut self, location: Location) -> Option<ThreadId> {
        if self.has_pending(&location) {
            debug!(?location, "add_pending_thread: pending thread already open");
            return None;
        }
        Some(self.insert_thread(location, Vec::new()))
    }

    pub fn has_pending(&self, location: &Location) -> bool {
        self.threads_for_location(location)
            .iter()
            .any(Thread::is_pending)
    }

    /// スレッドを削除する。存在しない id は何もしない。
    pub fn remove_thread(&mut self, id: ThreadId) -> Option<Thread> {
        let bucket = self.index.remove(&id)?;
        let threads = self.buckets.get_mut(&bucket)?;
        let position = threads.iter().position(|t| t.id == id)?;
        let removed = threads.remove(position);
        // チャンクの空バケットは範囲情報と対応するので残す
        if threads.is_empty() && matches!(bucket, Bucket::Line(..)) {
            self.buckets.remove(&bucket);
        }
        Some(removed)
    }

    /// Folds a comment into the store.
    ///
    /// With a target thread the comment becomes its first comment (pending
    /// thread) or is appended as the newest reply. Without one, a new thread
    /// is opened on the modified side at the comment's line. Returns the
    /// thread that received the comment, or `None` if the target is gone.
    pub fn record_comment(&mut self, target: Option<ThreadId>, comment: Comment) -> Option<ThreadId> {
        let Some(id) = target else {
            let location = Location::Line {
                line: comment.line_number,
                side: Side::Modified,
            };
            return Some(self.insert_thread(location, vec![comment]));
        };

        match self.thread_mut(id) {
            Some(thread) => {
                thread.comments.push(comment);
                Some(id)
            }
            None => {
                warn!(thread_id = %id, comment_id = comment.id, "record_comment: thread no longer exists");
                None
            }
        }
    }

    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        let bucket = self.index.get(&id)?;
        self.buckets.get(bucket)?.iter().find(|t| t.id == id)
    }

    fn thread_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        let bucket = self.index.get(&id)?;
        self.buckets.get_mut(bucket)?.iter_mut().find(|t| t.id == id)
    }

    /// Threads sharing the location's bucket, in insertion order
    pub fn threads_for_location(&self, location: &Location) -> &[Thread] {
        self.buckets
            .get(&Bucket::from(location))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn threads_in_chunk(&self, index: usize) -> &[Thread] {
        self.buckets
            .get(&Bucket::Chunk(index))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn chunk_ranges(&self, index: usize) -> ChunkRanges {
        self.chunk_ranges.get(&index).copied().unwrap_or_default()
    }

    pub fn set_chunk_ranges(&mut self, index: usize, ranges: ChunkRanges) {
        self.chunk_ranges.insert(index, ranges);
        self.buckets.entry(Bucket::Chunk(index)).or_default();
    }

    /// 登録済みチャンクグループ数（最大インデックス + 1）
    pub fn chunk_count(&self) -> usize {
        self.buckets
            .keys()
            .filter_map(|bucket| match bucket {
                Bucket::Chunk(index) => Some(index + 1),
                Bucket::Line(..) => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// チャンク単位にグループ化済みのスレッドでストアを初期化する
    pub fn seed_chunks(&mut self, seeds: Vec<ChunkSeed>) {
        for (index, seed) in seeds.into_iter().enumerate() {
            self.set_chunk_ranges(
                index,
                ChunkRanges {
                    range: seed.range,
                    original_range: seed.original_range,
                },
            );
            for thread in seed.threads {
                let location = Location::Chunk {
                    index,
                    side: thread.side,
                    line: thread.line,
                };
                self.insert_thread(location, thread.comments);
            }
        }
    }

    /// プレーン diff 用: 返信をまとめたスレッド群で初期化する（side はルートのもの）
    pub fn seed_lines(&mut self, threads: Vec<SeedThread>) {
        for thread in threads {
            if thread.comments.is_empty() {
                continue;
            }
            let location = Location::Line {
                line: thread.line,
                side: thread.side,
            };
            self.insert_thread(location, thread.comments);
        }
    }

    /// All threads in bucket order
    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.buckets.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// diff ビューを閉じる時に全スレッドを破棄する
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.index.clear();
        self.chunk_ranges.clear();
    }
}
