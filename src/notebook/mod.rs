//! Structured (chunked) diff view with comment threads under each chunk.
//!
//! The structured-diff renderer produces widgets in order; the
//! [`ChunkedDiffDecorator`] intercepts each one, numbers the commentable ones
//! and wraps them into a [`ChunkPanel`] that carries the chunk's threads.

pub mod widget;

use ratatui::{
    style::{Color, Style},
    text::{Line, Span},
};
use tracing::{debug, warn};

pub use widget::{DiffWidget, DiffWidgetProvider, HunkWidgetProvider, WidgetHook, WidgetKind};

use crate::config::DisplayConfig;
use crate::error::{Result, ThreadError};
use crate::github::RawComment;
use crate::submit::CommentSubmitter;
use crate::thread::{group_by_chunk, group_replies, ChunkRanges, Comment, Location, ThreadId, ThreadStore};
use crate::ui::markdown::MarkdownRenderer;
use crate::ui::thread_widget::{ThreadEvent, ThreadWidget};

const AFFORDANCE: &str = "[+] add comment";

/// A commentable widget wrapped with its comment affordance and threads
pub struct ChunkPanel {
    pub index: usize,
    pub kind: WidgetKind,
    pub content: Vec<Line<'static>>,
    /// Ranges used to place a fresh thread
    pub ranges: ChunkRanges,
    pub threads: Vec<ThreadWidget>,
}

impl ChunkPanel {
    pub fn lines(&self) -> Vec<Line<'static>> {
        let mut lines = self.content.clone();
        lines.push(Line::from(Span::styled(
            AFFORDANCE,
            Style::default().fg(Color::DarkGray),
        )));
        for thread in &self.threads {
            lines.extend(thread.lines().into_iter().map(|line| {
                let mut spans = vec![Span::raw("  ")];
                spans.extend(line.spans);
                Line::from(spans)
            }));
        }
        lines
    }

    fn dispose(&mut self) {
        for thread in &mut self.threads {
            thread.dispose();
        }
        self.threads.clear();
    }
}

pub enum ViewItem {
    Passthrough(DiffWidget),
    Chunk(ChunkPanel),
}

impl ViewItem {
    pub fn lines(&self) -> Vec<Line<'static>> {
        match self {
            ViewItem::Passthrough(widget) => widget.lines.clone(),
            ViewItem::Chunk(panel) => panel.lines(),
        }
    }

    pub fn as_panel(&self) -> Option<&ChunkPanel> {
        match self {
            ViewItem::Chunk(panel) => Some(panel),
            ViewItem::Passthrough(_) => None,
        }
    }
}

/// Numbers commentable widgets in production order and attaches the
/// threads bound to each index.
///
/// One decorator lives for exactly one build of the view; a rebuilt view
/// gets a fresh decorator that starts again at index 0.
pub struct ChunkedDiffDecorator<'a> {
    store: &'a ThreadStore,
    options: DisplayConfig,
    next_chunk_index: usize,
}

impl<'a> ChunkedDiffDecorator<'a> {
    pub fn new(store: &'a ThreadStore, options: DisplayConfig) -> Self {
        Self {
            store,
            options,
            next_chunk_index: 0,
        }
    }

    pub fn next_chunk_index(&self) -> usize {
        self.next_chunk_index
    }

    /// Metadata has no line position, so it joins the final thread group:
    /// the reserved trailing group when the store has one, otherwise the
    /// last index handed out.
    fn metadata_index(&self) -> usize {
        let groups = self.store.chunk_count();
        if groups > self.next_chunk_index {
            groups - 1
        } else {
            self.next_chunk_index.saturating_sub(1)
        }
    }
}

impl WidgetHook for ChunkedDiffDecorator<'_> {
    type Output = ViewItem;

    fn on_widget_produced(&mut self, widget: DiffWidget) -> ViewItem {
        if !widget.kind.is_commentable() {
            return ViewItem::Passthrough(widget);
        }

        let index = match widget.kind {
            WidgetKind::MetadataDiff => self.metadata_index(),
            _ => {
                let index = self.next_chunk_index;
                self.next_chunk_index += 1;
                index
            }
        };

        let ranges = if widget.ranges == ChunkRanges::default() {
            self.store.chunk_ranges(index)
        } else {
            widget.ranges
        };
        let threads = self
            .store
            .threads_in_chunk(index)
            .iter()
            .map(|thread| ThreadWidget::new(thread, self.options.clone()))
            .collect();

        ViewItem::Chunk(ChunkPanel {
            index,
            kind: widget.kind,
            content: widget.lines,
            ranges,
            threads,
        })
    }
}

fn find_widget(items: &mut [ViewItem], id: ThreadId) -> Option<&mut ThreadWidget> {
    items.iter_mut().find_map(|item| match item {
        ViewItem::Chunk(panel) => panel.threads.iter_mut().find(|w| w.thread_id() == id),
        ViewItem::Passthrough(_) => None,
    })
}

/// One file's structured diff with its threads
pub struct NotebookCommentDiff {
    store: ThreadStore,
    items: Vec<ViewItem>,
    options: DisplayConfig,
}

impl NotebookCommentDiff {
    pub fn new(store: ThreadStore, options: DisplayConfig) -> Self {
        Self {
            store,
            items: Vec::new(),
            options,
        }
    }

    /// Seeds the store from fetched comments grouped by chunk, then builds
    /// the view. Returns the ids of replies whose parent was not found.
    pub fn open(
        pull_request_id: &str,
        filename: &str,
        provider: &HunkWidgetProvider,
        raws: &[RawComment],
        options: DisplayConfig,
    ) -> (Self, Vec<u64>) {
        let grouping = group_replies(raws);
        let mut store = ThreadStore::new(pull_request_id, filename);
        store.seed_chunks(group_by_chunk(grouping.threads, &provider.chunk_ranges()));

        let mut view = Self::new(store, options);
        view.rebuild(provider);
        (view, grouping.dropped)
    }

    /// Builds the view from scratch; chunk numbering restarts at 0
    pub fn rebuild<P: DiffWidgetProvider + ?Sized>(&mut self, provider: &P) {
        for item in &mut self.items {
            if let ViewItem::Chunk(panel) = item {
                panel.dispose();
            }
        }
        let mut decorator = ChunkedDiffDecorator::new(&self.store, self.options.clone());
        let items = provider.render(&mut decorator);
        debug!(chunks = decorator.next_chunk_index(), items = items.len(), "structured diff built");
        self.items = items;
    }

    /// Renders the comment bodies of every thread widget
    pub async fn mount_threads(&mut self, renderer: &dyn MarkdownRenderer) {
        for item in &mut self.items {
            let ViewItem::Chunk(panel) = item else {
                continue;
            };
            for widget in &mut panel.threads {
                if let Some(thread) = self.store.thread(widget.thread_id()) {
                    widget.mount(thread, renderer).await;
                }
            }
        }
    }

    pub fn store(&self) -> &ThreadStore {
        &self.store
    }

    pub fn items(&self) -> &[ViewItem] {
        &self.items
    }

    pub fn panels(&self) -> impl Iterator<Item = &ChunkPanel> {
        self.items.iter().filter_map(ViewItem::as_panel)
    }

    /// Chunk index of every panel, in render order
    pub fn chunk_indices(&self) -> Vec<usize> {
        self.panels().map(|p| p.index).collect()
    }

    /// Item position of the first panel bound to `index`
    pub fn panel_position(&self, index: usize) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.as_panel().is_some_and(|p| p.index == index))
    }

    /// The panel's comment affordance was clicked.
    ///
    /// Opens a pending thread at the chunk's default line and mounts its
    /// widget under the panel. No-op while the chunk has a pending thread.
    pub async fn add_comment(&mut self, position: usize, renderer: &dyn MarkdownRenderer) -> Option<ThreadId> {
        let Some(ViewItem::Chunk(panel)) = self.items.get_mut(position) else {
            debug!(position, "add_comment: not a commentable panel");
            return None;
        };

        let (side, line) = panel.ranges.default_anchor();
        let id = self.store.add_pending_thread(Location::Chunk {
            index: panel.index,
            side,
            line,
        })?;
        let thread = self.store.thread(id)?;
        let mut widget = ThreadWidget::new(thread, self.options.clone());
        widget.mount(thread, renderer).await;
        panel.threads.push(widget);
        Some(id)
    }

    /// Submits `text` on a thread; see [`crate::plain::PlainCommentDiff::submit`]
    pub async fn submit(
        &mut self,
        thread_id: ThreadId,
        text: &str,
        submitter: &CommentSubmitter<'_>,
        renderer: &dyn MarkdownRenderer,
    ) -> Result<Option<Comment>> {
        let widget = find_widget(&mut self.items, thread_id).ok_or(ThreadError::ThreadNotFound(thread_id))?;
        let Some(ThreadEvent::SubmitRequested { text, .. }) = widget.submit(text) else {
            debug!(thread_id = %thread_id, "submit: widget not accepting input");
            return Ok(None);
        };

        let posted = match submitter.prepare(&self.store, thread_id, &text) {
            Ok(prepared) => submitter.post(&prepared).await,
            Err(e) => Err(e),
        };
        let comment = match posted {
            Ok(comment) => comment,
            Err(e) => {
                if let Some(widget) = find_widget(&mut self.items, thread_id) {
                    widget.submission_failed(e.to_string());
                }
                return Err(e);
            }
        };

        if find_widget(&mut self.items, thread_id).map_or(true, |w| w.is_disposed()) {
            warn!(thread_id = %thread_id, "submit: thread removed while posting");
            return Err(ThreadError::ThreadNotFound(thread_id));
        }
        CommentSubmitter::apply(&mut self.store, thread_id, comment.clone())?;

        if let (Some(widget), Some(thread)) = (
            find_widget(&mut self.items, thread_id),
            self.store.thread(thread_id),
        ) {
            widget.mount(thread, renderer).await;
        }
        Ok(Some(comment))
    }

    pub fn handle_event(&mut self, event: ThreadEvent) {
        match event {
            ThreadEvent::RemoveRequested(id) => {
                self.remove_thread(id);
            }
            ThreadEvent::SubmitRequested { thread_id, .. } => {
                debug!(thread_id = %thread_id, "handle_event: submit is driven by NotebookCommentDiff::submit");
            }
        }
    }

    /// Disposes the thread's widget and drops it from the store. Unknown ids
    /// are ignored.
    pub fn remove_thread(&mut self, id: ThreadId) -> bool {
        for item in &mut self.items {
            if let ViewItem::Chunk(panel) = item {
                panel.threads.retain_mut(|widget| {
                    if widget.thread_id() == id {
                        widget.dispose();
                        false
                    } else {
                        true
                    }
                });
            }
        }
        self.store.remove_thread(id).is_some()
    }

    pub fn render_lines(&self) -> Vec<Line<'static>> {
        self.items.iter().flat_map(ViewItem::lines).collect()
    }

    pub fn close(&mut self) {
        for item in &mut self.items {
            if let ViewItem::Chunk(panel) = item {
                panel.dispose();
            }
        }
        self.items.clear();
        self.store.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{CommentPayload, CommentsApi};
    use crate::thread::Side;
    use crate::ui::common::line_text;
    use crate::ui::markdown::TerminalMarkdownRenderer;
    use async_trait::async_trait;
    use std::cell::RefCell;

    const PATCH: &str = "@@ -1,5 +1,6 @@\n a\n b\n+c\n d\n e\n f\n@@ -20,2 +21,3 @@\n x\n+y\n z";

    fn raw(id: u64, text: &str, line: u32, in_reply_to_id: Option<u64>) -> RawComment {
        RawComment {
            id,
            text: text.to_string(),
            line_number: line,
            user_name: "alice".to_string(),
            user_pic: None,
            in_reply_to_id,
            updated_at: None,
            side: Side::Modified,
        }
    }

    fn widget(kind: WidgetKind) -> DiffWidget {
        DiffWidget::new(kind, vec![Line::from(format!("{:?}", kind))])
    }

    fn open(raws: &[RawComment]) -> NotebookCommentDiff {
        let provider = HunkWidgetProvider::from_patch("nb.ipynb", PATCH);
        let (view, dropped) = NotebookCommentDiff::open("9", "nb.ipynb", &provider, raws, DisplayConfig::default());
        assert!(dropped.is_empty());
        view
    }

    #[test]
    fn test_chunk_indices_follow_render_order() {
        let store = ThreadStore::new("1", "nb.ipynb");
        let mut decorator = ChunkedDiffDecorator::new(&store, DisplayConfig::default());
        let widgets = vec![
            widget(WidgetKind::CellDiff),
            widget(WidgetKind::CellDiff),
            widget(WidgetKind::ChunkGroup),
            widget(WidgetKind::MetadataDiff),
        ];

        let indices: Vec<usize> = widgets
            .render(&mut decorator)
            .iter()
            .filter_map(|item| item.as_panel().map(|p| p.index))
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 2]);
        assert_eq!(decorator.next_chunk_index(), 3);
    }

    #[test]
    fn test_other_widgets_pass_through_unnumbered() {
        let store = ThreadStore::new("1", "nb.ipynb");
        let mut decorator = ChunkedDiffDecorator::new(&store, DisplayConfig::default());
        let widgets = vec![
            widget(WidgetKind::CellDiff),
            widget(WidgetKind::Other),
            widget(WidgetKind::CellDiff),
        ];

        let items = widgets.render(&mut decorator);
        assert!(matches!(items[1], ViewItem::Passthrough(_)));
        assert_eq!(items[2].as_panel().map(|p| p.index), Some(1));
    }

    #[test]
    fn test_metadata_uses_reserved_trailing_group() {
        let view = open(&[raw(1, "orphan line", 99, None)]);
        // two hunks + the reserved trailing group for metadata
        assert_eq!(view.chunk_indices(), vec![0, 1, 2]);
        assert_eq!(view.store().threads_in_chunk(2).len(), 1);
        assert_eq!(view.panels().last().map(|p| p.threads.len()), Some(1));
    }

    #[test]
    fn test_rebuild_restarts_numbering() {
        let mut view = open(&[]);
        let first = view.chunk_indices();
        view.rebuild(&HunkWidgetProvider::from_patch("nb.ipynb", PATCH));
        assert_eq!(view.chunk_indices(), first);
    }

    #[tokio::test]
    async fn test_threads_render_beneath_their_chunk() {
        let raws = vec![
            raw(1, "first", 2, None),
            raw(2, "second", 22, None),
            raw(3, "reply", 2, Some(1)),
        ];
        let mut view = open(&raws);
        view.mount_threads(&TerminalMarkdownRenderer::new(40)).await;

        let text: Vec<String> = view.render_lines().iter().map(line_text).collect();
        let pos = |needle: &str| text.iter().position(|l| l.contains(needle)).unwrap();
        assert!(pos("+c") < pos("first"));
        assert!(pos("first") < pos("reply"));
        assert!(pos("reply") < pos("@@ -20,2 +21,3 @@"));
        assert!(pos("+y") < pos("second"));
    }

    #[tokio::test]
    async fn test_add_comment_on_passthrough_is_noop() {
        let mut view = open(&[]);
        let renderer = TerminalMarkdownRenderer::new(40);
        // item 1 is the "unchanged lines" separator
        assert!(matches!(view.items()[1], ViewItem::Passthrough(_)));
        assert!(view.add_comment(1, &renderer).await.is_none());
        assert!(view.store().is_empty());
    }

    struct MockApi {
        posted: RefCell<Vec<CommentPayload>>,
    }

    #[async_trait(?Send)]
    impl CommentsApi for MockApi {
        async fn fetch_comments(&self, _pr: &str, _filename: &str) -> Result<Vec<RawComment>> {
            Ok(Vec::new())
        }

        async fn post_comment(&self, _pr: &str, _filename: &str, payload: &CommentPayload) -> Result<RawComment> {
            self.posted.borrow_mut().push(payload.clone());
            Ok(RawComment {
                id: 7,
                text: "LGTM".to_string(),
                line_number: 12,
                user_name: "bob".to_string(),
                user_pic: Some("u.png".to_string()),
                in_reply_to_id: None,
                updated_at: None,
                side: Side::Modified,
            })
        }
    }

    #[tokio::test]
    async fn test_open_comment_submit_end_to_end() {
        let renderer = TerminalMarkdownRenderer::new(40);
        let mut view = open(&[raw(1, "Looks off", 5, None)]);
        view.mount_threads(&renderer).await;

        let chunk0 = view.panels().next().unwrap();
        assert_eq!(chunk0.index, 0);
        assert_eq!(chunk0.threads.len(), 1);
        assert_eq!(view.panels().map(|p| p.threads.len()).sum::<usize>(), 1);

        let position = view.panel_position(1).unwrap();
        let id = view.add_comment(position, &renderer).await.unwrap();
        let location = Location::Chunk {
            index: 1,
            side: Side::Modified,
            line: 23,
        };
        let threads = view.store().threads_for_location(&location);
        assert_eq!(threads.len(), 1);
        assert!(threads[0].comments.is_empty());
        assert_eq!(threads[0].location, location);

        // a second click while pending does nothing
        assert!(view.add_comment(position, &renderer).await.is_none());

        let api = MockApi {
            posted: RefCell::new(Vec::new()),
        };
        let submitter = CommentSubmitter::new(&api, "deadbeef");
        let comment = view.submit(id, "LGTM", &submitter, &renderer).await.unwrap().unwrap();
        assert_eq!(comment.id, 7);
        assert_eq!(comment.author.avatar_url.as_deref(), Some("u.png"));
        assert_eq!(
            api.posted.borrow()[0],
            CommentPayload::New {
                text: "LGTM".to_string(),
                filename: "nb.ipynb".to_string(),
                position: 23,
                side: Side::Modified,
                commit_id: "deadbeef".to_string(),
            }
        );

        let thread = view.store().thread(id).unwrap();
        assert_eq!(thread.root().map(|c| c.id), Some(7));

        // the slot is filled, so a new click opens a separate thread
        let second = view.add_comment(position, &renderer).await.unwrap();
        assert_ne!(second, id);
        assert_eq!(view.store().threads_for_location(&location).len(), 2);
    }

    #[tokio::test]
    async fn test_remove_thread_drops_widget_and_entry() {
        let mut view = open(&[raw(1, "Looks off", 5, None)]);
        let id = view.store().iter().next().unwrap().id;

        let event = view.panels().next().unwrap().threads[0].request_removal().unwrap();
        view.handle_event(event);

        assert!(view.store().thread(id).is_none());
        assert!(view.panels().all(|p| p.threads.is_empty()));
        assert!(!view.remove_thread(id));
        assert!(!view.remove_thread(ThreadId(404)));
    }
}
