//! Plain (single-pane, line-based) diff view with anchored comment threads.

pub mod anchor;
pub mod editor;

use ratatui::text::Line;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub use anchor::{AnchorController, Tombstone, OVERLAY_ID_PREFIX};
pub use editor::{
    DiffEditor, OverlayContent, OverlayNode, OverlayWidget, PlainDiffEditor, ViewZone, ViewZoneAccessor,
    ZoneId,
};

use crate::config::DisplayConfig;
use crate::error::{Result, ThreadError};
use crate::github::RawComment;
use crate::submit::CommentSubmitter;
use crate::thread::{group_replies, Comment, Location, Side, ThreadId, ThreadStore};
use crate::ui::markdown::MarkdownRenderer;
use crate::ui::thread_widget::ThreadEvent;

/// One file's plain diff: the editor, its threads and one anchor per thread
pub struct PlainCommentDiff {
    store: ThreadStore,
    editor: PlainDiffEditor,
    anchors: BTreeMap<ThreadId, AnchorController>,
    options: DisplayConfig,
}

impl PlainCommentDiff {
    pub fn new(store: ThreadStore, editor: PlainDiffEditor, options: DisplayConfig) -> Self {
        Self {
            store,
            editor,
            anchors: BTreeMap::new(),
            options,
        }
    }

    /// Seeds the store from fetched comments (replies grouped under roots).
    ///
    /// Returns the view and the ids of replies whose parent was not found.
    pub fn open(
        pull_request_id: &str,
        filename: &str,
        patch: &str,
        raws: &[RawComment],
        viewport_height: u16,
        options: DisplayConfig,
    ) -> (Self, Vec<u64>) {
        let grouping = group_replies(raws);
        let mut store = ThreadStore::new(pull_request_id, filename);
        store.seed_lines(grouping.threads);
        let editor = PlainDiffEditor::from_patch(patch, viewport_height);
        (Self::new(store, editor, options), grouping.dropped)
    }

    pub fn store(&self) -> &ThreadStore {
        &self.store
    }

    pub fn editor(&self) -> &PlainDiffEditor {
        &self.editor
    }

    pub fn anchor(&self, id: ThreadId) -> Option<&AnchorController> {
        self.anchors.get(&id)
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// Mounts an anchor for every thread that does not have one yet
    pub async fn mount_all(&mut self, renderer: &dyn MarkdownRenderer) {
        let ids: Vec<ThreadId> = self
            .store
            .iter()
            .map(|t| t.id)
            .filter(|id| !self.anchors.contains_key(id))
            .collect();
        for id in ids {
            self.mount_thread(id, renderer).await;
        }
    }

    async fn mount_thread(&mut self, id: ThreadId, renderer: &dyn MarkdownRenderer) {
        let Some(thread) = self.store.thread(id) else {
            return;
        };
        let mut anchor = AnchorController::new(thread, self.options.clone());
        anchor.mount(&mut self.editor, thread, renderer).await;
        self.anchors.insert(id, anchor);
    }

    /// "Add comment" on a modified-side line. No-op while that line already
    /// has a pending thread.
    pub async fn add_comment_at(&mut self, line: u32, renderer: &dyn MarkdownRenderer) -> Option<ThreadId> {
        let id = self.store.add_pending_thread(Location::Line {
            line,
            side: Side::Modified,
        })?;
        self.mount_thread(id, renderer).await;
        Some(id)
    }

    /// Submits `text` on a thread and re-anchors it at its new height.
    ///
    /// `Ok(None)` means the widget refused the submit (empty text or a
    /// submission already in flight). A failed post leaves the store as it
    /// was and re-enables the widget with the error shown.
    pub async fn submit(
        &mut self,
        thread_id: ThreadId,
        text: &str,
        submitter: &CommentSubmitter<'_>,
        renderer: &dyn MarkdownRenderer,
    ) -> Result<Option<Comment>> {
        let anchor = self
            .anchors
            .get_mut(&thread_id)
            .ok_or(ThreadError::ThreadNotFound(thread_id))?;
        let Some(ThreadEvent::SubmitRequested { text, .. }) = anchor.submit(&mut self.editor, text) else {
            debug!(thread_id = %thread_id, "submit: widget not accepting input");
            return Ok(None);
        };

        let prepared = submitter.prepare(&self.store, thread_id, &text);
        let posted = match prepared {
            Ok(prepared) => submitter.post(&prepared).await,
            Err(e) => Err(e),
        };

        let comment = match posted {
            Ok(comment) => comment,
            Err(e) => {
                if let Some(anchor) = self.anchors.get_mut(&thread_id) {
                    anchor.submission_failed(&mut self.editor, e.to_string());
                }
                return Err(e);
            }
        };

        let tombstone = self.anchors.get(&thread_id).map(AnchorController::tombstone);
        if tombstone.map_or(true, |t| t.is_buried()) {
            warn!(thread_id = %thread_id, "submit: thread removed while posting");
            return Err(ThreadError::ThreadNotFound(thread_id));
        }
        CommentSubmitter::apply(&mut self.store, thread_id, comment.clone())?;

        if let (Some(anchor), Some(thread)) = (self.anchors.get_mut(&thread_id), self.store.thread(thread_id)) {
            anchor.update(&mut self.editor, thread, renderer).await;
        }
        Ok(Some(comment))
    }

    /// Routes a widget request to the view
    pub fn handle_event(&mut self, event: ThreadEvent) {
        match event {
            ThreadEvent::RemoveRequested(id) => {
                self.remove_thread(id);
            }
            ThreadEvent::SubmitRequested { thread_id, .. } => {
                debug!(thread_id = %thread_id, "handle_event: submit is driven by PlainCommentDiff::submit");
            }
        }
    }

    /// Disposes the thread's anchor and drops it from the store. Unknown ids
    /// are ignored.
    pub fn remove_thread(&mut self, id: ThreadId) -> bool {
        if let Some(mut anchor) = self.anchors.remove(&id) {
            anchor.dispose(&mut self.editor);
        }
        self.store.remove_thread(id).is_some()
    }

    pub fn scroll_to(&mut self, row: usize) {
        self.editor.scroll_to(row);
    }

    pub fn render_lines(&self) -> Vec<Line<'static>> {
        self.editor.render_lines()
    }

    /// Tears down every anchor and empties the store
    pub fn close(&mut self) {
        for (_, mut anchor) in std::mem::take(&mut self.anchors) {
            anchor.dispose(&mut self.editor);
        }
        self.store.clear();
    }
}
