//! Turns composed text into a comment request and folds the server's reply
//! back into the thread store.

use tracing::{debug, warn};

use crate::error::{Result, ThreadError};
use crate::github::{CommentPayload, CommentsApi};
use crate::thread::{Comment, Thread, ThreadId, ThreadStore};

/// A request ready to be posted for one thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSubmission {
    pub thread_id: ThreadId,
    pub pull_request_id: String,
    pub filename: String,
    pub payload: CommentPayload,
}

/// コメント送信の調停役
///
/// 送信は「準備 → 投稿 → 反映」の 3 段階。投稿中はストアを借用しないため、
/// 投稿の完了までにスレッドが削除されていれば反映時に検出できる。
pub struct CommentSubmitter<'a> {
    api: &'a dyn CommentsApi,
    commit_id: String,
}

impl<'a> CommentSubmitter<'a> {
    pub fn new(api: &'a dyn CommentsApi, commit_id: impl Into<String>) -> Self {
        Self {
            api,
            commit_id: commit_id.into(),
        }
    }

    pub fn commit_id(&self) -> &str {
        &self.commit_id
    }

    /// `{text, in_reply_to: <root id>}`
    pub fn build_reply_payload(thread: &Thread, text: &str) -> Result<CommentPayload> {
        let root = thread.root().ok_or(ThreadError::MissingRoot(thread.id))?;
        Ok(CommentPayload::Reply {
            text: text.to_string(),
            in_reply_to: root.id,
        })
    }

    /// `{text, filename, position: <line>, side, commit_id}`
    pub fn build_new_payload(&self, thread: &Thread, text: &str) -> CommentPayload {
        CommentPayload::New {
            text: text.to_string(),
            filename: thread.filename.clone(),
            position: thread.location.line(),
            side: thread.location.side(),
            commit_id: self.commit_id.clone(),
        }
    }

    pub fn prepare(&self, store: &ThreadStore, thread_id: ThreadId, text: &str) -> Result<PreparedSubmission> {
        let thread = store
            .thread(thread_id)
            .ok_or(ThreadError::ThreadNotFound(thread_id))?;
        let payload = if thread.is_pending() {
            self.build_new_payload(thread, text)
        } else {
            Self::build_reply_payload(thread, text)?
        };

        Ok(PreparedSubmission {
            thread_id,
            pull_request_id: thread.pull_request_id.clone(),
            filename: thread.filename.clone(),
            payload,
        })
    }

    /// Posts the request. Errors propagate untouched; there is no retry.
    pub async fn post(&self, prepared: &PreparedSubmission) -> Result<Comment> {
        let raw = self
            .api
            .post_comment(&prepared.pull_request_id, &prepared.filename, &prepared.payload)
            .await
            .inspect_err(|e| warn!(thread_id = %prepared.thread_id, "comment submission failed: {}", e))?;
        Ok(Comment::from_raw(&raw))
    }

    /// Records the posted comment on its thread
    pub fn apply(store: &mut ThreadStore, thread_id: ThreadId, comment: Comment) -> Result<()> {
        match store.record_comment(Some(thread_id), comment) {
            Some(_) => {
                debug!(thread_id = %thread_id, "comment recorded");
                Ok(())
            }
            None => Err(ThreadError::ThreadNotFound(thread_id)),
        }
    }

    /// prepare + post + apply. The store is left unchanged on failure.
    pub async fn submit(&self, store: &mut ThreadStore, thread_id: ThreadId, text: &str) -> Result<Comment> {
        let prepared = self.prepare(store, thread_id, text)?;
        let comment = self.post(&prepared).await?;
        Self::apply(store, thread_id, comment.clone())?;
        Ok(comment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{line_number_to_position, parse_hunks};
    use crate::github::RawComment;
    use crate::thread::{Location, Side};
    use async_trait::async_trait;
    use std::cell::RefCell;

    /// 受け取ったペイロードを記録し、連番 id のコメントを返すモック
    #[derive(Default)]
    struct MockApi {
        posted: RefCell<Vec<CommentPayload>>,
        fail: bool,
        /// 設定されていれば新規コメントの行を diff position に解決する
        patch: Option<&'static str>,
    }

    #[async_trait(?Send)]
    impl CommentsApi for MockApi {
        async fn fetch_comments(&self, _pr: &str, _filename: &str) -> Result<Vec<RawComment>> {
            Ok(Vec::new())
        }

        async fn post_comment(
            &self,
            _pr: &str,
            _filename: &str,
            payload: &CommentPayload,
        ) -> Result<RawComment> {
            if self.fail {
                return Err(ThreadError::Api("HTTP 502".to_string()));
            }
            let mut side = Side::Modified;
            if let (Some(patch), CommentPayload::New { position, side: s, .. }) = (self.patch, payload) {
                line_number_to_position(patch, *s, *position)
                    .ok_or_else(|| ThreadError::Api(format!("line {} is not in the diff", position)))?;
                side = *s;
            }
            self.posted.borrow_mut().push(payload.clone());
            let id = 100 + self.posted.borrow().len() as u64;
            Ok(RawComment {
                id,
                text: payload.text().to_string(),
                line_number: 12,
                user_name: "bob".to_string(),
                user_pic: Some("u.png".to_string()),
                in_reply_to_id: None,
                updated_at: None,
                side,
            })
        }
    }

    fn store_with_pending() -> (ThreadStore, ThreadId) {
        let mut store = ThreadStore::new("42", "a.py");
        let id = store
            .add_pending_thread(Location::Line {
                line: 12,
                side: Side::Modified,
            })
            .unwrap();
        (store, id)
    }

    #[test]
    fn test_reply_payload_requires_root() {
        let (store, id) = store_with_pending();
        let thread = store.thread(id).unwrap();
        let err = CommentSubmitter::build_reply_payload(thread, "hi").unwrap_err();
        assert!(matches!(err, ThreadError::MissingRoot(t) if t == id));
    }

    #[test]
    fn test_prepare_new_comment_payload() {
        let api = MockApi::default();
        let submitter = CommentSubmitter::new(&api, "abc123");
        let (store, id) = store_with_pending();

        let prepared = submitter.prepare(&store, id, "LGTM").unwrap();
        assert_eq!(prepared.pull_request_id, "42");
        assert_eq!(
            prepared.payload,
            CommentPayload::New {
                text: "LGTM".to_string(),
                filename: "a.py".to_string(),
                position: 12,
                side: Side::Modified,
                commit_id: "abc123".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_new_thread_on_deletion_only_chunk() {
        let patch = "@@ -1,3 +1,1 @@\n a\n-b\n-c\n@@ -10,2 +8,0 @@\n-x\n-y";
        let api = MockApi {
            patch: Some(patch),
            ..Default::default()
        };
        let submitter = CommentSubmitter::new(&api, "abc123");
        let mut store = ThreadStore::new("42", "a.py");
        let (side, line) = parse_hunks(patch)[1].ranges().default_anchor();
        let id = store
            .add_pending_thread(Location::Chunk { index: 1, side, line })
            .unwrap();

        submitter.submit(&mut store, id, "why drop these?").await.unwrap();

        let posted = api.posted.borrow();
        assert!(matches!(
            posted[0],
            CommentPayload::New {
                position: 11,
                side: Side::Original,
                ..
            }
        ));
        assert!(!store.thread(id).unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_replies_keep_submission_order() {
        let api = MockApi::default();
        let submitter = CommentSubmitter::new(&api, "abc123");
        let (mut store, id) = store_with_pending();

        for text in ["first", "second", "third", "fourth"] {
            submitter.submit(&mut store, id, text).await.unwrap();
        }

        let thread = store.thread(id).unwrap();
        let texts: Vec<&str> = thread.comments.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third", "fourth"]);

        let posted = api.posted.borrow();
        assert!(matches!(posted[0], CommentPayload::New { .. }));
        for payload in &posted[1..] {
            assert_eq!(
                *payload,
                CommentPayload::Reply {
                    text: payload.text().to_string(),
                    in_reply_to: 101,
                }
            );
        }
    }

    #[tokio::test]
    async fn test_failure_leaves_store_unchanged() {
        let api = MockApi {
            fail: true,
            ..Default::default()
        };
        let submitter = CommentSubmitter::new(&api, "abc123");
        let (mut store, id) = store_with_pending();

        let err = submitter.submit(&mut store, id, "LGTM").await.unwrap_err();
        assert!(matches!(err, ThreadError::Api(_)));
        assert!(store.thread(id).unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_apply_after_removal_reports_missing_thread() {
        let api = MockApi::default();
        let submitter = CommentSubmitter::new(&api, "abc123");
        let (mut store, id) = store_with_pending();

        let prepared = submitter.prepare(&store, id, "LGTM").unwrap();
        let comment = submitter.post(&prepared).await.unwrap();
        store.remove_thread(id);

        let err = CommentSubmitter::apply(&mut store, id, comment).unwrap_err();
        assert!(matches!(err, ThreadError::ThreadNotFound(_)));
        assert!(store.is_empty());
    }
}
