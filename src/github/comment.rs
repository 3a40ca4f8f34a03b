use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::client::ApiRequest;
use super::pr::User;
use crate::diff::line_number_to_position;
use crate::error::{Result, ThreadError};
use crate::thread::Side;

/// Comment as exchanged with the comments backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawComment {
    pub id: u64,
    pub text: String,
    pub line_number: u32,
    pub user_name: String,
    #[serde(default)]
    pub user_pic: Option<String>,
    #[serde(default)]
    pub in_reply_to_id: Option<u64>,
    #[serde(default)]
    pub updated_at: Option<String>,
    /// `line_number` が base/head どちらの行番号か
    #[serde(default)]
    pub side: Side,
}

/// コメント投稿リクエストのボディ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommentPayload {
    /// 既存スレッドへの返信（ルートコメントに対して）
    Reply { text: String, in_reply_to: u64 },
    /// 新規スレッドの最初のコメント
    New {
        text: String,
        filename: String,
        position: u32,
        side: Side,
        commit_id: String,
    },
}

impl CommentPayload {
    pub fn text(&self) -> &str {
        match self {
            CommentPayload::Reply { text, .. } | CommentPayload::New { text, .. } => text,
        }
    }
}

/// Comments backend for one pull request file.
///
/// `?Send` because the diff views that drive it are single-threaded.
#[async_trait(?Send)]
pub trait CommentsApi {
    /// Comments on `filename`, in server order (replies after their parents)
    async fn fetch_comments(&self, pull_request_id: &str, filename: &str) -> Result<Vec<RawComment>>;

    /// Creates a comment and returns the server's canonical copy
    async fn post_comment(
        &self,
        pull_request_id: &str,
        filename: &str,
        payload: &CommentPayload,
    ) -> Result<RawComment>;
}

/// GitHub pull request review comment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub id: u64,
    pub path: String,
    pub line: Option<u32>,
    #[serde(default)]
    pub original_line: Option<u32>,
    pub body: String,
    pub user: User,
    #[serde(default)]
    pub in_reply_to_id: Option<u64>,
    /// "LEFT" (base) or "RIGHT" (head)
    #[serde(default)]
    pub side: Option<String>,
    pub updated_at: String,
}

impl ReviewComment {
    /// Converts to the backend shape; `None` for outdated comments.
    ///
    /// An outdated comment has a null `line` and its `original_line` refers to
    /// a commit the current patch no longer describes, so it has no anchor.
    pub fn into_raw(self) -> Option<RawComment> {
        let line_number = self.line?;
        let side = match self.side.as_deref() {
            Some("LEFT") => Side::Original,
            _ => Side::Modified,
        };
        Some(RawComment {
            id: self.id,
            text: self.body,
            line_number,
            user_name: self.user.login,
            user_pic: self.user.avatar_url,
            in_reply_to_id: self.in_reply_to_id,
            updated_at: Some(self.updated_at),
            side,
        })
    }
}

/// `gh` CLI 経由で GitHub のレビューコメントを扱う実装
///
/// GitHub の `position` は diff 内の位置なので、新規コメントの行番号は
/// 登録済みの patch を使って変換する（line/side 指定は 422 になることがある）。
pub struct GhCommentsApi {
    repo: String,
    patches: HashMap<String, String>,
}

impl GhCommentsApi {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            patches: HashMap::new(),
        }
    }

    pub fn with_patch(mut self, filename: impl Into<String>, patch: impl Into<String>) -> Self {
        self.patches.insert(filename.into(), patch.into());
        self
    }

    /// File line number on `side` -> diff position for `filename`
    fn diff_position(&self, filename: &str, side: Side, line: u32) -> Result<u32> {
        let patch = self
            .patches
            .get(filename)
            .ok_or_else(|| ThreadError::Api(format!("No patch loaded for {}", filename)))?;
        line_number_to_position(patch, side, line).ok_or_else(|| {
            ThreadError::Api(format!(
                "Line {} ({:?}) of {} is not part of the diff",
                line, side, filename
            ))
        })
    }

    fn pr_number(pull_request_id: &str) -> Result<u32> {
        pull_request_id
            .parse()
            .map_err(|_| ThreadError::Api(format!("Invalid pull request number: {}", pull_request_id)))
    }
}

#[async_trait(?Send)]
impl CommentsApi for GhCommentsApi {
    async fn fetch_comments(&self, pull_request_id: &str, filename: &str) -> Result<Vec<RawComment>> {
        let pr_number = Self::pr_number(pull_request_id)?;
        let json = ApiRequest::get(format!(
            "repos/{}/pulls/{}/comments?per_page=100",
            self.repo, pr_number
        ))
        .paginate()
        .send()
        .await?;
        let comments: Vec<ReviewComment> = serde_json::from_value(json)?;

        let in_file: Vec<ReviewComment> = comments.into_iter().filter(|c| c.path == filename).collect();
        let total = in_file.len();
        let raws: Vec<RawComment> = in_file.into_iter().filter_map(ReviewComment::into_raw).collect();
        if raws.len() < total {
            tracing::debug!(filename, skipped = total - raws.len(), "skipping outdated comments");
        }
        Ok(raws)
    }

    async fn post_comment(
        &self,
        pull_request_id: &str,
        filename: &str,
        payload: &CommentPayload,
    ) -> Result<RawComment> {
        let pr_number = Self::pr_number(pull_request_id)?;
        let request = match payload {
            CommentPayload::Reply { text, in_reply_to } => ApiRequest::post(format!(
                "repos/{}/pulls/{}/comments/{}/replies",
                self.repo, pr_number, in_reply_to
            ))
            .field("body", text),
            CommentPayload::New {
                text,
                filename: path,
                position,
                side,
                commit_id,
            } => ApiRequest::post(format!("repos/{}/pulls/{}/comments", self.repo, pr_number))
                .field("body", text)
                .field("commit_id", commit_id)
                .field("path", path)
                .typed_field("position", self.diff_position(path, *side, *position)?),
        };
        let json = request.send().await?;

        let comment: ReviewComment = serde_json::from_value(json)
            .context("Failed to parse created comment response")?;
        if comment.path != filename {
            tracing::warn!(expected = filename, actual = %comment.path, "created comment landed on a different path");
        }
        comment
            .into_raw()
            .ok_or_else(|| ThreadError::Api("Created comment has no line in the current diff".to_string()))
    }
}
