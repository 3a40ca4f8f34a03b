mod client;
pub mod comment;
mod pr;

pub use client::{gh_command, ApiRequest};
pub use comment::{CommentPayload, CommentsApi, GhCommentsApi, RawComment};
pub use pr::{fetch_file_patch, fetch_pr, Branch, PullRequest, User};
