//! Line-anchored review comment threads for pull request diffs.
//!
//! Two views share one thread model:
//! - [`plain::PlainCommentDiff`] pins each thread under its line in a
//!   single-pane diff using view zones and overlays.
//! - [`notebook::NotebookCommentDiff`] numbers the chunks of a structured
//!   diff and lists each chunk's threads beneath it.

pub mod config;
pub mod diff;
pub mod error;
pub mod github;
pub mod headless;
pub mod notebook;
pub mod plain;
pub mod submit;
pub mod thread;
pub mod ui;

pub use error::{Result, ThreadError};
