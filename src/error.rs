use thiserror::Error;

use crate::thread::ThreadId;

/// スレッド操作・コメント送信で発生するエラー
///
/// いずれも単一のスレッド/ファイル/diff に閉じたエラーで、プロセス全体を止めることはない。
#[derive(Error, Debug)]
pub enum ThreadError {
    #[error("Comment API request failed: {0}")]
    Api(String),

    #[error("Failed to parse comment response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Thread {0} not found")]
    ThreadNotFound(ThreadId),

    #[error("Thread {0} has no root comment to reply to")]
    MissingRoot(ThreadId),

    #[error("Render failed: {0}")]
    Render(String),
}

impl From<anyhow::Error> for ThreadError {
    fn from(err: anyhow::Error) -> Self {
        // gh CLI 経由のエラーはコンテキスト付きで文字列化して保持する
        ThreadError::Api(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, ThreadError>;
