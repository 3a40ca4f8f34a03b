use chrono::{DateTime, Utc};
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};
use tracing::{debug, warn};

use super::common::{absolute_time, avatar_glyph, relative_time};
use super::markdown::{MarkdownRenderer, RenderHandle};
use crate::config::DisplayConfig;
use crate::thread::{Author, Thread, ThreadId};

/// Requests a thread widget reports to its container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadEvent {
    /// ユーザーがスレッド全体の削除を選んだ
    RemoveRequested(ThreadId),
    /// 入力欄の内容を送信したい
    SubmitRequested { thread_id: ThreadId, text: String },
}

struct RenderedComment {
    author: Author,
    updated_at: Option<DateTime<Utc>>,
    body: Result<Box<dyn RenderHandle>, String>,
}

impl RenderedComment {
    fn release(&mut self) {
        if let Ok(handle) = self.body.as_mut() {
            handle.dispose();
        }
    }
}

/// Renders one thread: root comment, replies, and the reply/comment affordance.
pub struct ThreadWidget {
    thread_id: ThreadId,
    line: u32,
    options: DisplayConfig,
    comments: Vec<RenderedComment>,
    submitting: bool,
    error: Option<String>,
    disposed: bool,
}

impl ThreadWidget {
    pub fn new(thread: &Thread, options: DisplayConfig) -> Self {
        Self {
            thread_id: thread.id,
            line: thread.location.line(),
            options,
            comments: Vec::new(),
            submitting: false,
            error: None,
            disposed: false,
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn is_pending(&self) -> bool {
        self.comments.is_empty()
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Renders every comment body through `renderer`, replacing any earlier
    /// render. A body that fails to render shows an inline error instead;
    /// the other comments are unaffected.
    pub async fn mount(&mut self, thread: &Thread, renderer: &dyn MarkdownRenderer) {
        if self.disposed {
            debug!(thread_id = %self.thread_id, "mount: widget already disposed");
            return;
        }

        let mut rendered = Vec::with_capacity(thread.comments.len());
        for comment in &thread.comments {
            let body = renderer.render(&comment.text).await.map_err(|e| {
                warn!(thread_id = %thread.id, comment_id = comment.id, "markdown render failed: {}", e);
                e.to_string()
            });
            rendered.push(RenderedComment {
                author: comment.author.clone(),
                updated_at: comment.updated_at,
                body,
            });
        }

        for old in &mut self.comments {
            old.release();
        }
        self.comments = rendered;
        self.line = thread.location.line();
        self.submitting = false;
        self.error = None;
    }

    /// 送信要求。送信中・破棄済み・空文字の場合は何もしない
    pub fn submit(&mut self, text: &str) -> Option<ThreadEvent> {
        if self.disposed || self.submitting || text.trim().is_empty() {
            return None;
        }
        self.submitting = true;
        self.error = None;
        Some(ThreadEvent::SubmitRequested {
            thread_id: self.thread_id,
            text: text.to_string(),
        })
    }

    /// 送信失敗: 入力欄を再び有効にしてエラーを表示する
    pub fn submission_failed(&mut self, message: impl Into<String>) {
        self.submitting = false;
        self.error = Some(message.into());
    }

    pub fn request_removal(&self) -> Option<ThreadEvent> {
        if self.disposed {
            return None;
        }
        Some(ThreadEvent::RemoveRequested(self.thread_id))
    }

    /// Releases the markdown renders, then the widget itself.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        for comment in &mut self.comments {
            comment.release();
        }
        self.comments.clear();
        self.disposed = true;
    }

    pub fn height(&self) -> u16 {
        self.lines_at(Utc::now()).len() as u16
    }

    pub fn lines(&self) -> Vec<Line<'static>> {
        self.lines_at(Utc::now())
    }

    pub fn lines_at(&self, now: DateTime<Utc>) -> Vec<Line<'static>> {
        if self.disposed {
            return Vec::new();
        }

        let mut lines = Vec::new();
        let indent = " ".repeat(self.options.reply_indent as usize);

        for (i, comment) in self.comments.iter().enumerate() {
            let prefix = if i == 0 {
                String::new()
            } else {
                format!("{}│ ", indent)
            };
            lines.push(self.header_line(&prefix, comment, now));

            match &comment.body {
                Ok(handle) => {
                    for body_line in handle.lines() {
                        let mut spans = vec![Span::raw(format!("{}    ", prefix))];
                        spans.extend(body_line.spans.iter().cloned());
                        lines.push(Line::from(spans));
                    }
                }
                Err(message) => lines.push(Line::from(Span::styled(
                    format!("{}    ✗ Failed to render comment: {}", prefix, message),
                    Style::default().fg(Color::Red),
                ))),
            }
        }

        if self.comments.is_empty() {
            lines.push(Line::from(Span::styled(
                format!("New comment on line {}", self.line),
                Style::default().fg(Color::Yellow),
            )));
        }

        if let Some(error) = &self.error {
            lines.push(Line::from(Span::styled(
                format!("✗ {}", error),
                Style::default().fg(Color::Red),
            )));
        }

        lines.push(self.affordance_line());
        lines
    }

    fn header_line(&self, prefix: &str, comment: &RenderedComment, now: DateTime<Utc>) -> Line<'static> {
        let mut spans = vec![Span::raw(prefix.to_string())];
        if self.options.show_avatars {
            spans.push(Span::styled(
                format!("{} ", avatar_glyph(&comment.author)),
                Style::default().fg(Color::Magenta),
            ));
        }
        spans.push(Span::styled(
            format!("@{}", comment.author.name),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ));
        if let Some(at) = comment.updated_at {
            spans.push(Span::styled(
                format!(" · {}", relative_time(at, now)),
                Style::default().fg(Color::DarkGray),
            ));
            if self.options.show_absolute_time {
                spans.push(Span::styled(
                    format!(" ({})", absolute_time(at)),
                    Style::default().fg(Color::DarkGray),
                ));
            }
        }
        Line::from(spans)
    }

    fn affordance_line(&self) -> Line<'static> {
        if self.submitting {
            return Line::from(Span::styled(
                "⠋ Submitting...",
                Style::default().fg(Color::Yellow),
            ));
        }
        let text = if self.comments.is_empty() {
            "[c] comment  [d] discard"
        } else {
            "[r] reply  [d] delete thread"
        };
        Line::from(Span::styled(text, Style::default().fg(Color::DarkGray)))
    }
}

impl Drop for ThreadWidget {
    fn drop(&mut self) {
        self.dispose();
    }
}
