use anyhow::{Context, Result};
use crossterm::{
    queue,
    style::{Attribute, Color as TermColor, Print, ResetColor, SetAttribute, SetForegroundColor},
};
use ratatui::{
    style::{Color, Modifier},
    text::Line,
};
use std::io::{IsTerminal, Write};

use crate::config::{Config, ViewMode};
use crate::github::{self, CommentsApi, GhCommentsApi};
use crate::notebook::{HunkWidgetProvider, NotebookCommentDiff};
use crate::plain::PlainCommentDiff;
use crate::submit::CommentSubmitter;
use crate::ui::markdown::TerminalMarkdownRenderer;

/// What to open and print
#[derive(Debug, Clone)]
pub struct HeadlessRequest {
    pub repo: String,
    pub pr_number: u32,
    pub filename: String,
    /// First laid-out row to show (plain view)
    pub scroll: usize,
    /// Posts a new comment on this modified-side line before printing
    pub comment: Option<(u32, String)>,
}

/// Fetch one PR file and its comments, then print the annotated diff.
///
/// Progress goes to stderr; the diff goes to stdout, colored only when
/// stdout is a terminal.
pub async fn run(request: &HeadlessRequest, config: &Config) -> Result<()> {
    eprintln!(
        "[Headless] Fetching PR #{} from {}...",
        request.pr_number, request.repo
    );
    let pr = github::fetch_pr(&request.repo, request.pr_number).await?;
    let patch = github::fetch_file_patch(&request.repo, request.pr_number, &request.filename).await?;

    let api = GhCommentsApi::new(&request.repo).with_patch(&request.filename, &patch);
    let pull_request_id = request.pr_number.to_string();
    let raws = api.fetch_comments(&pull_request_id, &request.filename).await?;
    eprintln!("[Headless] {} comments on {}", raws.len(), request.filename);

    let renderer = TerminalMarkdownRenderer::new(config.view.width as usize);
    let display = config.display.clone();

    let (lines, dropped) = match config.view.mode {
        ViewMode::Plain => {
            let height = match config.view.height {
                0 => u16::MAX,
                h => h,
            };
            let (mut view, dropped) = PlainCommentDiff::open(
                &pull_request_id,
                &request.filename,
                &patch,
                &raws,
                height,
                display,
            );
            view.mount_all(&renderer).await;

            if let Some((line, body)) = &request.comment {
                let submitter = CommentSubmitter::new(&api, pr.head.sha.clone());
                let thread_id = view
                    .add_comment_at(*line, &renderer)
                    .await
                    .with_context(|| format!("Line {} already has a pending comment", line))?;
                view.submit(thread_id, body, &submitter, &renderer)
                    .await
                    .context("Failed to post comment")?;
                eprintln!("[Headless] Posted comment on line {}", line);
            }

            view.scroll_to(request.scroll);
            (view.render_lines(), dropped)
        }
        ViewMode::Chunked => {
            if request.comment.is_some() {
                anyhow::bail!("--comment-line is only supported in plain mode");
            }
            let provider = HunkWidgetProvider::from_patch(&request.filename, &patch);
            let (mut view, dropped) =
                NotebookCommentDiff::open(&pull_request_id, &request.filename, &provider, &raws, display);
            view.mount_threads(&renderer).await;
            (view.render_lines(), dropped)
        }
    };

    if !dropped.is_empty() {
        eprintln!(
            "[Headless] Skipped {} replies whose parent comment was not found",
            dropped.len()
        );
    }

    let stdout = std::io::stdout();
    let color = stdout.is_terminal();
    let mut out = stdout.lock();
    write_lines(&mut out, &lines, color)?;
    out.flush().context("Failed to flush stdout")
}

fn term_color(color: Color) -> Option<TermColor> {
    Some(match color {
        Color::Black => TermColor::Black,
        Color::Red => TermColor::DarkRed,
        Color::Green => TermColor::DarkGreen,
        Color::Yellow => TermColor::DarkYellow,
        Color::Blue => TermColor::DarkBlue,
        Color::Magenta => TermColor::DarkMagenta,
        Color::Cyan => TermColor::DarkCyan,
        Color::Gray => TermColor::Grey,
        Color::DarkGray => TermColor::DarkGrey,
        Color::LightRed => TermColor::Red,
        Color::LightGreen => TermColor::Green,
        Color::LightYellow => TermColor::Yellow,
        Color::LightBlue => TermColor::Blue,
        Color::LightMagenta => TermColor::Magenta,
        Color::LightCyan => TermColor::Cyan,
        Color::White => TermColor::White,
        Color::Rgb(r, g, b) => TermColor::Rgb { r, g, b },
        Color::Indexed(i) => TermColor::AnsiValue(i),
        Color::Reset => return None,
    })
}

/// Writes rendered lines, with ANSI styling when `color` is set
pub fn write_lines<W: Write>(out: &mut W, lines: &[Line<'_>], color: bool) -> Result<()> {
    for line in lines {
        for span in &line.spans {
            let style = line.style.patch(span.style);
            let fg = style.fg.and_then(term_color).filter(|_| color);
            let bold = color && style.add_modifier.contains(Modifier::BOLD);

            if let Some(fg) = fg {
                queue!(out, SetForegroundColor(fg))?;
            }
            if bold {
                queue!(out, SetAttribute(Attribute::Bold))?;
            }
            queue!(out, Print(span.content.as_ref()))?;
            if bold {
                queue!(out, SetAttribute(Attribute::Reset))?;
            }
            if fg.is_some() {
                queue!(out, ResetColor)?;
            }
        }
        queue!(out, Print("\n"))?;
    }
    Ok(())
}
