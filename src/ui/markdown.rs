use async_trait::async_trait;
use markdown::{
    mdast::{self, Node},
    ParseOptions,
};
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};
use tracing::debug;
use unicode_width::UnicodeWidthStr;

use crate::error::Result;

/// A rendered markdown body.
///
/// The owner must call `dispose` before dropping the widget that shows it.
pub trait RenderHandle {
    fn lines(&self) -> &[Line<'static>];
    fn dispose(&mut self);
    fn is_disposed(&self) -> bool;
}

/// Markdown rendering collaborator used for comment bodies
#[async_trait(?Send)]
pub trait MarkdownRenderer {
    async fn render(&self, text: &str) -> Result<Box<dyn RenderHandle>>;
}

/// 端末表示用のレンダリング結果
pub struct TerminalRender {
    lines: Vec<Line<'static>>,
    disposed: bool,
}

impl TerminalRender {
    pub fn new(lines: Vec<Line<'static>>) -> Self {
        Self {
            lines,
            disposed: false,
        }
    }
}

impl RenderHandle for TerminalRender {
    fn lines(&self) -> &[Line<'static>] {
        &self.lines
    }

    fn dispose(&mut self) {
        self.lines.clear();
        self.disposed = true;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

/// GFM renderer for terminal output.
///
/// Comment bodies are parsed into mdast and each block is mapped to styled
/// lines. Paragraphs and list items wrap to `width` columns; code blocks and
/// tables do not.
pub struct TerminalMarkdownRenderer {
    width: usize,
}

impl TerminalMarkdownRenderer {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    pub fn render_lines(&self, text: &str) -> Vec<Line<'static>> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let root = match markdown::to_mdast(text, &ParseOptions::gfm()) {
            Ok(Node::Root(root)) => root.children,
            Ok(other) => vec![other],
            Err(e) => {
                debug!("markdown parse failed, showing raw text: {}", e);
                return wrap_inline(&[Inline::Text(text.to_string(), Style::default())], self.width);
            }
        };
        render_blocks(&root, self.width, true)
    }
}

/// Inline content of one block
#[derive(Debug, Clone, PartialEq)]
enum Inline {
    Text(String, Style),
    /// Hard line break
    Break,
}

fn code_style() -> Style {
    Style::default().fg(Color::Yellow)
}

fn muted_style() -> Style {
    Style::default().fg(Color::DarkGray)
}

fn push_text(out: &mut Vec<Inline>, text: &str, style: Style) {
    if text.is_empty() {
        return;
    }
    if let Some(Inline::Text(last, last_style)) = out.last_mut() {
        if *last_style == style {
            last.push_str(text);
            return;
        }
    }
    out.push(Inline::Text(text.to_string(), style));
}

fn collect_inline(node: &Node, style: Style, out: &mut Vec<Inline>) {
    match node {
        Node::Text(text) => push_text(out, &text.value, style),
        Node::InlineCode(code) => push_text(out, &code.value, style.patch(code_style())),
        Node::InlineMath(math) => push_text(out, &math.value, style.patch(code_style())),
        Node::Emphasis(node) => collect_children(&node.children, style.add_modifier(Modifier::ITALIC), out),
        Node::Strong(node) => collect_children(&node.children, style.add_modifier(Modifier::BOLD), out),
        Node::Delete(node) => collect_children(&node.children, style.add_modifier(Modifier::CROSSED_OUT), out),
        Node::Link(link) => {
            let link_style = style.fg(Color::Blue).add_modifier(Modifier::UNDERLINED);
            collect_children(&link.children, link_style, out);
            // 端末ではリンク先が見えないのでラベルと異なる場合は URL を添える
            let label: String = link.children.iter().map(|child| child.to_string()).collect();
            if label != link.url {
                push_text(out, &format!(" ({})", link.url), muted_style());
            }
        }
        Node::LinkReference(link) => {
            let link_style = style.fg(Color::Blue).add_modifier(Modifier::UNDERLINED);
            collect_children(&link.children, link_style, out);
        }
        Node::Image(image) => {
            let label = if image.alt.is_empty() { "image" } else { image.alt.as_str() };
            push_text(out, &format!("[{}]", label), style.fg(Color::Blue));
        }
        Node::Break(_) => out.push(Inline::Break),
        Node::Html(html) => push_text(out, &html.value, style),
        _ => match node.children() {
            Some(children) => collect_children(children, style, out),
            None => push_text(out, &node.to_string(), style),
        },
    }
}

fn collect_children(nodes: &[Node], style: Style, out: &mut Vec<Inline>) {
    for node in nodes {
        collect_inline(node, style, out);
    }
}

fn inline_of(nodes: &[Node], style: Style) -> Vec<Inline> {
    let mut out = Vec::new();
    collect_children(nodes, style, &mut out);
    out
}

fn push_span(spans: &mut Vec<Span<'static>>, text: &str, style: Style) {
    if let Some(last) = spans.last_mut() {
        if last.style == style {
            last.content.to_mut().push_str(text);
            return;
        }
    }
    spans.push(Span::styled(text.to_string(), style));
}

enum Token {
    Word(Vec<(String, Style)>),
    Break,
}

/// Splits inline content into words; a word may span several styles
fn tokenize(inline: &[Inline]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word: Vec<(String, Style)> = Vec::new();

    for item in inline {
        match item {
            Inline::Break => {
                if !word.is_empty() {
                    tokens.push(Token::Word(std::mem::take(&mut word)));
                }
                tokens.push(Token::Break);
            }
            Inline::Text(text, style) => {
                let mut piece = String::new();
                for ch in text.chars() {
                    if ch.is_whitespace() {
                        if !piece.is_empty() {
                            word.push((std::mem::take(&mut piece), *style));
                        }
                        if !word.is_empty() {
                            tokens.push(Token::Word(std::mem::take(&mut word)));
                        }
                    } else {
                        piece.push(ch);
                    }
                }
                if !piece.is_empty() {
                    word.push((piece, *style));
                }
            }
        }
    }
    if !word.is_empty() {
        tokens.push(Token::Word(word));
    }
    tokens
}

/// Word-wraps inline content to `width` display columns.
///
/// Words wider than the width are placed on their own line unsplit.
fn wrap_inline(inline: &[Inline], width: usize) -> Vec<Line<'static>> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current: Vec<Span<'static>> = Vec::new();
    let mut current_width = 0;

    for token in tokenize(inline) {
        match token {
            Token::Break => {
                lines.push(Line::from(std::mem::take(&mut current)));
                current_width = 0;
            }
            Token::Word(pieces) => {
                let word_width: usize = pieces.iter().map(|(text, _)| text.width()).sum();
                if current_width > 0 && current_width + 1 + word_width > width {
                    lines.push(Line::from(std::mem::take(&mut current)));
                    current_width = 0;
                }
                if current_width > 0 {
                    push_span(&mut current, " ", Style::default());
                    current_width += 1;
                }
                for (text, style) in &pieces {
                    push_span(&mut current, text, *style);
                }
                current_width += word_width;
            }
        }
    }
    if !current.is_empty() {
        lines.push(Line::from(current));
    }
    lines
}

fn prefixed(prefix: String, style: Style, line: Line<'static>) -> Line<'static> {
    let mut spans = vec![Span::styled(prefix, style)];
    spans.extend(line.spans);
    Line::from(spans)
}

/// Renders sibling blocks; `separated` puts a blank line between them
fn render_blocks(nodes: &[Node], width: usize, separated: bool) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for node in nodes {
        let block = render_block(node, width);
        if block.is_empty() {
            continue;
        }
        if separated && !lines.is_empty() {
            lines.push(Line::default());
        }
        lines.extend(block);
    }
    lines
}

fn render_block(node: &Node, width: usize) -> Vec<Line<'static>> {
    match node {
        Node::Heading(heading) => wrap_inline(
            &inline_of(&heading.children, Style::default().add_modifier(Modifier::BOLD)),
            width,
        ),
        Node::Paragraph(paragraph) => wrap_inline(&inline_of(&paragraph.children, Style::default()), width),
        Node::List(list) => render_list(list, width),
        Node::Blockquote(quote) => render_blocks(&quote.children, width.saturating_sub(2), true)
            .into_iter()
            .map(|line| prefixed("│ ".to_string(), muted_style(), line))
            .collect(),
        Node::Code(code) => code_lines(&code.value),
        Node::Math(math) => code_lines(&math.value),
        Node::Table(table) => render_table(table),
        Node::ThematicBreak(_) => vec![Line::from(Span::styled("─".repeat(width.min(40)), muted_style()))],
        Node::Definition(_) => Vec::new(),
        other => wrap_inline(&inline_of(std::slice::from_ref(other), Style::default()), width),
    }
}

fn code_lines(code: &str) -> Vec<Line<'static>> {
    code.lines()
        .map(|line| Line::from(Span::styled(format!("  {}", line), code_style())))
        .collect()
}

fn render_list(list: &mdast::List, width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let mut number = list.start.unwrap_or(1);

    for child in &list.children {
        let Node::ListItem(item) = child else {
            continue;
        };
        let mut marker = if list.ordered {
            let label = format!("{}. ", number);
            number = number.saturating_add(1);
            label
        } else {
            "• ".to_string()
        };
        match item.checked {
            Some(true) => marker.push_str("[x] "),
            Some(false) => marker.push_str("[ ] "),
            None => {}
        }

        if list.spread && !lines.is_empty() {
            lines.push(Line::default());
        }
        let indent = marker.width();
        let body = render_blocks(&item.children, width.saturating_sub(indent), item.spread);
        if body.is_empty() {
            lines.push(Line::from(marker));
            continue;
        }
        for (i, line) in body.into_iter().enumerate() {
            let prefix = if i == 0 { marker.clone() } else { " ".repeat(indent) };
            lines.push(prefixed(prefix, Style::default(), line));
        }
    }
    lines
}

fn inline_width(cell: &[Inline]) -> usize {
    cell.iter()
        .map(|item| match item {
            Inline::Text(text, _) => text.width(),
            Inline::Break => 1,
        })
        .sum()
}

/// Table rows with padded columns; the header row is bold and underlined
/// by a rule
fn render_table(table: &mdast::Table) -> Vec<Line<'static>> {
    let rows: Vec<Vec<Vec<Inline>>> = table
        .children
        .iter()
        .enumerate()
        .filter_map(|(row_ix, row)| match row {
            Node::TableRow(row) => {
                let style = if row_ix == 0 {
                    Style::default().add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                Some(
                    row.children
                        .iter()
                        .map(|cell| match cell {
                            Node::TableCell(cell) => inline_of(&cell.children, style),
                            _ => Vec::new(),
                        })
                        .collect(),
                )
            }
            _ => None,
        })
        .collect();

    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| inline_width(cell))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut lines = Vec::new();
    for (row_ix, row) in rows.iter().enumerate() {
        let mut spans = Vec::new();
        for (col, cell) in row.iter().enumerate() {
            if col > 0 {
                push_span(&mut spans, " │ ", muted_style());
            }
            for item in cell {
                match item {
                    Inline::Text(text, style) => push_span(&mut spans, text, *style),
                    Inline::Break => push_span(&mut spans, " ", Style::default()),
                }
            }
            if col + 1 < row.len() {
                let pad = widths[col].saturating_sub(inline_width(cell));
                if pad > 0 {
                    push_span(&mut spans, &" ".repeat(pad), Style::default());
                }
            }
        }
        lines.push(Line::from(spans));

        if row_ix == 0 {
            let total = widths.iter().sum::<usize>() + 3 * columns.saturating_sub(1);
            lines.push(Line::from(Span::styled("─".repeat(total), muted_style())));
        }
    }
    lines
}

#[async_trait(?Send)]
impl MarkdownRenderer for TerminalMarkdownRenderer {
    async fn render(&self, text: &str) -> Result<Box<dyn RenderHandle>> {
        Ok(Box::new(TerminalRender::new(self.render_lines(text))))
    }
}
