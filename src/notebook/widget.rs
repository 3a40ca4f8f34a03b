//! Structured-diff widgets and the hook the decorator plugs into.

use ratatui::{
    style::{Color, Style},
    text::{Line, Span},
};

use crate::diff::{parse_hunks, LineType};
use crate::thread::ChunkRanges;

/// Tag attached to every widget the structured-diff renderer produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetKind {
    /// One cell's (hunk's) diff
    CellDiff,
    /// A container grouping a run of chunks
    ChunkGroup,
    /// Metadata diff; has no line-anchored position
    MetadataDiff,
    Other,
}

impl WidgetKind {
    pub fn is_commentable(self) -> bool {
        !matches!(self, WidgetKind::Other)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiffWidget {
    pub kind: WidgetKind,
    pub lines: Vec<Line<'static>>,
    /// Line ranges covered by the widget, when it has any
    pub ranges: ChunkRanges,
}

impl DiffWidget {
    pub fn new(kind: WidgetKind, lines: Vec<Line<'static>>) -> Self {
        Self {
            kind,
            lines,
            ranges: ChunkRanges::default(),
        }
    }

    pub fn with_ranges(mut self, ranges: ChunkRanges) -> Self {
        self.ranges = ranges;
        self
    }
}

/// Receives each widget in production order and returns what to insert
pub trait WidgetHook {
    type Output;

    fn on_widget_produced(&mut self, widget: DiffWidget) -> Self::Output;
}

/// A structured-diff renderer. It produces widgets in order and hands each
/// one to the hook instead of inserting it directly.
pub trait DiffWidgetProvider {
    fn render<H: WidgetHook>(&self, hook: &mut H) -> Vec<H::Output>;
}

impl DiffWidgetProvider for [DiffWidget] {
    fn render<H: WidgetHook>(&self, hook: &mut H) -> Vec<H::Output> {
        self.iter()
            .cloned()
            .map(|widget| hook.on_widget_produced(widget))
            .collect()
    }
}

impl DiffWidgetProvider for Vec<DiffWidget> {
    fn render<H: WidgetHook>(&self, hook: &mut H) -> Vec<H::Output> {
        self.as_slice().render(hook)
    }
}

/// Widgets for a unified patch: one cell diff per hunk, a separator for the
/// unchanged lines between hunks and a trailing metadata summary.
pub struct HunkWidgetProvider {
    widgets: Vec<DiffWidget>,
}

impl HunkWidgetProvider {
    pub fn from_patch(filename: &str, patch: &str) -> Self {
        let hunks = parse_hunks(patch);
        let mut widgets = Vec::with_capacity(hunks.len() * 2 + 1);
        let mut additions = 0usize;
        let mut deletions = 0usize;
        let mut next_new_line = 1u32;

        for hunk in &hunks {
            let skipped = hunk.header.new_start.saturating_sub(next_new_line);
            if skipped > 0 {
                widgets.push(DiffWidget::new(
                    WidgetKind::Other,
                    vec![Line::from(Span::styled(
                        format!("⋯ {} unchanged lines", skipped),
                        Style::default().fg(Color::DarkGray),
                    ))],
                ));
            }
            next_new_line = hunk.header.new_start + hunk.header.new_count;

            let mut lines = vec![Line::from(Span::styled(
                hunk.header_text.clone(),
                Style::default().fg(Color::Cyan),
            ))];
            for line in &hunk.lines {
                let (marker, style) = match line.line_type {
                    LineType::Added => {
                        additions += 1;
                        ("+", Style::default().fg(Color::Green))
                    }
                    LineType::Removed => {
                        deletions += 1;
                        ("-", Style::default().fg(Color::Red))
                    }
                    _ => (" ", Style::default()),
                };
                lines.push(Line::from(Span::styled(format!("{}{}", marker, line.content), style)));
            }
            widgets.push(DiffWidget::new(WidgetKind::CellDiff, lines).with_ranges(hunk.ranges()));
        }

        widgets.push(DiffWidget::new(
            WidgetKind::MetadataDiff,
            vec![Line::from(Span::styled(
                format!("{}: {} additions, {} deletions", filename, additions, deletions),
                Style::default().fg(Color::DarkGray),
            ))],
        ));

        Self { widgets }
    }

    /// Ranges of the cell diffs, in order (input for chunk grouping)
    pub fn chunk_ranges(&self) -> Vec<ChunkRanges> {
        self.widgets
            .iter()
            .filter(|w| w.kind == WidgetKind::CellDiff)
            .map(|w| w.ranges)
            .collect()
    }

    pub fn widgets(&self) -> &[DiffWidget] {
        &self.widgets
    }
}

impl DiffWidgetProvider for HunkWidgetProvider {
    fn render<H: WidgetHook>(&self, hook: &mut H) -> Vec<H::Output> {
        self.widgets.render(hook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::LineRange;

    const PATCH: &str = "@@ -1,2 +1,3 @@\n a\n+b\n c\n@@ -10,2 +11,1 @@\n-x\n y";

    struct Kinds;

    impl WidgetHook for Kinds {
        type Output = WidgetKind;

        fn on_widget_produced(&mut self, widget: DiffWidget) -> WidgetKind {
            widget.kind
        }
    }

    #[test]
    fn test_hunk_provider_widget_sequence() {
        let provider = HunkWidgetProvider::from_patch("a.py", PATCH);
        assert_eq!(
            provider.render(&mut Kinds),
            vec![
                WidgetKind::CellDiff,
                WidgetKind::Other,
                WidgetKind::CellDiff,
                WidgetKind::MetadataDiff,
            ]
        );
    }

    #[test]
    fn test_hunk_provider_ranges_and_summary() {
        let provider = HunkWidgetProvider::from_patch("a.py", PATCH);
        let ranges = provider.chunk_ranges();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].range, Some(LineRange::new(0, 2)));
        assert_eq!(ranges[1].range, Some(LineRange::new(10, 10)));
        assert_eq!(ranges[1].original_range, Some(LineRange::new(9, 10)));

        let metadata = provider.widgets().last().unwrap();
        let summary: String = metadata.lines[0].spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(summary, "a.py: 1 additions, 1 deletions");
    }

    #[test]
    fn test_only_other_is_not_commentable() {
        assert!(WidgetKind::CellDiff.is_commentable());
        assert!(WidgetKind::ChunkGroup.is_commentable());
        assert!(WidgetKind::MetadataDiff.is_commentable());
        assert!(!WidgetKind::Other.is_commentable());
    }
}
