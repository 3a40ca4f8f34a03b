//! Single-pane diff editor contract and an in-memory terminal implementation.
//!
//! The editor knows nothing about comments. It only offers two layout
//! primitives: view zones (reserved vertical gaps after a line) and overlay
//! widgets (floating nodes that are positioned by their owner).

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget},
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use tracing::debug;

use crate::diff::{parse_hunks, LineType};
use crate::thread::Side;

/// Width of the `old new` line-number gutter
pub const GUTTER_WIDTH: usize = 12;

/// Editor-assigned view zone id. Never reused after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneId(pub u64);

/// Content of a floating overlay, shared between its owner and the editor
#[derive(Debug, Default)]
pub struct OverlayContent {
    pub lines: Vec<Line<'static>>,
    /// Top offset relative to the viewport (may be negative when scrolled past)
    pub top: i32,
    pub visible: bool,
    /// false once the owner has detached the node
    pub attached: bool,
}

impl OverlayContent {
    /// Rendered height in rows; a detached node measures 0
    pub fn client_height(&self) -> u16 {
        if self.attached {
            u16::try_from(self.lines.len()).unwrap_or(u16::MAX)
        } else {
            0
        }
    }
}

pub type OverlayNode = Rc<RefCell<OverlayContent>>;

/// Overlay registration. The position is managed by the owner, so there is
/// no position provider.
pub struct OverlayWidget {
    pub id: String,
    pub node: OverlayNode,
}

/// A reserved vertical gap after `after_line_number` (modified side)
pub struct ViewZone {
    pub after_line_number: u32,
    /// Which gutter column `after_line_number` refers to
    pub side: Side,
    /// Orders zones that share a line; ties fall back to creation order
    pub ordinal: u64,
    pub height: u16,
    pub dom_node_id: String,
    /// Margin label drawn in the gutter of the first reserved row
    pub margin: Option<String>,
    /// Called with the zone's viewport-relative top whenever layout runs
    pub on_top_changed: Box<dyn FnMut(i32)>,
}

/// Mutator handed out by [`DiffEditor::change_view_zones`]
pub trait ViewZoneAccessor {
    fn add_zone(&mut self, zone: ViewZone) -> ZoneId;
    fn remove_zone(&mut self, id: ZoneId);
}

/// What the anchor layer needs from a line-based diff editor
pub trait DiffEditor {
    fn add_overlay_widget(&mut self, widget: OverlayWidget);
    fn remove_overlay_widget(&mut self, id: &str);
    /// Runs `mutator` against the zone registry, then relayouts once
    fn change_view_zones(&mut self, mutator: &mut dyn FnMut(&mut dyn ViewZoneAccessor));
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EditorRow {
    line_type: LineType,
    old_line: Option<u32>,
    new_line: Option<u32>,
    text: String,
}

struct ZoneEntry {
    after_line_number: u32,
    side: Side,
    ordinal: u64,
    height: u16,
    dom_node_id: String,
    margin: Option<String>,
    on_top_changed: Box<dyn FnMut(i32)>,
}

struct ZoneRegistry<'a> {
    zones: &'a mut BTreeMap<ZoneId, ZoneEntry>,
    next_zone_id: &'a mut u64,
}

impl ViewZoneAccessor for ZoneRegistry<'_> {
    fn add_zone(&mut self, zone: ViewZone) -> ZoneId {
        let id = ZoneId(*self.next_zone_id);
        *self.next_zone_id += 1;
        self.zones.insert(
            id,
            ZoneEntry {
                after_line_number: zone.after_line_number,
                side: zone.side,
                ordinal: zone.ordinal,
                height: zone.height,
                dom_node_id: zone.dom_node_id,
                margin: zone.margin,
                on_top_changed: zone.on_top_changed,
            },
        );
        id
    }

    fn remove_zone(&mut self, id: ZoneId) {
        if self.zones.remove(&id).is_none() {
            debug!(zone_id = id.0, "remove_zone: unknown zone");
        }
    }
}

/// One row of the laid-out document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayoutRow {
    Text(usize),
    /// (zone, row offset inside the zone)
    Zone(ZoneId, u16),
}

/// In-memory single-pane diff editor for terminal output.
///
/// Rows come from a unified patch (hunk headers included). Zones are laid out
/// after the last row whose new-side line number is `<= after_line_number`,
/// ordered by `ordinal`.
pub struct PlainDiffEditor {
    rows: Vec<EditorRow>,
    zones: BTreeMap<ZoneId, ZoneEntry>,
    overlays: Vec<(String, Weak<RefCell<OverlayContent>>)>,
    next_zone_id: u64,
    scroll_top: usize,
    viewport_height: u16,
}

impl PlainDiffEditor {
    pub fn from_patch(patch: &str, viewport_height: u16) -> Self {
        let mut rows = Vec::new();
        for hunk in parse_hunks(patch) {
            rows.push(EditorRow {
                line_type: LineType::Header,
                old_line: None,
                new_line: None,
                text: hunk.header_text.clone(),
            });
            rows.extend(hunk.lines.into_iter().map(|line| EditorRow {
                line_type: line.line_type,
                old_line: line.old_line,
                new_line: line.new_line,
                text: line.content,
            }));
        }

        Self {
            rows,
            zones: BTreeMap::new(),
            overlays: Vec::new(),
            next_zone_id: 1,
            scroll_top: 0,
            viewport_height,
        }
    }

    pub fn viewport_height(&self) -> u16 {
        self.viewport_height
    }

    pub fn scroll_top(&self) -> usize {
        self.scroll_top
    }

    /// Scrolls so that laid-out row `row` is at the top, then relayouts
    pub fn scroll_to(&mut self, row: usize) {
        self.scroll_top = row.min(self.content_height().saturating_sub(1));
        self.layout();
    }

    /// Diff rows plus reserved zone rows
    pub fn content_height(&self) -> usize {
        self.rows.len() + self.zones.values().map(|z| z.height as usize).sum::<usize>()
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn zone_height(&self, id: ZoneId) -> Option<u16> {
        self.zones.get(&id).map(|z| z.height)
    }

    pub fn zone_line(&self, id: ZoneId) -> Option<u32> {
        self.zones.get(&id).map(|z| z.after_line_number)
    }

    pub fn zone_dom_node(&self, id: ZoneId) -> Option<&str> {
        self.zones.get(&id).map(|z| z.dom_node_id.as_str())
    }

    pub fn overlay_ids(&self) -> Vec<&str> {
        self.overlays.iter().map(|(id, _)| id.as_str()).collect()
    }

    /// Index of the first text row that comes after the zone's anchor line
    fn insertion_point(&self, side: Side, after_line_number: u32) -> usize {
        self.rows
            .iter()
            .rposition(|row| {
                let number = match side {
                    Side::Modified => row.new_line,
                    Side::Original => row.old_line,
                };
                number.is_some_and(|n| n <= after_line_number)
            })
            .map_or(0, |i| i + 1)
    }

    fn layout_rows(&self) -> Vec<LayoutRow> {
        let mut by_point: BTreeMap<usize, Vec<(u64, ZoneId, u16)>> = BTreeMap::new();
        for (id, zone) in &self.zones {
            by_point
                .entry(self.insertion_point(zone.side, zone.after_line_number))
                .or_default()
                .push((zone.ordinal, *id, zone.height));
        }
        for zones in by_point.values_mut() {
            zones.sort_unstable();
        }

        let mut layout = Vec::with_capacity(self.content_height());
        for point in 0..=self.rows.len() {
            if let Some(zones) = by_point.get(&point) {
                for (_, id, height) in zones {
                    layout.extend((0..*height).map(|offset| LayoutRow::Zone(*id, offset)));
                }
            }
            if point < self.rows.len() {
                layout.push(LayoutRow::Text(point));
            }
        }
        layout
    }

    /// Recomputes every zone's top and reports it through `on_top_changed`
    pub fn layout(&mut self) {
        let mut tops: BTreeMap<ZoneId, i32> = BTreeMap::new();
        for (row, entry) in self.layout_rows().into_iter().enumerate() {
            if let LayoutRow::Zone(id, 0) = entry {
                tops.insert(id, row as i32 - self.scroll_top as i32);
            }
        }
        for (id, top) in tops {
            if let Some(zone) = self.zones.get_mut(&id) {
                (zone.on_top_changed)(top);
            }
        }
    }

    fn text_line(row: &EditorRow) -> Line<'static> {
        let number = |n: Option<u32>| n.map_or_else(|| " ".repeat(5), |n| format!("{:>5}", n));
        let gutter = format!("{} {} ", number(row.old_line), number(row.new_line));
        let (marker, color) = match row.line_type {
            LineType::Added => ("+", Some(Color::Green)),
            LineType::Removed => ("-", Some(Color::Red)),
            LineType::Header => ("", Some(Color::Cyan)),
            LineType::Context | LineType::Meta => (" ", None),
        };
        let style = color.map_or_else(Style::default, |c| Style::default().fg(c));
        Line::from(vec![
            Span::styled(gutter, Style::default().fg(Color::DarkGray)),
            Span::styled(format!("{}{}", marker, row.text), style),
        ])
    }

    /// The visible viewport with overlays painted over their zones
    pub fn render_lines(&self) -> Vec<Line<'static>> {
        let layout = self.layout_rows();
        let height = self.viewport_height as usize;
        let mut lines: Vec<Line<'static>> = layout
            .iter()
            .skip(self.scroll_top)
            .take(height)
            .map(|entry| match entry {
                LayoutRow::Text(i) => Self::text_line(&self.rows[*i]),
                LayoutRow::Zone(id, 0) => match self.zones.get(id).and_then(|z| z.margin.clone()) {
                    Some(margin) => Line::from(Span::styled(
                        format!("{:>width$}", margin, width = GUTTER_WIDTH - 1),
                        Style::default().fg(Color::DarkGray),
                    )),
                    None => Line::default(),
                },
                LayoutRow::Zone(..) => Line::default(),
            })
            .collect();

        for (_, node) in &self.overlays {
            let Some(node) = node.upgrade() else {
                continue;
            };
            let node = node.borrow();
            if !node.attached || !node.visible {
                continue;
            }
            for (offset, overlay_line) in node.lines.iter().enumerate() {
                let row = node.top + offset as i32;
                if row < 0 || row as usize >= lines.len() {
                    continue;
                }
                let target = &mut lines[row as usize];
                let margin: Vec<Span<'static>> = target.spans.first().cloned().into_iter().collect();
                let gutter_text: String = margin.iter().map(|s| s.content.as_ref()).collect();
                let pad = GUTTER_WIDTH.saturating_sub(gutter_text.chars().count());
                let mut spans = margin;
                spans.push(Span::raw(" ".repeat(pad)));
                spans.extend(overlay_line.spans.iter().cloned());
                *target = Line::from(spans);
            }
        }

        lines
    }
}

impl DiffEditor for PlainDiffEditor {
    fn add_overlay_widget(&mut self, widget: OverlayWidget) {
        self.overlays.retain(|(id, _)| *id != widget.id);
        self.overlays.push((widget.id, Rc::downgrade(&widget.node)));
    }

    fn remove_overlay_widget(&mut self, id: &str) {
        let before = self.overlays.len();
        self.overlays.retain(|(overlay_id, _)| overlay_id != id);
        if self.overlays.len() == before {
            debug!(overlay_id = id, "remove_overlay_widget: unknown overlay");
        }
    }

    fn change_view_zones(&mut self, mutator: &mut dyn FnMut(&mut dyn ViewZoneAccessor)) {
        {
            let mut registry = ZoneRegistry {
                zones: &mut self.zones,
                next_zone_id: &mut self.next_zone_id,
            };
            mutator(&mut registry);
        }
        self.layout();
    }
}

impl Widget for &PlainDiffEditor {
    fn render(self, area: Rect, buf: &mut Buffer) {
        Paragraph::new(self.render_lines()).render(area, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::common::line_text;
    use std::cell::Cell;

    const PATCH: &str = "@@ -1,3 +1,4 @@\n a\n-b\n+B\n+C\n c";

    fn zone(after: u32, height: u16, top: Rc<Cell<i32>>) -> ViewZone {
        ViewZone {
            after_line_number: after,
            side: Side::Modified,
            ordinal: 0,
            height,
            dom_node_id: "z".to_string(),
            margin: None,
            on_top_changed: Box::new(move |t| top.set(t)),
        }
    }

    fn add(editor: &mut PlainDiffEditor, zone: ViewZone) -> ZoneId {
        let mut zone = Some(zone);
        let mut id = None;
        editor.change_view_zones(&mut |accessor: &mut dyn ViewZoneAccessor| {
            if let Some(zone) = zone.take() {
                id = Some(accessor.add_zone(zone));
            }
        });
        id.unwrap()
    }

    fn texts(editor: &PlainDiffEditor) -> Vec<String> {
        editor.render_lines().iter().map(line_text).collect()
    }

    #[test]
    fn test_rows_from_patch() {
        let editor = PlainDiffEditor::from_patch(PATCH, 10);
        assert_eq!(editor.content_height(), 6);
        assert_eq!(
            texts(&editor),
            vec![
                "            @@ -1,3 +1,4 @@",
                "    1     1  a",
                "    2       -b",
                "          2 +B",
                "          3 +C",
                "    3     4  c",
            ]
        );
    }

    #[test]
    fn test_zone_reports_top_after_anchor_line() {
        let mut editor = PlainDiffEditor::from_patch(PATCH, 10);
        let top = Rc::new(Cell::new(-1));
        let id = add(&mut editor, zone(2, 3, top.clone()));

        // header, a, -b, +B -> zone starts at row 4
        assert_eq!(top.get(), 4);
        assert_eq!(editor.zone_height(id), Some(3));
        assert_eq!(editor.content_height(), 9);

        editor.scroll_to(2);
        assert_eq!(top.get(), 2);
    }

    #[test]
    fn test_zone_at_line_zero_goes_first() {
        let mut editor = PlainDiffEditor::from_patch(PATCH, 10);
        let top = Rc::new(Cell::new(-1));
        add(&mut editor, zone(0, 1, top.clone()));
        assert_eq!(top.get(), 0);
    }

    #[test]
    fn test_zones_on_one_line_follow_ordinal() {
        let mut editor = PlainDiffEditor::from_patch(PATCH, 10);
        let late = Rc::new(Cell::new(-1));
        let early = Rc::new(Cell::new(-1));
        add(
            &mut editor,
            ViewZone {
                ordinal: 9,
                ..zone(2, 2, late.clone())
            },
        );
        add(
            &mut editor,
            ViewZone {
                ordinal: 4,
                ..zone(2, 3, early.clone())
            },
        );

        // created second, laid out first
        assert_eq!(early.get(), 4);
        assert_eq!(late.get(), 7);
    }

    #[test]
    fn test_base_side_zone_follows_old_numbers() {
        let mut editor = PlainDiffEditor::from_patch(PATCH, 10);
        let top = Rc::new(Cell::new(-1));
        // old line 2 is the removed "-b" row
        add(
            &mut editor,
            ViewZone {
                side: Side::Original,
                ..zone(2, 1, top.clone())
            },
        );
        assert_eq!(top.get(), 3);
        let lines = texts(&editor);
        assert_eq!(lines[2], "    2       -b");
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], "          2 +B");
    }

    #[test]
    fn test_client_height_saturates() {
        let node = OverlayContent {
            lines: vec![Line::default(); usize::from(u16::MAX) + 5],
            attached: true,
            ..Default::default()
        };
        assert_eq!(node.client_height(), u16::MAX);
    }

    #[test]
    fn test_zone_ids_are_never_reused() {
        let mut editor = PlainDiffEditor::from_patch(PATCH, 10);
        let first = add(&mut editor, zone(1, 1, Rc::new(Cell::new(0))));
        editor.change_view_zones(&mut |accessor: &mut dyn ViewZoneAccessor| {
            accessor.remove_zone(first)
        });
        let second = add(&mut editor, zone(1, 1, Rc::new(Cell::new(0))));

        assert_ne!(first, second);
        assert_eq!(editor.zone_count(), 1);
        assert!(editor.zone_height(first).is_none());
    }

    #[test]
    fn test_overlay_painted_over_zone_rows() {
        let mut editor = PlainDiffEditor::from_patch(PATCH, 10);
        let node: OverlayNode = Rc::new(RefCell::new(OverlayContent {
            lines: vec![Line::from("hello"), Line::from("world")],
            attached: true,
            ..Default::default()
        }));
        editor.add_overlay_widget(OverlayWidget {
            id: "overlay.zone.widget.1".to_string(),
            node: node.clone(),
        });

        let target = node.clone();
        add(
            &mut editor,
            ViewZone {
                after_line_number: 1,
                side: Side::Modified,
                ordinal: 0,
                height: 2,
                dom_node_id: "1".to_string(),
                margin: None,
                on_top_changed: Box::new(move |top| {
                    let mut node = target.borrow_mut();
                    node.top = top;
                    node.visible = true;
                }),
            },
        );

        let lines = texts(&editor);
        assert_eq!(lines[2], "            hello");
        assert_eq!(lines[3], "            world");
        assert_eq!(lines[4], "    2       -b");
    }

    #[test]
    fn test_hidden_overlay_is_not_painted() {
        let mut editor = PlainDiffEditor::from_patch(PATCH, 10);
        let node: OverlayNode = Rc::new(RefCell::new(OverlayContent {
            lines: vec![Line::from("hidden")],
            attached: true,
            visible: false,
            top: 0,
        }));
        editor.add_overlay_widget(OverlayWidget {
            id: "o".to_string(),
            node,
        });
        assert!(!texts(&editor).iter().any(|l| l.contains("hidden")));

        editor.remove_overlay_widget("o");
        assert!(editor.overlay_ids().is_empty());
    }

    #[test]
    fn test_renders_into_buffer() {
        let editor = PlainDiffEditor::from_patch(PATCH, 10);
        let area = Rect::new(0, 0, 20, 3);
        let mut buf = Buffer::empty(area);
        (&editor).render(area, &mut buf);
        assert_eq!(buf[(12u16, 0u16)].symbol(), "@");
    }
}
