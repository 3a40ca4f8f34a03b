use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::debug;

use super::editor::{
    DiffEditor, OverlayContent, OverlayNode, OverlayWidget, ViewZone, ViewZoneAccessor, ZoneId,
};
use crate::config::DisplayConfig;
use crate::thread::{Side, Thread, ThreadId};
use crate::ui::markdown::MarkdownRenderer;
use crate::ui::thread_widget::{ThreadEvent, ThreadWidget};

pub const OVERLAY_ID_PREFIX: &str = "overlay.zone.widget.";

/// 破棄済みフラグ。非同期処理の完了後に結果を適用してよいかを判定する
#[derive(Debug, Clone, Default)]
pub struct Tombstone(Rc<Cell<bool>>);

impl Tombstone {
    pub fn bury(&self) {
        self.0.set(true);
    }

    pub fn is_buried(&self) -> bool {
        self.0.get()
    }
}

/// Pins one thread's widget to a line of a [`DiffEditor`].
///
/// The anchor is a view zone (reserved rows sized to the widget) plus an
/// overlay that follows the zone's top. The zone is never resized in place:
/// every height change removes it and adds a new one.
pub struct AnchorController {
    thread_id: ThreadId,
    side: Side,
    line_number: u32,
    widget: ThreadWidget,
    overlay: OverlayNode,
    overlay_registered: bool,
    zone: Option<(ZoneId, u16)>,
    tombstone: Tombstone,
    released: bool,
}

impl AnchorController {
    pub fn new(thread: &Thread, options: DisplayConfig) -> Self {
        Self {
            thread_id: thread.id,
            side: thread.location.side(),
            line_number: thread.location.line(),
            widget: ThreadWidget::new(thread, options),
            overlay: Rc::new(RefCell::new(OverlayContent::default())),
            overlay_registered: false,
            zone: None,
            tombstone: Tombstone::default(),
            released: false,
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    pub fn overlay_id(&self) -> String {
        format!("{}{}", OVERLAY_ID_PREFIX, self.thread_id)
    }

    pub fn tombstone(&self) -> Tombstone {
        self.tombstone.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.tombstone.is_buried()
    }

    pub fn zone_id(&self) -> Option<ZoneId> {
        self.zone.map(|(id, _)| id)
    }

    /// Rows reserved by the current zone
    pub fn zone_height(&self) -> Option<u16> {
        self.zone.map(|(_, height)| height)
    }

    pub fn overlay(&self) -> OverlayNode {
        self.overlay.clone()
    }

    pub fn widget(&self) -> &ThreadWidget {
        &self.widget
    }

    /// Renders the widget, registers its overlay and, on the next tick,
    /// reserves a zone sized to the measured content.
    pub async fn mount(
        &mut self,
        editor: &mut dyn DiffEditor,
        thread: &Thread,
        renderer: &dyn MarkdownRenderer,
    ) {
        if self.is_disposed() {
            debug!(thread_id = %self.thread_id, "mount: anchor already disposed");
            self.release(editor);
            return;
        }

        {
            let mut node = self.overlay.borrow_mut();
            node.attached = true;
            node.visible = false;
        }
        editor.add_overlay_widget(OverlayWidget {
            id: self.overlay_id(),
            node: self.overlay.clone(),
        });
        self.overlay_registered = true;

        self.widget.mount(thread, renderer).await;
        if self.is_disposed() {
            debug!(thread_id = %self.thread_id, "mount: disposed while rendering");
            self.release(editor);
            return;
        }
        self.paint();

        // 高さが確定してから zone を作る
        tokio::task::yield_now().await;
        if self.is_disposed() {
            debug!(thread_id = %self.thread_id, "mount: disposed before zone insertion");
            self.release(editor);
            return;
        }
        self.add_zone(editor);
    }

    /// Re-renders after the thread changed (e.g. a reply was recorded)
    pub async fn update(
        &mut self,
        editor: &mut dyn DiffEditor,
        thread: &Thread,
        renderer: &dyn MarkdownRenderer,
    ) {
        if self.is_disposed() {
            debug!(thread_id = %self.thread_id, "update: anchor already disposed");
            return;
        }
        self.widget.mount(thread, renderer).await;
        if self.is_disposed() {
            self.release(editor);
            return;
        }
        self.paint();
        self.refresh(editor);
    }

    /// Replaces the zone with a new one sized to the current content
    pub fn refresh(&mut self, editor: &mut dyn DiffEditor) {
        if self.is_disposed() {
            debug!(thread_id = %self.thread_id, "refresh: anchor already disposed");
            return;
        }
        self.remove_zone(editor);
        self.add_zone(editor);
    }

    /// Forwards a submit to the widget and repaints the affordance
    pub fn submit(&mut self, editor: &mut dyn DiffEditor, text: &str) -> Option<ThreadEvent> {
        if self.is_disposed() {
            return None;
        }
        let event = self.widget.submit(text);
        self.repaint(editor);
        event
    }

    pub fn submission_failed(&mut self, editor: &mut dyn DiffEditor, message: impl Into<String>) {
        if self.is_disposed() {
            return;
        }
        self.widget.submission_failed(message);
        self.repaint(editor);
    }

    pub fn request_removal(&self) -> Option<ThreadEvent> {
        self.widget.request_removal()
    }

    /// Removes the zone and detaches the overlay. Later calls are no-ops.
    pub fn dispose(&mut self, editor: &mut dyn DiffEditor) {
        self.tombstone.bury();
        self.release(editor);
    }

    fn release(&mut self, editor: &mut dyn DiffEditor) {
        if self.released {
            return;
        }
        self.released = true;
        self.remove_zone(editor);
        if self.overlay_registered {
            editor.remove_overlay_widget(&self.overlay_id());
            self.overlay_registered = false;
        }
        {
            let mut node = self.overlay.borrow_mut();
            node.attached = false;
            node.visible = false;
            node.lines.clear();
        }
        self.widget.dispose();
    }

    fn paint(&mut self) {
        self.overlay.borrow_mut().lines = self.widget.lines();
    }

    /// Paints the widget; the zone is only replaced when the height moved
    fn repaint(&mut self, editor: &mut dyn DiffEditor) {
        self.paint();
        let height = self.overlay.borrow().client_height();
        if self.zone.is_some_and(|(_, current)| current != height) {
            self.refresh(editor);
        }
    }

    fn add_zone(&mut self, editor: &mut dyn DiffEditor) {
        let height = self.overlay.borrow().client_height();
        let node = Rc::downgrade(&self.overlay);
        let mut zone = Some(ViewZone {
            after_line_number: self.line_number,
            side: self.side,
            // スレッド一覧の順序（ThreadId は追加順）を refresh 後も保つ
            ordinal: self.thread_id.0,
            height,
            dom_node_id: self.thread_id.to_string(),
            margin: None,
            on_top_changed: Box::new(move |top| {
                if let Some(node) = node.upgrade() {
                    let mut node = node.borrow_mut();
                    node.top = top;
                    node.visible = node.attached;
                }
            }),
        });

        let mut added = None;
        editor.change_view_zones(&mut |accessor: &mut dyn ViewZoneAccessor| {
            if let Some(zone) = zone.take() {
                added = Some(accessor.add_zone(zone));
            }
        });
        self.zone = added.map(|id| (id, height));
    }

    fn remove_zone(&mut self, editor: &mut dyn DiffEditor) {
        if let Some((id, _)) = self.zone.take() {
            editor.change_view_zones(&mut |accessor: &mut dyn ViewZoneAccessor| {
                accessor.remove_zone(id)
            });
        }
    }
}
