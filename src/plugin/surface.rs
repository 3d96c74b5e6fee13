//! UI surfaces plugins can contribute to: status bar items, context menu
//! items and named shell slots.
//!
//! Every surface is keyed by `plugin_id:item_id`. Read accessors return
//! items sorted by ascending `order`, ties broken by registration order.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Disposer, PluginError, PluginResult};

/// Click handler for a status bar item.
pub type ActionFn = Arc<dyn Fn() + Send + Sync>;

/// Selection handler for a context menu item.
pub type MenuActionFn = Arc<dyn Fn(&MenuContext) + Send + Sync>;

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Which side of the status bar an item sits on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusBarAlign {
    /// Left side.
    #[default]
    Left,
    /// Right side.
    Right,
}

/// A status bar item.
#[derive(Clone)]
pub struct StatusBarItem {
    /// Owning plugin, filled in at registration.
    pub plugin_id: String,
    /// Id unique within the owning plugin.
    pub item_id: String,
    /// Label shown in the status bar.
    pub text: String,
    /// Side of the status bar.
    pub align: StatusBarAlign,
    /// Sort key, ascending.
    pub order: i32,
    /// Invoked when the item is clicked.
    pub run: Option<ActionFn>,
}

impl StatusBarItem {
    /// Create a left-aligned item with order 0.
    pub fn new(item_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            plugin_id: String::new(),
            item_id: item_id.into(),
            text: text.into(),
            align: StatusBarAlign::Left,
            order: 0,
            run: None,
        }
    }

    /// Set the side of the status bar.
    pub fn align(mut self, align: StatusBarAlign) -> Self {
        self.align = align;
        self
    }

    /// Set the sort key.
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Set the click handler.
    pub fn on_click(mut self, run: impl Fn() + Send + Sync + 'static) -> Self {
        self.run = Some(Arc::new(run));
        self
    }
}

impl fmt::Debug for StatusBarItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusBarItem")
            .field("plugin_id", &self.plugin_id)
            .field("item_id", &self.item_id)
            .field("text", &self.text)
            .field("align", &self.align)
            .field("order", &self.order)
            .field("clickable", &self.run.is_some())
            .finish()
    }
}

/// Where and on what a context menu was opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuContext {
    /// Pointer x in client coordinates.
    pub x: f64,
    /// Pointer y in client coordinates.
    pub y: f64,
    /// Lower-cased tag name of the element under the pointer.
    pub target_tag: String,
}

impl MenuContext {
    /// Create a context for a pointer position and target element.
    pub fn new(x: f64, y: f64, target_tag: impl Into<String>) -> Self {
        Self { x, y, target_tag: target_tag.into() }
    }
}

/// A context menu item.
#[derive(Clone)]
pub struct ContextMenuItem {
    /// Owning plugin, filled in at registration.
    pub plugin_id: String,
    /// Id unique within the owning plugin.
    pub item_id: String,
    /// Menu label.
    pub title: String,
    /// Sort key, ascending.
    pub order: i32,
    /// Invoked with the open context when selected.
    pub run: MenuActionFn,
}

impl ContextMenuItem {
    /// Create an item with order 0.
    pub fn new(
        item_id: impl Into<String>,
        title: impl Into<String>,
        run: impl Fn(&MenuContext) + Send + Sync + 'static,
    ) -> Self {
        Self {
            plugin_id: String::new(),
            item_id: item_id.into(),
            title: title.into(),
            order: 0,
            run: Arc::new(run),
        }
    }

    /// Set the sort key.
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl fmt::Debug for ContextMenuItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextMenuItem")
            .field("plugin_id", &self.plugin_id)
            .field("item_id", &self.item_id)
            .field("title", &self.title)
            .field("order", &self.order)
            .finish()
    }
}

/// HTML contributed to a named region of the app shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellSlot {
    /// Owning plugin, filled in at registration.
    pub plugin_id: String,
    /// Named shell region, e.g. `sidebar`.
    pub slot_id: String,
    /// Markup rendered into the region.
    pub html: String,
    /// Sort key, ascending.
    pub order: i32,
}

impl ShellSlot {
    /// Create a slot entry with order 0.
    pub fn new(slot_id: impl Into<String>, html: impl Into<String>) -> Self {
        Self { plugin_id: String::new(), slot_id: slot_id.into(), html: html.into(), order: 0 }
    }

    /// Set the sort key.
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

trait SurfaceItem: Clone {
    fn key(&self) -> (&str, &str);
    fn sort_order(&self) -> i32;
}

impl SurfaceItem for StatusBarItem {
    fn key(&self) -> (&str, &str) {
        (&self.plugin_id, &self.item_id)
    }
    fn sort_order(&self) -> i32 {
        self.order
    }
}

impl SurfaceItem for ContextMenuItem {
    fn key(&self) -> (&str, &str) {
        (&self.plugin_id, &self.item_id)
    }
    fn sort_order(&self) -> i32 {
        self.order
    }
}

impl SurfaceItem for ShellSlot {
    fn key(&self) -> (&str, &str) {
        (&self.plugin_id, &self.slot_id)
    }
    fn sort_order(&self) -> i32 {
        self.order
    }
}

struct Slotted<T> {
    seq: u64,
    item: T,
}

#[derive(Clone, Copy)]
enum Surface {
    StatusBar,
    ContextMenu,
    Shell,
}

#[derive(Default)]
struct SurfaceState {
    seq: u64,
    status_bar: Vec<Slotted<StatusBarItem>>,
    context_menu: Vec<Slotted<ContextMenuItem>>,
    shell: Vec<Slotted<ShellSlot>>,
    menu: Option<MenuContext>,
    listeners: Vec<(u64, Listener)>,
}

impl SurfaceState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn remove(&mut self, surface: Surface, seq: u64) -> bool {
        fn drop_seq<T>(items: &mut Vec<Slotted<T>>, seq: u64) -> bool {
            let before = items.len();
            items.retain(|slotted| slotted.seq != seq);
            before != items.len()
        }
        match surface {
            Surface::StatusBar => drop_seq(&mut self.status_bar, seq),
            Surface::ContextMenu => drop_seq(&mut self.context_menu, seq),
            Surface::Shell => drop_seq(&mut self.shell, seq),
        }
    }
}

/// Store backing every plugin UI surface.
#[derive(Clone, Default)]
pub struct UiSurfaceStore {
    state: Arc<Mutex<SurfaceState>>,
}

impl fmt::Debug for UiSurfaceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("UiSurfaceStore")
            .field("status_bar", &state.status_bar.len())
            .field("context_menu", &state.context_menu.len())
            .field("shell", &state.shell.len())
            .field("menu_open", &state.menu.is_some())
            .finish()
    }
}

impl UiSurfaceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a status bar item.
    pub fn register_status_bar_item(
        &self,
        plugin_id: &str,
        mut item: StatusBarItem,
    ) -> PluginResult<Disposer> {
        item.plugin_id = plugin_id.to_string();
        validate(&item, "status bar item")?;
        let seq = {
            let mut state = self.state.lock();
            let seq = state.next_seq();
            insert(&mut state.status_bar, seq, item);
            seq
        };
        Ok(self.finish_registration(Surface::StatusBar, seq))
    }

    /// Add or replace a context menu item.
    pub fn register_context_menu_item(
        &self,
        plugin_id: &str,
        mut item: ContextMenuItem,
    ) -> PluginResult<Disposer> {
        item.plugin_id = plugin_id.to_string();
        validate(&item, "context menu item")?;
        let seq = {
            let mut state = self.state.lock();
            let seq = state.next_seq();
            insert(&mut state.context_menu, seq, item);
            seq
        };
        Ok(self.finish_registration(Surface::ContextMenu, seq))
    }

    /// Add or replace a shell slot contribution.
    pub fn register_shell_slot(&self, plugin_id: &str, mut slot: ShellSlot) -> PluginResult<Disposer> {
        slot.plugin_id = plugin_id.to_string();
        validate(&slot, "shell slot")?;
        let seq = {
            let mut state = self.state.lock();
            let seq = state.next_seq();
            insert(&mut state.shell, seq, slot);
            seq
        };
        Ok(self.finish_registration(Surface::Shell, seq))
    }

    /// Status bar items in display order.
    pub fn status_bar_items(&self) -> Vec<StatusBarItem> {
        sorted(&self.state.lock().status_bar)
    }

    /// Status bar items on one side, in display order.
    pub fn status_bar_items_aligned(&self, align: StatusBarAlign) -> Vec<StatusBarItem> {
        self.status_bar_items().into_iter().filter(|item| item.align == align).collect()
    }

    /// Context menu items in display order.
    pub fn context_menu_items(&self) -> Vec<ContextMenuItem> {
        sorted(&self.state.lock().context_menu)
    }

    /// Every shell slot contribution in display order.
    pub fn all_shell_slots(&self) -> Vec<ShellSlot> {
        sorted(&self.state.lock().shell)
    }

    /// Contributions to one named slot, in display order.
    pub fn shell_slots(&self, slot_id: &str) -> Vec<ShellSlot> {
        self.all_shell_slots().into_iter().filter(|slot| slot.slot_id == slot_id).collect()
    }

    /// Invoke a status bar item's click handler.
    ///
    /// Returns `false` when the item is unknown or not clickable.
    pub fn click_status_bar_item(&self, plugin_id: &str, item_id: &str) -> bool {
        let run = {
            let state = self.state.lock();
            state
                .status_bar
                .iter()
                .find(|s| s.item.plugin_id == plugin_id && s.item.item_id == item_id)
                .and_then(|s| s.item.run.clone())
        };
        match run {
            Some(run) => {
                run();
                true
            }
            None => false,
        }
    }

    /// Open the context menu at a position.
    ///
    /// The menu only opens when at least one item is registered.
    pub fn open_context_menu(&self, mut context: MenuContext) -> bool {
        context.target_tag = context.target_tag.to_lowercase();
        {
            let mut state = self.state.lock();
            if state.context_menu.is_empty() {
                return false;
            }
            state.menu = Some(context);
        }
        self.notify();
        true
    }

    /// The open context menu, if any.
    pub fn context_menu(&self) -> Option<MenuContext> {
        self.state.lock().menu.clone()
    }

    /// Close the context menu.
    pub fn close_context_menu(&self) {
        let was_open = self.state.lock().menu.take().is_some();
        if was_open {
            self.notify();
        }
    }

    /// Run a context menu item against the open menu, then close it.
    ///
    /// Returns `false` when no menu is open or the item is unknown.
    pub fn select_context_menu_item(&self, plugin_id: &str, item_id: &str) -> bool {
        let selected = {
            let state = self.state.lock();
            let Some(context) = state.menu.clone() else {
                return false;
            };
            state
                .context_menu
                .iter()
                .find(|s| s.item.plugin_id == plugin_id && s.item.item_id == item_id)
                .map(|s| (Arc::clone(&s.item.run), context))
        };
        let Some((run, context)) = selected else {
            return false;
        };

        run(&context);
        self.close_context_menu();
        true
    }

    /// Remove every item a plugin contributed to any surface.
    pub fn clear_plugin(&self, plugin_id: &str) {
        let (removed, menu_closed) = {
            let mut state = self.state.lock();
            let before = state.status_bar.len() + state.context_menu.len() + state.shell.len();
            state.status_bar.retain(|s| s.item.plugin_id != plugin_id);
            state.context_menu.retain(|s| s.item.plugin_id != plugin_id);
            state.shell.retain(|s| s.item.plugin_id != plugin_id);
            let removed = before - (state.status_bar.len() + state.context_menu.len() + state.shell.len());

            let menu_closed = state.context_menu.is_empty() && state.menu.take().is_some();
            (removed, menu_closed)
        };
        debug!(plugin_id, removed, "cleared plugin ui items");
        if removed > 0 || menu_closed {
            self.notify();
        }
    }

    /// Whether a plugin still owns any item.
    pub fn has_plugin(&self, plugin_id: &str) -> bool {
        let state = self.state.lock();
        state.status_bar.iter().any(|s| s.item.plugin_id == plugin_id)
            || state.context_menu.iter().any(|s| s.item.plugin_id == plugin_id)
            || state.shell.iter().any(|s| s.item.plugin_id == plugin_id)
    }

    /// Call `listener` after every change to any surface.
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Disposer {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_seq();
            state.listeners.push((id, Arc::new(listener)));
            id
        };
        let weak = Arc::downgrade(&self.state);
        Disposer::new(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().listeners.retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    fn finish_registration(&self, surface: Surface, seq: u64) -> Disposer {
        self.notify();
        let weak = Arc::downgrade(&self.state);
        Disposer::new(move || {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let store = Self { state };
            let removed = store.state.lock().remove(surface, seq);
            if removed {
                store.notify();
            }
        })
    }

    fn notify(&self) {
        let listeners: Vec<Listener> =
            self.state.lock().listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            listener();
        }
    }
}

fn validate<T: SurfaceItem>(item: &T, kind: &str) -> PluginResult<()> {
    let (plugin_id, item_id) = item.key();
    if plugin_id.trim().is_empty() {
        return Err(PluginError::validation(format!("{kind} requires a plugin id")));
    }
    if item_id.trim().is_empty() {
        return Err(PluginError::validation(format!("{kind} requires an id")));
    }
    Ok(())
}

/// Replace any item with the same key, placing the new one last.
fn insert<T: SurfaceItem>(items: &mut Vec<Slotted<T>>, seq: u64, item: T) {
    items.retain(|s| s.item.key() != item.key());
    items.push(Slotted { seq, item });
}

fn sorted<T: SurfaceItem>(items: &[Slotted<T>]) -> Vec<T> {
    let mut ordered: Vec<&Slotted<T>> = items.iter().collect();
    ordered.sort_by_key(|s| (s.item.sort_order(), s.seq));
    ordered.into_iter().map(|s| s.item.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ids(items: &[StatusBarItem]) -> Vec<&str> {
        items.iter().map(|i| i.item_id.as_str()).collect()
    }

    #[test]
    fn test_status_bar_sorted_by_order_then_insertion() {
        let store = UiSurfaceStore::new();
        store.register_status_bar_item("a", StatusBarItem::new("late", "L").order(10)).unwrap();
        store.register_status_bar_item("a", StatusBarItem::new("first", "F").order(1)).unwrap();
        store.register_status_bar_item("b", StatusBarItem::new("second", "S").order(1)).unwrap();

        assert_eq!(ids(&store.status_bar_items()), vec!["first", "second", "late"]);
    }

    #[test]
    fn test_reregister_replaces_and_moves_to_end_of_ties() {
        let store = UiSurfaceStore::new();
        store.register_status_bar_item("a", StatusBarItem::new("x", "old")).unwrap();
        store.register_status_bar_item("a", StatusBarItem::new("y", "y")).unwrap();
        store.register_status_bar_item("a", StatusBarItem::new("x", "new")).unwrap();

        let items = store.status_bar_items();
        assert_eq!(ids(&items), vec!["y", "x"]);
        assert_eq!(items[1].text, "new");
    }

    #[test]
    fn test_blank_ids_rejected() {
        let store = UiSurfaceStore::new();
        let err = store.register_status_bar_item("a", StatusBarItem::new(" ", "t")).unwrap_err();
        assert!(err.is_validation());
        assert!(store.register_shell_slot("", ShellSlot::new("sidebar", "<b/>")).is_err());
        assert!(store.status_bar_items().is_empty());
    }

    #[test]
    fn test_alignment_filter() {
        let store = UiSurfaceStore::new();
        store.register_status_bar_item("a", StatusBarItem::new("l", "L")).unwrap();
        store
            .register_status_bar_item("a", StatusBarItem::new("r", "R").align(StatusBarAlign::Right))
            .unwrap();

        assert_eq!(ids(&store.status_bar_items_aligned(StatusBarAlign::Right)), vec!["r"]);
        assert_eq!(ids(&store.status_bar_items_aligned(StatusBarAlign::Left)), vec!["l"]);
    }

    #[test]
    fn test_click_status_bar_item() {
        let store = UiSurfaceStore::new();
        let clicks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&clicks);
        store
            .register_status_bar_item(
                "a",
                StatusBarItem::new("words", "12 words").on_click(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        store.register_status_bar_item("a", StatusBarItem::new("static", "-")).unwrap();

        assert!(store.click_status_bar_item("a", "words"));
        assert!(!store.click_status_bar_item("a", "static"));
        assert!(!store.click_status_bar_item("b", "words"));
        assert_eq!(clicks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_context_menu_select_runs_and_closes() {
        let store = UiSurfaceStore::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        store
            .register_context_menu_item(
                "a",
                ContextMenuItem::new("copy", "Copy", move |ctx| {
                    *sink.lock() = Some(ctx.clone());
                }),
            )
            .unwrap();

        assert!(!store.select_context_menu_item("a", "copy"));
        assert!(store.open_context_menu(MenuContext::new(10.0, 20.0, "DIV")));
        assert_eq!(store.context_menu().map(|c| c.target_tag), Some("div".to_string()));

        assert!(store.select_context_menu_item("a", "copy"));
        assert_eq!(*seen.lock(), Some(MenuContext::new(10.0, 20.0, "div")));
        assert!(store.context_menu().is_none());
    }

    #[test]
    fn test_menu_does_not_open_without_items() {
        let store = UiSurfaceStore::new();
        assert!(!store.open_context_menu(MenuContext::new(0.0, 0.0, "p")));
        assert!(store.context_menu().is_none());
    }

    #[test]
    fn test_shell_slots_filtered_by_slot() {
        let store = UiSurfaceStore::new();
        store.register_shell_slot("a", ShellSlot::new("sidebar", "<a/>").order(2)).unwrap();
        store.register_shell_slot("b", ShellSlot::new("sidebar", "<b/>").order(1)).unwrap();
        store.register_shell_slot("b", ShellSlot::new("toolbar", "<t/>")).unwrap();

        let sidebar: Vec<String> = store.shell_slots("sidebar").into_iter().map(|s| s.html).collect();
        assert_eq!(sidebar, vec!["<b/>", "<a/>"]);
        assert_eq!(store.all_shell_slots().len(), 3);
    }

    #[test]
    fn test_disposer_removes_only_its_item() {
        let store = UiSurfaceStore::new();
        let old = store.register_status_bar_item("a", StatusBarItem::new("x", "old")).unwrap();
        store.register_status_bar_item("a", StatusBarItem::new("x", "new")).unwrap();

        old.dispose();
        assert_eq!(store.status_bar_items()[0].text, "new");
    }

    #[test]
    fn test_clear_plugin_removes_all_surfaces_and_closes_menu() {
        let store = UiSurfaceStore::new();
        store.register_status_bar_item("a", StatusBarItem::new("s", "S")).unwrap();
        store.register_context_menu_item("a", ContextMenuItem::new("m", "M", |_| {})).unwrap();
        store.register_shell_slot("a", ShellSlot::new("sidebar", "<a/>")).unwrap();
        store.register_shell_slot("b", ShellSlot::new("sidebar", "<b/>")).unwrap();
        store.open_context_menu(MenuContext::new(1.0, 1.0, "span"));

        store.clear_plugin("a");
        assert!(!store.has_plugin("a"));
        assert!(store.has_plugin("b"));
        assert!(store.context_menu().is_none());
    }

    #[test]
    fn test_subscribers_notified() {
        let store = UiSurfaceStore::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let unsubscribe = store.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let dispose = store.register_shell_slot("a", ShellSlot::new("s", "x")).unwrap();
        dispose.dispose();
        dispose.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        unsubscribe.dispose();
        store.register_shell_slot("a", ShellSlot::new("s", "x")).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
