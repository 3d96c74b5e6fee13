//! Editor extensions contributed by plugins.
//!
//! The runtime keeps an insertion-ordered list of opaque extension objects
//! and pushes the full list to a single bound reconfigure callback whenever
//! it changes. Reconfiguration is synchronous and not debounced.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::Disposer;

/// Callback that receives the full active extension list.
pub type ReconfigureFn<E> = Arc<dyn Fn(&[E]) + Send + Sync>;

/// Current editor selection, as reported by the host editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorSelection {
    /// Selection start offset.
    pub from: usize,
    /// Selection end offset.
    pub to: usize,
    /// Selected text.
    pub text: String,
}

#[derive(Clone)]
struct ExtensionRecord<E> {
    key: String,
    plugin_id: String,
    extension: E,
}

struct Binding<E> {
    token: u64,
    callback: ReconfigureFn<E>,
}

struct EditorState<E> {
    records: Vec<ExtensionRecord<E>>,
    binding: Option<Binding<E>>,
    bind_seq: u64,
    selection: Option<EditorSelection>,
}

/// Registry of editor extensions.
pub struct EditorRuntime<E> {
    state: Arc<Mutex<EditorState<E>>>,
}

impl<E> Clone for EditorRuntime<E> {
    fn clone(&self) -> Self {
        Self { state: Arc::clone(&self.state) }
    }
}

impl<E> fmt::Debug for EditorRuntime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EditorRuntime")
            .field("extensions", &state.records.len())
            .field("bound", &state.binding.is_some())
            .finish()
    }
}

impl<E> Default for EditorRuntime<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EditorRuntime<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty runtime with no bound callback.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EditorState {
                records: Vec::new(),
                binding: None,
                bind_seq: 0,
                selection: None,
            })),
        }
    }

    /// Add an extension for a plugin and reconfigure immediately.
    pub fn register_extension(&self, plugin_id: &str, extension: E) -> Disposer {
        let key = format!(
            "{plugin_id}:{}:{}",
            Utc::now().timestamp_millis(),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        self.state.lock().records.push(ExtensionRecord {
            key: key.clone(),
            plugin_id: plugin_id.to_string(),
            extension,
        });
        debug!(plugin_id, key = %key, "registered editor extension");
        self.reconfigure();

        let weak = Arc::downgrade(&self.state);
        Disposer::new(move || {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let runtime = Self { state };
            let removed = {
                let mut state = runtime.state.lock();
                let before = state.records.len();
                state.records.retain(|record| record.key != key);
                before != state.records.len()
            };
            if removed {
                runtime.reconfigure();
            }
        })
    }

    /// Bind the reconfigure callback, replacing any previous one.
    ///
    /// The callback is invoked immediately with the current list. The
    /// returned disposer unbinds only if this callback is still the bound
    /// one, so a stale unbind cannot clear a newer binding.
    pub fn bind_reconfigure(&self, callback: impl Fn(&[E]) + Send + Sync + 'static) -> Disposer {
        let callback: ReconfigureFn<E> = Arc::new(callback);
        let token = {
            let mut state = self.state.lock();
            state.bind_seq += 1;
            let token = state.bind_seq;
            state.binding = Some(Binding { token, callback });
            token
        };
        self.reconfigure();

        let weak = Arc::downgrade(&self.state);
        Disposer::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock();
                if state.binding.as_ref().is_some_and(|binding| binding.token == token) {
                    state.binding = None;
                }
            }
        })
    }

    /// Whether a reconfigure callback is bound.
    pub fn is_bound(&self) -> bool {
        self.state.lock().binding.is_some()
    }

    /// Remove every extension a plugin registered and reconfigure once.
    pub fn clear_plugin(&self, plugin_id: &str) {
        let removed = {
            let mut state = self.state.lock();
            let before = state.records.len();
            state.records.retain(|record| record.plugin_id != plugin_id);
            before - state.records.len()
        };
        debug!(plugin_id, removed, "cleared plugin editor extensions");
        self.reconfigure();
    }

    /// Active extensions in registration order.
    pub fn extensions(&self) -> Vec<E> {
        self.state.lock().records.iter().map(|record| record.extension.clone()).collect()
    }

    /// Extensions owned by a plugin.
    pub fn plugin_extensions(&self, plugin_id: &str) -> Vec<E> {
        self.state
            .lock()
            .records
            .iter()
            .filter(|record| record.plugin_id == plugin_id)
            .map(|record| record.extension.clone())
            .collect()
    }

    /// Number of active extensions.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Whether no extensions are active.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record the host editor's current selection.
    pub fn set_selection(&self, selection: Option<EditorSelection>) {
        self.state.lock().selection = selection;
    }

    /// Last selection reported by the host editor.
    pub fn selection(&self) -> Option<EditorSelection> {
        self.state.lock().selection.clone()
    }

    fn reconfigure(&self) {
        let (callback, extensions) = {
            let state = self.state.lock();
            let Some(binding) = state.binding.as_ref() else {
                return;
            };
            let extensions: Vec<E> =
                state.records.iter().map(|record| record.extension.clone()).collect();
            (Arc::clone(&binding.callback), extensions)
        };
        callback(&extensions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<Vec<&'static str>>>>, impl Fn(&[&'static str]) + Send + Sync) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        (calls, move |extensions: &[&'static str]| sink.lock().push(extensions.to_vec()))
    }

    #[test]
    fn test_bind_invokes_immediately() {
        let editor = EditorRuntime::new();
        editor.register_extension("a", "vim");

        let (calls, callback) = recorder();
        editor.bind_reconfigure(callback);

        assert_eq!(*calls.lock(), vec![vec!["vim"]]);
    }

    #[test]
    fn test_register_triggers_reconfigure() {
        let editor = EditorRuntime::new();
        let (calls, callback) = recorder();
        editor.bind_reconfigure(callback);

        editor.register_extension("a", "one");
        editor.register_extension("b", "two");

        let calls = calls.lock();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2], vec!["one", "two"]);
    }

    #[test]
    fn test_dispose_reconfigures_once() {
        let editor = EditorRuntime::new();
        let (calls, callback) = recorder();
        editor.bind_reconfigure(callback);

        let dispose = editor.register_extension("a", "one");
        dispose.dispose();
        dispose.dispose();

        let calls = calls.lock();
        assert_eq!(calls.len(), 3);
        assert!(calls[2].is_empty());
        assert!(editor.is_empty());
    }

    #[test]
    fn test_unbind_stops_notifications() {
        let editor = EditorRuntime::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let unbind = editor.bind_reconfigure(move |_: &[&'static str]| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let dispose = editor.register_extension("a", "one");
        assert_eq!(count.load(Ordering::SeqCst), 2);

        unbind.dispose();
        dispose.dispose();
        editor.register_extension("a", "two");
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(!editor.is_bound());
    }

    #[test]
    fn test_stale_unbind_keeps_newer_binding() {
        let editor = EditorRuntime::new();
        let (first_calls, first) = recorder();
        let (second_calls, second) = recorder();

        let stale_unbind = editor.bind_reconfigure(first);
        let _current = editor.bind_reconfigure(second);
        stale_unbind.dispose();

        assert!(editor.is_bound());
        editor.register_extension("a", "one");
        assert_eq!(first_calls.lock().len(), 1);
        assert_eq!(second_calls.lock().len(), 2);
    }

    #[test]
    fn test_clear_plugin_removes_all_and_reconfigures_once() {
        let editor = EditorRuntime::new();
        editor.register_extension("a", "a1");
        editor.register_extension("b", "b1");
        editor.register_extension("a", "a2");

        let (calls, callback) = recorder();
        editor.bind_reconfigure(callback);
        editor.clear_plugin("a");

        let calls = calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], vec!["b1"]);
        assert!(editor.plugin_extensions("a").is_empty());
    }

    #[test]
    fn test_callback_may_reenter_runtime() {
        let editor: EditorRuntime<&'static str> = EditorRuntime::new();
        let inner = editor.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        editor.bind_reconfigure(move |_| {
            counter.store(inner.len(), Ordering::SeqCst);
        });

        editor.register_extension("a", "one");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_selection_tracking() {
        let editor: EditorRuntime<()> = EditorRuntime::new();
        assert!(editor.selection().is_none());

        let selection = EditorSelection { from: 2, to: 7, text: "hello".to_string() };
        editor.set_selection(Some(selection.clone()));
        assert_eq!(editor.selection(), Some(selection));

        editor.set_selection(None);
        assert!(editor.selection().is_none());
    }
}
