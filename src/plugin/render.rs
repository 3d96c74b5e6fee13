//! Markdown post-processors, code block renderers and reading view hooks.
//!
//! [`RenderRuntime::apply`] is a single pass: code fences are replaced by
//! their language renderer first, then every post-processor runs in
//! registration order. A failing plugin never breaks the document; its
//! stage falls back to the unmodified input.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use super::{Disposer, PluginError};

static FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<pre><code(?: class="language-([^"]+)")?>(.*?)</code></pre>"#)
        .expect("valid code fence regex")
});

/// A code fence handed to a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBlock<'a> {
    /// Lower-cased language tag (empty for plain fences).
    pub language: &'a str,
    /// Escaped code inside the fence.
    pub code: &'a str,
    /// The complete original fence markup.
    pub html: &'a str,
}

/// A mounted reading view handed to reading view hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingView {
    /// Host identifier of the view.
    pub view_id: String,
    /// Rendered HTML shown in the view.
    pub html: String,
}

impl ReadingView {
    /// Describe a view.
    pub fn new(view_id: impl Into<String>, html: impl Into<String>) -> Self {
        Self { view_id: view_id.into(), html: html.into() }
    }
}

/// Markdown post-processor: `html -> html`.
pub type PostProcessorFn = Arc<dyn Fn(&str) -> anyhow::Result<String> + Send + Sync>;

/// Code block renderer for one language.
pub type CodeBlockRenderFn = Arc<dyn Fn(&CodeBlock<'_>) -> anyhow::Result<String> + Send + Sync>;

/// Cleanup returned by a reading view hook.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Hook run when a reading view mounts.
pub type ReadingViewHook = Arc<dyn Fn(&ReadingView) -> Option<Cleanup> + Send + Sync>;

struct ProcessorRecord {
    registration: u64,
    plugin_id: String,
    id: String,
    run: PostProcessorFn,
}

struct RendererRecord {
    registration: u64,
    plugin_id: String,
    id: String,
    language: String,
    run: CodeBlockRenderFn,
}

struct HookRecord {
    registration: u64,
    plugin_id: String,
    id: String,
    run: ReadingViewHook,
}

struct Mount {
    id: u64,
    cleanups: Vec<(String, Cleanup)>,
}

#[derive(Default)]
struct RenderState {
    seq: u64,
    processors: Vec<ProcessorRecord>,
    renderers: Vec<RendererRecord>,
    hooks: Vec<HookRecord>,
    mounts: Vec<Mount>,
}

/// Registry of rendering contributions.
#[derive(Clone, Default)]
pub struct RenderRuntime {
    state: Arc<Mutex<RenderState>>,
}

impl fmt::Debug for RenderRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RenderRuntime")
            .field("processors", &state.processors.len())
            .field("renderers", &state.renderers.len())
            .field("reading_view_hooks", &state.hooks.len())
            .finish()
    }
}

impl RenderRuntime {
    /// Create an empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a post-processor under `plugin_id:id`.
    ///
    /// Re-registering the same key replaces the processor in place.
    pub fn register_markdown_post_processor(
        &self,
        plugin_id: &str,
        id: &str,
        run: impl Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> Disposer {
        let run: PostProcessorFn = Arc::new(run);
        let registration = {
            let mut state = self.state.lock();
            state.seq += 1;
            let record = ProcessorRecord {
                registration: state.seq,
                plugin_id: plugin_id.to_string(),
                id: id.to_string(),
                run,
            };
            upsert(&mut state.processors, record)
        };
        debug!(plugin_id, id, "registered markdown post-processor");

        let weak = Arc::downgrade(&self.state);
        Disposer::new(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().processors.retain(|r| r.registration != registration);
            }
        })
    }

    /// Register a renderer for code fences tagged with `language`.
    ///
    /// The language is matched case-insensitively; when several renderers
    /// claim a language the first registered one wins.
    pub fn register_code_block_renderer(
        &self,
        plugin_id: &str,
        id: &str,
        language: &str,
        render: impl Fn(&CodeBlock<'_>) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> Disposer {
        let run: CodeBlockRenderFn = Arc::new(render);
        let language = language.trim().to_lowercase();
        let registration = {
            let mut state = self.state.lock();
            state.seq += 1;
            let record = RendererRecord {
                registration: state.seq,
                plugin_id: plugin_id.to_string(),
                id: id.to_string(),
                language: language.clone(),
                run,
            };
            upsert(&mut state.renderers, record)
        };
        debug!(plugin_id, id, language = %language, "registered code block renderer");

        let weak = Arc::downgrade(&self.state);
        Disposer::new(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().renderers.retain(|r| r.registration != registration);
            }
        })
    }

    /// Register a hook run whenever a reading view mounts.
    pub fn register_reading_view_post_processor(
        &self,
        plugin_id: &str,
        id: &str,
        hook: impl Fn(&ReadingView) -> Option<Cleanup> + Send + Sync + 'static,
    ) -> Disposer {
        let run: ReadingViewHook = Arc::new(hook);
        let registration = {
            let mut state = self.state.lock();
            state.seq += 1;
            let record = HookRecord {
                registration: state.seq,
                plugin_id: plugin_id.to_string(),
                id: id.to_string(),
                run,
            };
            upsert(&mut state.hooks, record)
        };

        let weak = Arc::downgrade(&self.state);
        Disposer::new(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().hooks.retain(|r| r.registration != registration);
            }
        })
    }

    /// Run every reading view hook for a freshly mounted view.
    ///
    /// The returned disposer unmounts the view, running the cleanups the
    /// hooks handed back.
    pub fn mount_reading_view(&self, view: &ReadingView) -> Disposer {
        let hooks: Vec<(String, String, ReadingViewHook)> = {
            let state = self.state.lock();
            state.hooks.iter().map(|h| (h.plugin_id.clone(), h.id.clone(), Arc::clone(&h.run))).collect()
        };

        let mut cleanups = Vec::new();
        for (plugin_id, id, hook) in hooks {
            if let Some(Some(cleanup)) = run_guarded(&plugin_id, &id, || Ok(hook(view))) {
                cleanups.push((plugin_id, cleanup));
            }
        }

        let mount_id = {
            let mut state = self.state.lock();
            state.seq += 1;
            let mount_id = state.seq;
            state.mounts.push(Mount { id: mount_id, cleanups });
            mount_id
        };
        debug!(view_id = %view.view_id, mount_id, "mounted reading view");

        let weak = Arc::downgrade(&self.state);
        Disposer::new(move || {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let mount = {
                let mut state = state.lock();
                let position = state.mounts.iter().position(|m| m.id == mount_id);
                position.map(|index| state.mounts.remove(index))
            };
            if let Some(mount) = mount {
                for (plugin_id, cleanup) in mount.cleanups {
                    run_guarded(&plugin_id, "reading-view-cleanup", || {
                        cleanup();
                        Ok(())
                    });
                }
            }
        })
    }

    /// Transform rendered markdown HTML through every registered plugin.
    pub fn apply(&self, html: &str) -> String {
        let (renderers, processors) = {
            let state = self.state.lock();
            let renderers: Vec<(String, String, String, CodeBlockRenderFn)> = state
                .renderers
                .iter()
                .map(|r| (r.plugin_id.clone(), r.id.clone(), r.language.clone(), Arc::clone(&r.run)))
                .collect();
            let processors: Vec<(String, String, PostProcessorFn)> = state
                .processors
                .iter()
                .map(|p| (p.plugin_id.clone(), p.id.clone(), Arc::clone(&p.run)))
                .collect();
            (renderers, processors)
        };

        let mut next = if renderers.is_empty() {
            html.to_string()
        } else {
            FENCE_RE
                .replace_all(html, |caps: &Captures<'_>| {
                    let full = &caps[0];
                    let language = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
                    let Some((plugin_id, id, _, render)) =
                        renderers.iter().find(|(_, _, lang, _)| *lang == language)
                    else {
                        return full.to_string();
                    };
                    let block = CodeBlock {
                        language: &language,
                        code: caps.get(2).map_or("", |m| m.as_str()),
                        html: full,
                    };
                    run_guarded(plugin_id, id, || render(&block)).unwrap_or_else(|| full.to_string())
                })
                .into_owned()
        };

        for (plugin_id, id, processor) in processors {
            if let Some(output) = run_guarded(&plugin_id, &id, || processor(&next)) {
                next = output;
            }
        }

        next
    }

    /// Remove every processor, renderer and hook a plugin registered.
    ///
    /// Cleanups the plugin's hooks left on mounted views run immediately and
    /// are not run again when the view unmounts.
    pub fn clear_plugin(&self, plugin_id: &str) {
        let cleanups: Vec<Cleanup> = {
            let mut state = self.state.lock();
            state.processors.retain(|r| r.plugin_id != plugin_id);
            state.renderers.retain(|r| r.plugin_id != plugin_id);
            state.hooks.retain(|r| r.plugin_id != plugin_id);

            let mut cleanups = Vec::new();
            for mount in &mut state.mounts {
                let (owned, kept): (Vec<_>, Vec<_>) =
                    mount.cleanups.drain(..).partition(|(owner, _)| owner == plugin_id);
                mount.cleanups = kept;
                cleanups.extend(owned.into_iter().map(|(_, cleanup)| cleanup));
            }
            cleanups
        };

        for cleanup in cleanups {
            run_guarded(plugin_id, "reading-view-cleanup", || {
                cleanup();
                Ok(())
            });
        }
        debug!(plugin_id, "cleared plugin renderers");
    }

    /// Number of post-processors.
    pub fn processor_count(&self) -> usize {
        self.state.lock().processors.len()
    }

    /// Number of code block renderers.
    pub fn renderer_count(&self) -> usize {
        self.state.lock().renderers.len()
    }

    /// Number of reading view hooks.
    pub fn reading_view_hook_count(&self) -> usize {
        self.state.lock().hooks.len()
    }

    /// Whether a plugin still owns any rendering contribution.
    pub fn has_plugin(&self, plugin_id: &str) -> bool {
        let state = self.state.lock();
        state.processors.iter().any(|r| r.plugin_id == plugin_id)
            || state.renderers.iter().any(|r| r.plugin_id == plugin_id)
            || state.hooks.iter().any(|r| r.plugin_id == plugin_id)
            || state.mounts.iter().any(|m| m.cleanups.iter().any(|(owner, _)| owner == plugin_id))
    }
}

/// Insert a record or replace the one with the same key in place.
fn upsert<T: Registered>(records: &mut Vec<T>, record: T) -> u64 {
    let registration = record.registration();
    match records.iter().position(|existing| existing.key() == record.key()) {
        Some(index) => records[index] = record,
        None => records.push(record),
    }
    registration
}

trait Registered {
    fn registration(&self) -> u64;
    fn key(&self) -> (&str, &str);
}

macro_rules! impl_registered {
    ($($record:ty),*) => {
        $(impl Registered for $record {
            fn registration(&self) -> u64 {
                self.registration
            }

            fn key(&self) -> (&str, &str) {
                (&self.plugin_id, &self.id)
            }
        })*
    };
}

impl_registered!(ProcessorRecord, RendererRecord, HookRecord);

/// Run plugin code, turning errors and panics into a logged `None`.
fn run_guarded<T>(
    plugin_id: &str,
    id: &str,
    f: impl FnOnce() -> anyhow::Result<T>,
) -> Option<T> {
    let message = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => return Some(value),
        Ok(Err(err)) => format!("{err:#}"),
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string()),
    };

    let err = PluginError::Render {
        plugin_id: plugin_id.to_string(),
        id: id.to_string(),
        message,
    };
    warn!(plugin_id, id, error = %err, "plugin render failure suppressed");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const JS_FENCE: &str = r#"<pre><code class="language-js">const a=1;</code></pre>"#;

    #[test]
    fn test_post_processor_applies() {
        let render = RenderRuntime::new();
        let cleanup = render.register_markdown_post_processor("p1", "mark", |html| {
            Ok(html.replace("<p>", r#"<p data-mark="1">"#))
        });

        assert!(render.apply("<p>hello</p>").contains(r#"data-mark="1""#));

        cleanup.dispose();
        assert_eq!(render.apply("<p>hello</p>"), "<p>hello</p>");
    }

    #[test]
    fn test_code_block_renderer_by_language() {
        let render = RenderRuntime::new();
        render.register_code_block_renderer("p1", "js", "JS", |block| {
            Ok(format!(r#"<div class="js">{}</div>"#, block.code))
        });

        let out = render.apply(JS_FENCE);
        assert_eq!(out, r#"<div class="js">const a=1;</div>"#);
    }

    #[test]
    fn test_renderer_language_matched_case_insensitively() {
        let render = RenderRuntime::new();
        render.register_code_block_renderer("p1", "mermaid", "mermaid", |block| {
            assert_eq!(block.language, "mermaid");
            Ok("<svg/>".to_string())
        });

        let out = render.apply(r#"<pre><code class="language-Mermaid">graph</code></pre>"#);
        assert_eq!(out, "<svg/>");
    }

    #[test]
    fn test_unmatched_language_passes_through() {
        let render = RenderRuntime::new();
        render.register_code_block_renderer("p1", "py", "python", |_| Ok("X".to_string()));

        assert_eq!(render.apply(JS_FENCE), JS_FENCE);
        assert_eq!(render.apply("<pre><code>plain</code></pre>"), "<pre><code>plain</code></pre>");
    }

    #[test]
    fn test_failing_renderer_keeps_fence() {
        let render = RenderRuntime::new();
        render.register_code_block_renderer("p1", "js", "js", |_| anyhow::bail!("broken"));

        let html = format!("<p>a</p>{JS_FENCE}<p>b</p>");
        assert_eq!(render.apply(&html), html);
    }

    #[test]
    fn test_panicking_renderer_keeps_fence() {
        let render = RenderRuntime::new();
        render.register_code_block_renderer("p1", "js", "js", |_| panic!("renderer exploded"));
        assert_eq!(render.apply(JS_FENCE), JS_FENCE);
    }

    #[test]
    fn test_first_renderer_for_language_wins() {
        let render = RenderRuntime::new();
        render.register_code_block_renderer("a", "one", "js", |_| Ok("first".to_string()));
        render.register_code_block_renderer("b", "two", "js", |_| Ok("second".to_string()));
        assert_eq!(render.apply(JS_FENCE), "first");
    }

    #[test]
    fn test_failing_processor_skipped() {
        let render = RenderRuntime::new();
        render.register_markdown_post_processor("a", "upper", |html| Ok(html.to_uppercase()));
        render.register_markdown_post_processor("b", "broken", |_| anyhow::bail!("nope"));
        render.register_markdown_post_processor("c", "panics", |_| panic!("boom"));
        render.register_markdown_post_processor("d", "wrap", |html| Ok(format!("<div>{html}</div>")));

        assert_eq!(render.apply("<p>x</p>"), "<div><P>X</P></div>");
    }

    #[test]
    fn test_renderers_run_before_processors() {
        let render = RenderRuntime::new();
        let saw_fence = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&saw_fence);
        render.register_markdown_post_processor("a", "inspect", move |html| {
            if html.contains("<pre>") {
                flag.fetch_add(1, Ordering::SeqCst);
            }
            Ok(html.to_string())
        });
        render.register_code_block_renderer("b", "js", "js", |_| Ok("<figure/>".to_string()));

        assert_eq!(render.apply(JS_FENCE), "<figure/>");
        assert_eq!(saw_fence.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reregister_replaces_in_place() {
        let render = RenderRuntime::new();
        render.register_markdown_post_processor("a", "x", |html| Ok(format!("{html}1")));
        render.register_markdown_post_processor("b", "y", |html| Ok(format!("{html}2")));
        let stale = render.register_markdown_post_processor("a", "z", |html| Ok(format!("{html}3")));
        render.register_markdown_post_processor("a", "x", |html| Ok(format!("{html}4")));

        assert_eq!(render.processor_count(), 3);
        assert_eq!(render.apply(""), "423");

        stale.dispose();
        assert_eq!(render.apply(""), "42");
    }

    #[test]
    fn test_replaced_registration_disposer_is_noop() {
        let render = RenderRuntime::new();
        let old = render.register_markdown_post_processor("a", "x", |_| Ok("old".to_string()));
        render.register_markdown_post_processor("a", "x", |_| Ok("new".to_string()));

        old.dispose();
        assert_eq!(render.apply(""), "new");
    }

    #[test]
    fn test_clear_plugin() {
        let render = RenderRuntime::new();
        render.register_markdown_post_processor("a", "x", |_| Ok("a".to_string()));
        render.register_code_block_renderer("a", "js", "js", |_| Ok("a".to_string()));
        render.register_markdown_post_processor("b", "y", |html| Ok(html.to_string()));

        render.clear_plugin("a");
        assert!(!render.has_plugin("a"));
        assert!(render.has_plugin("b"));
        assert_eq!(render.apply(JS_FENCE), JS_FENCE);
    }

    #[test]
    fn test_reading_view_lifecycle() {
        let render = RenderRuntime::new();
        let mounted = Arc::new(AtomicUsize::new(0));
        let unmounted = Arc::new(AtomicUsize::new(0));
        let (m, u) = (Arc::clone(&mounted), Arc::clone(&unmounted));
        render.register_reading_view_post_processor("p1", "rv", move |view| {
            assert_eq!(view.view_id, "note-1");
            m.fetch_add(1, Ordering::SeqCst);
            let u = Arc::clone(&u);
            Some(Box::new(move || {
                u.fetch_add(1, Ordering::SeqCst);
            }) as Cleanup)
        });

        let unmount = render.mount_reading_view(&ReadingView::new("note-1", "<p>x</p>"));
        assert_eq!(mounted.load(Ordering::SeqCst), 1);

        unmount.dispose();
        unmount.dispose();
        assert_eq!(unmounted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_plugin_runs_active_cleanups_once() {
        let render = RenderRuntime::new();
        let unmounted = Arc::new(AtomicUsize::new(0));
        let u = Arc::clone(&unmounted);
        render.register_reading_view_post_processor("p2", "rv2", move |_| {
            let u = Arc::clone(&u);
            Some(Box::new(move || {
                u.fetch_add(1, Ordering::SeqCst);
            }) as Cleanup)
        });

        let unmount = render.mount_reading_view(&ReadingView::new("v", ""));
        render.clear_plugin("p2");
        assert_eq!(unmounted.load(Ordering::SeqCst), 1);

        unmount.dispose();
        assert_eq!(unmounted.load(Ordering::SeqCst), 1);
        assert_eq!(render.reading_view_hook_count(), 0);
    }

    #[test]
    fn test_panicking_hook_does_not_block_others() {
        let render = RenderRuntime::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        render.register_reading_view_post_processor("bad", "rv", |_| panic!("hook failed"));
        render.register_reading_view_post_processor("good", "rv", move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            None
        });

        render.mount_reading_view(&ReadingView::new("v", ""));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
