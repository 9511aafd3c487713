//! Per-turn agent context.
//!
//! One [`AgentContext`] is created for each model turn and shared by every
//! tool call in that turn. Calls may run concurrently, so the state that
//! outlives a single call (the todo list and the shared-module flag) sits
//! behind synchronized cells.

use crate::collaborator::CollaboratorClient;
use crate::consent::{AutoApprove, ConsentHandler, ConsentRequest};
use crate::tag::Tag;
use crate::todo::Todo;
use crate::vfs::AsyncVirtualFileSystem;
use sandcode_util::path::relative_to_root;
use sandcode_util::Identifier;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Default prefix for modules shared between projects.
pub const DEFAULT_SHARED_MODULE_PREFIX: &str = "shared/";

/// Content attached to the conversation after a tool result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    /// Base64-encoded image data.
    Image { media_type: String, data: String },
}

/// Event sent to the downstream UI.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Transient preview; replaces any earlier preview for the same call.
    StreamTag { call_id: String, tag: Tag },
    /// Final tag for a call. Sent exactly once per call.
    CompleteTag { call_id: String, tag: Tag },
    /// Full todo list after an update.
    TodosUpdated(Vec<Todo>),
    /// Extra content to append after the tool results.
    FollowupContent(Vec<ContentPart>),
}

/// Settings for the line-search subprocess.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub ripgrep_path: PathBuf,
    pub max_results: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            ripgrep_path: PathBuf::from("rg"),
            max_results: 200,
        }
    }
}

/// Settings for the type checker run by `run_type_checks`.
#[derive(Debug, Clone)]
pub struct TypeCheckSettings {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub timeout: Duration,
}

/// Per-turn state passed into every tool invocation.
pub struct AgentContext {
    pub project_id: String,
    /// Absolute project root.
    pub root: PathBuf,
    pub conversation_id: String,
    pub request_id: String,
    pub vfs: Arc<AsyncVirtualFileSystem>,
    pub collaborator: Option<Arc<CollaboratorClient>>,
    pub database_id: Option<String>,
    pub search: SearchSettings,
    pub type_check: Option<TypeCheckSettings>,
    pub shared_module_prefixes: Vec<String>,
    todos: RwLock<Vec<Todo>>,
    shared_modules_changed: AtomicBool,
    detached: AtomicBool,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
    consent: Arc<dyn ConsentHandler>,
}

impl AgentContext {
    /// Start building a context for the given project root.
    pub fn builder(root: impl Into<PathBuf>) -> AgentContextBuilder {
        AgentContextBuilder::new(root)
    }

    /// Snapshot of the current todo list.
    pub fn todos(&self) -> Vec<Todo> {
        self.todos
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the todo list.
    pub fn set_todos(&self, todos: Vec<Todo>) {
        *self.todos.write().unwrap_or_else(|e| e.into_inner()) = todos;
    }

    /// Run `f` with exclusive access to the todo list.
    pub fn with_todos_mut<R>(&self, f: impl FnOnce(&mut Vec<Todo>) -> R) -> R {
        let mut guard = self.todos.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn shared_modules_changed(&self) -> bool {
        self.shared_modules_changed.load(Ordering::SeqCst)
    }

    /// Set the shared-module flag if `path` falls under a shared prefix.
    pub fn note_path_changed(&self, path: &Path) {
        let Some(relative) = relative_to_root(&self.root, path) else {
            return;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        let shared = self
            .shared_module_prefixes
            .iter()
            .any(|prefix| relative.starts_with(prefix.as_str()));
        if shared && !self.shared_modules_changed.swap(true, Ordering::SeqCst) {
            debug!(path = %relative, "Shared module changed");
        }
    }

    /// Stop delivering events. Work already in flight keeps running.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Publish a preview tag for a call.
    pub fn stream_tag(&self, call_id: &str, tag: Tag) {
        self.emit(AgentEvent::StreamTag {
            call_id: call_id.to_string(),
            tag,
        });
    }

    /// Publish the final tag for a call.
    pub fn complete_tag(&self, call_id: &str, tag: Tag) {
        self.emit(AgentEvent::CompleteTag {
            call_id: call_id.to_string(),
            tag,
        });
    }

    /// Push the full todo list to the UI mirror.
    pub fn publish_todos(&self, todos: Vec<Todo>) {
        self.emit(AgentEvent::TodosUpdated(todos));
    }

    /// Attach content to the conversation after the tool results.
    pub fn append_followup_content(&self, parts: Vec<ContentPart>) {
        if parts.is_empty() {
            return;
        }
        self.emit(AgentEvent::FollowupContent(parts));
    }

    /// Ask the user whether a call may run. A detached turn never consents.
    pub async fn request_consent(&self, request: &ConsentRequest) -> bool {
        if self.is_detached() {
            return false;
        }
        self.consent.request_consent(request).await
    }

    fn emit(&self, event: AgentEvent) {
        if self.is_detached() {
            debug!("Dropping event for detached turn");
            return;
        }
        if let Some(ref tx) = self.events {
            if let Err(e) = tx.send(event) {
                debug!("Failed to send agent event: {}", e);
            }
        }
    }
}

/// Builder for [`AgentContext`].
pub struct AgentContextBuilder {
    root: PathBuf,
    project_id: Option<String>,
    conversation_id: Option<String>,
    request_id: Option<String>,
    vfs: Option<Arc<AsyncVirtualFileSystem>>,
    collaborator: Option<Arc<CollaboratorClient>>,
    database_id: Option<String>,
    search: SearchSettings,
    type_check: Option<TypeCheckSettings>,
    shared_module_prefixes: Vec<String>,
    todos: Vec<Todo>,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
    consent: Option<Arc<dyn ConsentHandler>>,
}

impl AgentContextBuilder {
    fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            project_id: None,
            conversation_id: None,
            request_id: None,
            vfs: None,
            collaborator: None,
            database_id: None,
            search: SearchSettings::default(),
            type_check: None,
            shared_module_prefixes: vec![DEFAULT_SHARED_MODULE_PREFIX.to_string()],
            todos: Vec::new(),
            events: None,
            consent: None,
        }
    }

    pub fn project_id(mut self, id: impl Into<String>) -> Self {
        self.project_id = Some(id.into());
        self
    }

    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Share an existing overlay, e.g. one that spans several turns.
    pub fn vfs(mut self, vfs: Arc<AsyncVirtualFileSystem>) -> Self {
        self.vfs = Some(vfs);
        self
    }

    pub fn collaborator(mut self, client: Arc<CollaboratorClient>) -> Self {
        self.collaborator = Some(client);
        self
    }

    pub fn database_id(mut self, id: impl Into<String>) -> Self {
        self.database_id = Some(id.into());
        self
    }

    pub fn search(mut self, search: SearchSettings) -> Self {
        self.search = search;
        self
    }

    pub fn type_check(mut self, settings: TypeCheckSettings) -> Self {
        self.type_check = Some(settings);
        self
    }

    pub fn shared_module_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.shared_module_prefixes = prefixes;
        self
    }

    /// Todo list carried over from an earlier turn.
    pub fn todos(mut self, todos: Vec<Todo>) -> Self {
        self.todos = todos;
        self
    }

    pub fn events(mut self, tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn consent(mut self, handler: Arc<dyn ConsentHandler>) -> Self {
        self.consent = Some(handler);
        self
    }

    pub fn build(self) -> AgentContext {
        let vfs = self
            .vfs
            .unwrap_or_else(|| Arc::new(AsyncVirtualFileSystem::new(&self.root)));
        AgentContext {
            project_id: self.project_id.unwrap_or_default(),
            conversation_id: self
                .conversation_id
                .unwrap_or_else(Identifier::conversation),
            request_id: self
                .request_id
                .unwrap_or_else(Identifier::request),
            root: self.root,
            vfs,
            collaborator: self.collaborator,
            database_id: self.database_id,
            search: self.search,
            type_check: self.type_check,
            shared_module_prefixes: self.shared_module_prefixes,
            todos: RwLock::new(self.todos),
            shared_modules_changed: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            events: self.events,
            consent: self.consent.unwrap_or_else(|| Arc::new(AutoApprove)),
        }
    }
}
