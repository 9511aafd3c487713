//! Project instance state.
//!
//! An instance represents one conversation in a specific project directory.
//! It owns what outlives a single turn: the configuration, the tool
//! dispatcher, the virtual file system overlay and the todo list. Each turn
//! gets a fresh [`AgentContext`] built from it.
//!
//! # Example
//!
//! ```ignore
//! use sandcode_core::Instance;
//!
//! let instance = Instance::load("/path/to/project").await?;
//! let ctx = instance.context(events_tx, consent);
//! let mut turn = Turn::new(instance.dispatcher(), Arc::new(ctx));
//! ```

use crate::config::Config;
use crate::error::CoreResult;
use sandcode_tools::collaborator::CollaboratorClient;
use sandcode_tools::consent::ConsentGate;
use sandcode_tools::todo::Todo;
use sandcode_tools::vfs::AsyncVirtualFileSystem;
use sandcode_tools::{AgentContext, AgentEvent, ConsentHandler, Dispatcher, ToolRegistry};
use sandcode_util::Identifier;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// State for one conversation in a project directory.
pub struct Instance {
    root: PathBuf,
    project_id: String,
    conversation_id: String,
    config: Config,
    config_sources: Vec<PathBuf>,
    dispatcher: Arc<Dispatcher>,
    vfs: Arc<AsyncVirtualFileSystem>,
    collaborator: Option<Arc<CollaboratorClient>>,
    todos: RwLock<Vec<Todo>>,
}

impl Instance {
    /// Load configuration for `root` and build an instance from it.
    pub async fn load(root: impl AsRef<Path>) -> CoreResult<Self> {
        let root = root.as_ref();
        let (config, sources) = Config::load(Some(root)).await?;
        Self::from_config(root, config, sources)
    }

    /// Build an instance from an already loaded configuration.
    pub fn from_config(root: impl AsRef<Path>, config: Config, config_sources: Vec<PathBuf>) -> CoreResult<Self> {
        let root = root.as_ref().to_path_buf();

        let mut registry = ToolRegistry::with_builtins()?;
        if let Some(tools) = &config.tools {
            for (name, enabled) in tools {
                if registry.get(name).is_none() {
                    warn!(tool = %name, "Ignoring config for unknown tool");
                    continue;
                }
                registry.set_enabled(name, *enabled);
            }
        }

        let gate = ConsentGate::new(config.permission_rules());
        let dispatcher = Dispatcher::new(Arc::new(registry), gate, config.tool_mode());

        let collaborator = config
            .collaborator
            .as_ref()
            .and_then(|c| c.base_url.as_ref().map(|url| (c, url)))
            .map(|(c, url)| {
                let mut client = CollaboratorClient::new(url.as_str(), c.token.clone());
                if let Some(secs) = c.timeout_secs {
                    client = client.with_timeout(Duration::from_secs(secs));
                }
                Arc::new(client)
            });

        let project_id = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string());
        let conversation_id = Identifier::conversation();

        info!(
            root = %root.display(),
            conversation_id = %conversation_id,
            mode = ?dispatcher.mode(),
            "Created instance"
        );

        Ok(Self {
            vfs: Arc::new(AsyncVirtualFileSystem::new(&root)),
            root,
            project_id,
            conversation_id,
            config,
            config_sources,
            dispatcher: Arc::new(dispatcher),
            collaborator,
            todos: RwLock::new(Vec::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Config files that contributed to this instance.
    pub fn config_sources(&self) -> &[PathBuf] {
        &self.config_sources
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn vfs(&self) -> Arc<AsyncVirtualFileSystem> {
        self.vfs.clone()
    }

    pub fn todos(&self) -> Vec<Todo> {
        self.todos
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Build the context for a new turn.
    pub fn context(
        &self,
        events: Option<mpsc::UnboundedSender<AgentEvent>>,
        consent: Arc<dyn ConsentHandler>,
    ) -> AgentContext {
        let mut builder = AgentContext::builder(&self.root)
            .project_id(&self.project_id)
            .conversation_id(&self.conversation_id)
            .vfs(self.vfs.clone())
            .search(self.config.search_settings())
            .shared_module_prefixes(self.config.shared_module_prefixes())
            .todos(self.todos())
            .consent(consent);
        if let Some(tx) = events {
            builder = builder.events(tx);
        }
        if let Some(client) = &self.collaborator {
            builder = builder.collaborator(client.clone());
        }
        if let Some(id) = self.config.database_id() {
            builder = builder.database_id(id);
        }
        if let Some(settings) = self.config.type_check_settings() {
            builder = builder.type_check(settings);
        }
        builder.build()
    }

    /// Keep the state a finished turn produced for the next one.
    pub fn finish_turn(&self, ctx: &AgentContext) {
        *self.todos.write().unwrap_or_else(|e| e.into_inner()) = ctx.todos();
        if ctx.shared_modules_changed() {
            info!(conversation_id = %self.conversation_id, "Turn changed shared modules");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandcode_tools::consent::AutoApprove;
    use sandcode_tools::todo::TodoStatus;
    use sandcode_tools::ToolMode;

    fn active_ids(instance: &Instance) -> Vec<String> {
        let ctx = instance.context(None, Arc::new(AutoApprove));
        instance
            .dispatcher()
            .definitions(&ctx)
            .iter()
            .filter_map(|d| d["name"].as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_tool_toggles_and_mode() {
        let config = Config::parse_jsonc(
            r#"{"read_only": true, "tools": {"grep": false, "no_such_tool": true}}"#,
            "test",
        )
        .unwrap();
        let instance = Instance::from_config("/tmp/project", config, Vec::new()).unwrap();
        assert_eq!(instance.dispatcher().mode(), ToolMode::ReadOnly);
        assert_eq!(active_ids(&instance), vec!["read_file", "list_files", "update_todos"]);
    }

    #[test]
    fn test_configured_collaborators_enable_tools() {
        let config = Config::parse_jsonc(
            r#"{
                "collaborator": {"base_url": "http://localhost:9", "token": "t"},
                "database": {"id": "db_1"},
                "type_check": {"command": ["tsc"]}
            }"#,
            "test",
        )
        .unwrap();
        let instance = Instance::from_config("/tmp/project", config, Vec::new()).unwrap();
        let ids = active_ids(&instance);
        for id in ["code_search", "run_type_checks", "get_database_schema", "execute_sql"] {
            assert!(ids.contains(&id.to_string()), "{id} should be active");
        }
        assert_eq!(ids.len(), 12);
    }

    #[test]
    fn test_todos_carry_across_turns() {
        let instance = Instance::from_config("/tmp/project", Config::default(), Vec::new()).unwrap();
        let ctx = instance.context(None, Arc::new(AutoApprove));
        ctx.set_todos(vec![Todo::new("1", "Write tests", TodoStatus::InProgress)]);
        instance.finish_turn(&ctx);

        let next = instance.context(None, Arc::new(AutoApprove));
        assert_eq!(next.todos().len(), 1);
        assert_eq!(next.conversation_id, ctx.conversation_id);
        assert_ne!(next.request_id, ctx.request_id);
    }

    #[tokio::test]
    async fn test_overlay_is_shared_across_turns() {
        let instance = Instance::from_config("/tmp/project", Config::default(), Vec::new()).unwrap();
        let first = instance.context(None, Arc::new(AutoApprove));
        first.vfs.write_file("a.ts", "x").await;

        let second = instance.context(None, Arc::new(AutoApprove));
        assert_eq!(second.vfs.read_file("a.ts").await.as_deref(), Some("x"));
    }
}
