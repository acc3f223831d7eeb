//! Process-wide registries for models, tools, and storage client configs
//!
//! Init-time append-only maps: writes happen at program startup, reads
//! anywhere. Guarded by `parking_lot::RwLock`.

use crate::model::ModelRef;
use crate::tool::ToolRef;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static MODELS: LazyLock<RwLock<HashMap<String, ModelRef>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

static TOOLS: LazyLock<RwLock<HashMap<String, ToolRef>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

static CLIENT_CONFIGS: LazyLock<RwLock<HashMap<String, Value>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register a model under `name`, replacing any previous entry.
pub fn register_model(name: impl Into<String>, model: ModelRef) {
    MODELS.write().insert(name.into(), model);
}

/// Look up a registered model.
pub fn model(name: &str) -> Option<ModelRef> {
    MODELS.read().get(name).cloned()
}

/// Names of all registered models.
pub fn model_names() -> Vec<String> {
    MODELS.read().keys().cloned().collect()
}

/// Register a tool under its declared name.
pub fn register_tool(tool: ToolRef) {
    TOOLS
        .write()
        .insert(tool.declaration().name.clone(), tool);
}

/// Look up a registered tool.
pub fn tool(name: &str) -> Option<ToolRef> {
    TOOLS.read().get(name).cloned()
}

/// Names of all registered tools.
pub fn tool_names() -> Vec<String> {
    TOOLS.read().keys().cloned().collect()
}

/// Register a storage client config (Redis, Postgres, ...) by instance name.
pub fn register_client_config(name: impl Into<String>, config: Value) {
    CLIENT_CONFIGS.write().insert(name.into(), config);
}

/// Look up a storage client config.
pub fn client_config(name: &str) -> Option<Value> {
    CLIENT_CONFIGS.read().get(name).cloned()
}
