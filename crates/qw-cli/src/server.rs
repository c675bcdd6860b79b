use std::sync::Arc;

use qw_core::Embedding;
use qw_store::{AppliedWrite, PatternStore, StoreError};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;

const DEFAULT_TOP_K: usize = 10;

#[derive(Clone)]
pub struct QwServer {
    store: Arc<PatternStore>,
    tool_router: ToolRouter<Self>,
}

impl QwServer {
    pub fn new(store: Arc<PatternStore>) -> Self {
        Self {
            store,
            tool_router: Self::tool_router(),
        }
    }

    /// Persist after a mutation. The mutation already happened, so a failure
    /// is reported next to the result rather than replacing it.
    fn persist_status(&self) -> serde_json::Value {
        match self.store.persist() {
            Ok(()) => serde_json::json!({ "persisted": true }),
            Err(e) => {
                tracing::error!("failed to persist after write: {e}");
                serde_json::json!({ "persisted": false, "persistence_error": e.to_string() })
            }
        }
    }
}

/// Result of a write, or what it applied in memory if only the save failed.
fn applied_write(result: qw_store::Result<impl Into<AppliedWrite>>) -> Result<AppliedWrite, McpError> {
    match result {
        Ok(done) => Ok(done.into()),
        Err(StoreError::NotDurable { applied, source }) => {
            tracing::error!("write applied but not persisted: {source}");
            Ok(*applied)
        }
        Err(e) => Err(store_error(e)),
    }
}

fn embedding_param(values: Vec<f64>) -> Result<Embedding, McpError> {
    Embedding::new(values).map_err(|e| McpError::invalid_params(e.to_string(), None))
}

fn store_error(e: StoreError) -> McpError {
    match e {
        StoreError::InvalidArgument(_) | StoreError::Wave(_) => {
            McpError::invalid_params(e.to_string(), None)
        }
        other => McpError::internal_error(other.to_string(), None),
    }
}

fn json_result(value: &serde_json::Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(value).unwrap_or_default(),
    )])
}

// --- Tool parameter types ---

#[derive(Debug, Deserialize, JsonSchema)]
struct IngestRequest {
    /// Embedding vector produced by an external embedding model
    embedding: Vec<f64>,
    /// Provenance identifier for the content the embedding came from
    source_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchRequest {
    /// Query embedding vector
    embedding: Vec<f64>,
    /// Maximum number of results (default 10)
    top_k: Option<usize>,
    /// Minimum resonance score in [0, 1] (default 0)
    min_score: Option<f64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ImportRequest {
    /// Snapshot JSON: either {version, exportedAt, patterns} or a bare array of pattern records
    state: serde_json::Value,
}

#[tool_router]
impl QwServer {
    #[tool(
        description = "Store an embedding as a wave pattern. If it resonates with an existing pattern at or above the absorption threshold it is fused into that pattern (same id, depth + 1); otherwise a new pattern is created."
    )]
    async fn qw_ingest(
        &self,
        Parameters(req): Parameters<IngestRequest>,
    ) -> Result<CallToolResult, McpError> {
        let embedding = embedding_param(req.embedding)?;
        let applied = applied_write(self.store.ingest(&embedding, &req.source_id))?;

        let mut result = serde_json::to_value(&applied)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        result["durability"] = self.persist_status();
        Ok(json_result(&result))
    }

    #[tool(
        description = "Find stored patterns that resonate with a query embedding. Results are ordered by score (descending) and include each pattern's depth and provenance sources."
    )]
    async fn qw_search(
        &self,
        Parameters(req): Parameters<SearchRequest>,
    ) -> Result<CallToolResult, McpError> {
        let embedding = embedding_param(req.embedding)?;
        let hits = self
            .store
            .search(
                &embedding,
                req.top_k.unwrap_or(DEFAULT_TOP_K),
                req.min_score.unwrap_or(0.0),
            )
            .map_err(store_error)?;

        Ok(json_result(&serde_json::json!({
            "count": hits.len(),
            "results": hits,
        })))
    }

    #[tool(
        description = "Get pattern store statistics: pattern counts (active, dormant, fused), maximum depth, backend and whether there are unsaved changes."
    )]
    async fn qw_stats(&self) -> Result<CallToolResult, McpError> {
        let stats = serde_json::to_value(self.store.stats())
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(json_result(&stats))
    }

    #[tool(description = "Export every stored pattern as a versioned JSON snapshot.")]
    async fn qw_export(&self) -> Result<CallToolResult, McpError> {
        let json = self.store.export_json().map_err(store_error)?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(
        description = "Replace the store contents with a JSON snapshot. Records that violate a pattern invariant are rejected individually and their ids returned."
    )]
    async fn qw_import(
        &self,
        Parameters(req): Parameters<ImportRequest>,
    ) -> Result<CallToolResult, McpError> {
        let json_str = serde_json::to_string(&req.state)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let applied = applied_write(self.store.import_json(&json_str))?;

        let mut result = serde_json::to_value(&applied)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        result["durability"] = self.persist_status();
        Ok(json_result(&result))
    }
}

#[tool_handler]
impl ServerHandler for QwServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Quaternion wave-pattern knowledge store. Content enters as embedding vectors \
                 produced by your embedding model; the store never sees raw text.\n\n\
                 - qw_ingest: store an embedding with a source id. Near-duplicates fuse into an \
                   existing pattern instead of creating a new one.\n\
                 - qw_search: rank stored patterns against a query embedding. Scores are in [0, 1] \
                   and are not symmetric: the stored pattern is always the first operand.\n\
                 - qw_stats, qw_export, qw_import: inspect, back up and restore the store."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
