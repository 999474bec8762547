//! The provider registry — owns every launched provider and the merged
//! tool catalog.
//!
//! The catalog is built once during `initialize` and is immutable for the
//! rest of the session: repeated `definitions()` calls return identical
//! contents, and there is no dynamic provider reload.

use crate::provider::{SamplingHandler, ToolProvider};
use async_trait::async_trait;
use quill_config::ToolProviderConfig;
use quill_core::{ToolCall, ToolDefinition, ToolError, ToolExecutor, ToolOutput};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Launches and supervises the configured tool providers.
pub struct ProviderRegistry {
    providers: Vec<ToolProvider>,
    /// Merged catalog, first-registered wins.
    catalog: Vec<ToolDefinition>,
    /// Tool name → index into `providers`.
    routes: HashMap<String, usize>,
}

impl ProviderRegistry {
    /// An empty registry (no providers configured).
    pub fn empty() -> Self {
        Self {
            providers: Vec::new(),
            catalog: Vec::new(),
            routes: HashMap::new(),
        }
    }

    /// Launch every configured provider and merge their tool catalogs.
    ///
    /// An empty configuration is a valid no-op. A provider that fails to
    /// launch or handshake is logged and skipped; the remaining providers
    /// stay usable with a degraded catalog.
    pub async fn initialize(
        configs: &[ToolProviderConfig],
        sampling: Arc<dyn SamplingHandler>,
    ) -> Self {
        let mut registry = Self::empty();

        for config in configs {
            match ToolProvider::launch(config, sampling.clone()).await {
                Ok(provider) => {
                    info!(
                        provider = %provider.name(),
                        tools = provider.tools().len(),
                        "Tool provider connected"
                    );
                    registry.absorb(provider);
                }
                Err(e) => {
                    warn!(provider = %config.name, error = %e, "Skipping tool provider");
                }
            }
        }

        registry
    }

    /// Merge one provider's tools into the catalog.
    ///
    /// Duplicate tool names are dropped with a warning — the
    /// first-registered provider keeps the name.
    fn absorb(&mut self, provider: ToolProvider) {
        let index = self.providers.len();
        for tool in provider.tools() {
            match self.routes.get(&tool.name) {
                Some(&existing) => {
                    warn!(
                        tool = %tool.name,
                        kept = %self.providers[existing].name(),
                        dropped = %provider.name(),
                        "Duplicate tool name, first registration wins"
                    );
                }
                None => {
                    self.routes.insert(tool.name.clone(), index);
                    self.catalog.push(tool.clone());
                }
            }
        }
        self.providers.push(provider);
    }

    /// Read-only snapshot of the merged catalog.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.catalog.clone()
    }

    /// Number of connected providers.
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Terminate every provider subprocess. Idempotent, and safe on a
    /// partially-initialized registry.
    pub async fn dispose(&self) {
        for provider in &self.providers {
            provider.shutdown().await;
        }
    }
}

#[async_trait]
impl ToolExecutor for ProviderRegistry {
    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        let &index = self
            .routes
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let result = self.providers[index]
            .call(&call.name, call.arguments.clone())
            .await?;

        Ok(ToolOutput {
            call_id: call.id.clone(),
            success: result.success,
            output: result.output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::ProviderError;

    struct NoSampling;

    #[async_trait]
    impl SamplingHandler for NoSampling {
        async fn complete(&self, _prompt: String) -> Result<String, ProviderError> {
            Err(ProviderError::Network("sampling disabled in tests".into()))
        }
    }

    fn sampling() -> Arc<dyn SamplingHandler> {
        Arc::new(NoSampling)
    }

    /// A shell one-liner that speaks just enough of the protocol to
    /// handshake and serve one tool. Request ids are deterministic:
    /// initialize=1, tools/list=2, first call=3.
    #[cfg(unix)]
    fn stub_provider(name: &str, tool: &str) -> ToolProviderConfig {
        let script = format!(
            concat!(
                r#"read _init; echo '{{"jsonrpc":"2.0","id":1,"result":{{}}}}'; "#,
                r#"read _list; echo '{{"jsonrpc":"2.0","id":2,"result":{{"tools":[{{"name":"{tool}","description":"stub","input_schema":{{}}}}]}}}}'; "#,
                r#"while read _call; do echo '{{"jsonrpc":"2.0","id":3,"result":{{"output":"ran {tool}","success":true}}}}'; done"#
            ),
            tool = tool
        );
        ToolProviderConfig {
            name: name.into(),
            command: "sh".into(),
            args: vec!["-c".into(), script],
        }
    }

    #[tokio::test]
    async fn empty_config_is_empty_catalog() {
        let registry = ProviderRegistry::initialize(&[], sampling()).await;
        assert_eq!(registry.provider_count(), 0);
        assert!(registry.definitions().is_empty());
        // Dispose on a never-populated registry must be a no-op
        registry.dispose().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launches_provider_and_merges_catalog() {
        let configs = vec![stub_provider("alpha", "echo")];
        let registry = ProviderRegistry::initialize(&configs, sampling()).await;

        assert_eq!(registry.provider_count(), 1);
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");

        registry.dispose().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn definitions_idempotent() {
        let configs = vec![stub_provider("alpha", "echo")];
        let registry = ProviderRegistry::initialize(&configs, sampling()).await;

        let first = registry.definitions();
        let second = registry.definitions();
        assert_eq!(first, second);

        registry.dispose().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn duplicate_tool_first_registration_wins() {
        let configs = vec![stub_provider("alpha", "echo"), stub_provider("beta", "echo")];
        let registry = ProviderRegistry::initialize(&configs, sampling()).await;

        // Both providers connect, but the catalog holds one "echo"
        assert_eq!(registry.provider_count(), 2);
        assert_eq!(registry.definitions().len(), 1);

        registry.dispose().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_provider_is_isolated() {
        let configs = vec![
            ToolProviderConfig {
                name: "broken".into(),
                command: "/nonexistent/definitely-not-a-binary".into(),
                args: vec![],
            },
            stub_provider("alpha", "echo"),
        ];
        let registry = ProviderRegistry::initialize(&configs, sampling()).await;

        // The broken provider is skipped; the good one still serves
        assert_eq!(registry.provider_count(), 1);
        assert_eq!(registry.definitions().len(), 1);

        registry.dispose().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_routes_to_owning_provider() {
        let configs = vec![stub_provider("alpha", "echo")];
        let registry = ProviderRegistry::initialize(&configs, sampling()).await;

        let call = ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            arguments: serde_json::json!({"text": "hi"}),
        };
        let output = registry.execute(&call).await.unwrap();
        assert!(output.success);
        assert_eq!(output.output, "ran echo");
        assert_eq!(output.call_id, "call_1");

        registry.dispose().await;
    }

    #[tokio::test]
    async fn execute_unknown_tool_is_not_found() {
        let registry = ProviderRegistry::empty();
        let call = ToolCall {
            id: "call_1".into(),
            name: "missing".into(),
            arguments: serde_json::json!({}),
        };
        let err = registry.execute(&call).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dispose_is_idempotent() {
        let configs = vec![stub_provider("alpha", "echo")];
        let registry = ProviderRegistry::initialize(&configs, sampling()).await;
        registry.dispose().await;
        registry.dispose().await;
    }
}
