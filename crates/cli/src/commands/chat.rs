//! `quill chat` — interactive or single-message chat mode.

use async_trait::async_trait;
use quill_config::AppConfig;
use quill_core::error::ProviderError;
use quill_core::message::Message;
use quill_core::provider::{ChatProvider, ChatRequest, StreamEvent};
use quill_providers::{AnthropicClient, ToolInvocationLayer};
use quill_session::{
    Console, InputHistory, RetryPolicy, Session, SessionOptions, TerminalConsole, run_repl,
};
use quill_store::SnapshotStore;
use quill_telemetry::{ModelPricing, PricingTable, UsageLedger};
use quill_tools::{ProviderRegistry, SamplingHandler};
use std::sync::Arc;

const DEFAULT_SYSTEM_PROMPT: &str = "You are Quill, a concise and capable assistant running \
in a terminal. Prefer short answers. Use the available tools when they help.";

/// Answers provider sampling requests with the session's own chat client.
struct ChatSampling {
    client: Arc<AnthropicClient>,
    model: String,
}

#[async_trait]
impl SamplingHandler for ChatSampling {
    async fn complete(&self, prompt: String) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::user(prompt)],
            temperature: 0.7,
            max_tokens: Some(1024),
            tools: vec![],
        };

        let mut rx = self.client.stream(request).await?;
        let mut text = String::new();
        while let Some(item) = rx.recv().await {
            match item? {
                StreamEvent::Text { delta } => text.push_str(&delta),
                StreamEvent::Done => break,
                _ => {}
            }
        }
        Ok(text)
    }
}

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let Some(api_key) = config.api_key.clone() else {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    export QUILL_API_KEY=sk-ant-...");
        eprintln!("    export ANTHROPIC_API_KEY=sk-ant-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    };

    let client = Arc::new(AnthropicClient::new(&api_key)?);

    // Launch tool providers; the sampling callback lets a provider request
    // completions through our client instead of holding its own key.
    let sampling = Arc::new(ChatSampling {
        client: client.clone(),
        model: config.default_model.clone(),
    });
    let registry = Arc::new(ProviderRegistry::initialize(&config.tool_providers, sampling).await);

    let provider = Arc::new(ToolInvocationLayer::new(client, registry.clone()));

    // Pricing table: built-in defaults plus config overrides.
    let pricing = PricingTable::with_defaults();
    for (model, p) in &config.pricing {
        let entry = match p.cached_per_m {
            Some(cached) => ModelPricing::with_cached(p.input_per_m, p.output_per_m, cached),
            None => ModelPricing::new(p.input_per_m, p.output_per_m),
        };
        pricing.set(model.clone(), entry);
    }

    let console: Arc<dyn Console> = Arc::new(TerminalConsole::new());
    let mut session = Session::new(
        provider,
        registry.clone(),
        UsageLedger::with_pricing(pricing),
        SnapshotStore::new(config.store.resolved_dir()),
        console,
        SessionOptions {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            max_context_tokens: config.max_context_tokens,
        },
    )
    .with_retry_policy(RetryPolicy::from(&config.session));

    if let Some(msg) = message {
        // Single message mode
        let mut history = InputHistory::new();
        session.handle_input(&msg, &mut history).await;
        session.finish();
    } else {
        println!();
        println!("  Quill — model {}", config.default_model);
        match registry.provider_count() {
            0 => println!("  No tool providers configured."),
            n => println!(
                "  {n} tool provider(s), {} tool(s) available.",
                registry.definitions().len()
            ),
        }
        println!("  Type 'help' for commands, 'exit' to quit.");
        println!();

        run_repl(&mut session).await?;
        println!("Goodbye!");
    }

    registry.dispose().await;
    Ok(())
}
