use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use mail_assist::completion::{CompletionClient, GeminiBackend, GeminiConfig, RetryPolicy};
use mail_assist::config::Config;
use mail_assist::inbox;
use mail_assist::pipeline::{BatchSummary, OperationType, Processor, RuleCategorizer};
use mail_assist::prompts;
use mail_assist::store::{LibSqlStore, LogStatus, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  export GEMINI_API_KEY=...");
            std::process::exit(1);
        }
    };

    eprintln!("📧 Mail Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Database ────────────────────────────────────────────────────────
    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {e}",
                    config.db_path.display()
                );
                std::process::exit(1);
            }),
    );

    prompts::seed_default_prompts(store.as_ref()).await?;

    if let Some(ref path) = config.mock_inbox {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mock inbox {}", path.display()))?;
        let loaded = inbox::load_mock_inbox(store.as_ref(), &raw).await?;
        if loaded > 0 {
            eprintln!("   Inbox: loaded {loaded} emails from {}", path.display());
        }
    }

    // ── Completion client ───────────────────────────────────────────────
    let backend = GeminiBackend::new(
        GeminiConfig::new(config.api_key.clone(), config.model.clone())
            .with_base_url(&config.base_url)
            .with_timeout(config.request_timeout),
    )?;
    let client = CompletionClient::new(Arc::new(backend))
        .with_policy(RetryPolicy {
            max_attempts: config.max_attempts,
            base_backoff: Duration::from_secs(1),
        })
        .with_timeout(config.request_timeout);

    let processor = Processor::new(
        Arc::clone(&store),
        client,
        RuleCategorizer::default_rules(),
    );

    // ── Rule pass ───────────────────────────────────────────────────────
    let pending = store
        .unprocessed_emails(OperationType::Categorization, None)
        .await?;
    if !pending.is_empty() {
        let summary = processor.apply_rules(&pending).await?;
        eprintln!(
            "   Rules: {} categorized without a completion call",
            summary.succeeded
        );
    }

    // ── Completion passes ───────────────────────────────────────────────
    let mut operations = vec![
        OperationType::Categorization,
        OperationType::ActionExtraction,
    ];
    if config.draft_replies {
        operations.push(OperationType::AutoReply);
    }

    eprintln!();
    for operation in operations {
        let summary = processor.process_pending(operation).await?;
        print_summary(operation, &summary);
    }

    // ── Report ──────────────────────────────────────────────────────────
    let stats = store.stats().await?;
    eprintln!("\n📊 Inbox: {} emails", stats.total_emails);
    for (category, count) in &stats.category_counts {
        eprintln!("   {category}: {count}");
    }

    let open = store.open_action_items().await?;
    if !open.is_empty() {
        eprintln!("\n✅ Open action items: {}", open.len());
        for item in open.iter().take(5) {
            match &item.deadline {
                Some(deadline) => {
                    eprintln!("   [{}] {} (due {deadline})", item.priority, item.task)
                }
                None => eprintln!("   [{}] {}", item.priority, item.task),
            }
        }
    }

    let failures: Vec<_> = store
        .recent_log(20)
        .await?
        .into_iter()
        .filter(|entry| entry.status == LogStatus::Failed)
        .collect();
    if !failures.is_empty() {
        eprintln!("\n⚠️  Recent failures: {}", failures.len());
        for entry in failures.iter().take(5) {
            eprintln!(
                "   {}: {}",
                entry.operation,
                entry.detail.as_deref().unwrap_or("unknown")
            );
        }
    }

    if config.draft_replies {
        let drafts = store.list_drafts().await?;
        eprintln!("\n✉️  Drafts ready for review: {}", drafts.len());
    }

    Ok(())
}

fn print_summary(operation: OperationType, summary: &BatchSummary) {
    if summary.total() == 0 {
        eprintln!("   {operation}: nothing to do");
        return;
    }
    eprintln!(
        "   {operation}: {} succeeded, {} failed, {} skipped",
        summary.succeeded, summary.failed, summary.skipped
    );
    for error in &summary.errors {
        eprintln!("      - {error}");
    }
}
