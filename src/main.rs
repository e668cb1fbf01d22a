use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;

use support_triage::config::TriageConfig;
use support_triage::extract::Extractor;
use support_triage::ingest;
use support_triage::llm::{
    GenerationProvider, HttpProvider, HttpProviderConfig, OfflineProvider,
};
use support_triage::orchestrate::CancelToken;
use support_triage::retrieval::{IndexSlot, SearchIndex, load_corpus};
use support_triage::triage::{Classifier, TriageEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let kb_dir = std::env::var("TRIAGE_KB_DIR").unwrap_or_else(|_| "data/kb".to_string());
    let mailbox_dir =
        std::env::var("TRIAGE_MAILBOX_DIR").unwrap_or_else(|_| "data/emails".to_string());
    let model =
        std::env::var("TRIAGE_MODEL").unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());

    // Generation capability: HTTP backend when a key is present,
    // deterministic offline drafting otherwise.
    let provider: Arc<dyn GenerationProvider> = match std::env::var("ANTHROPIC_API_KEY") {
        Ok(api_key) => {
            eprintln!("📧 Support Triage (model: {model})");
            Arc::new(HttpProvider::new(HttpProviderConfig::new(
                SecretString::from(api_key),
                model,
            )))
        }
        Err(_) => {
            eprintln!("📧 Support Triage (offline mode — no ANTHROPIC_API_KEY)");
            Arc::new(OfflineProvider::new())
        }
    };
    eprintln!("   Knowledge base: {kb_dir}");
    eprintln!("   Mailbox: {mailbox_dir}\n");

    // Build and install the index once; sessions share the handle.
    let documents = load_corpus(&kb_dir)
        .await
        .with_context(|| format!("loading knowledge base from {kb_dir}"))?;
    let index = Arc::new(IndexSlot::new());
    index.install(SearchIndex::build(documents)).await;

    let extractor = Arc::new(Extractor::with_defaults());
    let emails = ingest::load_mailbox(&mailbox_dir, &extractor)
        .await
        .with_context(|| format!("loading mailbox from {mailbox_dir}"))?;
    if emails.is_empty() {
        eprintln!("No emails to process.");
        return Ok(());
    }

    let engine = Arc::new(TriageEngine::new(
        provider,
        extractor,
        Classifier::with_defaults(),
        index,
        TriageConfig::from_env(),
    ));

    // One independent session per email; they share only the read-only
    // index handle.
    let mut handles = Vec::with_capacity(emails.len());
    for email in emails {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let cancel = CancelToken::new();
            engine.triage(email, &cancel).await
        }));
    }

    let mut failures = 0usize;
    for handle in handles {
        match handle.await {
            Ok(Ok(result)) => {
                println!("{}", "─".repeat(72));
                println!(
                    "De: {} | {} / urgence {}{}",
                    result.email.sender,
                    result.classification.category.label(),
                    result.classification.urgency.label(),
                    if result.aborted { " | SESSION INTERROMPUE" } else { "" },
                );
                println!("{}", "─".repeat(72));
                println!("{}", result.reply_text);
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Triage session failed");
                failures += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "Triage task panicked");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} session(s) failed");
    }
    Ok(())
}
