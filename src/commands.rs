use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{Config, render_config};
use crate::database::models::{DEFAULT_DOC_TYPE, NewDocument};
use crate::embeddings::OllamaClient;
use crate::generation::GenerationChain;
use crate::index::SimilarityIndex;
use crate::indexer::{Indexer, WarmUpOutcome};
use crate::retrieval::{Answer, AnswerKind, Orchestrator};

/// Descriptive fields for a document being added
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentOptions {
    pub title: Option<String>,
    pub course: Option<String>,
    pub semester: Option<String>,
    pub subject: Option<String>,
    pub doc_type: Option<String>,
    pub source_url: Option<String>,
}

impl DocumentOptions {
    /// Build the stored document for `path`, defaulting the title to the file stem
    #[inline]
    pub fn into_new_document(self, path: &Path) -> Result<NewDocument> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| format!("Not a file path: {}", path.display()))?;

        let title = self.title.unwrap_or_else(|| {
            path.file_stem()
                .map_or_else(|| filename.clone(), |stem| stem.to_string_lossy().into_owned())
        });

        if let Some(url) = &self.source_url {
            url::Url::parse(url).with_context(|| format!("Invalid source URL: {}", url))?;
        }

        Ok(NewDocument {
            filename,
            title,
            source_url: self.source_url,
            doc_type: self
                .doc_type
                .unwrap_or_else(|| DEFAULT_DOC_TYPE.to_string()),
            course: self.course,
            semester: self.semester,
            subject: self.subject,
        })
    }
}

/// Receiver that flips to `true` on ctrl-c
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at the next batch boundary");
            tx.send_replace(true);
        }
    });

    rx
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();
    println!("{}", render_config(config)?);

    match config.ollama_url() {
        Ok(url) => eprintln!("Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("Ollama URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

/// Write the current (default when absent) configuration to the base directory
#[inline]
pub fn init_config(config: &Config) -> Result<()> {
    let path = config.config_file_path();
    if path.exists() {
        eprintln!(
            "{}",
            style(format!("Configuration already exists at {}", path.display())).yellow()
        );
        return Ok(());
    }

    config.save().context("Failed to save configuration")?;
    eprintln!("{}", style("✓ Configuration saved successfully!").green());
    eprintln!("Configuration saved to: {}", style(path.display()).cyan());
    Ok(())
}

/// Read a text file, store it and index its chunks
#[inline]
pub async fn add_document(config: &Config, path: PathBuf, options: DocumentOptions) -> Result<()> {
    let text = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {} as UTF-8 text", path.display()))?;
    let document = options.into_new_document(&path)?;

    let indexer = Indexer::open(config).await?;
    let (_tx, shutdown) = watch::channel(false);
    warm_up(&indexer, &shutdown).await?;

    info!("Adding document {}", path.display());
    match indexer.ingest_document(document, &text).await {
        Ok(report) => {
            println!(
                "Added document: {} (ID: {})",
                report.document.title, report.document.id
            );
            println!("  Chunks indexed: {}", report.chunks_indexed);
            Ok(())
        }
        Err(e) => {
            eprintln!(
                "{}",
                style("⚠ Document stored but not indexed; run 'course-rag rebuild' once the embedding service is available").yellow()
            );
            Err(e.into())
        }
    }
}

#[inline]
pub async fn delete_document(config: &Config, document_id: i64) -> Result<()> {
    let indexer = Indexer::open(config).await?;
    let (_tx, shutdown) = watch::channel(false);
    warm_up(&indexer, &shutdown).await?;

    let title = indexer
        .database()
        .get_document(document_id)
        .await?
        .map(|document| document.title);

    if indexer.delete_document(document_id).await? {
        let label = title.unwrap_or_else(|| format!("Document {}", document_id));
        println!(
            "{}",
            style(format!("✓ Deleted \"{}\" (id {})", label, document_id)).green()
        );
    } else {
        println!("Document {} not found", document_id);
    }

    Ok(())
}

#[inline]
pub async fn list_documents(config: &Config) -> Result<()> {
    let indexer = Indexer::open(config).await?;
    let documents = indexer.database().list_documents().await?;

    if documents.is_empty() {
        println!("No documents have been added yet.");
        println!("Use 'course-rag add <file>' to add one.");
        return Ok(());
    }

    println!("Documents ({} total):", documents.len());
    println!();

    for document in &documents {
        let chunks = indexer
            .database()
            .get_chunks_for_document(document.id)
            .await
            .map(|chunks| chunks.len())
            .unwrap_or(0);

        println!("📄 {} (ID: {})", style(&document.title).bold(), document.id);
        println!("   File: {}", document.filename);
        println!("   Type: {}", document.doc_type);
        for (label, value) in [
            ("Course", &document.course),
            ("Semester", &document.semester),
            ("Subject", &document.subject),
            ("Source", &document.source_url),
        ] {
            if let Some(value) = value {
                println!("   {}: {}", label, value);
            }
        }
        println!("   Chunks: {}", chunks);
        println!(
            "   Uploaded: {}",
            document.uploaded_date.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }

    Ok(())
}

/// Rebuild the whole index from the store; ctrl-c stops at a batch boundary
#[inline]
pub async fn rebuild_index(config: &Config) -> Result<()> {
    let indexer = Indexer::open(config).await?;
    let shutdown = shutdown_signal();

    let report = indexer.rebuild(&shutdown).await?;
    println!("Rebuild: {}", report.summary());

    if report.is_degraded() {
        eprintln!(
            "{}",
            style("❌ Index is empty; questions will find no context").red()
        );
    } else if report.cancelled {
        eprintln!(
            "{}",
            style("⚠ Rebuild interrupted; the snapshot was not updated").yellow()
        );
    }

    Ok(())
}

#[inline]
pub async fn save_snapshot(config: &Config) -> Result<()> {
    let indexer = Indexer::open(config).await?;
    let (_tx, shutdown) = watch::channel(false);
    warm_up(&indexer, &shutdown).await?;

    if indexer.save_snapshot().await {
        println!(
            "{}",
            style(format!(
                "✓ Snapshot saved to {}",
                indexer.snapshot_path().display()
            ))
            .green()
        );
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Failed to save snapshot to {}",
            indexer.snapshot_path().display()
        ))
    }
}

/// Compare the index with the store and optionally repair it
#[inline]
pub async fn check_consistency(config: &Config, repair: bool) -> Result<()> {
    let indexer = Indexer::open(config).await?;
    restore_only(&indexer).await;

    if repair {
        let (report, repaired) = indexer.repair().await?;
        println!("{}", report.summary());
        println!(
            "Repair: {} entries removed, {} chunks regenerated",
            repaired.removed, repaired.regenerated
        );
        return Ok(());
    }

    let report = indexer.validate_consistency().await?;
    println!("{}", report.summary());
    for issue in &report.inconsistent_documents {
        println!(
            "   Document {}: {} stored chunks, {} index entries",
            issue.document_id, issue.store_chunks, issue.index_entries
        );
    }
    if !report.is_consistent {
        println!("Run 'course-rag check --repair' to fix the index.");
    }

    Ok(())
}

#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 Course RAG Status Report");
    println!("{}", "=".repeat(50));
    println!();

    let indexer = match Indexer::open(config).await {
        Ok(indexer) => {
            println!("🗄️  Database: ✅ Connected");
            indexer
        }
        Err(e) => {
            println!("🗄️  Database: ❌ Failed to open - {}", e);
            return Ok(());
        }
    };

    println!();
    println!("🤖 Ollama Status:");
    let client = OllamaClient::new(config)?;
    let health = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .context("Health check task failed")?;
    match health {
        Ok(()) => println!("   ✅ Connected, model {}", config.ollama.model),
        Err(e) => println!("   ❌ Unavailable - {:#}", e),
    }
    println!("   Generation model: {}", config.generation.model);
    if let Some(url) = &config.generation.inference_url {
        println!("   Inference endpoint: {}", url);
    }

    restore_only(&indexer).await;
    let status = indexer.status().await?;

    println!();
    println!("🔍 Index Status:");
    println!("   Documents: {}", status.store.documents);
    println!("   Stored chunks: {}", status.store.chunks);
    println!(
        "   Indexed vectors: {} (dimension {})",
        status.index.total_vectors, status.index.dimension
    );
    println!(
        "   Snapshot: {}",
        if status.snapshot_present {
            "present"
        } else {
            "missing"
        }
    );

    match indexer.validate_consistency().await {
        Ok(report) if report.is_consistent => println!("   ✅ {}", report.summary()),
        Ok(report) => println!("   ⚠️  {}", report.summary()),
        Err(e) => println!("   ❌ Failed to check consistency: {}", e),
    }

    Ok(())
}

/// Answer one question and print it with its sources
#[inline]
pub async fn ask(config: &Config, question: &str) -> Result<()> {
    let (_tx, shutdown) = watch::channel(false);
    let (_indexer, orchestrator) = prepare_orchestrator(config, &shutdown).await?;

    let answer = orchestrator.answer(question).await;
    print_answer(&answer);
    Ok(())
}

/// Warm up, then answer questions read line by line from stdin until EOF or ctrl-c
#[inline]
pub async fn serve(config: &Config) -> Result<()> {
    let mut shutdown = shutdown_signal();
    let (_indexer, orchestrator) = prepare_orchestrator(config, &shutdown).await?;

    let stopped = *shutdown.borrow();
    if stopped {
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Ready. Type a question per line (ctrl-d or ctrl-c to exit).").green()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    break;
                };
                let question = line.trim();
                if question.is_empty() {
                    continue;
                }
                let answer = orchestrator.answer(question).await;
                print_answer(&answer);
            }
            Ok(()) = shutdown.changed() => break,
        }
    }

    info!("Stopped serving questions");
    Ok(())
}

async fn prepare_orchestrator(
    config: &Config,
    shutdown: &watch::Receiver<bool>,
) -> Result<(Indexer, Orchestrator)> {
    let indexer = Indexer::open(config).await?;
    warm_up(&indexer, shutdown).await?;

    let generator = GenerationChain::from_config(config)?;
    let orchestrator = Orchestrator::new(
        Arc::clone(indexer.index()),
        Arc::clone(indexer.embedder()),
        generator,
    )
    .with_config(config);

    Ok((indexer, orchestrator))
}

async fn warm_up(indexer: &Indexer, shutdown: &watch::Receiver<bool>) -> Result<()> {
    let outcome = indexer.warm_up(shutdown).await?;
    let stats = indexer.index().stats().await;

    match &outcome {
        WarmUpOutcome::Restored { vectors } => {
            info!("Index restored from snapshot with {} vectors", vectors);
        }
        WarmUpOutcome::Rebuilt(report) => {
            info!("Index rebuilt: {}", report.summary());
        }
    }

    if outcome.is_degraded() {
        eprintln!(
            "{}",
            style("❌ Index is empty; answers will report missing context").red()
        );
    }

    info!(
        "Index holds {} vectors (dimension {})",
        stats.total_vectors, stats.dimension
    );
    Ok(())
}

/// Load an existing snapshot without falling back to a rebuild
async fn restore_only(indexer: &Indexer) {
    if SimilarityIndex::exists(indexer.snapshot_path()) {
        indexer.index().restore(indexer.snapshot_path()).await;
    }
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);

    if answer.kind == AnswerKind::Generated && !answer.sources.is_empty() {
        println!();
        println!("{}", style("Sources:").dim());
        for hit in &answer.sources {
            println!(
                "  {} {}",
                style(format!("[{}]", hit.chunk.source_label())).cyan(),
                style(format!("distance {:.4}", hit.distance)).dim()
            );
        }
    }
    println!();
}
