use clap::{Parser, Subcommand};
use course_rag::commands::{
    DocumentOptions, add_document, ask, check_consistency, delete_document, init_config,
    list_documents, rebuild_index, save_snapshot, serve, show_config, show_status,
};
use course_rag::config::Config;
use course_rag::{RagError, Result};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "course-rag")]
#[command(about = "Question answering over uploaded course documents")]
#[command(version)]
struct Cli {
    /// Base directory for configuration, database and index snapshot
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or create the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Write a default configuration file if none exists
        #[arg(long)]
        init: bool,
    },
    /// Add a text document and index it
    Add {
        /// Path to a UTF-8 text file
        file: PathBuf,
        /// Title, defaults to the file name without extension
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        course: Option<String>,
        #[arg(long)]
        semester: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        /// Document type, e.g. "syllabus" or "timetable"
        #[arg(long)]
        doc_type: Option<String>,
        /// Where the document was published
        #[arg(long)]
        source_url: Option<String>,
    },
    /// Delete a document and its index entries
    Delete {
        /// Document ID
        doc_id: i64,
    },
    /// List stored documents
    List,
    /// Rebuild the similarity index from stored chunks
    Rebuild,
    /// Save a snapshot of the similarity index
    Snapshot,
    /// Compare the index with stored chunks
    Check {
        /// Fix missing, orphaned and duplicated entries
        #[arg(long)]
        repair: bool,
    },
    /// Show database, Ollama and index status
    Status,
    /// Answer a single question
    Ask {
        question: String,
    },
    /// Answer questions read from stdin, one per line
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => Config::config_dir().map_err(|e| RagError::Config(e.to_string()))?,
    };
    let config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Config { show, init } => {
            if init {
                init_config(&config)?;
            }
            if show || !init {
                show_config(&config)?;
            }
        }
        Commands::Add {
            file,
            title,
            course,
            semester,
            subject,
            doc_type,
            source_url,
        } => {
            let options = DocumentOptions {
                title,
                course,
                semester,
                subject,
                doc_type,
                source_url,
            };
            add_document(&config, file, options).await?;
        }
        Commands::Delete { doc_id } => {
            delete_document(&config, doc_id).await?;
        }
        Commands::List => {
            list_documents(&config).await?;
        }
        Commands::Rebuild => {
            rebuild_index(&config).await?;
        }
        Commands::Snapshot => {
            save_snapshot(&config).await?;
        }
        Commands::Check { repair } => {
            check_consistency(&config, repair).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
        Commands::Ask { question } => {
            ask(&config, &question).await?;
        }
        Commands::Serve => {
            serve(&config).await?;
        }
    }

    Ok(())
}
