//! Lumen: on-device document assistant.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lumen_core::{Error, LumenConfig};
use lumen_llm::{downloaded_models, LlamaCliLoader, MODEL_CATALOG};
use lumen_runtime::{Answer, Assistant};

fn resolve_data_dir() -> PathBuf {
    std::env::var("LUMEN_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let exe_dir = std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|p| p.to_path_buf()));
            if let Some(dir) = exe_dir {
                let parent_data = dir.join("../data");
                if parent_data.exists() {
                    return parent_data;
                }
            }
            PathBuf::from("data")
        })
}

fn print_help() {
    println!("Lumen: ask questions about your documents, on your own device");
    println!();
    println!("Usage: lumen <command>");
    println!();
    println!("Commands:");
    println!("  ingest <file>...         Index documents (.txt, .md, .json)");
    println!("  ask <question>           Answer from your documents, or run a device action");
    println!("  docs                     List indexed documents");
    println!("  delete <doc-id>          Remove a document and its chunks");
    println!("  history [query]          Show chat history, optionally filtered");
    println!("  models                   List downloadable models and what is installed");
    println!("  stats                    Show index statistics");
    println!("  help                     Show this help message");
    println!();
    println!("Environment: LUMEN_DATA_DIR, LUMEN_LLAMA_CLI, OPENAI_API_KEY, ANTHROPIC_API_KEY, GROQ_API_KEY");
}

fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

async fn ask(assistant: Arc<Assistant>, question: &str) -> anyhow::Result<()> {
    let answer = match assistant.ask(question).await {
        Ok(a) => a,
        Err(e) if e.is_precondition() => {
            eprintln!("{}", e);
            match e {
                Error::NoProviderAvailable | Error::ModelNotAvailable | Error::ModelFileMissing(_) => {
                    eprintln!("Download a model into the models/ directory (see 'lumen models') or set an API key.");
                }
                _ => eprintln!("Set OPENAI_API_KEY, ANTHROPIC_API_KEY or GROQ_API_KEY."),
            }
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    match answer {
        Answer::Action { response, .. } => println!("{}", response),
        Answer::Chat { retrieval, mut stream } => {
            let stopper = Arc::clone(&assistant);
            let ctrl_c = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stopper.stop();
                }
            });

            let mut stdout = std::io::stdout();
            while let Some(chunk) = stream.next().await {
                print!("{}", chunk?);
                stdout.flush()?;
            }
            println!();
            ctrl_c.abort();

            if !retrieval.is_empty() {
                println!();
                println!("Sources:");
                for c in &retrieval.contexts {
                    println!("  {} ({:.2})", c.source_file_name, c.score);
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(());
    };
    if matches!(command, "--help" | "-h" | "help") {
        print_help();
        return Ok(());
    }

    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());
    let config = LumenConfig::from_env(&data_dir)?;

    if command == "models" {
        let installed = downloaded_models(&config.data_paths.models);
        for m in MODEL_CATALOG {
            let mark = if installed.iter().any(|i| i.id == m.id) { "*" } else { " " };
            println!(
                "{} {:<24} {:>6} MB  {}{}",
                mark,
                m.id,
                m.size_bytes / 1_000_000,
                m.name,
                if m.requires_auth { "  (sign-in required)" } else { "" }
            );
        }
        println!();
        println!("* installed in {}", config.data_paths.models.display());
        return Ok(());
    }

    let assistant = Arc::new(Assistant::open(&config, Arc::new(LlamaCliLoader::from_env()))?);

    match command {
        "ingest" => {
            if args.len() < 3 {
                eprintln!("Usage: lumen ingest <file>...");
                std::process::exit(1);
            }
            for path in &args[2..] {
                match assistant.ingest_file(&PathBuf::from(path)) {
                    Ok(Some(id)) => println!("{}: document {}", path, id),
                    Ok(None) => println!("{}: nothing to index", path),
                    Err(Error::DuplicateContent(_)) => println!("{}: already indexed", path),
                    Err(e) => eprintln!("{}: {}", path, e),
                }
            }
        }
        "ask" => {
            if args.len() < 3 {
                eprintln!("Usage: lumen ask <question>");
                std::process::exit(1);
            }
            ask(Arc::clone(&assistant), &args[2..].join(" ")).await?;
        }
        "docs" => {
            let docs = assistant.list_documents()?;
            if docs.is_empty() {
                println!("No documents indexed.");
            }
            for d in docs {
                let chunks = assistant.store().count_chunks(Some(d.id))?;
                println!(
                    "{:>5}  {}  {} ({} chunks)",
                    d.id,
                    format_ms(d.added_at),
                    d.file_name,
                    chunks
                );
            }
        }
        "delete" => {
            let Some(id) = args.get(2).and_then(|s| s.parse::<i64>().ok()) else {
                eprintln!("Usage: lumen delete <doc-id>");
                std::process::exit(1);
            };
            if assistant.delete_document(id)? {
                println!("Deleted document {}", id);
            } else {
                eprintln!("No document {}", id);
                std::process::exit(1);
            }
        }
        "history" => {
            let query = (args.len() > 2).then(|| args[2..].join(" "));
            for m in assistant.history(query.as_deref())? {
                if m.is_user_message {
                    println!("[{}] you: {}", format_ms(m.timestamp), m.question);
                } else {
                    println!("[{}] lumen: {}", format_ms(m.timestamp), m.response);
                }
            }
        }
        "stats" => {
            let stats = assistant.stats()?;
            println!("Documents:   {}", stats.total_documents);
            println!("Chunks:      {}", stats.total_chunks);
            println!("Embeddings:  {} (dim {})", stats.embeddings_stored, stats.embedding_dimension);
            println!("Messages:    {}", stats.chat_messages);
            println!("Database:    {} ({:.2} MB)", stats.db_path, stats.db_size_mb);
            println!("Encoder:     {}", if assistant.encoder().is_ready() { "ready" } else { "unavailable" });
        }
        other => {
            eprintln!("Unknown command: {}. Use 'lumen help' for usage.", other);
            std::process::exit(1);
        }
    }

    assistant.shutdown().await;
    Ok(())
}
