use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use referral_triage::config::{self, EmbeddingBackend, TriageConfig};
use referral_triage::crypto::sweep_orphaned_uploads;
use referral_triage::pipeline::extraction::RawDocument;
use referral_triage::pipeline::llm::OllamaClient;
use referral_triage::pipeline::pool::{order_for_review, TriagePool};
use referral_triage::pipeline::processor::{build_processor, CancelFlag};
use referral_triage::pipeline::retrieval::{
    CorpusBuilder, EmbeddingModel, GuidelineCorpus, HashingEmbedder, OllamaEmbedder,
};

const USAGE: &str = "usage:
  referral-triage [--consume] <referral.pdf|referral.txt>...
      Triage the files and print the reports as JSON, most urgent first.
      --consume securely deletes each file once its run ends.
  referral-triage ingest <guideline-dir>
      Chunk, embed and publish the .txt/.md/.pdf guidelines in a directory.";

fn main() -> ExitCode {
    referral_triage::init_tracing();
    tracing::info!("Referral triage v{}", config::APP_VERSION);

    let config = match TriageConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    if let Some(dir) = &config.upload_dir {
        sweep_orphaned_uploads(dir);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        None | Some("-h") | Some("--help") => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
        Some("ingest") => ingest(&config, &args[1..]),
        Some(_) => triage(&config, &args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn triage(config: &TriageConfig, args: &[String]) -> Result<(), Box<dyn Error>> {
    let consume = args.iter().any(|a| a == "--consume");
    let paths: Vec<PathBuf> = args
        .iter()
        .filter(|a| a.as_str() != "--consume")
        .map(PathBuf::from)
        .collect();
    if paths.is_empty() {
        return Err(USAGE.into());
    }

    // Blocking HTTP clients inside; built and dropped outside the runtime.
    let processor = Arc::new(build_processor(config)?);

    let (documents, unread) = load_documents(&paths, consume);
    for (path, e) in &unread {
        eprintln!("could not read {}: {e}", path.display());
    }
    if !unread.is_empty() {
        tracing::warn!(unread = unread.len(), read = documents.len(), "Some referrals could not be read");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let pool = TriagePool::new(Arc::clone(&processor));
    let cancel = CancelFlag::new();
    let mut reports = runtime.block_on(async {
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling at the next stage boundary");
                on_interrupt.cancel();
            }
        });
        pool.process_batch(documents, &cancel).await
    });
    drop(runtime);

    order_for_review(&mut reports);
    println!("{}", serde_json::to_string_pretty(&reports)?);
    if unread.is_empty() {
        Ok(())
    } else {
        Err(format!("{} file(s) could not be read and were left in place", unread.len()).into())
    }
}

/// Read every path. A file that cannot be read is reported back and never
/// taken over, so a bad file cannot cost the rest of the batch its uploads.
fn load_documents(paths: &[PathBuf], consume: bool) -> (Vec<RawDocument>, Vec<(PathBuf, io::Error)>) {
    let mut documents = Vec::with_capacity(paths.len());
    let mut unread = Vec::new();
    for path in paths {
        let document = if consume {
            RawDocument::from_upload(path)
        } else {
            std::fs::read(path).map(|bytes| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                RawDocument::new(bytes, name)
            })
        };
        match document {
            Ok(document) => documents.push(document),
            Err(e) => unread.push((path.clone(), e)),
        }
    }
    (documents, unread)
}

fn ingest(config: &TriageConfig, args: &[String]) -> Result<(), Box<dyn Error>> {
    let dir = args.first().map(PathBuf::from).ok_or(USAGE)?;

    let embedder: Box<dyn EmbeddingModel> = match (config.embedding_backend, &config.ollama_url) {
        (EmbeddingBackend::Ollama, Some(url)) => Box::new(OllamaEmbedder::new(
            OllamaClient::new(url, config.timeouts.retrieval)?,
            &config.embedding_model,
        )),
        _ => Box::new(HashingEmbedder::new()),
    };

    let corpus = GuidelineCorpus::load_or_empty(&config.corpus_path)?;
    let mut builder = CorpusBuilder::extending(embedder.as_ref(), &corpus.snapshot())?;
    let added = builder.add_dir(&dir)?;
    let total = builder.len();
    let version = builder.publish_to(&corpus);
    corpus.save(&config.corpus_path)?;

    tracing::info!(added, total, version, "Guideline corpus published");
    println!("published corpus version {version}: {added} new passages, {total} in total");
    Ok(())
}
