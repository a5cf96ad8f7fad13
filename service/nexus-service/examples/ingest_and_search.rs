//! Ingests a single file and runs one query against it, printing ranked
//! hits. Uses the deterministic embedder (no ONNX runtime / model file
//! required) so the example runs anywhere; swap in `OnnxStdIoEmbedder`
//! for a real embedding model.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use chunk_model::{Filter, NexusConfig, SourceKind};
use embedding_provider::{DeterministicEmbedder, DeterministicEmbedderConfig};
use nexus_service::NexusService;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: ingest_and_search <FILE> <QUERY>");
        std::process::exit(1);
    }
    let file = PathBuf::from(&args[1]);
    let query = &args[2];

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(&file, query))
}

async fn run(file: &PathBuf, query: &str) -> Result<(), Box<dyn std::error::Error>> {
    let root = std::env::temp_dir().join(format!("nexus-example-{}", std::process::id()));
    let config = NexusConfig {
        root,
        ..NexusConfig::default()
    };

    let embedder = Arc::new(DeterministicEmbedder::new(DeterministicEmbedderConfig::default())?);
    let service = NexusService::open(config, embedder, None)?;

    let source_id = service.add_source(SourceKind::File, "example".to_string())?;
    let bytes = std::fs::read(file)?;
    let uri = file.display().to_string();
    let report = service
        .ingest_document(source_id, uri, bytes, BTreeSet::new(), BTreeMap::new())
        .await?;
    println!(
        "ingested {}: added={} removed={} kept={}",
        file.display(),
        report.added,
        report.removed,
        report.kept
    );

    let options = service.default_search_options();
    let results = service.search(query, 10, &Filter::empty(), &options).await?;
    println!("results: {}", results.len());
    for (i, hit) in results.iter().enumerate() {
        let preview: String = hit.text.chars().take(80).collect();
        println!("{:>2}. [{}] {:.4} {}", i + 1, hit.chunk_id, hit.score, preview);
    }
    Ok(())
}
