use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::documents::DocumentKind;
use crate::embedding::Embedder;
use crate::milvus::{validate_collection_name, ChunkRow, MilvusClient};
use crate::splitter::Chunker;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub chunks_inserted: u64,
}

/// Chunks, embeds and inserts every supported document under `directory_path`.
pub async fn process_directory(
    milvus: &MilvusClient,
    embedder: &dyn Embedder,
    directory_path: &Path,
    collection_name: &str,
    chunker: &Chunker,
) -> Result<UploadSummary> {
    if !directory_path.is_dir() {
        bail!("{} is not a directory", directory_path.display());
    }
    validate_collection_name(collection_name)?;

    milvus
        .create_collection_if_not_exists(collection_name, embedder.dimension())
        .await
        .with_context(|| format!("failed to create collection '{collection_name}'"))?;

    let mut summary = UploadSummary::default();
    for entry in WalkDir::new(directory_path).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", directory_path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_path = entry.path();
        let Some(kind) = DocumentKind::from_path(file_path) else {
            info!(file = %file_path.display(), "skipping unsupported file format");
            summary.files_skipped += 1;
            continue;
        };

        info!(file = %file_path.display(), kind = ?kind, "processing file");
        let inserted = upload_file(milvus, embedder, file_path, kind, collection_name, chunker).await?;
        if inserted == 0 {
            warn!(file = %file_path.display(), "file produced no chunks");
            summary.files_skipped += 1;
            continue;
        }
        info!(file = %file_path.display(), inserted, "file processed and uploaded");
        summary.files_processed += 1;
        summary.chunks_inserted += inserted;
    }
    Ok(summary)
}

async fn upload_file(
    milvus: &MilvusClient,
    embedder: &dyn Embedder,
    file_path: &Path,
    kind: DocumentKind,
    collection_name: &str,
    chunker: &Chunker,
) -> Result<u64> {
    let paragraphs = kind.read(file_path)?;
    let chunks: Vec<String> = paragraphs
        .iter()
        .flat_map(|paragraph| chunker.split(paragraph))
        .collect();
    if chunks.is_empty() {
        return Ok(0);
    }

    let embeddings = embedder
        .embed(&chunks)
        .with_context(|| format!("failed to embed chunks of {}", file_path.display()))?;
    let rows: Vec<ChunkRow> = embeddings
        .into_iter()
        .zip(chunks)
        .map(|(embedding, text)| ChunkRow { embedding, text })
        .collect();

    milvus
        .insert(collection_name, &rows)
        .await
        .with_context(|| format!("failed to insert chunks of {}", file_path.display()))
}
