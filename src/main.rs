mod all_minilm_l6_v2;
mod config;
mod documents;
mod embedding;
mod embedding_model_factory;
mod llm;
mod milvus;
mod pipeline;
mod server;
mod splitter;
mod tokenizer_factory;
mod uploader;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::all_minilm_l6_v2::MAX_TOKENS_PER_CHUNK;
use crate::config::{Backend, ChunkerKind, Cli, Command, EmbeddingArgs, MilvusArgs, RagArgs};
use crate::embedding::FastEmbedder;
use crate::llm::{Generator, OllamaGenerator, OpenAiGenerator};
use crate::milvus::MilvusClient;
use crate::pipeline::RagPipeline;
use crate::splitter::Chunker;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let milvus = connect(&cli.milvus)?;

    match cli.command {
        Command::List => {
            let collections = milvus.list_collections().await?;
            println!("Collections in Milvus: {collections:?}");
        }
        Command::Delete { collection } => {
            delete_collection(&milvus, &collection).await?;
            println!("Collection '{collection}' has been successfully deleted.");
        }
        Command::Upload {
            directory,
            collection,
            chunker,
            max_chunk_size,
        } => {
            let chunker = build_chunker(chunker, max_chunk_size, &cli.embedding)?;
            let embedder = FastEmbedder::new(cli.embedding.embedding_model_dir.as_deref())?;
            let summary =
                uploader::process_directory(&milvus, &embedder, &directory, &collection, &chunker)
                    .await?;
            println!(
                "Uploaded {} chunks from {} files into '{collection}' ({} skipped)",
                summary.chunks_inserted, summary.files_processed, summary.files_skipped
            );
        }
        Command::Ask { question, rag } => {
            let pipeline = build_pipeline(milvus, &cli.embedding, &rag)?;
            let answer = pipeline.answer(&question).await?;
            println!("{}", answer.answer);
        }
        Command::Serve { bind, rag } => {
            let pipeline = build_pipeline(milvus, &cli.embedding, &rag)?;
            server::serve(pipeline, bind).await?;
        }
    }
    Ok(())
}

fn connect(args: &MilvusArgs) -> Result<MilvusClient> {
    let client = MilvusClient::from_host_port(&args.milvus_host, args.milvus_port, args.milvus_token.clone())
        .context("failed to build Milvus client")?;
    info!(url = client.base_url(), "using Milvus");
    Ok(client)
}

async fn delete_collection(milvus: &MilvusClient, collection: &str) -> Result<()> {
    if !milvus.has_collection(collection).await? {
        bail!("collection '{collection}' does not exist");
    }
    milvus.drop_collection(collection).await?;
    Ok(())
}

fn build_chunker(kind: ChunkerKind, max_chunk_size: u64, embedding: &EmbeddingArgs) -> Result<Chunker> {
    match kind {
        ChunkerKind::Sentence => Ok(Chunker::Sentences {
            max_chars: usize::try_from(max_chunk_size)?,
        }),
        ChunkerKind::Tokens => {
            let Some(model_dir) = embedding.embedding_model_dir.as_deref() else {
                bail!("--chunker tokens needs EMBEDDING_MODEL_DIR to locate tokenizer.json");
            };
            Ok(Chunker::Tokens {
                tokenizer: tokenizer_factory::get_tokenizer(model_dir)?,
                max_tokens: MAX_TOKENS_PER_CHUNK,
            })
        }
    }
}

fn build_generator(rag: &RagArgs) -> Result<Box<dyn Generator>> {
    let llm = &rag.llm;
    Ok(match rag.backend {
        Backend::Ollama => Box::new(OllamaGenerator::new(&llm.ollama_url, &llm.ollama_model)?),
        Backend::Openai => {
            let api_key = llm
                .openai_api_key
                .as_deref()
                .filter(|key| !key.is_empty())
                .context("OPENAI_API_KEY is required for the openai backend")?;
            Box::new(OpenAiGenerator::new(&llm.openai_url, api_key, &llm.openai_model)?)
        }
    })
}

fn build_pipeline(milvus: MilvusClient, embedding: &EmbeddingArgs, rag: &RagArgs) -> Result<RagPipeline> {
    let generator = build_generator(rag)?;
    let embedder = Arc::new(FastEmbedder::new(embedding.embedding_model_dir.as_deref())?);
    Ok(RagPipeline::new(
        milvus,
        embedder,
        generator,
        rag.collections.clone(),
        usize::try_from(rag.top_k)?,
    ))
}
