use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "milvus-rag", version, about = "Retrieval-augmented generation over Milvus")]
pub struct Cli {
    #[command(flatten)]
    pub milvus: MilvusArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List all collections
    List,
    /// Drop a collection
    Delete {
        collection: String,
    },
    /// Chunk, embed and insert every .txt and .docx file under a directory
    Upload {
        directory: PathBuf,
        collection: String,
        #[arg(long, value_enum, default_value_t = ChunkerKind::Sentence)]
        chunker: ChunkerKind,
        #[arg(long, env = "MAX_CHUNK_SIZE", default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
        max_chunk_size: u64,
    },
    /// Answer a question with context retrieved from Milvus
    Ask {
        question: String,
        #[command(flatten)]
        rag: RagArgs,
    },
    /// Serve the pipeline over HTTP
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
        bind: SocketAddr,
        #[command(flatten)]
        rag: RagArgs,
    },
}

#[derive(Debug, Clone, Args)]
pub struct MilvusArgs {
    #[arg(long, env = "MILVUS_HOST", default_value = "localhost", global = true)]
    pub milvus_host: String,
    #[arg(long, env = "MILVUS_PORT", default_value_t = 19530, global = true)]
    pub milvus_port: u16,
    #[arg(long, env = "MILVUS_TOKEN", hide_env_values = true, global = true)]
    pub milvus_token: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct EmbeddingArgs {
    /// Directory holding onnx/model.onnx and the tokenizer files of all-MiniLM-L6-v2
    #[arg(long, env = "EMBEDDING_MODEL_DIR", global = true)]
    pub embedding_model_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct RagArgs {
    #[arg(long, value_enum, default_value_t = Backend::Ollama)]
    pub backend: Backend,
    /// Collection to search; repeat for several
    #[arg(long = "collection", env = "MILVUS_COLLECTIONS", value_delimiter = ',', default_value = "docs")]
    pub collections: Vec<String>,
    #[arg(long, env = "TOP_K", default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..))]
    pub top_k: u64,
    #[command(flatten)]
    pub llm: LlmArgs,
}

#[derive(Debug, Clone, Args)]
pub struct LlmArgs {
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434/api/generate")]
    pub ollama_url: String,
    #[arg(long, env = "OLLAMA_NAME_MODEL", default_value = "llama3.1:latest")]
    pub ollama_model: String,
    #[arg(long, env = "OPENAI_URL", default_value = "https://api.openai.com/v1/chat/completions")]
    pub openai_url: String,
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub openai_model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Local Ollama server
    Ollama,
    /// OpenAI-compatible chat completions
    Openai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChunkerKind {
    /// Pack sentences up to --max-chunk-size characters
    Sentence,
    /// Split on model tokens (needs EMBEDDING_MODEL_DIR)
    Tokens,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn upload_takes_directory_and_collection() {
        let cli = Cli::try_parse_from(["milvus-rag", "upload", "./docs", "faqs"]).unwrap();
        match cli.command {
            Command::Upload {
                directory,
                collection,
                chunker,
                ..
            } => {
                assert_eq!(directory, PathBuf::from("./docs"));
                assert_eq!(collection, "faqs");
                assert_eq!(chunker, ChunkerKind::Sentence);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn ask_accepts_repeated_and_comma_separated_collections() {
        let cli = Cli::try_parse_from([
            "milvus-rag",
            "ask",
            "what?",
            "--collection",
            "docs,faqs",
            "--collection",
            "notes",
            "--backend",
            "openai",
            "--milvus-port",
            "9091",
        ])
        .unwrap();
        assert_eq!(cli.milvus.milvus_port, 9091);
        match cli.command {
            Command::Ask { question, rag } => {
                assert_eq!(question, "what?");
                assert_eq!(rag.collections, vec!["docs", "faqs", "notes"]);
                assert_eq!(rag.backend, Backend::Openai);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_port_and_zero_top_k() {
        assert!(Cli::try_parse_from(["milvus-rag", "--milvus-port", "abc", "list"]).is_err());
        assert!(Cli::try_parse_from(["milvus-rag", "ask", "q", "--top-k", "0"]).is_err());
    }

    #[test]
    fn delete_requires_a_collection() {
        assert!(Cli::try_parse_from(["milvus-rag", "delete"]).is_err());
    }
}
