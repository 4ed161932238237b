use anyhow::{Context, Result};
use fastembed::{
    read_file_to_bytes, EmbeddingModel, InitOptions, InitOptionsUserDefined, Pooling,
    TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel,
};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::all_minilm_l6_v2::MODEL_NAME;

/// Loads all-MiniLM-L6-v2, from `model_dir` when given, otherwise from the
/// fastembed model cache (downloading it on first use).
pub fn get_model(model_dir: Option<&Path>) -> Result<TextEmbedding> {
    match model_dir {
        Some(dir) => from_directory(dir),
        None => {
            info!(model = MODEL_NAME, "loading embedding model from fastembed cache");
            TextEmbedding::try_new(
                InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(true),
            )
            .context("failed to initialise embedding model")
        }
    }
}

fn from_directory(base_path: &Path) -> Result<TextEmbedding> {
    info!(path = %base_path.display(), "loading embedding model from directory");
    let read = |path: PathBuf| {
        read_file_to_bytes(&path).with_context(|| format!("failed to read {}", path.display()))
    };

    let onnx_bytes = read(base_path.join("onnx").join("model.onnx"))?;
    let tokenizer_files = TokenizerFiles {
        tokenizer_file: read(base_path.join("tokenizer.json"))?,
        config_file: read(base_path.join("config.json"))?,
        special_tokens_map_file: read(base_path.join("special_tokens_map.json"))?,
        tokenizer_config_file: read(base_path.join("tokenizer_config.json"))?,
    };

    let user_model =
        UserDefinedEmbeddingModel::new(onnx_bytes, tokenizer_files).with_pooling(Pooling::Mean);

    TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
        .context("failed to initialise embedding model from directory")
}
