use anyhow::{Context, Result};
use std::path::Path;
use tokenizers::tokenizer::Tokenizer;

pub fn get_tokenizer(model_dir: &Path) -> Result<Tokenizer> {
    let tokenizer_path = model_dir.join("tokenizer.json");
    Tokenizer::from_file(&tokenizer_path)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("failed to load tokenizer from {}", tokenizer_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tokenizer_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = get_tokenizer(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("tokenizer.json"));
    }
}
