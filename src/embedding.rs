use anyhow::{ensure, Result};
use fastembed::TextEmbedding;
use std::path::Path;

use crate::all_minilm_l6_v2::VECTOR_SIZE;
use crate::embedding_model_factory;

pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed(&[text.to_string()])?;
        ensure!(embeddings.len() == 1, "embedding model returned no vector");
        Ok(embeddings.remove(0))
    }
}

pub struct FastEmbedder {
    model: TextEmbedding,
}

impl FastEmbedder {
    pub fn new(model_dir: Option<&Path>) -> Result<Self> {
        Ok(Self {
            model: embedding_model_factory::get_model(model_dir)?,
        })
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.model.embed(texts.to_vec(), None)?;
        ensure!(
            embeddings.len() == texts.len(),
            "embedding model returned {} vectors for {} texts",
            embeddings.len(),
            texts.len()
        );
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        VECTOR_SIZE
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Deterministic embedder: every text maps to `[len, 1.0, 0.0, ...]`.
    pub struct FakeEmbedder {
        pub dim: usize,
    }

    impl Embedder for FakeEmbedder {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dim];
                    v[0] = t.chars().count() as f32;
                    v[1] = 1.0;
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dim
        }
    }

    #[test]
    fn embed_one_returns_single_vector() {
        let embedder = FakeEmbedder { dim: 4 };
        assert_eq!(embedder.embed_one("abc").unwrap(), vec![3.0, 1.0, 0.0, 0.0]);
    }
}
