use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::embedding::Embedder;
use crate::llm::Generator;
use crate::milvus::MilvusClient;

#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub context: Vec<String>,
}

/// Retrieves the closest chunks from each configured collection and asks the
/// generator to answer with them as context.
pub struct RagPipeline {
    milvus: MilvusClient,
    embedder: Arc<dyn Embedder>,
    generator: Box<dyn Generator>,
    collections: Vec<String>,
    top_k: usize,
}

impl RagPipeline {
    pub fn new(
        milvus: MilvusClient,
        embedder: Arc<dyn Embedder>,
        generator: Box<dyn Generator>,
        collections: Vec<String>,
        top_k: usize,
    ) -> Self {
        Self {
            milvus,
            embedder,
            generator,
            collections,
            top_k,
        }
    }

    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    pub async fn retrieve(&self, collection: &str, query: &str, top_k: usize) -> Result<Vec<String>> {
        self.milvus
            .load_collection(collection)
            .await
            .with_context(|| format!("failed to load collection '{collection}'"))?;

        // model inference is CPU-bound; keep it off the async workers
        let embedder = Arc::clone(&self.embedder);
        let query_text = query.to_string();
        let query_embedding = tokio::task::spawn_blocking(move || embedder.embed_one(&query_text))
            .await
            .context("embedding task failed")??;
        let hits = self
            .milvus
            .search(collection, &query_embedding, top_k)
            .await
            .with_context(|| format!("search in collection '{collection}' failed"))?;
        for hit in &hits {
            debug!(collection, id = hit.id, distance = hit.distance, "hit");
        }
        Ok(hits.into_iter().map(|hit| hit.text).collect())
    }

    #[instrument(skip_all)]
    pub async fn answer(&self, query: &str) -> Result<RagAnswer> {
        info!(backend = self.generator.name(), collections = ?self.collections, "answering query");
        let mut all_retrieved_docs = Vec::new();
        for collection in &self.collections {
            let docs = self.retrieve(collection, query, self.top_k).await?;
            info!(collection = %collection, retrieved = docs.len(), "retrieved context");
            all_retrieved_docs.extend(docs);
        }

        let context = format_context(&all_retrieved_docs);
        let answer = self
            .generator
            .generate(query, &context)
            .await
            .with_context(|| format!("{} generation failed", self.generator.name()))?;

        Ok(RagAnswer {
            answer,
            context: all_retrieved_docs,
        })
    }
}

pub fn format_context(retrieved_docs: &[String]) -> String {
    retrieved_docs.join("\n\n")
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::embedding::testing::FakeEmbedder;
    use crate::llm::testing::EchoGenerator;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Mounts load + search for `collection`, answering with `texts` as hits.
    pub async fn mount_collection(server: &MockServer, collection: &str, texts: &[&str]) {
        Mock::given(path("/v2/vectordb/collections/load"))
            .and(body_partial_json(json!({"collectionName": collection})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {}})))
            .mount(server)
            .await;
        let hits: Vec<_> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| json!({"id": i, "distance": i as f32 * 0.1, "text": text}))
            .collect();
        Mock::given(path("/v2/vectordb/entities/search"))
            .and(body_partial_json(json!({"collectionName": collection})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": hits})))
            .mount(server)
            .await;
    }

    pub fn echo_pipeline(server: &MockServer, collections: &[&str]) -> RagPipeline {
        RagPipeline::new(
            MilvusClient::new(server.uri(), None).unwrap(),
            Arc::new(FakeEmbedder { dim: 4 }),
            Box::new(EchoGenerator),
            collections.iter().map(|c| c.to_string()).collect(),
            3,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::embedding::testing::FakeEmbedder;
    use crate::llm::testing::EchoGenerator;
    use serde_json::json;
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn context_is_blank_line_separated() {
        let docs = vec!["first".to_string(), "second".to_string()];
        assert_eq!(format_context(&docs), "first\n\nsecond");
        assert_eq!(format_context(&[]), "");
    }

    #[tokio::test]
    async fn retrieve_embeds_query_and_searches() {
        let server = MockServer::start().await;
        mount_collection(&server, "docs", &["a", "b"]).await;

        let pipeline = echo_pipeline(&server, &["docs"]);
        let docs = pipeline.retrieve("docs", "query", 2).await.unwrap();
        assert_eq!(docs, vec!["a", "b"]);

        let requests = server.received_requests().await.unwrap();
        let search = requests
            .iter()
            .find(|r| r.url.path() == "/v2/vectordb/entities/search")
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&search.body).unwrap();
        assert_eq!(body["data"], json!([[5.0, 1.0, 0.0, 0.0]]));
        assert_eq!(body["limit"], json!(2));
    }

    /// Blocks until released by the runtime, which only works off the runtime thread.
    struct GatedEmbedder {
        started: Mutex<Option<oneshot::Sender<()>>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Embedder for GatedEmbedder {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if let Some(started) = self.started.lock().unwrap().take() {
                let _ = started.send(());
            }
            self.release
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(2))
                .context("embedding blocked the runtime thread")?;
            FakeEmbedder { dim: 4 }.embed(texts)
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn query_embedding_runs_off_the_runtime_thread() {
        let server = MockServer::start().await;
        mount_collection(&server, "docs", &["a"]).await;

        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let releaser = tokio::spawn(async move {
            started_rx.await.unwrap();
            release_tx.send(()).unwrap();
        });

        let pipeline = RagPipeline::new(
            MilvusClient::new(server.uri(), None).unwrap(),
            Arc::new(GatedEmbedder {
                started: Mutex::new(Some(started_tx)),
                release: Mutex::new(release_rx),
            }),
            Box::new(EchoGenerator),
            vec!["docs".to_string()],
            3,
        );
        let docs = pipeline.retrieve("docs", "query", 3).await.unwrap();
        assert_eq!(docs, vec!["a"]);
        releaser.await.unwrap();
    }

    #[tokio::test]
    async fn answer_concatenates_context_across_collections() {
        let server = MockServer::start().await;
        mount_collection(&server, "docs", &["doc one", "doc two"]).await;
        mount_collection(&server, "faqs", &["faq one"]).await;

        let pipeline = echo_pipeline(&server, &["docs", "faqs"]);
        let answer = pipeline.answer("why?").await.unwrap();
        assert_eq!(answer.context, vec!["doc one", "doc two", "faq one"]);
        assert_eq!(answer.answer, "why? | doc one\n\ndoc two\n\nfaq one");
    }

    #[tokio::test]
    async fn missing_collection_fails_with_context() {
        let server = MockServer::start().await;
        Mock::given(path("/v2/vectordb/collections/load"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"code": 100, "message": "collection not found[collection=ghost]"}),
            ))
            .mount(&server)
            .await;

        let pipeline = echo_pipeline(&server, &["ghost"]);
        let err = pipeline.answer("anything").await.unwrap_err();
        assert!(err.to_string().contains("failed to load collection 'ghost'"));
    }
}
