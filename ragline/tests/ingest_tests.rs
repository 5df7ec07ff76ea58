//! Integration tests for ingestion and retrieval against the in-memory store.

mod common;

use std::collections::HashSet;

use common::{Harness, test_config, words};
use ragline::{
    Chunk, Chunker, ContextFilter, IngestMode, RagConfig, RagError, TokenChunker, VectorStore,
};

fn parallel_config(workers: usize) -> RagConfig {
    let mut config = test_config();
    config.ingest_mode = IngestMode::Parallel;
    config.worker_count = workers;
    config
}

async fn all_chunks(harness: &Harness) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for doc in harness.pipeline.list_ingested().await.unwrap() {
        chunks.extend(harness.store.get_chunks(&doc.doc_id, 0..usize::MAX).await.unwrap());
    }
    chunks
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingestion_stores_every_chunk_once() {
    let harness = Harness::new(parallel_config(4));
    let chunker = TokenChunker::new(8, 2).unwrap();

    let files: Vec<(String, Vec<u8>)> = (0..12)
        .map(|i| (format!("file{i}.txt"), words(&format!("f{i}"), 5 + i * 7).into_bytes()))
        .collect();
    let expected: usize = files
        .iter()
        .map(|(_, bytes)| chunker.split(std::str::from_utf8(bytes).unwrap()).len())
        .sum();

    let report = harness.pipeline.bulk_ingest(files).await;
    assert!(report.is_complete());
    assert_eq!(report.documents().count(), 12);

    let chunks = all_chunks(&harness).await;
    assert_eq!(chunks.len(), expected);
    assert_eq!(harness.store.len().await, expected);
    let ids: HashSet<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(ids.len(), expected);

    for doc in harness.pipeline.list_ingested().await.unwrap() {
        let indices: Vec<usize> = harness
            .store
            .get_chunks(&doc.doc_id, 0..usize::MAX)
            .await
            .unwrap()
            .iter()
            .map(|c| c.chunk_index)
            .collect();
        assert_eq!(indices, (0..indices.len()).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn bad_files_do_not_affect_the_batch() {
    for mode in [IngestMode::Simple, IngestMode::Parallel, IngestMode::Batch] {
        let mut config = parallel_config(2);
        config.ingest_mode = mode;
        let harness = Harness::new(config);

        let files = vec![
            ("a.txt".to_string(), b"alpha bravo".to_vec()),
            ("slides.pptx".to_string(), b"PK\x03\x04".to_vec()),
            ("broken.json".to_string(), b"{\"sky\": ".to_vec()),
            ("b.md".to_string(), b"# charlie delta".to_vec()),
        ];
        let report = harness.pipeline.bulk_ingest(files).await;

        let names: Vec<&str> = report.outcomes.iter().map(|o| o.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "slides.pptx", "broken.json", "b.md"]);
        assert_eq!(report.succeeded(), 2);

        let failures: Vec<(&str, &RagError)> = report.failures().collect();
        assert!(matches!(failures[0], ("slides.pptx", RagError::UnsupportedFormat { .. })));
        assert!(matches!(failures[1], ("broken.json", RagError::ParseError { .. })));

        let listed = harness.pipeline.list_ingested().await.unwrap();
        let mut files: Vec<String> = listed
            .iter()
            .map(|d| d.doc_metadata.as_ref().unwrap()["file_name"].clone())
            .collect();
        files.sort();
        assert_eq!(files, vec!["a.txt", "b.md"]);
    }
}

#[tokio::test]
async fn delete_removes_only_that_document() {
    let harness = Harness::new(test_config());
    let a = harness.pipeline.ingest_text("a.txt", &words("a", 30)).await.unwrap();
    let b = harness.pipeline.ingest_text("b.txt", &words("b", 30)).await.unwrap();
    let (a_id, b_id) = (a[0].doc_id.clone(), b[0].doc_id.clone());
    let b_before = harness.store.get_chunks(&b_id, 0..usize::MAX).await.unwrap();

    harness.pipeline.delete(&a_id).await.unwrap();

    assert!(harness.store.get_chunks(&a_id, 0..usize::MAX).await.unwrap().is_empty());
    assert_eq!(harness.store.get_chunks(&b_id, 0..usize::MAX).await.unwrap(), b_before);
    let result = harness.retriever().retrieve(&words("a", 8), 50, 0, None).await.unwrap();
    assert!(result.chunks.iter().all(|c| c.doc_id() == b_id));
    assert!(matches!(
        harness.pipeline.delete(&a_id).await,
        Err(RagError::DocumentNotFound(_))
    ));
}

#[tokio::test]
async fn filter_never_leaks_other_documents() {
    let harness = Harness::new(test_config());
    let a = harness.pipeline.ingest_text("a.txt", &words("a", 20)).await.unwrap();
    let b_text = words("b", 20);
    harness.pipeline.ingest_text("b.txt", &b_text).await.unwrap();

    let filter = ContextFilter::new([a[0].doc_id.clone()]);
    let result = harness.retriever().retrieve(&b_text, 10, 1, Some(&filter)).await.unwrap();
    assert!(!result.is_empty());
    assert!(result.chunks.iter().all(|c| c.doc_id() == a[0].doc_id));
}

#[tokio::test]
async fn each_chunk_retrieves_itself_first() {
    let harness = Harness::new(test_config());
    let docs = harness.pipeline.ingest_text("long.txt", &words("x", 40)).await.unwrap();
    harness.pipeline.ingest_text("other.txt", &words("y", 40)).await.unwrap();

    let chunks = harness.store.get_chunks(&docs[0].doc_id, 0..usize::MAX).await.unwrap();
    assert!(chunks.len() > 3);
    for chunk in chunks {
        let result = harness.retriever().retrieve(&chunk.text, 3, 0, None).await.unwrap();
        assert_eq!(result.chunks[0].chunk_id, chunk.chunk_id);
    }
}

#[tokio::test]
async fn neighbour_expansion_stops_at_document_edges() {
    let harness = Harness::new(test_config());
    let docs = harness.pipeline.ingest_text("long.txt", &words("n", 40)).await.unwrap();
    let chunks = harness.store.get_chunks(&docs[0].doc_id, 0..usize::MAX).await.unwrap();
    let last = chunks.last().unwrap();

    let retriever = harness.retriever();
    let first_hit = retriever.retrieve(&chunks[0].text, 1, 2, None).await.unwrap();
    assert_eq!(first_hit.chunks[0].previous_texts.as_ref().unwrap().len(), 0);
    assert_eq!(first_hit.chunks[0].next_texts.as_ref().unwrap(), &vec![
        chunks[1].text.clone(),
        chunks[2].text.clone()
    ]);

    let last_hit = retriever.retrieve(&last.text, 1, 3, None).await.unwrap();
    assert_eq!(last_hit.chunks[0].chunk_index, last.chunk_index);
    assert!(last_hit.chunks[0].next_texts.as_ref().unwrap().is_empty());
    let n = last.chunk_index;
    assert_eq!(last_hit.chunks[0].previous_texts.as_ref().unwrap(), &vec![
        chunks[n - 1].text.clone(),
        chunks[n - 2].text.clone(),
        chunks[n - 3].text.clone()
    ]);

    let everything = retriever.retrieve(&chunks[2].text, 1, usize::MAX, None).await.unwrap();
    let hit = &everything.chunks[0];
    assert_eq!(hit.previous_texts.as_ref().unwrap().len(), 2);
    assert_eq!(hit.next_texts.as_ref().unwrap().len(), chunks.len() - 3);
}

#[tokio::test]
async fn ingest_path_uses_base_name() {
    let harness = Harness::new(test_config());
    let dir = std::env::temp_dir().join(format!("ragline-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let path = dir.join("notes.md");
    tokio::fs::write(&path, "The sky is blue. Grass is green.").await.unwrap();

    let docs = harness.pipeline.ingest_path(&path).await.unwrap();
    assert_eq!(docs[0].file_name(), Some("notes.md"));
    assert_eq!(harness.pipeline.list_ingested().await.unwrap(), vec![docs[0].to_ingested()]);

    let missing = harness.pipeline.ingest_path(dir.join("missing.txt")).await;
    assert!(matches!(missing, Err(RagError::ParseError { .. })));
    tokio::fs::remove_dir_all(&dir).await.unwrap();
}

#[tokio::test]
async fn embedding_outage_fails_the_file_and_stores_nothing() {
    let harness = Harness::with_provider(test_config(), std::sync::Arc::new(common::DownEmbedder));
    let err = harness.pipeline.ingest_text("a.txt", "alpha bravo").await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingUnavailable { .. }));
    assert!(harness.store.is_empty().await);
}

#[tokio::test]
async fn batch_embedding_outage_fails_each_parsed_file() {
    let mut config = parallel_config(2);
    config.ingest_mode = IngestMode::Batch;
    let harness = Harness::with_provider(config, std::sync::Arc::new(common::DownEmbedder));

    let files = vec![
        ("a.txt".to_string(), b"alpha bravo".to_vec()),
        ("deck.pptx".to_string(), b"PK\x03\x04".to_vec()),
        ("b.txt".to_string(), b"charlie delta".to_vec()),
    ];
    let report = harness.pipeline.bulk_ingest(files).await;

    assert_eq!(report.succeeded(), 0);
    let failures: Vec<(&str, &RagError)> = report.failures().collect();
    assert!(matches!(failures[0], ("a.txt", RagError::EmbeddingUnavailable { .. })));
    assert!(matches!(failures[1], ("deck.pptx", RagError::UnsupportedFormat { .. })));
    assert!(matches!(failures[2], ("b.txt", RagError::EmbeddingUnavailable { .. })));
    assert!(harness.store.is_empty().await);
}
