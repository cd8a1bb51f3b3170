use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use notes_retrieval::cache::cache_file_path;
use notes_retrieval::config::VectorSettings;
use notes_retrieval::embedding::Embedder;
use notes_retrieval::error::ConfigError;
use notes_retrieval::models::Chunk;
use notes_retrieval::progress::NoProgress;
use notes_retrieval::search::{SearchMode, SearchOptions};
use notes_retrieval::store::RetrievalStore;

/// Deterministic embedder: a bag-of-letters vector, so similar texts land
/// close together and identical texts get identical vectors.
struct LetterEmbedder {
    calls: AtomicUsize,
    texts: AtomicUsize,
}

impl LetterEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn texts(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 26];
                for c in t.to_lowercase().chars() {
                    if c.is_ascii_lowercase() {
                        v[(c as u8 - b'a') as usize] += 1.0;
                    }
                }
                v[0] += 0.01;
                v
            })
            .collect())
    }
}

fn vector_settings() -> VectorSettings {
    VectorSettings::new("openai", "https://example.test/v1", "sk-test", "letters-1")
}

fn write(dir: &Path, name: &str, content: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), content).unwrap();
}

fn setup_dirs(root: &Path) -> BTreeMap<String, PathBuf> {
    let notes = root.join("notes");
    let rubrics = root.join("rubrics");
    write(
        &notes,
        "governance.md",
        "# Governance\n\n## Village committees\n\nVillage committees are elected every five years.\n\n## Grassroots\n\nGrassroots governance relies on consultation.",
    );
    write(
        &notes,
        "economy.txt",
        "Rural revitalization depends on industry support and infrastructure.",
    );
    write(&notes, "image.png", "not text");
    write(
        &rubrics,
        "structure.md",
        "A strong answer states a position, gives two examples, and concludes.",
    );

    let mut dirs = BTreeMap::new();
    dirs.insert("notes".to_string(), notes);
    dirs.insert("rubrics".to_string(), rubrics);
    dirs
}

#[cfg(unix)]
/// Push a directory's mtime forward so the corpus memo sees the change
/// regardless of timestamp granularity.
fn bump_mtime(dir: &Path) {
    let later = std::time::SystemTime::now() + std::time::Duration::from_secs(10);
    fs::File::open(dir).unwrap().set_modified(later).unwrap();
}

fn cache_items(cache_dir: &Path, settings: &VectorSettings) -> Vec<String> {
    let path = cache_file_path(cache_dir, &settings.cache_key());
    let content = fs::read_to_string(path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(json["version"], 1);
    assert_eq!(json["modelKey"], settings.cache_key());
    json["items"].as_object().unwrap().keys().cloned().collect()
}

#[tokio::test]
async fn test_corpus_build_is_memoized() {
    let tmp = TempDir::new().unwrap();
    let dirs = setup_dirs(tmp.path());
    let store = RetrievalStore::new(tmp.path().join("cache"), 1200);

    let first = store.build(&dirs).await.unwrap();
    let second = store.build(&dirs).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(store.corpus_builder().scan_count(), 1);
    assert_eq!(*first, *second);
}

#[tokio::test]
async fn test_corpus_contents_and_order() {
    let tmp = TempDir::new().unwrap();
    let dirs = setup_dirs(tmp.path());
    let store = RetrievalStore::new(tmp.path().join("cache"), 1200);

    let corpus = store.build(&dirs).await.unwrap();

    // png skipped; notes (economy, governance x2 sections) before rubrics
    let kinds: Vec<&str> = corpus.iter().map(|c| c.kind.as_str()).collect();
    assert_eq!(kinds, vec!["notes", "notes", "notes", "rubrics"]);
    assert!(corpus[0].source.ends_with("economy.txt"));
    assert!(corpus[1].source.ends_with("governance.md"));
    assert!(corpus.iter().all(|c| !c.text.trim().is_empty()));
}

#[tokio::test]
async fn test_chunks_respect_max_chars() {
    let tmp = TempDir::new().unwrap();
    let notes = tmp.path().join("notes");
    let paragraphs: Vec<String> = (0..40)
        .map(|i| format!("Paragraph {} talks about policy and its effect on villages.", i))
        .collect();
    write(&notes, "long.md", &paragraphs.join("\n\n"));
    let mut dirs = BTreeMap::new();
    dirs.insert("notes".to_string(), notes);

    let store = RetrievalStore::new(tmp.path().join("cache"), 200);
    let corpus = store.build(&dirs).await.unwrap();

    assert!(corpus.len() > 1);
    assert!(corpus.iter().all(|c| c.text.chars().count() <= 200));
}

#[tokio::test]
async fn test_missing_dir_contributes_nothing() {
    let tmp = TempDir::new().unwrap();
    let mut dirs = setup_dirs(tmp.path());
    dirs.insert("samples".to_string(), tmp.path().join("does-not-exist"));

    let store = RetrievalStore::new(tmp.path().join("cache"), 1200);
    let corpus = store.build(&dirs).await.unwrap();
    assert!(corpus.iter().all(|c| c.kind != "samples"));
    assert_eq!(corpus.len(), 4);
}

#[tokio::test]
async fn test_keyword_cjk_bigram_match() {
    let tmp = TempDir::new().unwrap();
    let store = RetrievalStore::new(tmp.path(), 1200);
    let corpus = vec![Chunk::new("notes", "a.md", "乡村振兴 产业扶贫政策")];

    let hits = store
        .search("乡村振兴政策", &corpus, &SearchOptions::keyword(5, 0.0))
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert!(hits[0].score > 0.0);
    assert!(hits[0].snippet.contains("乡村振兴"));
}

#[tokio::test]
async fn test_keyword_search_over_built_corpus() {
    let tmp = TempDir::new().unwrap();
    let dirs = setup_dirs(tmp.path());
    let store = RetrievalStore::new(tmp.path().join("cache"), 1200);
    let corpus = store.build(&dirs).await.unwrap();

    let hits = store
        .search("village committees elected", &corpus, &SearchOptions::keyword(5, 0.2))
        .await
        .unwrap();

    assert!(!hits.is_empty());
    assert!(hits[0].source.ends_with("governance.md"));
    assert_eq!(hits[0].kind, "notes");
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn test_empty_corpus_returns_nothing_in_both_modes() {
    let tmp = TempDir::new().unwrap();
    let embedder = LetterEmbedder::new();
    let store = RetrievalStore::new(tmp.path(), 1200).with_embedder(embedder.clone());

    let keyword = store
        .search("anything", &[], &SearchOptions::keyword(5, 0.0))
        .await
        .unwrap();
    let vector = store
        .search("anything", &[], &SearchOptions::vector(5, 0.0, vector_settings()))
        .await
        .unwrap();

    assert!(keyword.is_empty());
    assert!(vector.is_empty());
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn test_empty_api_key_is_config_error_without_calls() {
    let tmp = TempDir::new().unwrap();
    let embedder = LetterEmbedder::new();
    let store = RetrievalStore::new(tmp.path(), 1200).with_embedder(embedder.clone());
    let corpus = vec![Chunk::new("notes", "a.md", "alpha")];

    let mut settings = vector_settings();
    settings.api_key = String::new();
    let err = store
        .search("alpha", &corpus, &SearchOptions::vector(5, 0.0, settings))
        .await
        .unwrap_err();

    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::MissingVectorField("api_key"))
    );
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn test_vector_ties_keep_corpus_order() {
    let tmp = TempDir::new().unwrap();
    let embedder = LetterEmbedder::new();
    let store = RetrievalStore::new(tmp.path(), 1200).with_embedder(embedder.clone());
    let corpus = vec![
        Chunk::new("notes", "first.md", "same words here"),
        Chunk::new("notes", "second.md", "same words here"),
    ];

    let hits = store
        .search("same words", &corpus, &SearchOptions::vector(5, -1.0, vector_settings()))
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].score, hits[1].score);
    assert_eq!(hits[0].source, Path::new("first.md"));
    assert_eq!(hits[1].source, Path::new("second.md"));
}

#[tokio::test]
async fn test_each_chunk_embedded_once_across_searches() {
    let tmp = TempDir::new().unwrap();
    let dirs = setup_dirs(tmp.path());
    let embedder = LetterEmbedder::new();
    let store = RetrievalStore::new(tmp.path().join("cache"), 1200).with_embedder(embedder.clone());
    let corpus = store.build(&dirs).await.unwrap();
    let options = SearchOptions::vector(3, 0.0, vector_settings());

    store.search("village", &corpus, &options).await.unwrap();
    let after_first = embedder.texts();
    // corpus chunks plus the query
    assert_eq!(after_first, corpus.len() + 1);

    store.search("rural", &corpus, &options).await.unwrap();
    assert_eq!(embedder.texts(), after_first + 1);

    // A fresh store reads the persisted file instead of re-embedding
    let fresh_embedder = LetterEmbedder::new();
    let fresh = RetrievalStore::new(tmp.path().join("cache"), 1200).with_embedder(fresh_embedder.clone());
    fresh.search("answer", &corpus, &options).await.unwrap();
    assert_eq!(fresh_embedder.texts(), 1);
}

#[tokio::test]
async fn test_edited_chunk_gets_new_identity() {
    let tmp = TempDir::new().unwrap();
    let embedder = LetterEmbedder::new();
    let store = RetrievalStore::new(tmp.path(), 1200).with_embedder(embedder.clone());
    let settings = vector_settings();

    let before = vec![Chunk::new("notes", "a.md", "original text")];
    store.ensure_embeddings(&before, &settings).await.unwrap();
    let after = vec![Chunk::new("notes", "a.md", "edited text")];
    let created = store.ensure_embeddings(&after, &settings).await.unwrap();

    assert_eq!(created, 1);
    assert_ne!(before[0].identity(), after[0].identity());
    let items = cache_items(tmp.path(), &settings);
    assert_eq!(items, vec![after[0].identity()]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_warmup_then_rebuild_prunes_removed_chunk() {
    let tmp = TempDir::new().unwrap();
    let dirs = setup_dirs(tmp.path());
    let cache_dir = tmp.path().join("cache");
    let settings = vector_settings();

    let embedder = LetterEmbedder::new();
    let store = RetrievalStore::new(&cache_dir, 1200).with_embedder(embedder.clone());
    let corpus = store.build(&dirs).await.unwrap();
    let report = store
        .warmup(&corpus, &settings, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.total, corpus.len());
    assert_eq!(report.created, corpus.len());
    assert!(!report.aborted);
    assert!(cache_items(&cache_dir, &settings)
        .iter()
        .any(|id| id.contains("economy.txt#")));

    fs::remove_file(dirs["notes"].join("economy.txt")).unwrap();
    bump_mtime(&dirs["notes"]);
    let corpus = store.build(&dirs).await.unwrap();
    assert_eq!(store.corpus_builder().scan_count(), 2);

    let report = store
        .warmup(&corpus, &settings, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.total, 0);
    assert_eq!(report.cached, corpus.len());

    let items = cache_items(&cache_dir, &settings);
    assert_eq!(items.len(), corpus.len());
    assert!(items.iter().all(|id| !id.contains("economy.txt#")));
}

#[tokio::test]
async fn test_warmup_reports_progress_per_batch() {
    let tmp = TempDir::new().unwrap();
    let store = RetrievalStore::new(tmp.path(), 1200).with_embedder(LetterEmbedder::new());
    let corpus: Vec<Chunk> = (0..5)
        .map(|i| Chunk::new("notes", format!("{}.md", i), format!("note number {}", i)))
        .collect();
    let mut settings = vector_settings();
    settings.batch_size = 2;

    let seen = std::sync::Mutex::new(Vec::new());
    let progress = |done: usize, total: usize| seen.lock().unwrap().push((done, total));
    store
        .warmup(&corpus, &settings, &progress, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![(0, 5), (2, 5), (4, 5), (5, 5)]);
}

#[tokio::test]
async fn test_multi_query_fusion_ranks_shared_hits_first() {
    let tmp = TempDir::new().unwrap();
    let store = RetrievalStore::new(tmp.path(), 1200);
    let corpus = vec![
        Chunk::new("notes", "a.md", "village committee elections"),
        Chunk::new("notes", "b.md", "industry support for rural areas"),
        Chunk::new("notes", "c.md", "village industry and rural committee"),
    ];

    let hits = store
        .search_multi(
            &["village committee", "rural industry", "  ", "village committee"],
            &corpus,
            &SearchOptions::keyword(3, 0.2),
        )
        .await
        .unwrap();

    assert_eq!(hits[0].source, Path::new("c.md"));
    assert_eq!(hits.len(), 3);
}

#[tokio::test]
async fn test_multi_query_relaxes_threshold() {
    let tmp = TempDir::new().unwrap();
    let store = RetrievalStore::new(tmp.path(), 1200);
    let corpus = vec![
        Chunk::new("notes", "a.md", "village"),
        Chunk::new("notes", "b.md", "unrelated"),
    ];

    // Nothing reaches 0.9; relaxation still returns the best matches
    let hits = store
        .search_multi(
            &["village committee elections"],
            &corpus,
            &SearchOptions::keyword(2, 0.9),
        )
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].source, Path::new("a.md"));
}

#[tokio::test]
async fn test_multi_query_relaxed_threshold_still_filters() {
    let tmp = TempDir::new().unwrap();
    let store = RetrievalStore::new(tmp.path(), 1200);
    let corpus = vec![
        Chunk::new("notes", "alpha.md", "alpha notes"),
        Chunk::new("notes", "beta.md", "beta notes"),
        Chunk::new("notes", "gamma.md", "gamma notes"),
        Chunk::new("notes", "other.md", "unrelated notes"),
    ];

    // Each matching chunk scores 1/8 = 0.125: below 0.9, above the relaxed 0.12
    let hits = store
        .search_multi(
            &["alpha beta gamma delta epsilon zeta eta theta"],
            &corpus,
            &SearchOptions::keyword(5, 0.9),
        )
        .await
        .unwrap();

    let sources: Vec<&Path> = hits.iter().map(|h| h.source.as_path()).collect();
    assert_eq!(
        sources,
        vec![Path::new("alpha.md"), Path::new("beta.md"), Path::new("gamma.md")]
    );
    assert!(hits.iter().all(|h| h.score == 0.125));
}

#[tokio::test]
async fn test_multi_query_vector_mode_embeds_each_query_once() {
    let tmp = TempDir::new().unwrap();
    let embedder = LetterEmbedder::new();
    let store = RetrievalStore::new(tmp.path(), 1200).with_embedder(embedder.clone());
    let corpus = vec![
        Chunk::new("notes", "a.md", "aaaa"),
        Chunk::new("notes", "b.md", "bbbb"),
    ];

    let hits = store
        .search_multi(
            &["aaa", "bbb"],
            &corpus,
            &SearchOptions::vector(2, 0.99, vector_settings()),
        )
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    // two corpus chunks plus two queries, even after relaxation
    assert_eq!(embedder.texts(), 4);
}

#[tokio::test]
async fn test_search_mode_flag_values() {
    assert_eq!(SearchOptions::keyword(5, 0.2).mode, SearchMode::Keyword);
    assert_eq!(
        SearchOptions::vector(5, 0.2, vector_settings()).mode,
        SearchMode::Vector
    );
}
