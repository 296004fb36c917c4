mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tempfile::TempDir;

use mido::config::InitialStateConfig;
use mido::memory::types::CONSOLIDATED_FROM;
use mido::memory::{MemorySettings, MemoryType, Metadata, RetrievalMode, SearchFilter};
use mido::state::StateSnapshot;
use mido::Error;

use helpers::{FailingEmbedder, SwitchableEmbedder};

fn state(focus: &str) -> StateSnapshot {
    let mut s = StateSnapshot::initial(&InitialStateConfig::default());
    s.focus = focus.into();
    s
}

#[test]
fn semantic_retrieval_ranks_closest_first() {
    let dir = TempDir::new().unwrap();
    let mut memory = helpers::open_manager(dir.path());
    memory
        .form_memory(MemoryType::Semantic, "the kettle is in the kitchen cupboard", Metadata::new())
        .unwrap();
    memory
        .form_memory(MemoryType::Episodic, "walked the dog around the park", Metadata::new())
        .unwrap();
    memory
        .form_memory(MemoryType::Conversation, "greeted the user warmly", Metadata::new())
        .unwrap();

    let recall = memory
        .retrieve_relevant("greeting the user", &state("idle"), 1, &SearchFilter::default())
        .unwrap();
    assert_eq!(recall.mode, RetrievalMode::Semantic);
    assert_eq!(recall.entries.len(), 1);
    assert_eq!(recall.entries[0].content, "greeted the user warmly");
    assert!(recall.entries[0].embedding.is_some());
}

#[test]
fn blank_query_falls_back_to_focus() {
    let dir = TempDir::new().unwrap();
    let mut memory = helpers::open_manager(dir.path());
    memory
        .form_memory(MemoryType::Procedural, "repotting ferns needs fresh soil", Metadata::new())
        .unwrap();
    memory
        .form_memory(MemoryType::Semantic, "the train leaves at nine", Metadata::new())
        .unwrap();

    let recall = memory
        .retrieve_relevant("   ", &state("repotting ferns"), 1, &SearchFilter::default())
        .unwrap();
    assert_eq!(recall.entries[0].content, "repotting ferns needs fresh soil");
}

#[test]
fn zero_k_returns_nothing() {
    let dir = TempDir::new().unwrap();
    let mut memory = helpers::open_manager(dir.path());
    memory
        .form_memory(MemoryType::Semantic, "a fact", Metadata::new())
        .unwrap();
    let recall = memory
        .retrieve_relevant("fact", &state("idle"), 0, &SearchFilter::default())
        .unwrap();
    assert!(recall.entries.is_empty());
}

#[test]
fn filters_apply_before_the_limit() {
    let dir = TempDir::new().unwrap();
    let mut memory = helpers::open_manager(dir.path());
    memory
        .form_memory(MemoryType::Episodic, "tea with lemon", Metadata::new())
        .unwrap();
    memory
        .form_memory(MemoryType::Semantic, "tea grows on hillsides", Metadata::new())
        .unwrap();

    let filter = SearchFilter::default().with_type(MemoryType::Semantic);
    let recall = memory
        .retrieve_relevant("tea with lemon", &state("idle"), 1, &filter)
        .unwrap();
    assert_eq!(recall.entries.len(), 1);
    assert_eq!(recall.entries[0].memory_type, MemoryType::Semantic);

    let filter = SearchFilter::default().min_importance(0.5);
    let recall = memory
        .retrieve_relevant("tea", &state("idle"), 5, &filter)
        .unwrap();
    assert!(recall.entries.iter().all(|e| e.importance >= 0.5));
    assert_eq!(recall.entries.len(), 1);
}

#[test]
fn embedding_outage_degrades_to_recency() {
    let dir = TempDir::new().unwrap();
    let mut memory =
        helpers::open_manager_with(dir.path(), Arc::new(FailingEmbedder), MemorySettings::default())
            .unwrap();

    for text in ["first", "second", "third"] {
        match memory.form_memory(MemoryType::Episodic, text, Metadata::new()) {
            Err(Error::Embedding { id: Some(_), .. }) => {}
            other => panic!("expected an embedding error carrying the id, got {other:?}"),
        }
    }
    assert_eq!(memory.log().len(), 3);
    assert_eq!(memory.pending().len(), 3);

    let recall = memory
        .retrieve_relevant("anything", &state("idle"), 2, &SearchFilter::default())
        .unwrap();
    assert_eq!(recall.mode, RetrievalMode::Recency);
    let contents: Vec<&str> = recall.entries.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["third", "second"]);
}

#[test]
fn provider_failure_with_populated_index_uses_recency() {
    let dir = TempDir::new().unwrap();
    let embedder = Arc::new(SwitchableEmbedder::new());
    let mut memory =
        helpers::open_manager_with(dir.path(), embedder.clone(), MemorySettings::default()).unwrap();
    memory
        .form_memory(MemoryType::Semantic, "indexed while healthy", Metadata::new())
        .unwrap();

    embedder.set_available(false);
    let recall = memory
        .retrieve_relevant("healthy", &state("idle"), 3, &SearchFilter::default())
        .unwrap();
    assert_eq!(recall.mode, RetrievalMode::Recency);
    assert_eq!(recall.entries.len(), 1);
}

#[test]
fn pending_entries_are_indexed_once_the_provider_recovers() {
    let dir = TempDir::new().unwrap();
    let embedder = Arc::new(SwitchableEmbedder::new());
    let mut memory =
        helpers::open_manager_with(dir.path(), embedder.clone(), MemorySettings::default()).unwrap();

    embedder.set_available(false);
    let err = memory
        .form_memory(MemoryType::Semantic, "learned during the outage", Metadata::new())
        .unwrap_err();
    let id = match err {
        Error::Embedding { id: Some(id), .. } => id,
        other => panic!("unexpected error: {other}"),
    };
    assert!(memory.pending().contains(&id));
    assert!(!memory.index().contains(id).unwrap());

    embedder.set_available(true);
    let recall = memory
        .retrieve_relevant("outage", &state("idle"), 1, &SearchFilter::default())
        .unwrap();
    assert_eq!(recall.mode, RetrievalMode::Semantic);
    assert_eq!(recall.entries[0].id, id);
    assert!(memory.pending().is_empty());
    assert!(embedder.calls.load(Ordering::SeqCst) >= 3);
}

#[test]
fn retrieval_counts_accesses() {
    let dir = TempDir::new().unwrap();
    let mut memory = helpers::open_manager(dir.path());
    let entry = memory
        .form_memory(MemoryType::Semantic, "the door code is blue", Metadata::new())
        .unwrap();

    for _ in 0..2 {
        memory
            .retrieve_relevant("door code", &state("idle"), 1, &SearchFilter::default())
            .unwrap();
    }
    let stats = memory.index().access_stats().unwrap();
    assert_eq!(stats[&entry.id].count, 2);
    assert!(stats[&entry.id].last_accessed.is_some());
}

#[test]
fn empty_content_is_rejected_without_writing() {
    let dir = TempDir::new().unwrap();
    let mut memory = helpers::open_manager(dir.path());
    let err = memory
        .form_memory(MemoryType::Semantic, "  \n", Metadata::new())
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(memory.log().is_empty());
}

#[test]
fn metadata_filters_agree_across_retrieval_modes() {
    let dir = TempDir::new().unwrap();
    let embedder = Arc::new(SwitchableEmbedder::new());
    let mut memory =
        helpers::open_manager_with(dir.path(), embedder.clone(), MemorySettings::default()).unwrap();
    let mut metadata = Metadata::new();
    metadata.insert("salient".into(), serde_json::json!(true));
    metadata.insert("step".into(), serde_json::json!(4));
    memory
        .form_memory(MemoryType::Episodic, "the kettle whistled", metadata)
        .unwrap();

    let cases = [
        (SearchFilter::default().with_metadata("salient", true), 1),
        (SearchFilter::default().with_metadata("salient", 1), 0),
        (SearchFilter::default().with_metadata("step", 4), 1),
        (SearchFilter::default().with_metadata("step", 4.0), 0),
        (SearchFilter::default().with_metadata("step", "4"), 0),
    ];
    for (filter, expected) in &cases {
        embedder.set_available(true);
        let semantic = memory
            .retrieve_relevant("kettle", &state("idle"), 5, filter)
            .unwrap();
        assert_eq!(semantic.mode, RetrievalMode::Semantic);

        embedder.set_available(false);
        let recency = memory
            .retrieve_relevant("kettle", &state("idle"), 5, filter)
            .unwrap();
        assert_eq!(recency.mode, RetrievalMode::Recency);

        assert_eq!(semantic.entries.len(), *expected, "semantic, {filter:?}");
        assert_eq!(recency.entries.len(), *expected, "recency, {filter:?}");
    }
}

#[test]
fn content_without_words_stops_being_retried() {
    let dir = TempDir::new().unwrap();
    let embedder = Arc::new(SwitchableEmbedder::new());
    let mut memory =
        helpers::open_manager_with(dir.path(), embedder.clone(), MemorySettings::default()).unwrap();
    memory
        .form_memory(MemoryType::Episodic, "the kettle boiled", Metadata::new())
        .unwrap();
    let id = match memory.form_memory(MemoryType::Episodic, "?! ...", Metadata::new()) {
        Err(Error::Embedding { id: Some(id), .. }) => id,
        other => panic!("expected an embedding error carrying the id, got {other:?}"),
    };
    assert!(memory.pending().contains(&id));

    memory
        .retrieve_relevant("kettle", &state("idle"), 5, &SearchFilter::default())
        .unwrap();
    assert!(memory.pending().is_empty());
    assert!(memory.unembeddable().contains(&id));

    // Only the query is embedded from now on.
    let before = embedder.calls.load(Ordering::SeqCst);
    memory
        .retrieve_relevant("kettle", &state("idle"), 5, &SearchFilter::default())
        .unwrap();
    assert_eq!(embedder.calls.load(Ordering::SeqCst), before + 1);
    drop(memory);

    let reopened =
        helpers::open_manager_with(dir.path(), embedder.clone(), MemorySettings::default()).unwrap();
    assert!(reopened.pending().is_empty());
    assert!(reopened.unembeddable().contains(&id));
}

#[test]
fn reserved_summary_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut memory = helpers::open_manager(dir.path());
    let mut metadata = Metadata::new();
    metadata.insert(CONSOLIDATED_FROM.into(), serde_json::json!([1, 2]));

    let err = memory
        .form_memory(MemoryType::Semantic, "looks like a summary", metadata)
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(memory.log().is_empty());
}
