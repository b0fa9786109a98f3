//! Two-stage action matching.
//!
//! Actions are an immutable arena. Their description embeddings are kept in
//! a separate map keyed by action id and follow write-once-settle: a value is
//! only ever written while the action has no embedding, so a `Ready` entry
//! never changes. Query-time readers work on a snapshot of the map.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::action::AppAction;
use crate::catalog::OPEN_APP_ACTION_ID;
use lumen_core::vector::{cosine_similarity, is_zero_vector};
use lumen_infer::EmbeddingEncoder;

/// Per-action embedding lifecycle. A missing map entry means uninitialized.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingState {
    Pending,
    Ready(Arc<[f32]>),
    /// Retryable via [`ActionMatcher::retry_failed_embeddings`].
    Failed,
}

/// Minimum cosine similarity for a semantic match (strictly greater than).
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub standard: f32,
    pub open_app: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            standard: 0.7,
            open_app: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchKind {
    Exact,
    Semantic { similarity: f32 },
}

#[derive(Debug, Clone, Copy)]
pub struct ActionMatch<'a> {
    pub action: &'a AppAction,
    pub kind: MatchKind,
}

pub struct ActionMatcher {
    actions: Vec<AppAction>,
    embeddings: RwLock<HashMap<String, EmbeddingState>>,
    encoder: Arc<EmbeddingEncoder>,
    thresholds: Thresholds,
}

impl ActionMatcher {
    pub fn new(actions: Vec<AppAction>, encoder: Arc<EmbeddingEncoder>) -> Self {
        Self {
            actions,
            embeddings: RwLock::new(HashMap::new()),
            encoder,
            thresholds: Thresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn actions(&self) -> &[AppAction] {
        &self.actions
    }

    pub fn embedding_state(&self, action_id: &str) -> Option<EmbeddingState> {
        self.embeddings.read().get(action_id).cloned()
    }

    /// Number of actions eligible for semantic matching.
    pub fn ready_count(&self) -> usize {
        self.embeddings
            .read()
            .values()
            .filter(|s| matches!(s, EmbeddingState::Ready(_)))
            .count()
    }

    /// Compute description embeddings on the blocking pool.
    ///
    /// Exact matching works while this runs. Resolves to the number of
    /// actions that became ready.
    pub fn initialize_embeddings(self: &Arc<Self>) -> JoinHandle<usize> {
        let matcher = Arc::clone(self);
        tokio::task::spawn_blocking(move || matcher.embed_absent())
    }

    /// Re-attempt actions that still lack an embedding. Ready actions are not
    /// touched. An encoder disabled by an earlier failure is re-enabled first.
    pub fn retry_failed_embeddings(&self) -> usize {
        self.encoder.reinitialize();
        self.embed_absent()
    }

    fn embed_absent(&self) -> usize {
        let mut todo: Vec<&AppAction> = Vec::new();
        {
            let mut map = self.embeddings.write();
            for action in &self.actions {
                if !matches!(map.get(&action.id), Some(EmbeddingState::Ready(_))) {
                    map.insert(action.id.clone(), EmbeddingState::Pending);
                    todo.push(action);
                }
            }
        }

        let mut ready = 0usize;
        for action in todo {
            let state = match action.primary_description() {
                Some(desc) if self.encoder.is_ready() => {
                    let desc = desc.to_lowercase();
                    let embedding = self
                        .encoder
                        .encode_batch(&[desc.as_str()])
                        .pop()
                        .unwrap_or_default();
                    if is_zero_vector(&embedding) {
                        EmbeddingState::Failed
                    } else {
                        EmbeddingState::Ready(embedding.into())
                    }
                }
                _ => EmbeddingState::Failed,
            };

            let mut map = self.embeddings.write();
            if matches!(map.get(&action.id), Some(EmbeddingState::Ready(_))) {
                continue;
            }
            if matches!(state, EmbeddingState::Ready(_)) {
                ready += 1;
            } else {
                warn!("Embedding for action '{}' unavailable", action.id);
            }
            map.insert(action.id.clone(), state);
        }

        info!("Action embeddings: {} newly ready, {} total ready", ready, self.ready_count());
        ready
    }

    /// Best action for `query`, or `None` to fall through to chat.
    pub fn find_best_action(&self, query: &str) -> Option<&AppAction> {
        self.find_best_match(query).map(|m| m.action)
    }

    pub fn find_best_match(&self, query: &str) -> Option<ActionMatch<'_>> {
        let normalized = query.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        // Exact stage: first declared action with a phrase inside the query.
        let exact = self.actions.iter().find(|a| {
            a.descriptions.iter().any(|d| {
                let phrase = d.trim().to_lowercase();
                !phrase.is_empty() && normalized.contains(&phrase)
            })
        });
        if let Some(action) = exact {
            debug!("Exact action match: {}", action.id);
            return Some(ActionMatch {
                action,
                kind: MatchKind::Exact,
            });
        }

        self.semantic_match(&normalized)
    }

    fn semantic_match(&self, normalized: &str) -> Option<ActionMatch<'_>> {
        if !self.encoder.is_ready() {
            return None;
        }
        let snapshot: HashMap<String, Arc<[f32]>> = self
            .embeddings
            .read()
            .iter()
            .filter_map(|(id, s)| match s {
                EmbeddingState::Ready(e) => Some((id.clone(), Arc::clone(e))),
                _ => None,
            })
            .collect();
        if snapshot.is_empty() {
            return None;
        }

        let query = self.encoder.encode(normalized);
        if is_zero_vector(&query) {
            return None;
        }

        let mut best: Option<(&AppAction, f32)> = None;
        for action in &self.actions {
            let Some(embedding) = snapshot.get(&action.id) else {
                continue;
            };
            let sim = cosine_similarity(&query, embedding);
            if best.map_or(true, |(_, b)| sim > b) {
                best = Some((action, sim));
            }
        }

        let (action, similarity) = best?;
        let threshold = if action.id == OPEN_APP_ACTION_ID {
            self.thresholds.open_app
        } else {
            self.thresholds.standard
        };
        debug!(
            "Best semantic action {} sim={:.3} threshold={}",
            action.id, similarity, threshold
        );
        (similarity > threshold).then_some(ActionMatch {
            action,
            kind: MatchKind::Semantic { similarity },
        })
    }

    /// Run the action's handler, falling back to its static response.
    pub fn execute_action(&self, action: &AppAction, query: &str) -> String {
        match (action.handler)(query) {
            Some(text) if !text.trim().is_empty() => text,
            _ => action.static_response.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;
    use lumen_core::{Error, Result};
    use lumen_infer::EmbedderBackend;
    use ndarray::Array1;
    use parking_lot::Mutex;

    const DIM: usize = 4;

    /// Phrase-to-vector table. Unknown text maps to the last axis, which no
    /// action uses, so it has zero similarity to every action.
    struct TableBackend {
        table: Mutex<HashMap<String, Vec<f32>>>,
        failing: Mutex<Option<String>>,
    }

    impl TableBackend {
        fn new(entries: &[(&str, [f32; DIM])]) -> Arc<Self> {
            Arc::new(Self {
                table: Mutex::new(
                    entries
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_vec()))
                        .collect(),
                ),
                failing: Mutex::new(None),
            })
        }

        fn fail_on(&self, text: Option<&str>) {
            *self.failing.lock() = text.map(str::to_string);
        }

        fn set(&self, text: &str, v: [f32; DIM]) {
            self.table.lock().insert(text.to_string(), v.to_vec());
        }
    }

    impl EmbedderBackend for TableBackend {
        fn embed(&self, text: &str) -> Result<Array1<f32>> {
            if self.failing.lock().as_deref() == Some(text) {
                return Err(Error::Inference("model busy".into()));
            }
            match self.table.lock().get(text) {
                Some(v) => Ok(Array1::from_vec(v.clone())),
                None if text == "boom" => Err(Error::Inference("boom".into())),
                None => Ok(Array1::from_vec(vec![0.0, 0.0, 0.0, 1.0])),
            }
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn camera_catalog() -> Vec<AppAction> {
        vec![
            AppAction::new("open_camera", &["open camera"], "Opening the camera."),
            AppAction::new("take_photo", &["take photo"], "Taking a photo."),
            AppAction::new(OPEN_APP_ACTION_ID, &["open the app"], "Which app?")
                .with_handler(|q| q.split_whitespace().last().map(|w| format!("Opening {}.", w))),
        ]
    }

    async fn ready_matcher(backend: Arc<TableBackend>) -> Arc<ActionMatcher> {
        let encoder = Arc::new(EmbeddingEncoder::new(backend, DIM));
        let matcher = Arc::new(ActionMatcher::new(camera_catalog(), encoder));
        matcher.initialize_embeddings().await.unwrap();
        matcher
    }

    fn table() -> Arc<TableBackend> {
        TableBackend::new(&[
            ("open camera", [1.0, 0.0, 0.0, 0.0]),
            ("take photo", [0.0, 1.0, 0.0, 0.0]),
            ("open the app", [0.0, 0.0, 1.0, 0.0]),
        ])
    }

    #[tokio::test]
    async fn test_exact_match_beats_closer_semantic_match() {
        let backend = table();
        // The query embeds exactly like "take photo".
        backend.set("please open camera now", [0.0, 1.0, 0.0, 0.0]);
        let matcher = ready_matcher(backend).await;

        let m = matcher.find_best_match("  Please OPEN camera now ").unwrap();
        assert_eq!(m.action.id, "open_camera");
        assert_eq!(m.kind, MatchKind::Exact);
    }

    #[test]
    fn test_exact_match_without_encoder() {
        let matcher = ActionMatcher::new(default_catalog(), Arc::new(EmbeddingEncoder::unavailable(DIM)));
        assert_eq!(matcher.find_best_action("please open camera now").unwrap().id, "open_camera");
        assert!(matcher.find_best_action("open spotify").is_none());
    }

    #[test]
    fn test_first_declared_wins() {
        let matcher = ActionMatcher::new(default_catalog(), Arc::new(EmbeddingEncoder::unavailable(DIM)));
        let action = matcher.find_best_action("take a photo then open settings").unwrap();
        assert_eq!(action.id, "take_photo");
    }

    #[tokio::test]
    async fn test_semantic_match_above_threshold() {
        let backend = table();
        backend.set("snap a picture", [0.1, 0.9, 0.0, 0.0]);
        let matcher = ready_matcher(backend).await;

        let m = matcher.find_best_match("snap a picture").unwrap();
        assert_eq!(m.action.id, "take_photo");
        assert!(matches!(m.kind, MatchKind::Semantic { similarity } if similarity > 0.9));
    }

    #[tokio::test]
    async fn test_unrelated_query_matches_nothing() {
        let matcher = ready_matcher(table()).await;
        assert!(matcher.find_best_action("what's 2+2").is_none());
    }

    #[tokio::test]
    async fn test_open_app_uses_lower_threshold() {
        let backend = table();
        // cos = 0.6 against "open the app" and against "take photo" respectively.
        backend.set("fire up spotify", [0.0, 0.0, 0.6, 0.8]);
        backend.set("grab a snapshot", [0.0, 0.6, 0.0, 0.8]);
        let matcher = ready_matcher(backend).await;

        let action = matcher.find_best_action("fire up spotify").unwrap();
        assert_eq!(action.id, OPEN_APP_ACTION_ID);
        assert_eq!(matcher.execute_action(action, "fire up spotify"), "Opening spotify.");

        assert!(matcher.find_best_action("grab a snapshot").is_none());
    }

    #[tokio::test]
    async fn test_failed_embedding_is_skipped_then_retried() {
        let backend = table();
        backend.set("take photo", [0.0; DIM]);
        let matcher = ready_matcher(backend.clone()).await;

        assert_eq!(matcher.embedding_state("take_photo"), Some(EmbeddingState::Failed));
        assert_eq!(matcher.ready_count(), 2);
        backend.set("snap a picture", [0.0, 1.0, 0.0, 0.0]);
        assert!(matcher.find_best_action("snap a picture").is_none());

        // Retry fills only the absent embedding; ready ones keep their value.
        backend.set("take photo", [0.0, 1.0, 0.0, 0.0]);
        backend.set("open camera", [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(matcher.retry_failed_embeddings(), 1);
        assert_eq!(
            matcher.embedding_state("open_camera"),
            Some(EmbeddingState::Ready(vec![1.0, 0.0, 0.0, 0.0].into()))
        );
        assert_eq!(matcher.find_best_action("snap a picture").unwrap().id, "take_photo");
    }

    #[test]
    fn test_retry_recovers_from_transient_encoder_failure() {
        let backend = table();
        backend.fail_on(Some("take photo"));
        let encoder = Arc::new(EmbeddingEncoder::new(backend.clone(), DIM));
        let matcher = ActionMatcher::new(camera_catalog(), Arc::clone(&encoder));

        assert_eq!(matcher.retry_failed_embeddings(), 1);
        assert!(!encoder.is_ready());
        assert_eq!(matcher.embedding_state("take_photo"), Some(EmbeddingState::Failed));
        assert_eq!(matcher.embedding_state(OPEN_APP_ACTION_ID), Some(EmbeddingState::Failed));

        backend.fail_on(None);
        assert_eq!(matcher.retry_failed_embeddings(), 2);
        assert!(encoder.is_ready());
        assert_eq!(matcher.ready_count(), 3);
    }

    #[test]
    fn test_unready_encoder_marks_all_failed() {
        let matcher = ActionMatcher::new(camera_catalog(), Arc::new(EmbeddingEncoder::unavailable(DIM)));
        assert_eq!(matcher.retry_failed_embeddings(), 0);
        assert!(matcher
            .actions()
            .iter()
            .all(|a| matcher.embedding_state(&a.id) == Some(EmbeddingState::Failed)));
    }

    #[tokio::test]
    async fn test_zero_query_vector_matches_nothing() {
        let backend = table();
        backend.set("hmm", [0.0; DIM]);
        let matcher = ready_matcher(backend).await;
        assert_eq!(cosine_similarity(&[0.0; DIM], &[1.0, 0.0, 0.0, 0.0]), 0.0);
        assert!(matcher.find_best_action("hmm").is_none());
    }

    #[test]
    fn test_execute_falls_back_to_static_response() {
        let matcher = ActionMatcher::new(camera_catalog(), Arc::new(EmbeddingEncoder::unavailable(DIM)));
        let camera = &matcher.actions()[0];
        assert_eq!(matcher.execute_action(camera, "open camera"), "Opening the camera.");

        let blank = AppAction::new("blank", &["blank"], "Done.").with_handler(|_| Some("  ".into()));
        assert_eq!(matcher.execute_action(&blank, "blank"), "Done.");
    }
}
