//! World-knowledge retrieval.
//!
//! The engine consumes the opaque [`KnowledgeStore`] capability; any
//! nearest-neighbour search satisfies it. The bundled
//! [`MemoryKnowledgeStore`] hashes tokens into fixed-dimension vectors
//! and ranks by cosine similarity, which is plenty for the game's small
//! world corpus and for tests.

use std::collections::HashMap;
use std::hash::Hasher;

use async_trait::async_trait;
use fnv::FnvHasher;
use serde::{Deserialize, Serialize};

use kotoba_types::request::ClassifiedRequest;

/// A document in the knowledge corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDoc {
    /// Stable document id.
    pub id: String,
    /// The document body.
    pub text: String,
    /// Arbitrary metadata; `importance` (number) drives result ordering,
    /// `type` is commonly used for filtering.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// One search result.
#[derive(Debug, Clone)]
pub struct KnowledgeHit {
    /// Id of the matched document.
    pub id: String,
    /// The document body.
    pub document: String,
    /// The document metadata.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Similarity score (higher is closer).
    pub score: f32,
}

/// Opaque retrieval capability.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Top-k documents for `query`, optionally filtered by metadata
    /// equality.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&HashMap<String, serde_json::Value>>,
    ) -> Vec<KnowledgeHit>;

    /// Search with the query enhanced by the request's game context.
    ///
    /// The base query is the player input; location, objective, and the
    /// intent label are appended. Results from the plain and enhanced
    /// queries are merged (deduplicated by document id, keeping the
    /// higher score) and ordered by metadata `importance`, then score.
    async fn contextual_search(&self, request: &ClassifiedRequest, top_k: usize) -> Vec<KnowledgeHit> {
        let input = request.player_input();
        let mut enhanced = input.to_string();
        if let Some(context) = &request.request.game_context {
            if !context.player_location.is_empty() {
                enhanced.push(' ');
                enhanced.push_str(&context.player_location);
            }
            if !context.current_objective.is_empty() {
                enhanced.push(' ');
                enhanced.push_str(&context.current_objective);
            }
        }
        enhanced.push(' ');
        enhanced.push_str(request.intent.label());

        let mut merged: HashMap<String, KnowledgeHit> = HashMap::new();
        for hit in self.search(input, top_k, None).await {
            merged.insert(hit.id.clone(), hit);
        }
        for hit in self.search(&enhanced, top_k, None).await {
            merged
                .entry(hit.id.clone())
                .and_modify(|existing| {
                    if hit.score > existing.score {
                        existing.score = hit.score;
                    }
                })
                .or_insert(hit);
        }

        let mut results: Vec<KnowledgeHit> = merged.into_values().collect();
        results.sort_by(|a, b| {
            importance(b)
                .partial_cmp(&importance(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        results.truncate(top_k);
        results
    }
}

fn importance(hit: &KnowledgeHit) -> f64 {
    hit.metadata
        .get("importance")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
}

/// In-memory hash-embedding store.
#[derive(Debug, Default)]
pub struct MemoryKnowledgeStore {
    docs: Vec<(KnowledgeDoc, Vec<f32>)>,
}

impl MemoryKnowledgeStore {
    /// Embedding dimensionality.
    const DIM: usize = 128;

    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store preloaded with `docs`.
    pub fn from_docs(docs: Vec<KnowledgeDoc>) -> Self {
        let mut store = Self::new();
        for doc in docs {
            store.add(doc);
        }
        store
    }

    /// Add a document.
    pub fn add(&mut self, doc: KnowledgeDoc) {
        let embedding = embed(&doc.text, Self::DIM);
        self.docs.push((doc, embedding));
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// `true` when the corpus is empty.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&HashMap<String, serde_json::Value>>,
    ) -> Vec<KnowledgeHit> {
        if top_k == 0 || self.docs.is_empty() {
            return Vec::new();
        }
        let query_embedding = embed(query, Self::DIM);

        let mut hits: Vec<KnowledgeHit> = self
            .docs
            .iter()
            .filter(|(doc, _)| {
                filters.is_none_or(|filters| {
                    filters
                        .iter()
                        .all(|(key, value)| doc.metadata.get(key) == Some(value))
                })
            })
            .map(|(doc, embedding)| KnowledgeHit {
                id: doc.id.clone(),
                document: doc.text.clone(),
                metadata: doc.metadata.clone(),
                score: cosine_similarity(&query_embedding, embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        hits
    }
}

/// Token-hash embedding: each token increments a dimension chosen by its
/// FNV hash; the vector is L2-normalized.
fn embed(text: &str, dim: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dim];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hasher = FnvHasher::default();
        hasher.write(token.as_bytes());
        let index = (hasher.finish() % dim as u64) as usize;
        vector[index] += 1.0;
    }

    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// The built-in station world corpus.
pub fn builtin_world() -> Vec<KnowledgeDoc> {
    fn meta(kind: &str, importance: f64, title: &str) -> HashMap<String, serde_json::Value> {
        HashMap::from([
            ("type".into(), serde_json::Value::String(kind.into())),
            ("importance".into(), serde_json::json!(importance)),
            ("title".into(), serde_json::Value::String(title.into())),
        ])
    }

    vec![
        KnowledgeDoc {
            id: "ticket-machines".into(),
            text: "Ticket machines are to the right of the main entrance. \
                   'Kippu' means ticket; ask for きっぷ at the counter."
                .into(),
            metadata: meta("location", 0.9, "Ticket machines"),
        },
        KnowledgeDoc {
            id: "platform-guide".into(),
            text: "Platforms are numbered; the Odawara line departs from \
                   platform 2. Follow the blue signs."
                .into(),
            metadata: meta("location", 0.8, "Platform guide"),
        },
        KnowledgeDoc {
            id: "particle-wa-ga".into(),
            text: "The particle は (wa) marks the topic; が (ga) marks the \
                   subject. Station announcements mostly use は."
                .into(),
            metadata: meta("language_learning", 0.7, "Particles wa and ga"),
        },
        KnowledgeDoc {
            id: "greetings".into(),
            text: "すみません (sumimasen) means 'excuse me' and opens most \
                   polite requests to station staff."
                .into(),
            metadata: meta("language_learning", 0.6, "Polite greetings"),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use kotoba_types::request::{
        AssistRequest, Complexity, GameContext, Intent, Tier,
    };

    fn store() -> MemoryKnowledgeStore {
        MemoryKnowledgeStore::from_docs(builtin_world())
    }

    fn classified(input: &str, context: Option<GameContext>) -> ClassifiedRequest {
        let mut request = AssistRequest::new(input, "general");
        request.game_context = context;
        ClassifiedRequest {
            request,
            intent: Intent::DirectionGuidance,
            complexity: Complexity::Simple,
            preferred_tier: Tier::Tier1,
            confidence: 0.8,
            extracted_entities: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn search_ranks_relevant_docs_first() {
        let store = store();
        let hits = store.search("where are the ticket machines", 2, None).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "ticket-machines");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn search_empty_store_and_zero_k() {
        let empty = MemoryKnowledgeStore::new();
        assert!(empty.search("anything", 3, None).await.is_empty());
        assert!(store().search("ticket", 0, None).await.is_empty());
    }

    #[tokio::test]
    async fn search_respects_filters() {
        let store = store();
        let filters = HashMap::from([(
            "type".to_string(),
            serde_json::Value::String("language_learning".into()),
        )]);
        let hits = store.search("ticket station", 10, Some(&filters)).await;
        assert!(!hits.is_empty());
        for hit in hits {
            assert_eq!(hit.metadata["type"], "language_learning");
        }
    }

    #[tokio::test]
    async fn contextual_search_sorted_by_importance_then_score() {
        let store = store();
        let request = classified(
            "how do I get to the platform",
            Some(GameContext {
                player_location: "ticket hall".into(),
                current_objective: "buy a ticket to Odawara".into(),
                ..GameContext::default()
            }),
        );
        let hits = store.contextual_search(&request, 3).await;
        assert!(!hits.is_empty());
        let importances: Vec<f64> = hits
            .iter()
            .map(|h| h.metadata["importance"].as_f64().unwrap())
            .collect();
        let mut sorted = importances.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert_eq!(importances, sorted);
    }

    #[tokio::test]
    async fn contextual_search_merges_without_duplicates() {
        let store = store();
        let request = classified("ticket", None);
        let hits = store.contextual_search(&request, 10).await;
        let mut ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), hits.len());
    }

    #[test]
    fn embed_is_normalized_and_deterministic() {
        let a = embed("ticket machine station", 128);
        let b = embed("ticket machine station", 128);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn identical_texts_score_one() {
        let a = embed("kippu means ticket", 128);
        let b = embed("kippu means ticket", 128);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let v = embed("", 128);
        assert!(v.iter().all(|&x| x == 0.0));
    }
}
