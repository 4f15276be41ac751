//! In-memory shard executor
//!
//! Holds JSON documents and evaluates term, match, numeric-range and KNN
//! queries against them. Used by the CLI to search JSON document sets and
//! by the tests as a reference shard.

use super::{FieldValueExtractor, ShardExecutor};
use crate::aggregation::{AggregationResults, AggregationTree, RangeSpec};
use crate::error::{Result, ShardfuseError};
use crate::facets::{FacetResults, FacetsBuilder};
use crate::model::{
    compare_scored, sort_hits, DocumentMatch, Explanation, PartialResult, SearchStatus,
};
use crate::search::{KnnRequest, Query, SearchRequest};
use ahash::AHashMap;
use chrono::DateTime;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Lowercase and split on anything that is not alphanumeric
pub fn analyze(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    fields: Map<String, Value>,
}

/// Scored candidate: document position, score, optional explanation
type Scored = (usize, f64, Option<Explanation>);

#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    name: String,
    docs: Vec<StoredDocument>,
    by_id: AHashMap<String, usize>,
}

impl MemoryIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docs: Vec::new(),
            by_id: AHashMap::new(),
        }
    }

    /// Build an index from JSON objects, each carrying a string `id`
    pub fn from_documents(name: impl Into<String>, documents: Vec<Value>) -> Result<Self> {
        let mut index = Self::new(name);
        for document in documents {
            index.insert(document)?;
        }
        Ok(index)
    }

    /// Load a JSON array of documents; the index is named after the file stem
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ShardfuseError::Io {
            source: e,
            context: format!("Failed to read documents from {:?}", path),
        })?;
        let documents: Vec<Value> =
            serde_json::from_str(&content).map_err(|e| ShardfuseError::Json {
                source: e,
                context: format!("Failed to parse documents in {:?}", path),
            })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "shard".to_string());
        let index = Self::from_documents(name, documents)?;
        debug!("Loaded {} documents into shard '{}'", index.len(), index.name);
        Ok(index)
    }

    /// Add or replace one document
    pub fn insert(&mut self, document: Value) -> Result<()> {
        let Value::Object(mut fields) = document else {
            return Err(self.error("document must be a JSON object"));
        };
        let id = match fields.remove("id") {
            Some(Value::String(id)) => id,
            _ => return Err(self.error("document is missing a string 'id'")),
        };
        match self.by_id.get(&id) {
            Some(&idx) => self.docs[idx].fields = fields,
            None => {
                self.by_id.insert(id.clone(), self.docs.len());
                self.docs.push(StoredDocument { id, fields });
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn error(&self, message: impl Into<String>) -> ShardfuseError {
        ShardfuseError::Executor {
            index: self.name.clone(),
            message: message.into(),
        }
    }

    fn field_value(&self, doc_id: &str, field: &str) -> Option<&Value> {
        let idx = *self.by_id.get(doc_id)?;
        self.docs[idx].fields.get(field)
    }

    fn doc_terms(doc: &StoredDocument, field: &str) -> Vec<String> {
        let mut terms = Vec::new();
        if let Some(value) = doc.fields.get(field) {
            collect_terms(value, &mut terms);
        }
        terms
    }

    fn score(
        &self,
        query: &Query,
        doc: &StoredDocument,
        explain: bool,
    ) -> Option<(f64, Option<Explanation>)> {
        match query {
            Query::MatchNone => None,
            Query::MatchAll { boost } => {
                Some((*boost, explain.then(|| Explanation::new(*boost, "match_all"))))
            }
            Query::Term { field, term, boost } => {
                let tf = Self::doc_terms(doc, field).iter().filter(|t| *t == term).count();
                if tf == 0 {
                    return None;
                }
                let score = tf as f64 * boost;
                let explanation = explain.then(|| {
                    Explanation::with_children(
                        score,
                        format!("weight({}:{}), product of:", field, term),
                        vec![
                            Explanation::new(tf as f64, "term frequency"),
                            Explanation::new(*boost, "boost"),
                        ],
                    )
                });
                Some((score, explanation))
            }
            Query::Match { field, text, boost } => {
                let doc_terms = Self::doc_terms(doc, field);
                let mut total = 0.0;
                let mut matched = false;
                let mut children = Vec::new();
                for term in analyze(text) {
                    let tf = doc_terms.iter().filter(|t| **t == term).count();
                    if tf > 0 {
                        let weight = tf as f64 * boost;
                        total += weight;
                        matched = true;
                        if explain {
                            children.push(Explanation::new(
                                weight,
                                format!(
                                    "weight({}:{}), term frequency {} x boost {}",
                                    field, term, tf, boost
                                ),
                            ));
                        }
                    }
                }
                if !matched {
                    return None;
                }
                let explanation =
                    explain.then(|| Explanation::with_children(total, "sum of:", children));
                Some((total, explanation))
            }
            Query::NumericRange {
                field,
                min,
                max,
                boost,
            } => {
                let value = doc.fields.get(field).and_then(numeric_value)?;
                if !RangeSpec::new("", *min, *max).contains(value) {
                    return None;
                }
                let explanation = explain.then(|| {
                    Explanation::new(*boost, format!("numeric range on {}, value {}", field, value))
                });
                Some((*boost, explanation))
            }
        }
    }

    /// Top `k` documents for one KNN query, boosted
    fn knn_hits(
        &self,
        position: usize,
        knn: &KnnRequest,
        request: &SearchRequest,
    ) -> Result<Vec<Scored>> {
        if let Some(presearch) = &request.knn_presearch {
            return Ok(presearch
                .iter()
                .filter_map(|hit| {
                    let idx = *self.by_id.get(&hit.id)?;
                    let score = hit.knn_score(position)?;
                    let explanation = hit.knn_explanations.get(position).cloned().flatten();
                    Some((idx, score, explanation))
                })
                .collect());
        }

        let boost = knn.effective_boost();
        let mut scored = Vec::new();
        for (idx, doc) in self.docs.iter().enumerate() {
            let Some(vector) = doc.fields.get(&knn.field).and_then(vector_value) else {
                continue;
            };
            if vector.len() != knn.vector.len() {
                return Err(self.error(format!(
                    "vector dimension mismatch on '{}' for document '{}': expected {}, found {}",
                    knn.field,
                    doc.id,
                    knn.vector.len(),
                    vector.len()
                )));
            }
            let Some(similarity) = cosine_similarity(&knn.vector, &vector) else {
                continue;
            };
            let score = similarity * boost;
            let explanation = request.explain.then(|| {
                Explanation::with_children(
                    score,
                    format!("knn({}), product of:", knn.field),
                    vec![
                        Explanation::new(similarity, "cosine similarity"),
                        Explanation::new(boost, "boost"),
                    ],
                )
            });
            scored.push((idx, score, explanation));
        }
        scored.sort_by(|a, b| compare_scored(a.1, &self.docs[a.0].id, b.1, &self.docs[b.0].id));
        scored.truncate(knn.k);
        Ok(scored)
    }

    fn new_hit(&self, idx: usize, knn_count: usize) -> DocumentMatch {
        let mut hit = DocumentMatch::new(self.docs[idx].id.clone(), 0.0);
        hit.index = Some(self.name.clone());
        hit.knn_scores = vec![None; knn_count];
        hit.knn_explanations = vec![None; knn_count];
        hit
    }

    fn load_fields(&self, idx: usize, wanted: &[String]) -> Map<String, Value> {
        let stored = &self.docs[idx].fields;
        if wanted.iter().any(|f| f == "*") {
            return stored.clone();
        }
        wanted
            .iter()
            .filter_map(|name| stored.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }
}

impl ShardExecutor for MemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, request: &SearchRequest) -> Result<PartialResult> {
        let start = Instant::now();
        let knn_count = request.knn.len();

        let mut matches: Vec<Scored> = self
            .docs
            .iter()
            .enumerate()
            .filter_map(|(idx, doc)| {
                self.score(&request.query, doc, request.explain)
                    .map(|(score, explanation)| (idx, score, explanation))
            })
            .collect();
        matches.sort_by(|a, b| compare_scored(a.1, &self.docs[a.0].id, b.1, &self.docs[b.0].id));

        // Aggregations and facets see every member, not just the returned page
        let mut members: BTreeSet<usize> = matches.iter().map(|m| m.0).collect();
        let mut hits: AHashMap<usize, DocumentMatch> = AHashMap::new();

        for (idx, score, explanation) in matches.into_iter().skip(request.from).take(request.size) {
            let hit = hits.entry(idx).or_insert_with(|| self.new_hit(idx, knn_count));
            hit.score = score;
            hit.primary_match = Some(true);
            hit.explanation = explanation;
        }

        for (position, knn) in request.knn.iter().enumerate() {
            for (idx, score, explanation) in self.knn_hits(position, knn, request)? {
                members.insert(idx);
                let hit = hits.entry(idx).or_insert_with(|| self.new_hit(idx, knn_count));
                hit.knn_scores[position] = Some(score);
                hit.knn_explanations[position] = explanation;
            }
        }

        let aggregations = match &request.aggregations {
            Some(aggregations) => {
                let mut tree = AggregationTree::build(aggregations)?;
                for idx in &members {
                    tree.consume(&self.docs[*idx].id, self);
                }
                tree.results()
            }
            None => AggregationResults::default(),
        };

        let facets = match &request.facets {
            Some(facets) => {
                let mut builder = FacetsBuilder::build(facets)?;
                for idx in &members {
                    builder.consume(&self.docs[*idx].id, self);
                }
                builder.results()
            }
            None => FacetResults::default(),
        };

        let mut hits: Vec<DocumentMatch> = hits
            .into_iter()
            .map(|(idx, mut hit)| {
                if !request.fields.is_empty() {
                    hit.fields = self.load_fields(idx, &request.fields);
                }
                hit
            })
            .collect();
        sort_hits(&mut hits);
        let max_score = hits.iter().map(|h| h.score).fold(0.0, f64::max);

        debug!(
            "Shard '{}' matched {} documents, returning {} hits",
            self.name,
            members.len(),
            hits.len()
        );

        Ok(PartialResult {
            status: SearchStatus::success(),
            hits,
            total: members.len() as u64,
            max_score,
            aggregations,
            facets,
            took: start.elapsed(),
        })
    }
}

impl FieldValueExtractor for MemoryIndex {
    fn numeric(&self, doc_id: &str, field: &str) -> Option<f64> {
        self.field_value(doc_id, field).and_then(numeric_value)
    }

    fn terms(&self, doc_id: &str, field: &str) -> Vec<String> {
        let mut terms = Vec::new();
        if let Some(value) = self.field_value(doc_id, field) {
            collect_terms(value, &mut terms);
        }
        terms
    }
}

/// Numbers as-is, RFC 3339 strings as epoch milliseconds; the first usable
/// element of an array
fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis() as f64),
        Value::Array(items) => items.iter().find_map(numeric_value),
        _ => None,
    }
}

fn collect_terms(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(analyze(s)),
        Value::Array(items) => items.iter().for_each(|item| collect_terms(item, out)),
        Value::Bool(b) => out.push(b.to_string()),
        _ => {}
    }
}

fn vector_value(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}
