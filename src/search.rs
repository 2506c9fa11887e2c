//! Query-time retrieval: embed the question, run a vector search, and
//! project the hits.
//!
//! Two search modes are supported:
//!
//! - **Exact (ENN)**: every record in the (filtered) collection is scored
//!   with cosine similarity.
//! - **Approximate (ANN)**: a binary-quantized coarse pass keeps
//!   `num_candidates` records, which are then reranked by cosine similarity.
//!   Recall improves as `num_candidates` grows relative to `limit`; pools
//!   smaller than 20× the limit are allowed but logged.
//!
//! Results are always ordered by descending score and never exceed `limit`.

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, Projection, MAX_NUM_CANDIDATES};
use crate::embedding::{self, Embedder};
use crate::error::PipelineError;
use crate::models::{QueryResult, ResultDocument};
use crate::store::sqlite::SqliteStore;
use crate::store::{ScoredRecord, VectorQuery, VectorStore};

/// ANN pools below this multiple of `limit` are logged as low-recall.
const RECOMMENDED_CANDIDATE_RATIO: u32 = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("num_candidates must not be set for exact search")]
    NumCandidatesWithExact,
    #[error("num_candidates is required for approximate search")]
    MissingNumCandidates,
    #[error("num_candidates ({num_candidates}) must be >= limit ({limit})")]
    NumCandidatesBelowLimit { num_candidates: u32, limit: u32 },
    #[error("num_candidates ({0}) must be <= {max}", max = MAX_NUM_CANDIDATES)]
    NumCandidatesTooLarge(u32),
    #[error("limit must be >= 1")]
    ZeroLimit,
    #[error("query must not be empty")]
    EmptyQuery,
}

/// Vector search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    pub num_candidates: Option<u32>,
    pub exact: bool,
    pub limit: u32,
}

impl SearchParams {
    pub fn exact(limit: u32) -> Self {
        Self {
            num_candidates: None,
            exact: true,
            limit,
        }
    }

    pub fn approximate(num_candidates: u32, limit: u32) -> Self {
        Self {
            num_candidates: Some(num_candidates),
            exact: false,
            limit,
        }
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.limit == 0 {
            return Err(SearchError::ZeroLimit);
        }
        match (self.exact, self.num_candidates) {
            (true, Some(_)) => Err(SearchError::NumCandidatesWithExact),
            (true, None) => Ok(()),
            (false, None) => Err(SearchError::MissingNumCandidates),
            (false, Some(n)) if n < self.limit => Err(SearchError::NumCandidatesBelowLimit {
                num_candidates: n,
                limit: self.limit,
            }),
            (false, Some(n)) if n > MAX_NUM_CANDIDATES => {
                Err(SearchError::NumCandidatesTooLarge(n))
            }
            (false, Some(_)) => Ok(()),
        }
    }

    /// True for an approximate search whose pool is small enough to hurt
    /// recall noticeably.
    pub fn is_low_recall(&self) -> bool {
        match (self.exact, self.num_candidates) {
            (false, Some(n)) => n < self.limit.saturating_mul(RECOMMENDED_CANDIDATE_RATIO),
            _ => false,
        }
    }
}

/// Everything `retrieve` needs besides the store and embedder.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    /// Name of the vector index to query.
    pub index: String,
    pub params: SearchParams,
    pub projection: Projection,
    pub include_scores: bool,
    /// Equality filter on the record source.
    pub source_filter: Option<String>,
}

impl RetrievalOptions {
    /// Options from the `[retrieval]` section.
    ///
    /// `num_candidates` has a default, so it is dropped when the config asks
    /// for exact search.
    pub fn from_config(config: &Config) -> Self {
        let r = &config.retrieval;
        let params = if r.exact {
            SearchParams::exact(r.limit)
        } else {
            SearchParams {
                num_candidates: r.num_candidates,
                exact: false,
                limit: r.limit,
            }
        };
        Self {
            index: config.db.index.clone(),
            params,
            projection: r.projection,
            include_scores: r.include_scores,
            source_filter: config.effective_source_filter(),
        }
    }

    /// Apply command-line overrides on top of the config values.
    pub fn with_overrides(mut self, overrides: &QueryOverrides) -> Self {
        if let Some(limit) = overrides.limit {
            self.params.limit = limit;
        }
        if overrides.exact {
            // An explicit --num-candidates alongside --exact is kept so that
            // validation reports the conflict.
            self.params.exact = true;
            self.params.num_candidates = overrides.num_candidates;
        } else if let Some(n) = overrides.num_candidates {
            self.params.exact = false;
            self.params.num_candidates = Some(n);
        }
        if overrides.all_sources {
            self.source_filter = None;
        } else if let Some(ref source) = overrides.source {
            self.source_filter = Some(source.clone());
        }
        self
    }
}

/// Per-invocation retrieval overrides from the CLI.
#[derive(Debug, Clone, Default)]
pub struct QueryOverrides {
    pub limit: Option<u32>,
    pub num_candidates: Option<u32>,
    pub exact: bool,
    pub source: Option<String>,
    pub all_sources: bool,
}

/// Embed `query` and return the best-matching records, highest score first.
pub async fn search_records(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    query: &str,
    options: &RetrievalOptions,
) -> Result<Vec<ScoredRecord>, PipelineError> {
    if query.trim().is_empty() {
        return Err(SearchError::EmptyQuery.into());
    }
    options.params.validate()?;
    if options.params.is_low_recall() {
        warn!(
            num_candidates = ?options.params.num_candidates,
            limit = options.params.limit,
            "num_candidates is below {}x limit; approximate recall may suffer",
            RECOMMENDED_CANDIDATE_RATIO
        );
    }

    let vector = embedder.embed(query).await?;
    let records = store
        .vector_search(&VectorQuery {
            index: &options.index,
            query_vector: &vector,
            model: embedder.model_name(),
            num_candidates: options.params.num_candidates,
            exact: options.params.exact,
            limit: options.params.limit,
            filter: options.source_filter.as_deref(),
        })
        .await?;

    debug!(
        results = records.len(),
        exact = options.params.exact,
        source = ?options.source_filter,
        "retrieved records"
    );
    Ok(records)
}

/// Retrieve the top matches for `query`, shaped per the configured
/// projection.
pub async fn retrieve(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    query: &str,
    options: &RetrievalOptions,
) -> Result<Vec<QueryResult>, PipelineError> {
    let records = search_records(store, embedder, query, options).await?;
    Ok(records
        .into_iter()
        .map(|r| project(r, options.projection, options.include_scores))
        .collect())
}

/// Shape one stored record into a query result.
pub fn project(record: ScoredRecord, projection: Projection, include_scores: bool) -> QueryResult {
    let score = include_scores.then_some(record.score);
    match projection {
        Projection::Text => QueryResult {
            text: record.text,
            score,
            document: None,
        },
        Projection::Document => QueryResult {
            document: Some(ResultDocument {
                page_content: record.text.clone(),
                metadata: record.metadata,
            }),
            text: record.text,
            score,
        },
    }
}

/// CLI entry point for `rag search`.
pub async fn run_search(config: &Config, query: &str, overrides: &QueryOverrides) -> Result<()> {
    let options = RetrievalOptions::from_config(config).with_overrides(overrides);
    let embedder = embedding::create_embedder(&config.embedding)?;
    let store = SqliteStore::connect(&config.db).await?;

    let result = search_records(&store, embedder.as_ref(), query, &options).await;
    store.close().await;
    let records = result?;

    info!(results = records.len(), "search complete");

    if records.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, record) in records.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} p.{} #{}",
            i + 1,
            record.score,
            record.source,
            record.page,
            record.chunk_index
        );
        println!("    excerpt: \"{}\"", excerpt(&record.text, 240));
        println!("    id: {}", record.id);
        println!();
    }

    Ok(())
}

/// Single-line excerpt of at most `max_chars` characters.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_with_candidates_is_rejected() {
        let params = SearchParams {
            num_candidates: Some(100),
            exact: true,
            limit: 5,
        };
        assert_eq!(params.validate(), Err(SearchError::NumCandidatesWithExact));
        assert!(SearchParams::exact(5).validate().is_ok());
    }

    #[test]
    fn approximate_requires_candidates() {
        let params = SearchParams {
            num_candidates: None,
            exact: false,
            limit: 5,
        };
        assert_eq!(params.validate(), Err(SearchError::MissingNumCandidates));
    }

    #[test]
    fn candidate_bounds() {
        assert_eq!(
            SearchParams::approximate(3, 5).validate(),
            Err(SearchError::NumCandidatesBelowLimit {
                num_candidates: 3,
                limit: 5
            })
        );
        assert_eq!(
            SearchParams::approximate(10_001, 5).validate(),
            Err(SearchError::NumCandidatesTooLarge(10_001))
        );
        assert!(SearchParams::approximate(10_000, 5).validate().is_ok());
        assert!(SearchParams::approximate(5, 5).validate().is_ok());
        assert_eq!(
            SearchParams::approximate(100, 0).validate(),
            Err(SearchError::ZeroLimit)
        );
    }

    #[test]
    fn low_recall_threshold() {
        assert!(!SearchParams::approximate(100, 5).is_low_recall());
        assert!(SearchParams::approximate(99, 5).is_low_recall());
        assert!(!SearchParams::exact(5).is_low_recall());
    }

    #[test]
    fn exact_config_drops_default_candidates() {
        let mut config = Config::minimal();
        config.retrieval.exact = true;
        let options = RetrievalOptions::from_config(&config);
        assert_eq!(options.params, SearchParams::exact(5));
        assert!(options.params.validate().is_ok());
    }

    #[test]
    fn overrides_switch_modes_and_filters() {
        let mut config = Config::minimal();
        config.document.path = Some("docs/manual.pdf".into());
        let base = RetrievalOptions::from_config(&config);
        assert_eq!(base.source_filter.as_deref(), Some("manual.pdf"));

        let exact = base.clone().with_overrides(&QueryOverrides {
            exact: true,
            all_sources: true,
            ..Default::default()
        });
        assert_eq!(exact.params, SearchParams::exact(5));
        assert_eq!(exact.source_filter, None);

        let ann = exact.with_overrides(&QueryOverrides {
            num_candidates: Some(400),
            limit: Some(10),
            source: Some("other.pdf".into()),
            ..Default::default()
        });
        assert_eq!(ann.params, SearchParams::approximate(400, 10));
        assert_eq!(ann.source_filter.as_deref(), Some("other.pdf"));

        let conflict = base.with_overrides(&QueryOverrides {
            exact: true,
            num_candidates: Some(50),
            ..Default::default()
        });
        assert_eq!(
            conflict.params.validate(),
            Err(SearchError::NumCandidatesWithExact)
        );
    }

    #[test]
    fn projection_shapes() {
        let record = ScoredRecord {
            id: "r1".into(),
            source: "manual.pdf".into(),
            chunk_index: 4,
            page: 2,
            text: "Winds must not exceed 13 knots.".into(),
            metadata: serde_json::json!({ "source": "manual.pdf" }),
            score: 0.91,
        };

        let text = project(record.clone(), Projection::Text, false);
        assert_eq!(text.text, "Winds must not exceed 13 knots.");
        assert_eq!(text.score, None);
        assert!(text.document.is_none());

        let doc = project(record, Projection::Document, true);
        assert_eq!(doc.score, Some(0.91));
        let wrapped = doc.document.unwrap();
        assert_eq!(wrapped.page_content, doc.text);
        assert_eq!(wrapped.metadata["source"], "manual.pdf");
    }

    #[test]
    fn excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("a\n\nb   c", 10), "a b c");
        assert_eq!(excerpt("abcdefghij", 4), "abcd...");
    }
}
