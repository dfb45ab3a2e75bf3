//! Roadmap enrichment.
//!
//! Every learning objective of every step is queried concurrently. All
//! queries run to completion before the roadmap is reassembled, and a
//! failed or timed-out query only costs its own objective its sources.
//!
//! Results are matched back to steps by position: the flat result list is
//! in the same (step, objective) traversal order as the queries that were
//! issued, and is consumed in that order.

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{error, info};

use pathwise_core::models::{LearningStep, QueryResult};
use pathwise_core::retrieval::{RetrievalError, SourceRetriever};

/// An objective whose retrieval failed. Its step keeps every other
/// objective's sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectiveFailure {
    pub week: i64,
    pub step_index: usize,
    pub objective_index: usize,
    pub objective: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichOutcome {
    pub steps: Vec<LearningStep>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ObjectiveFailure>,
}

/// Attach up to `k` retrieved sources per objective to each step's
/// `resources`, in objective order.
///
/// Each retrieval is bounded by `timeout`. Step order and every field other
/// than `resources` are left unchanged.
pub async fn enrich_roadmap<R>(
    retriever: &R,
    mut steps: Vec<LearningStep>,
    k: usize,
    timeout: Duration,
) -> EnrichOutcome
where
    R: SourceRetriever + ?Sized,
{
    let queries: Vec<(usize, usize, String)> = steps
        .iter()
        .enumerate()
        .flat_map(|(step_index, step)| {
            step.learning_objectives
                .iter()
                .enumerate()
                .map(move |(objective_index, objective)| {
                    (step_index, objective_index, objective.clone())
                })
        })
        .collect();

    info!(
        steps = steps.len(),
        objectives = queries.len(),
        "enriching roadmap"
    );

    let results = join_all(
        queries
            .iter()
            .map(|(_, _, objective)| bounded_query(retriever, objective, k, timeout)),
    )
    .await;

    let mut failures = Vec::new();
    for ((step_index, objective_index, objective), result) in queries.into_iter().zip(results) {
        let step = &mut steps[step_index];
        match result {
            Ok(found) => step.resources.extend(found.relevant_sources),
            Err(e) => {
                error!(
                    week = step.week,
                    objective = %objective,
                    error = %e,
                    "retrieval failed for objective"
                );
                failures.push(ObjectiveFailure {
                    week: step.week,
                    step_index,
                    objective_index,
                    objective,
                    error: e.to_string(),
                });
            }
        }
    }

    EnrichOutcome { steps, failures }
}

/// Key under which the advice workflow nests its roadmap.
pub const ROADMAP_KEY: &str = "personalized_learning_path";

/// Key of the advice object in a full advice response.
pub const ADVICE_KEY: &str = "career_advice";

/// A roadmap as read from disk: a bare array of steps, or an advice object
/// carrying the steps under [`ROADMAP_KEY`] either at the top level or
/// inside [`ADVICE_KEY`].
#[derive(Debug, Clone, PartialEq)]
pub enum RoadmapDocument {
    Steps(Vec<LearningStep>),
    Nested {
        steps: Vec<LearningStep>,
        frame: RoadmapFrame,
    },
}

/// The fields that surrounded the steps in an advice object.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadmapFrame {
    siblings: Map<String, Value>,
    /// Top-level fields when the steps sat under [`ADVICE_KEY`].
    outer: Option<Map<String, Value>>,
}

impl RoadmapDocument {
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(_) => Ok(RoadmapDocument::Steps(
                serde_json::from_value(value).context("invalid learning step")?,
            )),
            Value::Object(mut top) => {
                if let Some(path) = top.remove(ROADMAP_KEY) {
                    return Self::nested(path, top, None);
                }
                match top.remove(ADVICE_KEY) {
                    Some(Value::Object(mut advice)) => {
                        let Some(path) = advice.remove(ROADMAP_KEY) else {
                            bail!("`{}` object has no `{}` field", ADVICE_KEY, ROADMAP_KEY);
                        };
                        Self::nested(path, advice, Some(top))
                    }
                    _ => bail!("roadmap object has no `{}` field", ROADMAP_KEY),
                }
            }
            _ => bail!("roadmap must be an array of steps or an object"),
        }
    }

    fn nested(
        path: Value,
        siblings: Map<String, Value>,
        outer: Option<Map<String, Value>>,
    ) -> Result<Self> {
        let steps = serde_json::from_value(path).context("invalid learning step")?;
        Ok(RoadmapDocument::Nested {
            steps,
            frame: RoadmapFrame { siblings, outer },
        })
    }

    /// Split into the steps to enrich and whatever surrounded them.
    pub fn into_parts(self) -> (Vec<LearningStep>, Option<RoadmapFrame>) {
        match self {
            RoadmapDocument::Steps(steps) => (steps, None),
            RoadmapDocument::Nested { steps, frame } => (steps, Some(frame)),
        }
    }

    /// Rebuild the on-disk shape around `steps`.
    pub fn reassemble(steps: Vec<LearningStep>, frame: Option<RoadmapFrame>) -> Result<Value> {
        let steps = serde_json::to_value(steps)?;
        let Some(RoadmapFrame {
            mut siblings,
            outer,
        }) = frame
        else {
            return Ok(steps);
        };
        siblings.insert(ROADMAP_KEY.to_string(), steps);
        Ok(match outer {
            None => Value::Object(siblings),
            Some(mut outer) => {
                outer.insert(ADVICE_KEY.to_string(), Value::Object(siblings));
                Value::Object(outer)
            }
        })
    }
}

async fn bounded_query<R>(
    retriever: &R,
    objective: &str,
    k: usize,
    timeout: Duration,
) -> Result<QueryResult, RetrievalError>
where
    R: SourceRetriever + ?Sized,
{
    match tokio::time::timeout(timeout, retriever.query_sources(objective, k)).await {
        Ok(result) => result,
        Err(_) => Err(RetrievalError::Timeout(timeout.as_secs())),
    }
}
