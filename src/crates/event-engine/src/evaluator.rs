//! Per-partition expression evaluation.
//!
//! One evaluator task exists for the lifetime of evaluating one expression
//! over one partition. It issues the per-predicate lookups captured in the
//! evaluation map, caches the hits keyed by predicate position, and re-folds
//! the expression tree after every arrival with short-circuit semantics.
//! Individual lookup failures contribute empty bitmaps and never abort the
//! evaluation.

use crate::cache::PartitionHandle;
use event_core::collections::HashMap;
use event_index::{Bitmap, EvaluationMap, Expression};
use tracing::{debug, error};

/// Combine cached predicate hits according to the expression structure.
///
/// Predicates are identified by their depth-first position; hits missing
/// from the cache count as empty. Conjunctions intersect left-to-right and
/// stop at the first empty intermediate; disjunctions stop once saturated;
/// negations complement over `domain` (the partition's row ids).
fn fold(
    expr: &Expression,
    hits: &HashMap<usize, Bitmap>,
    domain: &Bitmap,
    position: &mut usize,
) -> Bitmap {
    match expr {
        Expression::Conjunction(xs) => {
            let mut result: Option<Bitmap> = None;
            for (i, x) in xs.iter().enumerate() {
                let operand = fold(x, hits, domain, position);
                let combined = match result.take() {
                    None => operand,
                    Some(acc) => acc & operand,
                };
                if combined.is_empty() {
                    // Short-circuit; account for the unvisited predicates.
                    for rest in &xs[i + 1..] {
                        *position += rest.predicate_count();
                    }
                    return Bitmap::new();
                }
                result = Some(combined);
            }
            result.unwrap_or_default()
        }
        Expression::Disjunction(xs) => {
            let mut result = Bitmap::new();
            for (i, x) in xs.iter().enumerate() {
                result |= fold(x, hits, domain, position);
                if !domain.is_empty() && result == *domain {
                    // Saturated; nothing further can add bits.
                    for rest in &xs[i + 1..] {
                        *position += rest.predicate_count();
                    }
                    return result;
                }
            }
            result
        }
        Expression::Negation(x) => domain - &fold(x, hits, domain, position),
        Expression::Predicate(_) => {
            let result = hits.get(position).cloned().unwrap_or_default();
            *position += 1;
            result
        }
    }
}

/// Evaluate `expr` over one partition's evaluation map, producing the final
/// bitmap of matching ids.
///
/// `domain` is the union of the partition's row ids, used as the complement
/// domain for negations. The accumulated hits are delivered regardless of
/// individual indexer failures.
pub async fn evaluate(
    partition: PartitionHandle,
    expr: Expression,
    map: EvaluationMap,
    domain: Bitmap,
) -> Bitmap {
    let mut sub_hits: HashMap<usize, Bitmap> = HashMap::new();
    let mut hits = Bitmap::new();
    let total: usize = map.iter().map(|(_, evals)| evals.len()).sum();
    if total == 0 {
        debug!("expression {} resolved no predicates", expr);
        return hits;
    }
    let mut pending = total;
    for (_, evaluations) in &map {
        for evaluation in evaluations {
            let lookup = {
                let guard = partition.read();
                guard.lookup(&evaluation.indexer, &evaluation.predicate)
            };
            match lookup {
                Ok(result) => {
                    // The same predicate may resolve in several layouts; its
                    // hits union across them.
                    *sub_hits.entry(evaluation.position).or_default() |= result;
                }
                Err(e) => {
                    // Treat the predicate as empty and keep going; a partial
                    // result beats no result.
                    error!("indexer lookup failed: {}", e);
                }
            }
            pending -= 1;
            hits = fold(&expr, &sub_hits, &domain, &mut 0);
            if pending > 0 {
                tokio::task::yield_now().await;
            }
        }
    }
    debug!("completed expression evaluation with {} hits", hits.rank());
    hits
}
