use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use carepath_core::traits::{OrderOracle, ReorderRequest};

/// Deterministic topological ordering over a sibling batch.
///
/// `follows` maps a name to the siblings it must precede. The ready queue
/// is seeded and drained in input order, so the result is stable for a
/// given input. Returns the order plus whether more than one node was
/// ever ready at once, the cue that the constraints leave room for a
/// more natural ordering. Names stranded by a constraint cycle are
/// appended in input order with a warning.
pub fn topological_order(
    names: &[String],
    follows: &HashMap<String, Vec<String>>,
) -> (Vec<String>, bool) {
    let mut in_degree: HashMap<&str, usize> = names.iter().map(|n| (n.as_str(), 0)).collect();
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();

    for (src, targets) in follows {
        if !in_degree.contains_key(src.as_str()) {
            continue;
        }
        for dst in targets {
            if dst == src {
                continue;
            }
            if let Some(degree) = in_degree.get_mut(dst.as_str()) {
                *degree += 1;
                edges.entry(src.as_str()).or_default().push(dst.as_str());
            }
        }
    }

    let mut queue: VecDeque<&str> = names
        .iter()
        .map(String::as_str)
        .filter(|n| in_degree[n] == 0)
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(names.len());
    let mut has_parallel = false;

    loop {
        if queue.len() > 1 {
            has_parallel = true;
        }
        let Some(cur) = queue.pop_front() else { break };
        order.push(cur.to_string());

        for &dst in edges.get(cur).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dst) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dst);
                }
            }
        }
    }

    if order.len() < names.len() {
        let placed: HashSet<&str> = order.iter().map(String::as_str).collect();
        let leftover: Vec<String> = names
            .iter()
            .filter(|n| !placed.contains(n.as_str()))
            .cloned()
            .collect();
        warn!(?leftover, "Constraint cycle among siblings, appending in input order");
        order.extend(leftover);
    }

    (order, has_parallel)
}

/// Resolves sibling execution order.
///
/// The deterministic topological pass always runs first. The semantic
/// oracle is consulted only when that pass saw parallelism, and its reply
/// is accepted only when it is a true permutation that honors every
/// constraint; anything else (error, timeout, malformed list) falls back
/// to the topological order. The resolver therefore always terminates
/// with a valid total order.
pub struct OrderResolver {
    oracle: Option<Arc<dyn OrderOracle>>,
    oracle_timeout: Duration,
}

impl OrderResolver {
    pub fn new(oracle: Option<Arc<dyn OrderOracle>>, oracle_timeout: Duration) -> Self {
        Self {
            oracle,
            oracle_timeout,
        }
    }

    /// Topological-only resolver.
    pub fn deterministic() -> Self {
        Self::new(None, Duration::from_secs(20))
    }

    pub async fn resolve(
        &self,
        names: &[String],
        follows: &HashMap<String, Vec<String>>,
        descriptions: &HashMap<String, String>,
    ) -> Vec<String> {
        let (topo, has_parallel) = topological_order(names, follows);
        if !has_parallel {
            debug!(order = ?topo, "Constraints yield a unique order, oracle skipped");
            return topo;
        }

        let Some(oracle) = &self.oracle else {
            debug!("No ordering oracle configured, keeping topological order");
            return topo;
        };

        let request = ReorderRequest {
            names: topo.clone(),
            follows: follows.clone(),
            descriptions: descriptions.clone(),
        };

        match tokio::time::timeout(self.oracle_timeout, oracle.reorder(request)).await {
            Ok(Ok(proposed)) => {
                if is_valid_order(&proposed, names, follows) {
                    info!(order = ?proposed, "Semantic reorder accepted");
                    proposed
                } else {
                    warn!(
                        order = ?proposed,
                        "Semantic reorder is not a constraint-respecting permutation, keeping topological order"
                    );
                    topo
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Ordering oracle failed, keeping topological order");
                topo
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.oracle_timeout.as_secs(),
                    "Ordering oracle timed out, keeping topological order"
                );
                topo
            }
        }
    }
}

/// A proposed order is valid when it is a permutation of `names` and every
/// constraint source precedes all of its targets.
fn is_valid_order(
    proposed: &[String],
    names: &[String],
    follows: &HashMap<String, Vec<String>>,
) -> bool {
    if proposed.len() != names.len() {
        return false;
    }
    let mut position: HashMap<&str, usize> = HashMap::with_capacity(proposed.len());
    for (i, name) in proposed.iter().enumerate() {
        if position.insert(name.as_str(), i).is_some() {
            return false;
        }
    }
    if names.iter().any(|n| !position.contains_key(n.as_str())) {
        return false;
    }
    for (src, targets) in follows {
        let Some(&src_pos) = position.get(src.as_str()) else {
            continue;
        };
        for dst in targets {
            if let Some(&dst_pos) = position.get(dst.as_str()) {
                if src_pos >= dst_pos {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use carepath_test_utils::{ScriptedOrderOracle, StalledOrderOracle};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn follows(edges: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (src, dst) in edges {
            map.entry(src.to_string()).or_default().push(dst.to_string());
        }
        map
    }

    #[test]
    fn chain_is_unique_and_sequential() {
        let (order, has_parallel) =
            topological_order(&names(&["B", "C", "D"]), &follows(&[("B", "C"), ("C", "D")]));
        assert_eq!(order, names(&["B", "C", "D"]));
        assert!(!has_parallel);
    }

    #[test]
    fn unconstrained_batch_is_parallel_in_input_order() {
        let (order, has_parallel) = topological_order(&names(&["X", "Y", "Z"]), &HashMap::new());
        assert_eq!(order, names(&["X", "Y", "Z"]));
        assert!(has_parallel);
    }

    #[test]
    fn diamond_respects_constraints() {
        // A before B and C, both before D
        let (order, has_parallel) = topological_order(
            &names(&["A", "B", "C", "D"]),
            &follows(&[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")]),
        );
        assert!(has_parallel);
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("A") < pos("B"));
        assert!(pos("A") < pos("C"));
        assert!(pos("B") < pos("D"));
        assert!(pos("C") < pos("D"));
    }

    #[test]
    fn constraint_cycle_appends_leftovers() {
        let (order, _) = topological_order(
            &names(&["A", "B", "C"]),
            &follows(&[("B", "C"), ("C", "B")]),
        );
        // A drains normally; the B/C cycle lands at the end in input order
        assert_eq!(order, names(&["A", "B", "C"]));
    }

    #[tokio::test]
    async fn fast_path_never_calls_oracle() {
        let oracle = Arc::new(ScriptedOrderOracle::ok(names(&["D", "C", "B"])));
        let resolver = OrderResolver::new(Some(oracle.clone()), Duration::from_secs(1));
        let order = resolver
            .resolve(
                &names(&["B", "C", "D"]),
                &follows(&[("B", "C"), ("C", "D")]),
                &HashMap::new(),
            )
            .await;
        assert_eq!(order, names(&["B", "C", "D"]));
        assert_eq!(oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn oracle_reorder_accepted_when_valid() {
        let oracle = Arc::new(ScriptedOrderOracle::ok(names(&["Z", "X", "Y"])));
        let resolver = OrderResolver::new(Some(oracle.clone()), Duration::from_secs(1));
        let order = resolver
            .resolve(&names(&["X", "Y", "Z"]), &HashMap::new(), &HashMap::new())
            .await;
        assert_eq!(order, names(&["Z", "X", "Y"]));
        assert_eq!(oracle.call_count(), 1);
    }

    #[tokio::test]
    async fn oracle_error_falls_back_to_topological() {
        let oracle = Arc::new(ScriptedOrderOracle::failing());
        let resolver = OrderResolver::new(Some(oracle), Duration::from_secs(1));
        let order = resolver
            .resolve(&names(&["X", "Y", "Z"]), &HashMap::new(), &HashMap::new())
            .await;
        assert_eq!(order, names(&["X", "Y", "Z"]));
    }

    #[tokio::test]
    async fn malformed_permutation_falls_back() {
        // Z is missing from the reply
        let oracle = Arc::new(ScriptedOrderOracle::ok(names(&["Y", "X"])));
        let resolver = OrderResolver::new(Some(oracle), Duration::from_secs(1));
        let order = resolver
            .resolve(&names(&["X", "Y", "Z"]), &HashMap::new(), &HashMap::new())
            .await;
        assert_eq!(order, names(&["X", "Y", "Z"]));
    }

    #[tokio::test]
    async fn duplicated_name_in_reply_falls_back() {
        let oracle = Arc::new(ScriptedOrderOracle::ok(names(&["X", "X", "Y"])));
        let resolver = OrderResolver::new(Some(oracle), Duration::from_secs(1));
        let order = resolver
            .resolve(&names(&["X", "Y", "Z"]), &HashMap::new(), &HashMap::new())
            .await;
        assert_eq!(order, names(&["X", "Y", "Z"]));
    }

    #[tokio::test]
    async fn constraint_violating_reply_falls_back() {
        // A must precede B; the oracle disagrees and loses
        let oracle = Arc::new(ScriptedOrderOracle::ok(names(&["B", "A", "C"])));
        let resolver = OrderResolver::new(Some(oracle), Duration::from_secs(1));
        let order = resolver
            .resolve(
                &names(&["A", "B", "C"]),
                &follows(&[("A", "B")]),
                &HashMap::new(),
            )
            .await;
        assert_eq!(order[0], "A");
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("A") < pos("B"));
    }

    #[tokio::test]
    async fn oracle_timeout_falls_back() {
        let resolver = OrderResolver::new(
            Some(Arc::new(StalledOrderOracle)),
            Duration::from_millis(20),
        );
        let order = resolver
            .resolve(&names(&["X", "Y", "Z"]), &HashMap::new(), &HashMap::new())
            .await;
        assert_eq!(order, names(&["X", "Y", "Z"]));
    }
}
