//! Problem correlation.
//!
//! Services and problems form a bipartite graph through each problem's named
//! services. A service gets:
//! - `RootCause` for problems naming it as root cause
//! - `DirectlyImpacted` for other problems naming it
//! - `Related` for problems reached by walking service -> problem -> service
//!   up to `max_depth` extra problem hops from its direct problems
//!
//! Problems naming no service never appear on a record.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use vigil_common::{ProblemRecord, ProblemRef, Relevance};

/// Problem refs per service id, each list ordered by relevance then problem id
pub fn correlate(problems: &[ProblemRecord], max_depth: usize) -> HashMap<String, Vec<ProblemRef>> {
    let named: Vec<Vec<&str>> = problems.iter().map(|p| p.named_services()).collect();

    let mut by_service: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, services) in named.iter().enumerate() {
        for &service in services {
            by_service.entry(service).or_default().push(idx);
        }
    }

    let mut out = HashMap::with_capacity(by_service.len());
    for (&service, direct) in &by_service {
        let mut seen: BTreeSet<usize> = direct.iter().copied().collect();
        let mut refs: Vec<ProblemRef> = direct
            .iter()
            .map(|&idx| {
                let problem = &problems[idx];
                let relevance = if problem.root_cause.as_deref() == Some(service) {
                    Relevance::RootCause
                } else {
                    Relevance::DirectlyImpacted
                };
                ProblemRef::from_problem(problem, relevance)
            })
            .collect();

        let mut frontier: Vec<usize> = direct.clone();
        for _ in 0..max_depth {
            let mut next = Vec::new();
            for &idx in &frontier {
                for neighbour in named[idx].iter().filter(|s| **s != service) {
                    for &linked in by_service.get(neighbour).into_iter().flatten() {
                        if seen.insert(linked) {
                            next.push(linked);
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            refs.extend(
                next.iter()
                    .map(|&idx| ProblemRef::from_problem(&problems[idx], Relevance::Related)),
            );
            frontier = next;
        }

        refs.sort_by(|a, b| {
            a.relevance
                .cmp(&b.relevance)
                .then_with(|| a.problem_id.cmp(&b.problem_id))
        });
        out.insert(service.to_string(), refs);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigil_common::{ProblemState, Severity};

    fn problem(id: &str, impacted: &[&str], root: Option<&str>) -> ProblemRecord {
        ProblemRecord {
            id: id.to_string(),
            title: format!("problem {}", id),
            severity: Severity::Performance,
            impacted_services: impacted.iter().map(|s| s.to_string()).collect(),
            root_cause: root.map(|s| s.to_string()),
            started_at: Utc::now(),
            state: ProblemState::Open,
        }
    }

    fn relevance_of(refs: &HashMap<String, Vec<ProblemRef>>, service: &str) -> Vec<(String, Relevance)> {
        refs.get(service)
            .map(|r| r.iter().map(|p| (p.problem_id.clone(), p.relevance)).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_root_and_impacted() {
        let problems = vec![problem("P-1", &["A", "B"], Some("A"))];
        let refs = correlate(&problems, 1);
        assert_eq!(relevance_of(&refs, "A"), vec![("P-1".to_string(), Relevance::RootCause)]);
        assert_eq!(
            relevance_of(&refs, "B"),
            vec![("P-1".to_string(), Relevance::DirectlyImpacted)]
        );
    }

    #[test]
    fn test_root_cause_only_named_via_root() {
        // Root cause absent from the impacted list is still attached
        let problems = vec![problem("P-1", &["B"], Some("A"))];
        let refs = correlate(&problems, 0);
        assert_eq!(relevance_of(&refs, "A"), vec![("P-1".to_string(), Relevance::RootCause)]);
    }

    #[test]
    fn test_related_through_shared_service() {
        // A -P1- B -P2- C -P3- D
        let problems = vec![
            problem("P-1", &["A", "B"], None),
            problem("P-2", &["B", "C"], None),
            problem("P-3", &["C", "D"], None),
        ];

        let refs = correlate(&problems, 1);
        assert_eq!(
            relevance_of(&refs, "A"),
            vec![
                ("P-1".to_string(), Relevance::DirectlyImpacted),
                ("P-2".to_string(), Relevance::Related),
            ]
        );

        let refs = correlate(&problems, 2);
        assert_eq!(relevance_of(&refs, "A").len(), 3);

        let refs = correlate(&problems, 0);
        assert_eq!(relevance_of(&refs, "A").len(), 1);
    }

    #[test]
    fn test_orphan_problem_not_attached() {
        let problems = vec![problem("P-1", &[], None), problem("P-2", &["A"], None)];
        let refs = correlate(&problems, 1);
        assert_eq!(refs.len(), 1);
        assert_eq!(relevance_of(&refs, "A"), vec![("P-2".to_string(), Relevance::DirectlyImpacted)]);
    }

    #[test]
    fn test_refs_ordered_by_relevance_then_id() {
        let problems = vec![
            problem("P-9", &["A"], None),
            problem("P-5", &["A", "B"], Some("A")),
            problem("P-1", &["A"], None),
        ];
        let refs = correlate(&problems, 1);
        let ids: Vec<String> = relevance_of(&refs, "A").into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["P-5", "P-1", "P-9"]);
    }
}
