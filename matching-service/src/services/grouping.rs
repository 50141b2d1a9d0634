//! Greedy multi-source grouping.
//!
//! Builds a [`MatchPlan`] from per-data-source pools of unmatched
//! transactions. Deterministic for a given input: pools are walked in match
//! set order and transactions in `(transaction_date, transaction_id)` order.

use crate::models::{MatchRule, Transaction};
use crate::services::evaluator::{evaluate, Criterion, MatchScore};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedReason {
    NoCounterpartTransactions,
    NoOffsettingAmount,
    OutsideDateTolerance,
    NoMatchingReference,
    CandidatesConsumed,
}

impl UnmatchedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCounterpartTransactions => {
                "no transactions available in counterpart data sources"
            }
            Self::NoOffsettingAmount => "no candidate with an offsetting amount in the same currency",
            Self::OutsideDateTolerance => "no candidate within date tolerance",
            Self::NoMatchingReference => "no candidate with a matching reference",
            Self::CandidatesConsumed => {
                "all qualifying candidates were matched to other transactions"
            }
        }
    }
}

impl From<Criterion> for UnmatchedReason {
    fn from(c: Criterion) -> Self {
        match c {
            Criterion::Amount => Self::NoOffsettingAmount,
            Criterion::Date => Self::OutsideDateTolerance,
            Criterion::Reference => Self::NoMatchingReference,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedGroup {
    /// Members in pool order.
    pub transaction_ids: Vec<Uuid>,
    /// Weakest pairwise score inside the group.
    pub score: MatchScore,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUnmatched {
    pub transaction_id: Uuid,
    pub reason: UnmatchedReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchPlan {
    pub groups: Vec<PlannedGroup>,
    pub unmatched: Vec<PlannedUnmatched>,
}

struct Anchor<'a> {
    members: Vec<&'a Transaction>,
    score: Option<MatchScore>,
}

impl Anchor<'_> {
    fn sort_key(&self) -> (bool, chrono::NaiveDate, Uuid) {
        let earliest = self
            .members
            .iter()
            .min_by_key(|t| (t.transaction_date, t.transaction_id))
            .map(|t| (t.transaction_date, t.transaction_id))
            .unwrap_or_default();
        (self.members.len() > 1, earliest.0, earliest.1)
    }
}

fn sorted_pool(pool: &[Transaction]) -> Vec<&Transaction> {
    let mut sorted: Vec<&Transaction> = pool.iter().collect();
    sorted.sort_by_key(|t| (t.transaction_date, t.transaction_id));
    sorted
}

/// Best unconsumed candidate in `pool` for `anchor`: it must satisfy the rule
/// against every member. Ties keep the earliest candidate.
fn best_candidate(
    anchor: &Anchor<'_>,
    pool: &[&Transaction],
    consumed: &[bool],
    rule: &MatchRule,
) -> Option<(usize, MatchScore)> {
    let mut best: Option<(usize, MatchScore)> = None;

    for (idx, candidate) in pool.iter().enumerate() {
        if consumed[idx] {
            continue;
        }

        let mut worst: Option<MatchScore> = None;
        let mut qualifies = true;
        for member in &anchor.members {
            let eval = evaluate(member, candidate, rule);
            if !eval.is_candidate {
                qualifies = false;
                break;
            }
            worst = Some(match worst {
                Some(w) => w.worst(eval.score),
                None => eval.score,
            });
        }

        if let (true, Some(score)) = (qualifies, worst) {
            match best {
                Some((_, current)) if current >= score => {}
                _ => best = Some((idx, score)),
            }
        }
    }

    best
}

fn unmatched_reason(
    txn: &Transaction,
    pools: &[Vec<&Transaction>],
    rule: &MatchRule,
) -> UnmatchedReason {
    let mut furthest: Option<(usize, Option<Criterion>)> = None;

    for pool in pools {
        for other in pool {
            if other.data_source_id == txn.data_source_id {
                continue;
            }
            let eval = evaluate(txn, other, rule);
            if eval.is_candidate {
                return UnmatchedReason::CandidatesConsumed;
            }
            match furthest {
                Some((passed, _)) if passed >= eval.passed => {}
                _ => furthest = Some((eval.passed, eval.failed)),
            }
        }
    }

    match furthest {
        None => UnmatchedReason::NoCounterpartTransactions,
        Some((_, Some(criterion))) => criterion.into(),
        Some((_, None)) => UnmatchedReason::CandidatesConsumed,
    }
}

/// Plans match groups for `pools`, one pool per data source in match set
/// order.
pub fn plan(pools: &[Vec<Transaction>], rule: &MatchRule) -> MatchPlan {
    let sorted: Vec<Vec<&Transaction>> = pools.iter().map(|p| sorted_pool(p)).collect();

    let mut anchors: Vec<Anchor<'_>> = match sorted.first() {
        Some(first) => first
            .iter()
            .map(|t| Anchor {
                members: vec![*t],
                score: None,
            })
            .collect(),
        None => return MatchPlan::default(),
    };

    for pool in sorted.iter().skip(1) {
        // Leftover singletons get first pick, then existing groups.
        anchors.sort_by_key(|a| a.sort_key());

        let mut consumed = vec![false; pool.len()];
        for anchor in anchors.iter_mut() {
            if let Some((idx, score)) = best_candidate(anchor, pool, &consumed, rule) {
                consumed[idx] = true;
                anchor.members.push(pool[idx]);
                anchor.score = Some(match anchor.score {
                    Some(existing) => existing.worst(score),
                    None => score,
                });
            }
        }

        for (idx, txn) in pool.iter().enumerate() {
            if !consumed[idx] {
                anchors.push(Anchor {
                    members: vec![*txn],
                    score: None,
                });
            }
        }
    }

    anchors.sort_by_key(|a| a.sort_key());

    let mut result = MatchPlan::default();
    for anchor in anchors {
        match (anchor.members.len(), anchor.score) {
            (n, Some(score)) if n > 1 => result.groups.push(PlannedGroup {
                transaction_ids: anchor.members.iter().map(|t| t.transaction_id).collect(),
                score,
            }),
            _ => {
                for member in anchor.members {
                    result.unmatched.push(PlannedUnmatched {
                        transaction_id: member.transaction_id,
                        reason: unmatched_reason(member, &sorted, rule),
                    });
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::evaluator::tests::{rule, txn};

    #[test]
    fn test_two_source_scenario() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let left = txn(a, "2024-01-05", "-100.00", "INV-1");
        let right = txn(b, "2024-01-06", "100.00", "XYZ");
        let plan = plan(
            &[vec![left.clone()], vec![right.clone()]],
            &rule(true, true, 2, false),
        );

        assert_eq!(plan.groups.len(), 1);
        assert_eq!(
            plan.groups[0].transaction_ids,
            vec![left.transaction_id, right.transaction_id]
        );
        assert!(plan.unmatched.is_empty());
    }

    #[test]
    fn test_best_candidate_wins_over_first() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let left = txn(a, "2024-01-05", "-100.00", "");
        let far = txn(b, "2024-01-03", "100.00", "");
        let near = txn(b, "2024-01-05", "100.00", "");
        let plan = plan(
            &[vec![left.clone()], vec![far.clone(), near.clone()]],
            &rule(true, true, 3, false),
        );

        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].transaction_ids[1], near.transaction_id);
        assert_eq!(plan.unmatched.len(), 1);
        assert_eq!(plan.unmatched[0].transaction_id, far.transaction_id);
        assert_eq!(plan.unmatched[0].reason, UnmatchedReason::CandidatesConsumed);
    }

    #[test]
    fn test_no_transaction_matched_twice() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let first = txn(a, "2024-01-05", "-50.00", "");
        let second = txn(a, "2024-01-06", "-50.00", "");
        let only = txn(b, "2024-01-05", "50.00", "");
        let plan = plan(
            &[vec![second.clone(), first.clone()], vec![only.clone()]],
            &rule(true, true, 5, false),
        );

        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].transaction_ids[0], first.transaction_id);
        assert_eq!(plan.unmatched.len(), 1);
        assert_eq!(plan.unmatched[0].transaction_id, second.transaction_id);
    }

    #[test]
    fn test_unmatched_reasons() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let r = rule(true, true, 1, false);

        let lonely = txn(a, "2024-01-05", "-10.00", "");
        let plan_empty = plan(&[vec![lonely.clone()], vec![]], &r);
        assert_eq!(
            plan_empty.unmatched[0].reason,
            UnmatchedReason::NoCounterpartTransactions
        );

        let wrong_amount = txn(b, "2024-01-05", "11.00", "");
        let p = plan(&[vec![lonely.clone()], vec![wrong_amount]], &r);
        assert!(p
            .unmatched
            .iter()
            .all(|u| u.reason == UnmatchedReason::NoOffsettingAmount));

        let too_late = txn(b, "2024-01-09", "10.00", "");
        let p = plan(&[vec![lonely], vec![too_late]], &r);
        assert!(p
            .unmatched
            .iter()
            .all(|u| u.reason == UnmatchedReason::OutsideDateTolerance));
    }

    #[test]
    fn test_three_sources_prefers_leftover_singletons() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let r = rule(false, true, 0, true);

        let a1 = txn(a, "2024-02-01", "1", "REF-1");
        let b1 = txn(b, "2024-02-01", "2", "REF-1");
        let b2 = txn(b, "2024-02-01", "3", "REF-2");
        let c1 = txn(c, "2024-02-01", "4", "REF-2");
        let c2 = txn(c, "2024-02-01", "5", "REF-1");

        let plan = plan(
            &[vec![a1.clone()], vec![b1.clone(), b2.clone()], vec![c1.clone(), c2.clone()]],
            &r,
        );

        assert_eq!(plan.groups.len(), 2);
        assert!(plan.unmatched.is_empty());

        let leftover = plan
            .groups
            .iter()
            .find(|g| g.transaction_ids.contains(&b2.transaction_id))
            .unwrap();
        assert_eq!(
            leftover.transaction_ids,
            vec![b2.transaction_id, c1.transaction_id]
        );

        let grown = plan
            .groups
            .iter()
            .find(|g| g.transaction_ids.contains(&a1.transaction_id))
            .unwrap();
        assert_eq!(
            grown.transaction_ids,
            vec![a1.transaction_id, b1.transaction_id, c2.transaction_id]
        );
    }

    #[test]
    fn test_group_grows_only_when_all_members_agree() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let r = rule(true, false, 0, false);

        let a1 = txn(a, "2024-03-01", "-20.00", "");
        let b1 = txn(b, "2024-03-01", "20.00", "");
        let c1 = txn(c, "2024-03-01", "20.00", "");

        let plan = plan(&[vec![a1], vec![b1], vec![c1.clone()]], &r);
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].transaction_ids.len(), 2);
        assert_eq!(plan.unmatched.len(), 1);
        assert_eq!(plan.unmatched[0].transaction_id, c1.transaction_id);
    }
}
