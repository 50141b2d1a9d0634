//! Pairwise match rule evaluation.
//!
//! Pure functions: no I/O, no clock. The orchestrator uses them to decide
//! whether two transactions may belong to the same match group and to rank
//! competing candidates.

use crate::models::{MatchRule, Transaction};
use crate::services::amount::to_minor_units;
use std::cmp::Ordering;

/// Rule criteria in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Criterion {
    Amount,
    Date,
    Reference,
}

/// Closeness of a candidate pair. Greater is better.
///
/// Ordered by smaller date delta, then smaller amount delta, then exact
/// reference equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchScore {
    pub date_delta_days: i64,
    pub amount_delta_minor: i128,
    pub exact_reference: bool,
}

impl MatchScore {
    /// Flattened score for storage and display.
    pub fn as_f64(&self) -> f64 {
        let amount = self.amount_delta_minor.min(999_999) as f64;
        let reference = if self.exact_reference { 0.5 } else { 0.0 };
        -(self.date_delta_days as f64 * 1_000_000.0 + amount) + reference
    }

    pub fn worst(self, other: Self) -> Self {
        std::cmp::min(self, other)
    }
}

impl Ord for MatchScore {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .date_delta_days
            .cmp(&self.date_delta_days)
            .then_with(|| other.amount_delta_minor.cmp(&self.amount_delta_minor))
            .then_with(|| self.exact_reference.cmp(&other.exact_reference))
    }
}

impl PartialOrd for MatchScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub is_candidate: bool,
    pub score: MatchScore,
    /// First active criterion that did not hold.
    pub failed: Option<Criterion>,
    /// Active criteria that held before the first failure.
    pub passed: usize,
}

fn normalize_reference(reference: &str) -> String {
    reference.trim().to_lowercase()
}

/// True when the normalized references are equal or one contains the other.
/// Blank references never satisfy the criterion.
pub fn references_match(a: &str, b: &str) -> bool {
    let a = normalize_reference(a);
    let b = normalize_reference(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.contains(&b) || b.contains(&a)
}

fn amounts_offset(a: &Transaction, b: &Transaction) -> bool {
    if !a.currency.eq_ignore_ascii_case(&b.currency) {
        return false;
    }
    match (
        to_minor_units(a.amount, &a.currency),
        to_minor_units(b.amount, &b.currency),
    ) {
        (Some(x), Some(y)) => x == -y,
        _ => false,
    }
}

fn score(a: &Transaction, b: &Transaction) -> MatchScore {
    let date_delta_days = (a.transaction_date - b.transaction_date).num_days().abs();
    let amount_delta_minor = match (
        to_minor_units(a.amount, &a.currency),
        to_minor_units(b.amount, &b.currency),
    ) {
        (Some(x), Some(y)) => x.checked_add(y).map(i128::abs).unwrap_or(i128::MAX),
        _ => i128::MAX,
    };
    let exact_reference = {
        let ra = normalize_reference(&a.reference);
        !ra.is_empty() && ra == normalize_reference(&b.reference)
    };

    MatchScore {
        date_delta_days,
        amount_delta_minor,
        exact_reference,
    }
}

/// Evaluates `rule` against the pair `(a, b)`.
///
/// A rule with no active criterion accepts every pair; callers are expected
/// to reject such rules before running.
pub fn evaluate(a: &Transaction, b: &Transaction, rule: &MatchRule) -> Evaluation {
    let mut passed = 0;
    let mut failed = None;

    let checks = [
        (Criterion::Amount, rule.match_by_amount),
        (Criterion::Date, rule.match_by_date),
        (Criterion::Reference, rule.match_by_reference),
    ];

    for (criterion, active) in checks {
        if !active {
            continue;
        }
        let holds = match criterion {
            Criterion::Amount => amounts_offset(a, b),
            Criterion::Date => {
                let delta = (a.transaction_date - b.transaction_date).num_days().abs();
                delta <= i64::from(rule.date_tolerance_days.max(0))
            }
            Criterion::Reference => references_match(&a.reference, &b.reference),
        };
        if !holds {
            failed = Some(criterion);
            break;
        }
        passed += 1;
    }

    Evaluation {
        is_candidate: failed.is_none(),
        score: score(a, b),
        failed,
        passed,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use uuid::Uuid;

    pub(crate) fn txn(source: Uuid, date: &str, amount: &str, reference: &str) -> Transaction {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        Transaction {
            transaction_id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            data_source_id: source,
            import_id: None,
            transaction_date: date,
            post_date: date,
            description: "test".to_string(),
            reference: reference.to_string(),
            amount: Decimal::from_str(amount).unwrap(),
            currency: "USD".to_string(),
            status: "unmatched".to_string(),
            created_by: "tester".to_string(),
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    pub(crate) fn rule(amount: bool, date: bool, tolerance: i32, reference: bool) -> MatchRule {
        MatchRule {
            match_rule_id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            name: "rule".to_string(),
            description: None,
            match_by_amount: amount,
            match_by_date: date,
            date_tolerance_days: tolerance,
            match_by_reference: reference,
            active: true,
            created_by: "tester".to_string(),
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn test_offsetting_amount_within_tolerance() {
        let s = Uuid::new_v4();
        let a = txn(s, "2024-01-05", "-100.00", "INV-1");
        let b = txn(s, "2024-01-06", "100", "XYZ");
        let eval = evaluate(&a, &b, &rule(true, true, 2, false));
        assert!(eval.is_candidate);
        assert_eq!(eval.score.date_delta_days, 1);
        assert_eq!(eval.score.amount_delta_minor, 0);
    }

    #[test]
    fn test_same_sign_amounts_do_not_offset() {
        let s = Uuid::new_v4();
        let a = txn(s, "2024-01-05", "100.00", "");
        let b = txn(s, "2024-01-05", "100.00", "");
        let eval = evaluate(&a, &b, &rule(true, false, 0, false));
        assert!(!eval.is_candidate);
        assert_eq!(eval.failed, Some(Criterion::Amount));
    }

    #[test]
    fn test_currency_mismatch_fails_amount() {
        let s = Uuid::new_v4();
        let a = txn(s, "2024-01-05", "-10.00", "");
        let mut b = txn(s, "2024-01-05", "10.00", "");
        b.currency = "EUR".to_string();
        assert!(!evaluate(&a, &b, &rule(true, false, 0, false)).is_candidate);
    }

    #[test]
    fn test_tolerance_boundary_is_inclusive() {
        let s = Uuid::new_v4();
        let r = rule(false, true, 2, false);
        let a = txn(s, "2024-01-05", "1", "");
        assert!(evaluate(&a, &txn(s, "2024-01-07", "1", ""), &r).is_candidate);
        assert!(evaluate(&a, &txn(s, "2024-01-03", "1", ""), &r).is_candidate);
        let outside = evaluate(&a, &txn(s, "2024-01-08", "1", ""), &r);
        assert!(!outside.is_candidate);
        assert_eq!(outside.failed, Some(Criterion::Date));
    }

    #[test]
    fn test_reference_containment_and_blank() {
        assert!(references_match(" INV-1 ", "inv-1"));
        assert!(references_match("Payment INV-1 ACME", "inv-1"));
        assert!(!references_match("", ""));
        assert!(!references_match("INV-1", "  "));
        assert!(!references_match("INV-1", "INV-2"));
    }

    #[test]
    fn test_degenerate_rule_accepts_everything() {
        let s = Uuid::new_v4();
        let a = txn(s, "2020-01-01", "1", "");
        let b = txn(s, "2024-01-01", "77", "");
        assert!(evaluate(&a, &b, &rule(false, false, 0, false)).is_candidate);
    }

    #[test]
    fn test_furthest_progress_is_reported() {
        let s = Uuid::new_v4();
        let a = txn(s, "2024-01-01", "-5", "A");
        let b = txn(s, "2024-01-01", "5", "B");
        let eval = evaluate(&a, &b, &rule(true, true, 0, true));
        assert_eq!(eval.passed, 2);
        assert_eq!(eval.failed, Some(Criterion::Reference));
    }

    #[test]
    fn test_score_ordering() {
        let closer = MatchScore {
            date_delta_days: 0,
            amount_delta_minor: 50,
            exact_reference: false,
        };
        let further = MatchScore {
            date_delta_days: 1,
            amount_delta_minor: 0,
            exact_reference: true,
        };
        assert!(closer > further);
        assert!(closer.as_f64() > further.as_f64());

        let exact = MatchScore {
            exact_reference: true,
            ..closer
        };
        assert!(exact > closer);
        assert_eq!(exact.worst(closer), closer);
    }
}
