//! Pure toggle evaluation.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use switchyard_state::{FeatureToggle, RuleOperator, TargetingRule};

/// Caller attributes a toggle is evaluated against. Keys are sorted, so
/// the serialized form (and its hash) does not depend on insertion order.
pub type Context = BTreeMap<String, Value>;

/// Stable bucket in `0..100` for a context.
pub fn context_bucket(context: &Context) -> u8 {
    let serialized = serde_json::to_vec(context).unwrap_or_default();
    let digest = Sha256::digest(&serialized);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % 100) as u8
}

/// Decide whether `toggle` is on for `context`.
///
/// Disabled toggles are off. Below 100% the decision is the context's
/// bucket against the percentage. At 100% the targeting rules decide,
/// first match wins. Without a rule list everyone is in; a list that
/// matches nothing (including an empty one) is off.
pub fn evaluate(toggle: &FeatureToggle, context: &Context) -> bool {
    if !toggle.enabled {
        return false;
    }
    if toggle.rollout_percentage < 100 {
        return context_bucket(context) < toggle.rollout_percentage;
    }
    match &toggle.targeting_rules {
        None => true,
        Some(rules) => rules.iter().any(|rule| rule_matches(rule, context)),
    }
}

/// Whether a single rule matches. A missing attribute never matches.
pub fn rule_matches(rule: &TargetingRule, context: &Context) -> bool {
    let Some(actual) = context.get(&rule.attribute) else {
        return false;
    };
    match rule.operator {
        RuleOperator::Equals => *actual == rule.value,
        RuleOperator::Contains => match (actual, &rule.value) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.contains(needle),
            _ => false,
        },
        RuleOperator::In => match &rule.value {
            Value::Array(allowed) => allowed.contains(actual),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn toggle(pct: u8, rules: Option<Vec<TargetingRule>>) -> FeatureToggle {
        FeatureToggle {
            name: "checkout-v2".into(),
            enabled: true,
            rollout_percentage: pct,
            targeting_rules: rules,
            version: 1,
            release: None,
            updated_at: 0,
        }
    }

    fn ctx(pairs: &[(&str, Value)]) -> Context {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn rule(attribute: &str, operator: RuleOperator, value: Value) -> TargetingRule {
        TargetingRule {
            attribute: attribute.into(),
            operator,
            value,
        }
    }

    #[test]
    fn disabled_is_off() {
        let mut t = toggle(100, None);
        t.enabled = false;
        assert!(!evaluate(&t, &Context::new()));
    }

    #[test]
    fn full_rollout_without_rules_is_on() {
        assert!(evaluate(&toggle(100, None), &Context::new()));
    }

    #[test]
    fn empty_rule_list_matches_nobody() {
        let t = toggle(100, Some(vec![]));
        assert!(!evaluate(&t, &Context::new()));
        assert!(!evaluate(&t, &ctx(&[("plan", json!("enterprise"))])));
    }

    #[test]
    fn percentage_is_deterministic() {
        let t = toggle(37, None);
        for user in 0..50 {
            let c = ctx(&[("user_id", json!(user))]);
            let first = evaluate(&t, &c);
            for _ in 0..5 {
                assert_eq!(evaluate(&t, &c), first);
            }
        }
    }

    #[test]
    fn percentage_matches_bucket() {
        let c = ctx(&[("user_id", json!("u-42"))]);
        let bucket = context_bucket(&c);
        assert!(bucket < 100);
        assert!(evaluate(&toggle(bucket + 1, None), &c));
        assert!(!evaluate(&toggle(bucket, None), &c));
    }

    #[test]
    fn zero_percent_is_off_for_everyone() {
        let t = toggle(0, None);
        for user in 0..20 {
            assert!(!evaluate(&t, &ctx(&[("user_id", json!(user))])));
        }
    }

    #[test]
    fn percentage_spreads_across_population() {
        let t = toggle(50, None);
        let on = (0..1000)
            .filter(|u| evaluate(&t, &ctx(&[("user_id", json!(u))])))
            .count();
        assert!((350..650).contains(&on), "{on} of 1000 enabled");
    }

    #[test]
    fn rules_first_match_wins() {
        let t = toggle(
            100,
            Some(vec![
                rule("plan", RuleOperator::Equals, json!("enterprise")),
                rule("country", RuleOperator::In, json!(["NZ", "AU"])),
                rule("email", RuleOperator::Contains, json!("@example.com")),
            ]),
        );
        assert!(evaluate(&t, &ctx(&[("plan", json!("enterprise"))])));
        assert!(evaluate(&t, &ctx(&[("country", json!("AU"))])));
        assert!(evaluate(&t, &ctx(&[("email", json!("a@example.com"))])));
        assert!(!evaluate(&t, &ctx(&[("plan", json!("free")), ("country", json!("US"))])));
        assert!(!evaluate(&t, &Context::new()));
    }

    #[test]
    fn contains_works_on_arrays() {
        let r = rule("groups", RuleOperator::Contains, json!("beta"));
        assert!(rule_matches(&r, &ctx(&[("groups", json!(["staff", "beta"]))])));
        assert!(!rule_matches(&r, &ctx(&[("groups", json!(["staff"]))])));
    }

    #[test]
    fn key_order_does_not_change_bucket() {
        let mut a = Context::new();
        a.insert("b".into(), json!(2));
        a.insert("a".into(), json!(1));
        let b = ctx(&[("a", json!(1)), ("b", json!(2))]);
        assert_eq!(context_bucket(&a), context_bucket(&b));
    }
}
