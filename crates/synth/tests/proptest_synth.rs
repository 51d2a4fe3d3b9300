use common::TradeDirection;
use proptest::prelude::*;
use synth::{parse_review, SynthesisCache};

fn direction() -> impl Strategy<Value = TradeDirection> {
    prop_oneof![
        Just(TradeDirection::Long),
        Just(TradeDirection::Short),
        Just(TradeDirection::Both),
    ]
}

/// Reply lines mixing labels, markdown decoration and free text.
fn reply_line() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<String>(),
        "[*# ]{0,3}(VERDICT|verdict|Reason|SUGGESTION)[ ]?:?.{0,20}",
        Just("VERDICT: PASS".to_string()),
        Just("VERDICT: FAIL".to_string()),
        Just("VERDICTé: PASS".to_string()),
    ]
}

proptest! {
    #[test]
    fn review_parsing_never_panics(lines in prop::collection::vec(reply_line(), 0..12)) {
        let reply = lines.join("\n");
        let outcome = parse_review(&reply);
        if outcome.passed {
            prop_assert!(reply.to_ascii_uppercase().contains("PASS"));
        }
    }

    #[test]
    fn pass_with_reason_round_trips(reason in "[a-z][a-z ]{0,40}[a-z]") {
        let outcome = parse_review(&format!("**VERDICT:** PASS\nREASON: {reason}\n"));
        prop_assert!(outcome.passed);
        prop_assert_eq!(outcome.reason, reason);
        prop_assert!(outcome.suggestion.is_none());
    }

    #[test]
    fn any_fail_verdict_fails(reason in "[a-z ]{0,30}") {
        let outcome = parse_review(&format!("VERDICT: PASS\nVERDICT: FAIL\nREASON: {reason}"));
        prop_assert!(!outcome.passed);
    }

    #[test]
    fn cache_key_is_stable_and_direction_sensitive(description in any::<String>(), dir in direction()) {
        let key = SynthesisCache::key(&description, dir);
        prop_assert_eq!(&key, &SynthesisCache::key(&description.clone(), dir));
        prop_assert_eq!(key.len(), 64);
        prop_assert!(key.chars().all(|c| c.is_ascii_hexdigit()));

        for other in [TradeDirection::Long, TradeDirection::Short, TradeDirection::Both] {
            if other != dir {
                prop_assert_ne!(&key, &SynthesisCache::key(&description, other));
            }
        }
    }

    #[test]
    fn cache_never_exceeds_capacity(
        capacity in 1usize..8,
        descriptions in prop::collection::vec("[a-z]{1,6}", 0..40),
    ) {
        let mut cache = SynthesisCache::new(capacity);
        for d in &descriptions {
            let key = SynthesisCache::key(d, TradeDirection::Long);
            cache.insert(key.clone(), format!("strategy S:\n    # {d}\n"));
            prop_assert!(cache.len() <= capacity);
            prop_assert!(cache.get(&key).is_some());
        }
    }
}
