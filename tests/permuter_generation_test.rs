// Candidate generation and pattern inference through the public API.

use std::collections::HashSet;

use leadpipe_backend_core::services::permuter::{
    generate_candidates, infer_domain_pattern, MAX_CANDIDATES,
};

fn ex(first: &str, last: &str, local: &str) -> (String, String, String) {
    (first.to_string(), last.to_string(), local.to_string())
}

#[test]
fn generation_is_deterministic() {
    // Re-running with the same inputs yields the same candidate list in the
    // same order; the upsert layer depends on this for no-duplicate reruns
    let first = generate_candidates("Jane", "Doe", "example.com", None);
    for _ in 0..5 {
        assert_eq!(generate_candidates("Jane", "Doe", "example.com", None), first);
    }
}

#[test]
fn candidate_cap_holds() {
    let candidates = generate_candidates("Alexandra", "Montgomery", "example.com", None);
    assert!(candidates.len() <= MAX_CANDIDATES);
    let unique: HashSet<&String> = candidates.iter().collect();
    assert_eq!(unique.len(), candidates.len());
}

#[test]
fn detected_pattern_ranks_first() {
    let examples = vec![
        ex("Jane", "Doe", "jdoe"),
        ex("John", "Smith", "jsmith"),
        ex("Ada", "Lovelace", "alovelace"),
    ];
    let inference = infer_domain_pattern(&examples);
    assert_eq!(inference.pattern.as_deref(), Some("flast"));

    let candidates =
        generate_candidates("Grace", "Hopper", "example.com", inference.pattern.as_deref());
    assert_eq!(candidates[0], "ghopper@example.com");
}

#[test]
fn inference_requires_two_agreeing_samples() {
    assert_eq!(
        infer_domain_pattern(&[ex("Jane", "Doe", "jane.doe")]).pattern,
        None
    );
    assert_eq!(
        infer_domain_pattern(&[
            ex("Jane", "Doe", "jane.doe"),
            ex("John", "Smith", "smithj77"),
        ])
        .pattern,
        None
    );
    assert_eq!(
        infer_domain_pattern(&[
            ex("Jane", "Doe", "jane.doe"),
            ex("John", "Smith", "john.smith"),
        ])
        .pattern
        .as_deref(),
        Some("first.last")
    );
}

#[test]
fn role_addresses_never_generated() {
    // Even a person literally named "Info" must not produce info@
    let candidates = generate_candidates("Info", "", "example.com", None);
    assert!(!candidates.contains(&"info@example.com".to_string()));
}

#[test]
fn international_names_fold_to_ascii() {
    let candidates = generate_candidates("José", "Núñez", "example.com", Some("first.last"));
    assert_eq!(candidates[0], "jose.nunez@example.com");
    assert!(candidates.iter().all(|c| c.is_ascii()));
}

#[test]
fn mixed_role_examples_do_not_poison_inference() {
    let examples = vec![
        ex("", "", "info"),
        ex("", "", "sales"),
        ex("", "", "support"),
        ex("Jane", "Doe", "jane.doe"),
        ex("John", "Smith", "john.smith"),
    ];
    let inference = infer_domain_pattern(&examples);
    assert_eq!(inference.pattern.as_deref(), Some("first.last"));
    assert_eq!(inference.samples, 2);
}
