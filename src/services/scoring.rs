// ICP scoring boundary. The pipeline only invokes this contract when
// persisting people; the scoring model itself lives with an external
// collaborator, like the AI side of `CandidateExtractor`.

use serde::Serialize;

/// Signals handed to the scorer for one person.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IcpSignals<'a> {
    pub title: Option<&'a str>,
    pub title_norm: Option<&'a str>,
    pub role_family: Option<&'a str>,
    pub seniority: Option<&'a str>,
}

/// Pure scoring contract: identical signals must yield identical scores.
/// Returning None leaves `people.icp_score` null until a real scorer runs.
pub trait IcpScorer: Send + Sync {
    fn score(&self, signals: &IcpSignals) -> Option<i32>;
}

/// Default provider for deployments without a scoring model configured.
pub struct NullIcpScorer;

impl IcpScorer for NullIcpScorer {
    fn score(&self, _signals: &IcpSignals) -> Option<i32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SeniorityOnlyScorer;

    impl IcpScorer for SeniorityOnlyScorer {
        fn score(&self, signals: &IcpSignals) -> Option<i32> {
            match signals.seniority {
                Some("c_level") => Some(90),
                Some(_) => Some(10),
                None => None,
            }
        }
    }

    #[test]
    fn test_null_scorer_leaves_score_unset() {
        let signals = IcpSignals {
            title: Some("CTO"),
            seniority: Some("c_level"),
            ..Default::default()
        };
        assert_eq!(NullIcpScorer.score(&signals), None);
    }

    #[test]
    fn test_custom_scorer_dispatches_through_trait_object() {
        let scorer: Box<dyn IcpScorer> = Box::new(SeniorityOnlyScorer);
        let cto = IcpSignals {
            seniority: Some("c_level"),
            ..Default::default()
        };
        let untitled = IcpSignals::default();
        assert_eq!(scorer.score(&cto), Some(90));
        assert_eq!(scorer.score(&untitled), None);
        // Pure: same signals, same score
        assert_eq!(scorer.score(&cto), scorer.score(&cto));
    }
}
