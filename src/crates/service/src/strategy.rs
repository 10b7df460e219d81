//! Decision strategies: fold a tick's check outcomes into a single
//! "service is down" verdict.
//!
//! Strategies are parsed and validated at startup; evaluation never
//! dispatches on strings.

use std::collections::HashMap;

use serde::Deserialize;

use crate::ServiceError;

/// The result of one checker invocation within a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub kind: String,
    /// Group tag, only meaningful to [`Strategy::AllInGroup`]. Untagged
    /// outcomes share the empty group.
    pub group: String,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// Down only when every check failed.
    All,
    /// Down when any check failed (the default).
    AtLeastOne,
    /// Down when some group of checks failed in its entirety. Groups exist
    /// only if at least one outcome carries the tag.
    AllInGroup,
    /// Down when the failed fraction exceeds `n`.
    AtLeastNPercentage { n: f64 },
}

#[derive(Debug, Deserialize)]
struct PercentageParams {
    n: f64,
}

impl Strategy {
    /// Resolves a strategy from its configured name and raw parameters. An
    /// absent or empty name selects the default.
    pub fn from_config(
        name: Option<&str>,
        params: Option<&serde_json::Value>,
    ) -> Result<Self, ServiceError> {
        match name.unwrap_or_default() {
            "" | "at_least_one" => Ok(Self::AtLeastOne),
            "all" => Ok(Self::All),
            "all_in_group" => Ok(Self::AllInGroup),
            "at_least_n_percentage" => {
                let params = params.ok_or_else(|| {
                    ServiceError::InvalidStrategyParams("missing parameter `n`".into())
                })?;
                let PercentageParams { n } = serde_json::from_value(params.clone())
                    .map_err(|err| ServiceError::InvalidStrategyParams(err.to_string()))?;
                if !(0.0..=1.0).contains(&n) {
                    return Err(ServiceError::InvalidStrategyParams(format!(
                        "n must be within [0, 1], got {n}"
                    )));
                }
                Ok(Self::AtLeastNPercentage { n })
            }
            other => Err(ServiceError::UnknownStrategy(other.to_string())),
        }
    }

    /// Whether the service loop may stop running checks at the first failure.
    pub fn short_circuits(&self) -> bool {
        matches!(self, Self::AtLeastOne)
    }

    /// Returns `true` when the service is down according to this strategy.
    pub fn evaluate(&self, outcomes: &[CheckOutcome]) -> Result<bool, ServiceError> {
        match self {
            Self::All => Ok(outcomes.iter().all(|outcome| !outcome.ok)),
            Self::AtLeastOne => Ok(outcomes.iter().any(|outcome| !outcome.ok)),
            Self::AllInGroup => {
                let mut groups: HashMap<&str, (usize, usize)> = HashMap::new();
                for outcome in outcomes {
                    let (total, failed) = groups.entry(outcome.group.as_str()).or_default();
                    *total += 1;
                    if !outcome.ok {
                        *failed += 1;
                    }
                }
                Ok(groups.values().any(|(total, failed)| total == failed))
            }
            Self::AtLeastNPercentage { n } => {
                if outcomes.is_empty() {
                    return Ok(false);
                }
                let failed = outcomes.iter().filter(|outcome| !outcome.ok).count();
                Ok(failed as f64 / outcomes.len() as f64 > *n)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes(results: &[(bool, &str)]) -> Vec<CheckOutcome> {
        results
            .iter()
            .map(|(ok, group)| CheckOutcome {
                kind: "test_check".to_string(),
                group: group.to_string(),
                ok: *ok,
            })
            .collect()
    }

    #[test]
    fn from_config_resolves_names() {
        assert_eq!(
            Strategy::from_config(None, None).unwrap(),
            Strategy::AtLeastOne
        );
        assert_eq!(
            Strategy::from_config(Some(""), None).unwrap(),
            Strategy::AtLeastOne
        );
        assert_eq!(Strategy::from_config(Some("all"), None).unwrap(), Strategy::All);
        assert_eq!(
            Strategy::from_config(Some("all_in_group"), None).unwrap(),
            Strategy::AllInGroup
        );

        assert!(matches!(
            Strategy::from_config(Some("unknown"), None),
            Err(ServiceError::UnknownStrategy(name)) if name == "unknown"
        ));
    }

    #[test]
    fn from_config_validates_percentage_params() {
        let strategy =
            Strategy::from_config(Some("at_least_n_percentage"), Some(&serde_json::json!({"n": 0.5})))
                .unwrap();
        assert_eq!(strategy, Strategy::AtLeastNPercentage { n: 0.5 });

        assert!(Strategy::from_config(Some("at_least_n_percentage"), None).is_err());
        assert!(Strategy::from_config(
            Some("at_least_n_percentage"),
            Some(&serde_json::json!({"n": "str"}))
        )
        .is_err());
        assert!(Strategy::from_config(
            Some("at_least_n_percentage"),
            Some(&serde_json::json!({"n": 1.5}))
        )
        .is_err());
    }

    #[test]
    fn all_requires_every_check_to_fail() {
        let strategy = Strategy::All;
        let cases = [
            (vec![(true, "")], false),
            (vec![(true, ""), (false, "")], false),
            (vec![(false, ""), (false, "")], true),
        ];
        for (results, expected) in cases {
            assert_eq!(strategy.evaluate(&outcomes(&results)).unwrap(), expected);
        }
    }

    #[test]
    fn at_least_one_fails_on_any_failure() {
        let strategy = Strategy::AtLeastOne;
        let cases = [
            (vec![(true, ""), (true, "")], false),
            (vec![(true, ""), (false, "")], true),
        ];
        for (results, expected) in cases {
            assert_eq!(strategy.evaluate(&outcomes(&results)).unwrap(), expected);
        }
    }

    #[test]
    fn all_in_group_requires_a_fully_failed_group() {
        let strategy = Strategy::AllInGroup;
        let cases = [
            (vec![(true, "group1"), (true, "group2")], false),
            (
                vec![(true, "group1"), (false, "group2"), (true, "group2")],
                false,
            ),
            (
                vec![(true, "group1"), (false, "group2"), (false, "group2")],
                true,
            ),
            (
                vec![(false, "group1"), (true, "group2"), (true, "group2")],
                true,
            ),
        ];
        for (results, expected) in cases {
            assert_eq!(
                strategy.evaluate(&outcomes(&results)).unwrap(),
                expected,
                "{results:?}"
            );
        }
        // A group nobody reported into cannot fail.
        assert!(!strategy.evaluate(&[]).unwrap());
    }

    #[test]
    fn percentage_compares_failed_fraction() {
        let strategy = Strategy::AtLeastNPercentage { n: 0.5 };
        let cases = [
            (vec![(true, ""), (true, ""), (true, ""), (true, "")], false),
            (vec![(false, ""), (true, ""), (true, ""), (true, "")], false),
            (vec![(false, ""), (false, ""), (true, ""), (true, "")], false),
            (vec![(false, ""), (false, ""), (false, ""), (true, "")], true),
        ];
        for (results, expected) in cases {
            assert_eq!(
                strategy.evaluate(&outcomes(&results)).unwrap(),
                expected,
                "{results:?}"
            );
        }

        // No outcomes: treated as healthy.
        assert!(!strategy.evaluate(&[]).unwrap());
    }
}
