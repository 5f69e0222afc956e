use crate::model::{Minute, TurnTimeRule};

/// Fallback occupancy when no rule matches the party size.
pub const DEFAULT_TURN_TIME_MIN: Minute = 120;

/// Resolve how long a party of `party` holds its table.
///
/// The narrowest matching party range wins; among equally narrow rules the
/// lowest `min_party` wins, so the outcome never depends on the order rules
/// were added. A rule with non-positive minutes is ignored rather than
/// producing an empty span.
pub fn resolve_duration(rules: &[TurnTimeRule], party: u32) -> Minute {
    rules
        .iter()
        .filter(|r| r.matches(party) && r.minutes > 0)
        .min_by_key(|r| (r.width(), r.min_party))
        .map(|r| r.minutes)
        .unwrap_or(DEFAULT_TURN_TIME_MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn rule(min_party: u32, max_party: u32, minutes: Minute) -> TurnTimeRule {
        TurnTimeRule {
            id: Ulid::new(),
            min_party,
            max_party,
            minutes,
        }
    }

    #[test]
    fn default_when_no_rules() {
        assert_eq!(resolve_duration(&[], 4), DEFAULT_TURN_TIME_MIN);
    }

    #[test]
    fn default_when_nothing_matches() {
        let rules = vec![rule(1, 2, 60)];
        assert_eq!(resolve_duration(&rules, 6), DEFAULT_TURN_TIME_MIN);
    }

    #[test]
    fn matching_rule_wins() {
        let rules = vec![rule(1, 2, 60), rule(3, 6, 105)];
        assert_eq!(resolve_duration(&rules, 2), 60);
        assert_eq!(resolve_duration(&rules, 5), 105);
    }

    #[test]
    fn narrowest_range_wins() {
        let rules = vec![rule(1, 8, 150), rule(3, 4, 90)];
        assert_eq!(resolve_duration(&rules, 4), 90);
        assert_eq!(resolve_duration(&rules, 7), 150);
    }

    #[test]
    fn width_tie_broken_by_lowest_min_party() {
        let mut rules = vec![rule(2, 5, 100), rule(4, 7, 80)];
        assert_eq!(resolve_duration(&rules, 4), 100);
        // Insertion order must not matter
        rules.reverse();
        assert_eq!(resolve_duration(&rules, 4), 100);
    }

    #[test]
    fn zero_minute_rule_is_ignored() {
        let rules = vec![rule(1, 10, 0)];
        assert_eq!(resolve_duration(&rules, 4), DEFAULT_TURN_TIME_MIN);
    }
}
