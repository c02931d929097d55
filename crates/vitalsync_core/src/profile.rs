//! Mutation profiles: which fields of a collection change, how often, and
//! within which bounds.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::Rng;
use serde_json::{Number, Value};
use vitalsync_protocol::FieldPath;

/// A numeric field adjusted by a bounded random step.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericField {
    /// Path of the field inside the entity.
    pub path: FieldPath,
    /// Lower clamp.
    pub min: f64,
    /// Upper clamp.
    pub max: f64,
    /// Largest absolute step per adjustment.
    pub max_step: f64,
}

impl NumericField {
    /// Creates a field rule.
    pub fn new(path: impl Into<FieldPath>, min: f64, max: f64, max_step: f64) -> Self {
        Self {
            path: path.into(),
            min,
            max,
            max_step,
        }
    }

    /// Returns `clamp(round(current + uniform(-max_step, max_step)), min, max)`.
    pub fn adjust<R: Rng + ?Sized>(&self, rng: &mut R, current: f64, precision: u32) -> f64 {
        let step = rng.gen_range(-self.max_step..=self.max_step);
        round_to(current + step, precision).clamp(self.min, self.max)
    }
}

/// Numeric fields that change together when the group fires.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericGroup {
    /// Chance that the group fires for a selected entity.
    pub probability: f64,
    /// Fields adjusted when it fires.
    pub fields: Vec<NumericField>,
}

impl NumericGroup {
    /// A group holding one field.
    pub fn single(probability: f64, field: NumericField) -> Self {
        Self {
            probability,
            fields: vec![field],
        }
    }

    /// A group holding several fields.
    pub fn linked(probability: f64, fields: Vec<NumericField>) -> Self {
        Self { probability, fields }
    }
}

/// Refreshes administration timestamps on the items of an array field.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRule {
    /// Path of the array holding the items.
    pub array: FieldPath,
    /// Chance that a selected entity's items are considered at all.
    pub entity_probability: f64,
    /// Chance per item that its timestamps are refreshed.
    pub item_probability: f64,
    /// Item field set to the current time.
    pub stamp_field: String,
    /// Item field set to a future due time.
    pub due_field: String,
    /// Shortest delay until the due time.
    pub min_due: Duration,
    /// Longest delay until the due time.
    pub max_due: Duration,
}

impl ScheduleRule {
    /// Picks the next due time after `now`.
    pub fn next_due<R: Rng + ?Sized>(&self, rng: &mut R, now: DateTime<Utc>) -> DateTime<Utc> {
        let min = self.min_due.num_milliseconds();
        let max = self.max_due.num_milliseconds().max(min);
        now + Duration::milliseconds(rng.gen_range(min..=max))
    }
}

/// One outcome of a status transition with its relative weight.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedChoice {
    /// Value written to the status field.
    pub value: String,
    /// Relative weight.
    pub weight: f64,
}

/// A coarse, low-frequency status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRule {
    /// Path of the status field.
    pub path: FieldPath,
    /// Chance per entity per status pass.
    pub probability: f64,
    /// Possible new values.
    pub choices: Vec<WeightedChoice>,
    /// Numeric fields adjusted whenever the rule fires.
    pub companions: Vec<NumericField>,
}

impl StatusRule {
    /// Creates a rule from `(value, weight)` pairs.
    pub fn new(path: impl Into<FieldPath>, probability: f64, choices: &[(&str, f64)]) -> Self {
        Self {
            path: path.into(),
            probability,
            choices: choices
                .iter()
                .map(|(value, weight)| WeightedChoice {
                    value: (*value).to_owned(),
                    weight: *weight,
                })
                .collect(),
            companions: Vec::new(),
        }
    }

    /// Adds a numeric field adjusted alongside the transition.
    #[must_use]
    pub fn with_companion(mut self, field: NumericField) -> Self {
        self.companions.push(field);
        self
    }

    /// Draws a value from the weighted distribution.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        let total: f64 = self.choices.iter().map(|c| c.weight).sum();
        if total <= 0.0 {
            return self.choices.first().map(|c| c.value.as_str());
        }
        let roll = rng.gen_range(0.0..total);
        let mut cumulative = 0.0;
        for choice in &self.choices {
            cumulative += choice.weight;
            if roll < cumulative {
                return Some(&choice.value);
            }
        }
        self.choices.last().map(|c| c.value.as_str())
    }
}

/// Everything that may change in one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationProfile {
    /// Collection name.
    pub collection: String,
    /// High-frequency numeric groups.
    pub numeric: Vec<NumericGroup>,
    /// Optional timestamp refresh on array items.
    pub schedule: Option<ScheduleRule>,
    /// Low-frequency status transitions.
    pub status: Vec<StatusRule>,
}

impl MutationProfile {
    /// Creates an empty profile.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            numeric: Vec::new(),
            schedule: None,
            status: Vec::new(),
        }
    }

    /// Adds a numeric group.
    #[must_use]
    pub fn with_group(mut self, group: NumericGroup) -> Self {
        self.numeric.push(group);
        self
    }

    /// Sets the schedule rule.
    #[must_use]
    pub fn with_schedule(mut self, rule: ScheduleRule) -> Self {
        self.schedule = Some(rule);
        self
    }

    /// Adds a status rule.
    #[must_use]
    pub fn with_status(mut self, rule: StatusRule) -> Self {
        self.status.push(rule);
        self
    }

    /// Returns true if the high-frequency pass can change anything.
    pub fn has_numeric_pass(&self) -> bool {
        !self.numeric.is_empty() || self.schedule.is_some()
    }

    /// Checks probabilities, ranges and weights.
    pub fn validate(&self) -> StoreResult<()> {
        let invalid = |msg: String| Err(StoreError::invalid_profile(&self.collection, msg));
        let probability_ok = |p: f64| (0.0..=1.0).contains(&p);

        let numeric_fields = self
            .numeric
            .iter()
            .flat_map(|g| g.fields.iter())
            .chain(self.status.iter().flat_map(|r| r.companions.iter()));
        for field in numeric_fields {
            if !field.path.is_valid() {
                return invalid(format!("bad path {:?}", field.path.as_str()));
            }
            if field.min > field.max || field.max_step < 0.0 {
                return invalid(format!("bad range on {}", field.path));
            }
        }
        for group in &self.numeric {
            if !probability_ok(group.probability) {
                return invalid(format!("group probability {}", group.probability));
            }
        }
        if let Some(rule) = &self.schedule {
            if !probability_ok(rule.entity_probability) || !probability_ok(rule.item_probability) {
                return invalid("schedule probability out of range".into());
            }
            if rule.min_due > rule.max_due {
                return invalid("schedule due window is inverted".into());
            }
        }
        for rule in &self.status {
            if !probability_ok(rule.probability) {
                return invalid(format!("status probability {}", rule.probability));
            }
            if rule.choices.is_empty() || rule.choices.iter().any(|c| c.weight < 0.0) {
                return invalid(format!("status choices on {}", rule.path));
            }
        }
        Ok(())
    }
}

/// Rounds to `precision` decimal places.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(precision as i32);
    (value * scale).round() / scale
}

/// Converts a number to a JSON value, writing integral values as integers.
pub fn number_value(value: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if value.fract() == 0.0 && value.abs() < MAX_EXACT {
        Value::from(value as i64)
    } else {
        Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

/// Formats a timestamp the way entity fields store it.
pub fn timestamp_value(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    #[test]
    fn adjust_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let field = NumericField::new("vitals.spo2", 95.0, 100.0, 2.0);
        let mut value = 99.0;
        for _ in 0..500 {
            let next = field.adjust(&mut rng, value, 1);
            assert!((95.0..=100.0).contains(&next));
            assert!((next - value).abs() <= 2.05);
            assert_eq!(round_to(next, 1), next);
            value = next;
        }
    }

    #[test]
    fn number_values_match_json_integers() {
        assert_eq!(number_value(72.0), json!(72));
        assert_eq!(number_value(36.6), json!(36.6));
        assert_eq!(serde_json::to_string(&number_value(80.0)).unwrap(), "80");
        assert_eq!(number_value(f64::NAN), Value::Null);
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(36.66, 1), 36.7);
        assert_eq!(round_to(36.64, 1), 36.6);
        assert_eq!(round_to(1.5, 0), 2.0);
    }

    #[test]
    fn weighted_pick_follows_weights() {
        let mut rng = StdRng::seed_from_u64(3);
        let rule = StatusRule::new("status", 1.0, &[("active", 0.8), ("maintenance", 0.2)]);
        let active = (0..2000)
            .filter(|_| rule.pick(&mut rng) == Some("active"))
            .count();
        assert!((1450..=1750).contains(&active), "active = {active}");

        let never = StatusRule::new("status", 1.0, &[("a", 0.0), ("b", 1.0)]);
        assert!((0..100).all(|_| never.pick(&mut rng) == Some("b")));
    }

    #[test]
    fn schedule_due_window() {
        let mut rng = StdRng::seed_from_u64(11);
        let rule = ScheduleRule {
            array: "medications".into(),
            entity_probability: 0.3,
            item_probability: 0.5,
            stamp_field: "lastGiven".into(),
            due_field: "nextDue".into(),
            min_due: Duration::hours(4),
            max_due: Duration::hours(10),
        };
        let now = Utc::now();
        for _ in 0..100 {
            let due = rule.next_due(&mut rng, now);
            assert!(due >= now + Duration::hours(4));
            assert!(due <= now + Duration::hours(10));
        }
    }

    #[test]
    fn validation() {
        let good = MutationProfile::new("patients")
            .with_group(NumericGroup::single(0.7, NumericField::new("vitals.heartRate", 60.0, 100.0, 5.0)))
            .with_status(StatusRule::new("status", 0.05, &[("stable", 1.0)]));
        assert!(good.validate().is_ok());
        assert!(good.has_numeric_pass());

        let bad_range = MutationProfile::new("p")
            .with_group(NumericGroup::single(0.5, NumericField::new("x", 10.0, 1.0, 1.0)));
        assert!(bad_range.validate().is_err());

        let bad_probability = MutationProfile::new("p")
            .with_status(StatusRule::new("status", 1.5, &[("a", 1.0)]));
        assert!(bad_probability.validate().is_err());

        let no_choices = MutationProfile::new("p").with_status(StatusRule::new("status", 0.5, &[]));
        assert!(no_choices.validate().is_err());
        assert!(!no_choices.has_numeric_pass());
    }
}
