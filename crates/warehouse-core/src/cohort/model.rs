use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Whether a membership computation is in flight.
///
/// Only advisory: the flag is visible to concurrent callers but does not stop
/// them. Use `recalculate_exclusive` when a run must not overlap another; it
/// claims the cohort through the store and records when the claim started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationState {
    #[default]
    Idle,
    Calculating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipMode {
    /// Membership is an explicit list maintained by hand.
    Static,
    /// Membership is computed from the property groups.
    Dynamic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cohort {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
    #[serde(default)]
    pub groups: Vec<Value>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub state: CalculationState,
    pub count: Option<i64>,
    pub last_calculation: Option<DateTime<Utc>>,
    /// When the run currently holding the cohort started; `None` when idle.
    #[serde(default)]
    pub calculation_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub errors_calculating: u32,
    #[serde(default)]
    pub deleted: bool,
}

impl Cohort {
    pub fn new_dynamic(id: i64, team_id: i64, name: impl Into<String>, groups: Vec<Value>) -> Self {
        Self {
            id,
            team_id,
            name: name.into(),
            groups,
            is_static: false,
            state: CalculationState::Idle,
            count: None,
            last_calculation: None,
            calculation_started_at: None,
            errors_calculating: 0,
            deleted: false,
        }
    }

    pub fn new_static(id: i64, team_id: i64, name: impl Into<String>) -> Self {
        Self {
            is_static: true,
            ..Self::new_dynamic(id, team_id, name, Vec::new())
        }
    }

    pub fn mode(&self) -> MembershipMode {
        if self.is_static {
            MembershipMode::Static
        } else {
            MembershipMode::Dynamic
        }
    }

    pub fn is_calculating(&self) -> bool {
        self.state == CalculationState::Calculating
    }

    pub(crate) fn begin_calculation(&mut self, now: DateTime<Utc>) {
        self.state = CalculationState::Calculating;
        self.calculation_started_at = Some(now);
    }

    /// Leaves the cohort idle whatever the outcome; `count` is the new
    /// membership size on success.
    pub(crate) fn finish_calculation(&mut self, count: Option<i64>, now: DateTime<Utc>) {
        self.state = CalculationState::Idle;
        self.calculation_started_at = None;
        match count {
            Some(count) => {
                self.count = Some(count);
                self.last_calculation = Some(now);
                self.errors_calculating = 0;
            }
            None => {
                self.errors_calculating = self.errors_calculating.saturating_add(1);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub uuid: Uuid,
    pub team_id: i64,
    #[serde(default)]
    pub distinct_ids: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Person {
    pub fn new(id: i64, team_id: i64) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4(),
            team_id,
            distinct_ids: Vec::new(),
            properties: Map::new(),
        }
    }

    pub fn with_distinct_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.distinct_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn email(&self) -> Option<&str> {
        self.properties.get("email").and_then(Value::as_str)
    }
}
