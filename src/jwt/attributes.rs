//! Registry of attributes a relying service may hand over, and the scope each
//! one requires.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de, ser::SerializeMap};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeName {
    Test,
    TransitionCheckerState,
}

impl AttributeName {
    pub const ALL: [Self; 2] = [Self::Test, Self::TransitionCheckerState];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::TransitionCheckerState => "transition_checker_state",
        }
    }

    /// Scope an assertion must request before it may carry this attribute.
    #[must_use]
    pub const fn required_scope(self) -> &'static str {
        match self {
            Self::Test => "test_scope_write",
            Self::TransitionCheckerState => "transition_checker_state",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.as_str() == value)
    }
}

/// Authorized attribute values keyed by their registered name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(BTreeMap<AttributeName, Value>);

impl Attributes {
    /// Admit every attribute or none. An unknown name, or one whose scope is
    /// not among `scopes`, fails the whole set.
    pub(crate) fn authorize(
        raw: serde_json::Map<String, Value>,
        scopes: &BTreeSet<String>,
    ) -> Option<Self> {
        let mut authorized = BTreeMap::new();
        for (key, value) in raw {
            let name = AttributeName::from_str(&key)?;
            if !scopes.contains(name.required_scope()) {
                return None;
            }
            authorized.insert(name, value);
        }
        Some(Self(authorized))
    }

    #[must_use]
    pub fn get(&self, name: AttributeName) -> Option<&Value> {
        self.0.get(&name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AttributeName, &Value)> {
        self.0.iter().map(|(name, value)| (*name, value))
    }

    /// Structured view of the `transition_checker_state` attribute, if it is
    /// present and well formed.
    #[must_use]
    pub fn transition_checker_state(&self) -> Option<TransitionCheckerState> {
        self.get(AttributeName::TransitionCheckerState)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name.as_str(), value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Attributes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(key, value)| {
                AttributeName::from_str(&key)
                    .map(|name| (name, value))
                    .ok_or_else(|| de::Error::custom(format!("unknown attribute: {key}")))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Self)
    }
}

/// Answers a relying checker service hands over about the visitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionCheckerState {
    #[serde(default)]
    pub criteria_keys: Vec<String>,
    #[serde(default)]
    pub email_topic_slug: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scopes(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn raw(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        }
    }

    #[test]
    fn registry_round_trips_names() {
        for name in AttributeName::ALL {
            assert_eq!(AttributeName::from_str(name.as_str()), Some(name));
        }
        assert_eq!(AttributeName::from_str("foo"), None);
    }

    #[test]
    fn authorize_requires_scope_for_every_attribute() {
        let granted = scopes(&["test_scope_write"]);
        let attributes = Attributes::authorize(raw(json!({"test": "hello"})), &granted);
        assert_eq!(
            attributes.and_then(|a| a.get(AttributeName::Test).cloned()),
            Some(json!("hello"))
        );

        let none = scopes(&[]);
        assert!(Attributes::authorize(raw(json!({"test": "hello"})), &none).is_none());
    }

    #[test]
    fn authorize_rejects_unknown_attribute_even_with_other_valid_ones() {
        let granted = scopes(&["test_scope_write"]);
        let attributes =
            Attributes::authorize(raw(json!({"test": "hello", "foo": "bar"})), &granted);
        assert!(attributes.is_none());
    }

    #[test]
    fn transition_checker_state_is_parsed() {
        let granted = scopes(&["transition_checker_state"]);
        let attributes = Attributes::authorize(
            raw(json!({
                "transition_checker_state": {
                    "criteria_keys": ["nationality-uk", "living-uk"],
                    "email_topic_slug": "brexit-checker",
                    "timestamp": 1_700_000_000
                }
            })),
            &granted,
        )
        .unwrap_or_default();

        let state = attributes.transition_checker_state().unwrap_or_default();
        assert_eq!(state.criteria_keys, vec!["nationality-uk", "living-uk"]);
        assert_eq!(state.email_topic_slug.as_deref(), Some("brexit-checker"));
    }

    #[test]
    fn serializes_with_registered_names() -> anyhow::Result<()> {
        let granted = scopes(&["test_scope_write"]);
        let attributes =
            Attributes::authorize(raw(json!({"test": [1, 2]})), &granted).unwrap_or_default();
        let encoded = serde_json::to_value(&attributes)?;
        assert_eq!(encoded, json!({"test": [1, 2]}));

        let decoded: Attributes = serde_json::from_value(encoded)?;
        assert_eq!(decoded, attributes);
        Ok(())
    }
}
