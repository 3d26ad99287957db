// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stream labels and the key used to group entries into streams.
//!
//! A [`LabelSet`] is the union of the handler-wide base labels and the label
//! keys promoted from each record. Entries whose label sets produce the same
//! [`StreamKey`] are shipped in the same Loki stream.

use derive_more::Display;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::formatter::Fields;

/// Separator placed between label values when deriving a [`StreamKey`].
pub const STREAM_KEY_SEPARATOR: &str = "_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

/// Grouping key of a stream.
///
/// Only label values take part in the key: two label sets with the same values
/// under different names share one key and are shipped as a single stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub struct StreamKey(String);

impl LabelSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copies `self` and promotes every `label_keys` entry found in `fields`.
    ///
    /// Promoted labels shadow base labels with the same name. `null` fields are
    /// skipped so label values are never null; other non-string values are
    /// promoted as their JSON text.
    #[must_use]
    pub fn with_promoted(&self, label_keys: &[String], fields: &Fields) -> Self {
        let mut labels = self.clone();
        for key in label_keys {
            if let Some(value) = fields.get(key).and_then(label_value) {
                labels.insert(key.clone(), value);
            }
        }
        labels
    }

    /// Sorts the label values and joins them with [`STREAM_KEY_SEPARATOR`].
    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        let mut values: Vec<&str> = self.0.values().map(String::as_str).collect();
        values.sort_unstable();
        StreamKey(values.join(STREAM_KEY_SEPARATOR))
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl StreamKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn label_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("test fields must be an object"),
        }
    }

    #[test]
    fn test_promotes_present_label_keys() {
        let base = LabelSet::from_iter([("app", "x")]);
        let labels = base.with_promoted(
            &["level".to_string(), "missing".to_string()],
            &fields(json!({"level": "error", "msg": "boom"})),
        );

        assert_eq!(labels, LabelSet::from_iter([("app", "x"), ("level", "error")]));
        // the base set is left untouched
        assert_eq!(base.len(), 1);
    }

    #[test]
    fn test_promoted_key_shadows_base_label() {
        let base = LabelSet::from_iter([("app", "x"), ("env", "prod")]);
        let labels = base.with_promoted(&["env".to_string()], &fields(json!({"env": "staging"})));

        assert_eq!(labels.get("env"), Some("staging"));
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn test_null_field_is_not_promoted() {
        let base = LabelSet::from_iter([("app", "x")]);
        let labels = base.with_promoted(&["user".to_string()], &fields(json!({"user": null})));

        assert_eq!(labels.get("user"), None);
    }

    #[test]
    fn test_non_string_field_promoted_as_json_text() {
        let labels = LabelSet::new().with_promoted(
            &["code".to_string(), "ok".to_string()],
            &fields(json!({"code": 503, "ok": false})),
        );

        assert_eq!(labels.get("code"), Some("503"));
        assert_eq!(labels.get("ok"), Some("false"));
    }

    #[test]
    fn test_stream_key_sorts_values() {
        let labels = LabelSet::from_iter([("b", "zeta"), ("a", "alpha"), ("c", "mid")]);
        assert_eq!(labels.stream_key().as_str(), "alpha_mid_zeta");
    }

    #[test]
    fn test_stream_key_empty_label_set() {
        assert_eq!(LabelSet::new().stream_key().as_str(), "");
    }

    // Grouping uses values only: differently named labels with the same values
    // collapse into one stream.
    #[test]
    fn test_stream_key_ignores_label_names() {
        let first = LabelSet::from_iter([("app", "api"), ("level", "error")]);
        let second = LabelSet::from_iter([("service", "error"), ("tier", "api")]);

        assert_ne!(first, second);
        assert_eq!(first.stream_key(), second.stream_key());
    }

    #[test]
    fn test_label_set_serializes_as_object() {
        let labels = LabelSet::from_iter([("level", "error"), ("app", "x")]);
        assert_eq!(
            serde_json::to_string(&labels).expect("serialize"),
            r#"{"app":"x","level":"error"}"#
        );
    }

    proptest! {
        #[test]
        fn stream_key_is_independent_of_key_order(
            values in proptest::collection::vec("[a-z0-9]{0,8}", 0..8),
            seed in any::<u64>(),
        ) {
            let forward: LabelSet = values
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("k{i}"), v.clone()))
                .collect();

            // same values under shuffled, renamed keys
            let mut rotated = values.clone();
            if !rotated.is_empty() {
                let shift = usize::try_from(seed % rotated.len() as u64).unwrap_or(0);
                rotated.rotate_left(shift);
            }
            let renamed: LabelSet = rotated
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("other_{i}"), v.clone()))
                .collect();

            prop_assert_eq!(forward.stream_key(), renamed.stream_key());
        }
    }
}
