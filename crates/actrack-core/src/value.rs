//! Tagged values for the open `data` mapping of an action.
//!
//! Merging two actions never overwrites a key that already exists. The
//! variant decides how the incoming value is folded into the existing one:
//!
//! | existing / incoming | result                              |
//! |---------------------|-------------------------------------|
//! | `List` / `List`     | incoming items appended, deduped    |
//! | `Set` / `Set`       | union                               |
//! | `Map` / `Map`       | deep merge, existing keys kept      |
//! | `Max` / `Max`       | maximum                             |
//! | anything else       | existing value kept                 |

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A leaf value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

/// A value stored in an action's `data` mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DataValue {
    Scalar(Scalar),
    List(Vec<DataValue>),
    Set(BTreeSet<Scalar>),
    Map(DataMap),
    /// A number that keeps the larger value when merged.
    Max(i64),
}

/// The open mapping of extra action fields.
pub type DataMap = BTreeMap<String, DataValue>;

impl DataValue {
    pub fn text(v: impl Into<String>) -> Self {
        DataValue::Scalar(Scalar::Text(v.into()))
    }

    pub fn int(v: i64) -> Self {
        DataValue::Scalar(Scalar::Int(v))
    }

    pub fn set<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Scalar>,
    {
        DataValue::Set(items.into_iter().map(Into::into).collect())
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            DataValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of the value, if it holds one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            DataValue::Scalar(Scalar::Int(v)) | DataValue::Max(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Scalar(Scalar::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DataValue::Scalar(Scalar::Text(v)) => Some(v),
            _ => None,
        }
    }

    /// Fold `other` into `self` without overwriting.
    pub fn merge_from(&mut self, other: &DataValue) {
        match (self, other) {
            (DataValue::List(mine), DataValue::List(theirs)) => {
                for item in theirs {
                    if !mine.contains(item) {
                        mine.push(item.clone());
                    }
                }
            }
            (DataValue::Set(mine), DataValue::Set(theirs)) => {
                mine.extend(theirs.iter().cloned());
            }
            (DataValue::Map(mine), DataValue::Map(theirs)) => merge_data(mine, theirs),
            (DataValue::Max(mine), DataValue::Max(theirs)) => {
                *mine = (*mine).max(*theirs);
            }
            _ => {}
        }
    }
}

impl From<Scalar> for DataValue {
    fn from(v: Scalar) -> Self {
        DataValue::Scalar(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        DataValue::text(v)
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        DataValue::text(v)
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::int(v)
    }
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        DataValue::Scalar(Scalar::Bool(v))
    }
}

/// Merge `from` into `into`: missing keys are copied, present keys are
/// merged value-wise with [`DataValue::merge_from`].
pub fn merge_data(into: &mut DataMap, from: &DataMap) {
    for (key, value) in from {
        match into.get_mut(key) {
            Some(existing) => existing.merge_from(value),
            None => {
                into.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, DataValue)]) -> DataMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_scalar_is_not_overwritten() {
        let mut v = DataValue::text("first");
        v.merge_from(&DataValue::text("second"));
        assert_eq!(v, DataValue::text("first"));
    }

    #[test]
    fn test_list_appends_without_duplicates() {
        let mut v = DataValue::List(vec![DataValue::int(1), DataValue::int(2)]);
        v.merge_from(&DataValue::List(vec![DataValue::int(2), DataValue::int(3)]));
        assert_eq!(
            v,
            DataValue::List(vec![DataValue::int(1), DataValue::int(2), DataValue::int(3)])
        );
    }

    #[test]
    fn test_set_union() {
        let mut v = DataValue::set(["a", "b"]);
        v.merge_from(&DataValue::set(["b", "c"]));
        assert_eq!(v, DataValue::set(["a", "b", "c"]));
    }

    #[test]
    fn test_max_keeps_larger() {
        let mut v = DataValue::Max(3);
        v.merge_from(&DataValue::Max(7));
        assert_eq!(v, DataValue::Max(7));
        v.merge_from(&DataValue::Max(1));
        assert_eq!(v, DataValue::Max(7));
    }

    #[test]
    fn test_mismatched_variants_keep_existing() {
        let mut v = DataValue::set(["a"]);
        v.merge_from(&DataValue::List(vec![DataValue::text("b")]));
        assert_eq!(v, DataValue::set(["a"]));
    }

    #[test]
    fn test_nested_maps_deep_merge() {
        let mut into = map(&[(
            "stats",
            DataValue::Map(map(&[
                ("name", DataValue::text("kept")),
                ("seen", DataValue::set(["x"])),
            ])),
        )]);
        let from = map(&[
            (
                "stats",
                DataValue::Map(map(&[
                    ("name", DataValue::text("ignored")),
                    ("seen", DataValue::set(["y"])),
                    ("count", DataValue::int(2)),
                ])),
            ),
            ("extra", DataValue::from(true)),
        ]);

        merge_data(&mut into, &from);

        let expected = map(&[
            (
                "stats",
                DataValue::Map(map(&[
                    ("name", DataValue::text("kept")),
                    ("seen", DataValue::set(["x", "y"])),
                    ("count", DataValue::int(2)),
                ])),
            ),
            ("extra", DataValue::from(true)),
        ]);
        assert_eq!(into, expected);
    }

    #[test]
    fn test_tagged_serialization_keeps_set_and_list_apart() {
        let set = DataValue::set(["a"]);
        let list = DataValue::List(vec![DataValue::text("a")]);
        let set_json = serde_json::to_string(&set).unwrap();
        let list_json = serde_json::to_string(&list).unwrap();
        assert_ne!(set_json, list_json);
        assert_eq!(serde_json::from_str::<DataValue>(&set_json).unwrap(), set);
        assert_eq!(serde_json::from_str::<DataValue>(&list_json).unwrap(), list);
    }
}
