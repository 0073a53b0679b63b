//! Named parameter slots and their serialisable snapshots
//!
//! A network fixes an ordered list of [`ParamSlot`]s when it is constructed. A
//! [`StateDict`] is a detached copy of those slots keyed by name; loading one back
//! matches entries by name and refuses anything that does not line up exactly.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::values::Value;

/// A named, shaped group of parameters, e.g. the weight matrix of one layer
///
/// The values are shared handles into the owning layer, so writing through a slot
/// updates the layer.
#[derive(Debug, Clone)]
pub struct ParamSlot {
    name: String,
    shape: Vec<usize>,
    values: Vec<Value>,
}

impl ParamSlot {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, values: Vec<Value>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), values.len());
        Self {
            name: name.into(),
            shape,
            values,
        }
    }

    /// Same slot, registered under `prefix.name`
    pub fn with_prefix(&self, prefix: &str) -> Self {
        Self {
            name: format!("{}.{}", prefix, self.name),
            shape: self.shape.clone(),
            values: self.values.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn numel(&self) -> usize {
        self.values.len()
    }

    /// Copies the current parameter values out of the graph
    pub fn to_record(&self) -> TensorRecord {
        TensorRecord {
            shape: self.shape.clone(),
            data: self.values.iter().map(|v| v.data()).collect(),
        }
    }

    fn check(&self, record: &TensorRecord) -> Option<ParamMismatch> {
        if record.shape != self.shape {
            return Some(ParamMismatch::Shape {
                name: self.name.clone(),
                expected: self.shape.clone(),
                found: record.shape.clone(),
            });
        }
        if record.data.len() != record.numel() {
            return Some(ParamMismatch::Corrupt {
                name: self.name.clone(),
                shape: record.shape.clone(),
                len: record.data.len(),
            });
        }
        None
    }

    fn assign(&mut self, record: &TensorRecord) {
        for (value, data) in self.values.iter_mut().zip(record.data.iter()) {
            value.set_data(*data);
        }
    }
}

/// Row-major numeric array with its shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorRecord {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Mapping from parameter name to its value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDict(BTreeMap<String, TensorRecord>);

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots every slot
    pub fn from_slots<'a>(slots: impl IntoIterator<Item = &'a ParamSlot>) -> Self {
        Self(
            slots
                .into_iter()
                .map(|s| (s.name.clone(), s.to_record()))
                .collect(),
        )
    }

    pub fn insert(&mut self, name: impl Into<String>, record: TensorRecord) -> Option<TensorRecord> {
        self.0.insert(name.into(), record)
    }

    pub fn get(&self, name: &str) -> Option<&TensorRecord> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries ordered by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TensorRecord)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Writes every entry into the slot with the same name.
    ///
    /// All slots are checked before any value is written, so on error the slots are
    /// left exactly as they were.
    pub fn load_into(&self, slots: &mut [ParamSlot]) -> Result<(), LoadStateDictError> {
        let mut mismatches = vec![];
        for slot in slots.iter() {
            match self.0.get(&slot.name) {
                None => mismatches.push(ParamMismatch::Missing {
                    name: slot.name.clone(),
                    expected: slot.shape.clone(),
                }),
                Some(record) => mismatches.extend(slot.check(record)),
            }
        }
        let known = slots.iter().map(|s| s.name.as_str()).collect::<BTreeSet<_>>();
        mismatches.extend(
            self.0
                .iter()
                .filter(|(name, _)| !known.contains(name.as_str()))
                .map(|(name, record)| ParamMismatch::Unexpected {
                    name: name.clone(),
                    found: record.shape.clone(),
                }),
        );
        if !mismatches.is_empty() {
            return Err(LoadStateDictError { mismatches });
        }

        for slot in slots.iter_mut() {
            if let Some(record) = self.0.get(&slot.name) {
                slot.assign(record);
            }
        }
        Ok(())
    }
}

/// One way in which a state dict entry fails to line up with a network slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamMismatch {
    /// The network has a slot the state dict lacks
    Missing { name: String, expected: Vec<usize> },
    /// The state dict has an entry the network lacks
    Unexpected { name: String, found: Vec<usize> },
    Shape {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    /// Entry whose data length disagrees with its own shape
    Corrupt {
        name: String,
        shape: Vec<usize>,
        len: usize,
    },
}

impl ParamMismatch {
    pub fn name(&self) -> &str {
        match self {
            ParamMismatch::Missing { name, .. }
            | ParamMismatch::Unexpected { name, .. }
            | ParamMismatch::Shape { name, .. }
            | ParamMismatch::Corrupt { name, .. } => name,
        }
    }
}

impl Display for ParamMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamMismatch::Missing { name, expected } => {
                write!(f, "{}: expected {:?}, missing from state dict", name, expected)
            }
            ParamMismatch::Unexpected { name, found } => {
                write!(f, "{}: unexpected entry with shape {:?}", name, found)
            }
            ParamMismatch::Shape {
                name,
                expected,
                found,
            } => write!(f, "{}: expected {:?}, found {:?}", name, expected, found),
            ParamMismatch::Corrupt { name, shape, len } => write!(
                f,
                "{}: shape {:?} but {} values stored",
                name, shape, len
            ),
        }
    }
}

/// Raised when a state dict cannot be loaded into a set of slots
#[derive(Debug, Error)]
#[error("state dict does not match the network ({} mismatched): {}", .mismatches.len(), list(.mismatches))]
pub struct LoadStateDictError {
    pub mismatches: Vec<ParamMismatch>,
}

fn list(mismatches: &[ParamMismatch]) -> String {
    mismatches
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(name: &str, shape: Vec<usize>, fill: f32) -> ParamSlot {
        let n = shape.iter().product();
        ParamSlot::new(name, shape, (0..n).map(|_| Value::new(fill)).collect())
    }

    #[test]
    fn test_from_slots_snapshots_values() {
        let slots = vec![slot("w", vec![2, 3], 1.5), slot("b", vec![2], -1.0)];
        let dict = StateDict::from_slots(&slots);
        assert_eq!(dict.len(), 2);
        assert_eq!(
            dict.get("w"),
            Some(&TensorRecord {
                shape: vec![2, 3],
                data: vec![1.5; 6]
            })
        );
        assert_eq!(dict.get("b").unwrap().data, vec![-1.0, -1.0]);
        let names = dict.iter().map(|(name, _)| name).collect::<Vec<_>>();
        assert_eq!(names, vec!["b", "w"]);
    }

    #[test]
    fn test_load_into_writes_through_shared_values() {
        let layer_weight = vec![Value::new(0.0), Value::new(0.0)];
        let mut slots = vec![ParamSlot::new("w", vec![2], layer_weight.clone())];

        let mut dict = StateDict::new();
        dict.insert(
            "w",
            TensorRecord {
                shape: vec![2],
                data: vec![3.0, 4.0],
            },
        );
        dict.load_into(&mut slots).unwrap();

        assert_eq!(layer_weight[0].data(), 3.0);
        assert_eq!(layer_weight[1].data(), 4.0);
    }

    #[test]
    fn test_with_prefix() {
        let s = slot("weight", vec![1], 0.0).with_prefix("hidden_layers.0");
        assert_eq!(s.name(), "hidden_layers.0.weight");
    }

    #[test]
    fn test_load_into_reports_every_mismatch_and_writes_nothing() {
        let mut slots = vec![
            slot("a", vec![2, 2], 0.0),
            slot("b", vec![2], 0.0),
            slot("c", vec![3], 0.0),
        ];
        let mut dict = StateDict::new();
        // shape differs
        dict.insert(
            "a",
            TensorRecord {
                shape: vec![3, 2],
                data: vec![1.0; 6],
            },
        );
        // fine on its own
        dict.insert(
            "b",
            TensorRecord {
                shape: vec![2],
                data: vec![9.0; 2],
            },
        );
        // "c" missing, "d" unexpected
        dict.insert(
            "d",
            TensorRecord {
                shape: vec![1],
                data: vec![1.0],
            },
        );

        let err = dict.load_into(&mut slots).unwrap_err();
        assert_eq!(
            err.mismatches,
            vec![
                ParamMismatch::Shape {
                    name: "a".to_string(),
                    expected: vec![2, 2],
                    found: vec![3, 2],
                },
                ParamMismatch::Missing {
                    name: "c".to_string(),
                    expected: vec![3],
                },
                ParamMismatch::Unexpected {
                    name: "d".to_string(),
                    found: vec![1],
                },
            ]
        );
        let message = err.to_string();
        assert!(message.contains("3 mismatched"));
        assert!(message.contains("a: expected [2, 2], found [3, 2]"));

        // "b" matched but nothing may be written on failure
        assert!(slots[1].values().iter().all(|v| v.data() == 0.0));
    }

    #[test]
    fn test_load_into_rejects_corrupt_record() {
        let mut slots = vec![slot("w", vec![2, 2], 0.0)];
        let mut dict = StateDict::new();
        dict.insert(
            "w",
            TensorRecord {
                shape: vec![2, 2],
                data: vec![1.0; 3],
            },
        );
        let err = dict.load_into(&mut slots).unwrap_err();
        assert!(matches!(
            err.mismatches.as_slice(),
            [ParamMismatch::Corrupt { len: 3, .. }]
        ));
    }
}
