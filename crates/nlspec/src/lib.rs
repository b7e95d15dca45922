//! Loader for netlink protocol family specs.
//!
//! A spec file is a YAML mapping preceded by a mandatory SPDX license
//! comment on its first line. [`LoadedFamily::load`] reads the file,
//! captures the license, parses the tree into the [`model`] structs and
//! assigns the id values that later stages treat as the source of truth:
//! attribute ids, enum entry values, and operation request/reply ids.

pub mod model;

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use regex::Regex;

pub use model::*;

const SPDX_PREFIX: &str = "# SPDX-License-Identifier: ";

#[derive(Debug)]
pub enum SpecError {
    Io(io::Error),
    Yaml(serde_yaml::Error),
    /// Anything structurally wrong with the spec itself.
    Schema(String),
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecError::Io(e) => write!(f, "failed to read spec: {}", e),
            SpecError::Yaml(e) => write!(f, "failed to parse spec: {}", e),
            SpecError::Schema(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for SpecError {}

impl From<io::Error> for SpecError {
    fn from(e: io::Error) -> Self {
        SpecError::Io(e)
    }
}

impl From<serde_yaml::Error> for SpecError {
    fn from(e: serde_yaml::Error) -> Self {
        SpecError::Yaml(e)
    }
}

/// Request/reply ids of one operation. Either side may be absent: pure
/// notifications have no request id, requests without replies have no
/// reply id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpIds {
    pub req: Option<u64>,
    pub rsp: Option<u64>,
}

/// A parsed spec with ids assigned and excluded operations removed.
#[derive(Debug, Clone)]
pub struct LoadedFamily {
    pub license: String,
    pub family: FamilySpec,
    /// Parallel to `family.operations.list`.
    pub op_ids: Vec<OpIds>,
}

impl LoadedFamily {
    pub fn load(path: &Path, exclude_ops: &[Regex]) -> Result<Self, SpecError> {
        let text = fs::read_to_string(path)?;
        let first = text.lines().next().unwrap_or("").trim();
        let license = first
            .strip_prefix(SPDX_PREFIX)
            .ok_or_else(|| {
                SpecError::Schema("SPDX license tag required on the first line of the spec".into())
            })?
            .to_string();

        let family: FamilySpec = serde_yaml::from_str(&text)?;
        let op_ids = assign_op_ids(&family.operations)?;

        let mut loaded = LoadedFamily {
            license,
            family,
            op_ids,
        };
        loaded.exclude(exclude_ops);
        Ok(loaded)
    }

    /// Drop operations matching any exclusion pattern (anchored at the
    /// start of the name). Ids were assigned over the full list first,
    /// so survivors keep their wire values.
    fn exclude(&mut self, patterns: &[Regex]) {
        if patterns.is_empty() {
            return;
        }
        let matches_at_start = |re: &Regex, name: &str| {
            re.find(name).is_some_and(|m| m.start() == 0)
        };
        let keep: Vec<bool> = self
            .family
            .operations
            .list
            .iter()
            .map(|op| !patterns.iter().any(|re| matches_at_start(re, &op.name)))
            .collect();
        let mut it = keep.iter();
        self.family.operations.list.retain(|_| *it.next().unwrap());
        let mut it = keep.iter();
        self.op_ids.retain(|_| *it.next().unwrap());
    }
}

/// Assign attribute id values for a set: a running counter from 1, reset
/// by an explicit `value`. Subset members take the id of the same-named
/// attribute in the parent set.
pub fn assign_attr_values(
    set: &AttrSetSpec,
    parent: Option<&AttrSetSpec>,
) -> Result<Vec<u64>, SpecError> {
    match parent {
        None => {
            let mut val = 1;
            let mut out = Vec::with_capacity(set.attributes.len());
            for attr in &set.attributes {
                if let Some(v) = attr.value {
                    val = v;
                }
                out.push(val);
                val += 1;
            }
            Ok(out)
        }
        Some(parent) => {
            let vals = assign_attr_values(parent, None)?;
            let mut parent_vals = std::collections::HashMap::new();
            for (i, attr) in parent.attributes.iter().enumerate() {
                parent_vals.insert(attr.name.as_str(), vals[i]);
            }
            set.attributes
                .iter()
                .map(|attr| {
                    parent_vals.get(attr.name.as_str()).copied().ok_or_else(|| {
                        SpecError::Schema(format!(
                            "attribute '{}' of subset '{}' not found in '{}'",
                            attr.name,
                            set.name,
                            parent.name
                        ))
                    })
                })
                .collect()
        }
    }
}

/// Assign enum entry values: explicit `value`, else predecessor + 1,
/// else `value-start`. For flags sets the value counts bit positions.
pub fn assign_enum_values(def: &Definition) -> Vec<i64> {
    let mut out = Vec::with_capacity(def.entries.len());
    let mut prev: Option<i64> = None;
    for entry in &def.entries {
        let val = entry
            .value()
            .unwrap_or_else(|| prev.map(|p| p + 1).unwrap_or(def.value_start));
        out.push(val);
        prev = Some(val);
    }
    out
}

fn assign_op_ids(ops: &OperationsSpec) -> Result<Vec<OpIds>, SpecError> {
    match ops.enum_model.as_deref().unwrap_or("unified") {
        "unified" => {
            let mut val = 1;
            Ok(ops
                .list
                .iter()
                .map(|op| {
                    if let Some(v) = op.value {
                        val = v;
                    }
                    let ids = OpIds {
                        req: Some(val),
                        rsp: Some(val),
                    };
                    val += 1;
                    ids
                })
                .collect())
        }
        "directional" => assign_op_ids_directional(ops),
        other => Err(SpecError::Schema(format!(
            "unsupported operations enum-model '{}'",
            other
        ))),
    }
}

/// Directional numbering: requests and replies run on separate counters.
/// A `do`/`dump` op consumes a request id, and a reply id only when it
/// carries a reply; `notify`/`event` ops consume a reply id only.
/// Explicit values reset the counter being consumed.
fn assign_op_ids_directional(ops: &OperationsSpec) -> Result<Vec<OpIds>, SpecError> {
    let mut req_val = 1;
    let mut rsp_val = 1;
    let mut out = Vec::with_capacity(ops.list.len());
    for op in &ops.list {
        if op.is_async() {
            if let Some(v) = op.value {
                rsp_val = v;
            }
            out.push(OpIds {
                req: None,
                rsp: Some(rsp_val),
            });
            rsp_val += 1;
        } else if op.is_call() {
            let req_override = op
                .do_
                .as_ref()
                .and_then(|m| m.request.as_ref())
                .and_then(|r| r.value)
                .or_else(|| {
                    op.dump
                        .as_ref()
                        .and_then(|m| m.request.as_ref())
                        .and_then(|r| r.value)
                })
                .or(op.value);
            if let Some(v) = req_override {
                req_val = v;
            }
            let req = Some(req_val);
            req_val += 1;

            let has_reply = op.do_.as_ref().is_some_and(|m| m.reply.is_some())
                || op.dump.as_ref().is_some_and(|m| m.reply.is_some());
            let rsp = if has_reply {
                let rsp_override = op
                    .do_
                    .as_ref()
                    .and_then(|m| m.reply.as_ref())
                    .and_then(|r| r.value)
                    .or_else(|| {
                        op.dump
                            .as_ref()
                            .and_then(|m| m.reply.as_ref())
                            .and_then(|r| r.value)
                    });
                if let Some(v) = rsp_override {
                    rsp_val = v;
                }
                let v = rsp_val;
                rsp_val += 1;
                Some(v)
            } else {
                None
            };
            out.push(OpIds { req, rsp });
        } else {
            return Err(SpecError::Schema(format!(
                "operation '{}' has neither do/dump nor notify/event",
                op.name
            )));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops_from_yaml(yaml: &str) -> OperationsSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn unified_ids_run_from_one() {
        let ops = ops_from_yaml(
            "list:\n  - name: a\n    do: {}\n  - name: b\n    do: {}\n",
        );
        let ids = assign_op_ids(&ops).unwrap();
        assert_eq!(ids[0], OpIds { req: Some(1), rsp: Some(1) });
        assert_eq!(ids[1], OpIds { req: Some(2), rsp: Some(2) });
    }

    #[test]
    fn unified_ids_reset_on_explicit_value() {
        let ops = ops_from_yaml(
            "list:\n  - name: a\n    do: {}\n  - name: b\n    value: 10\n    do: {}\n  - name: c\n    do: {}\n",
        );
        let ids = assign_op_ids(&ops).unwrap();
        assert_eq!(ids[1].req, Some(10));
        assert_eq!(ids[2].req, Some(11));
    }

    #[test]
    fn directional_ids_use_separate_counters() {
        let ops = ops_from_yaml(
            "enum-model: directional\nlist:\n  - name: get\n    do:\n      request: {}\n      reply: {}\n  - name: set\n    do:\n      request: {}\n  - name: ntf\n    event: {}\n",
        );
        let ids = assign_op_ids(&ops).unwrap();
        assert_eq!(ids[0], OpIds { req: Some(1), rsp: Some(1) });
        assert_eq!(ids[1], OpIds { req: Some(2), rsp: None });
        assert_eq!(ids[2], OpIds { req: None, rsp: Some(2) });
    }

    #[test]
    fn attr_values_reset_and_run() {
        let set: AttrSetSpec = serde_yaml::from_str(
            "name: main\nattributes:\n  - name: a\n    type: u32\n  - name: b\n    type: u32\n    value: 5\n  - name: c\n    type: u32\n",
        )
        .unwrap();
        assert_eq!(assign_attr_values(&set, None).unwrap(), vec![1, 5, 6]);
    }

    #[test]
    fn subset_attrs_take_parent_values() {
        let parent: AttrSetSpec = serde_yaml::from_str(
            "name: main\nattributes:\n  - name: a\n    type: u32\n  - name: b\n    type: u32\n  - name: c\n    type: u32\n",
        )
        .unwrap();
        let sub: AttrSetSpec = serde_yaml::from_str(
            "name: small\nsubset-of: main\nattributes:\n  - name: c\n    type: u32\n  - name: a\n    type: u32\n",
        )
        .unwrap();
        assert_eq!(assign_attr_values(&sub, Some(&parent)).unwrap(), vec![3, 1]);
    }

    #[test]
    fn enum_values_follow_predecessor() {
        let def: Definition = serde_yaml::from_str(
            "name: colors\ntype: enum\nentries:\n  - red\n  - name: green\n    value: 4\n  - blue\n",
        )
        .unwrap();
        assert_eq!(assign_enum_values(&def), vec![0, 4, 5]);
    }

    #[test]
    fn enum_values_start_at_value_start() {
        let def: Definition = serde_yaml::from_str(
            "name: colors\ntype: enum\nvalue-start: 3\nentries: [a, b]\n",
        )
        .unwrap();
        assert_eq!(assign_enum_values(&def), vec![3, 4]);
    }
}
