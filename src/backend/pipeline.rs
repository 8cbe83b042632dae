//! Declarative read pipeline over schemaless records.
//!
//! A pipeline is a list of stages applied in order to a snapshot of one
//! collection: filter, flatten, join against sibling collections, and
//! reshape. Pure transport; stages perform no validation of their own.

use serde_json::Value;

use crate::types::Fields;

/// Record predicate over dotted field paths.
#[derive(Clone, Debug)]
pub enum Filter {
    /// Field at `path` equals the value.
    Eq(String, Value),
    /// Field at `path` equals any of the values.
    In(String, Vec<Value>),
    /// All sub-filters match.
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(path.into(), value.into())
    }

    pub fn within(path: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(path.into(), values)
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Whether the record satisfies this filter. A missing field never
    /// matches.
    pub fn matches(&self, record: &Fields) -> bool {
        match self {
            Filter::Eq(path, value) => resolve(record, path) == Some(value),
            Filter::In(path, values) => match resolve(record, path) {
                Some(found) => values.iter().any(|v| v == found),
                None => false,
            },
            Filter::And(filters) => filters.iter().all(|f| f.matches(record)),
        }
    }
}

/// One pipeline stage.
#[derive(Clone, Debug)]
pub enum Stage {
    /// Keep only records matching the filter.
    Match(Filter),
    /// Flatten an array field: one output record per element, with the
    /// field replaced by that element. Records without the field are
    /// dropped; a non-array value passes through as a single element.
    Unwind(String),
    /// Reshape each record to exactly the listed `(output field, source
    /// path)` bindings. Bindings whose path is missing are omitted.
    Project(Vec<(String, String)>),
    /// Join: for each record, collect the records of collection `from`
    /// whose `foreign_field` equals this record's `local_field`, and store
    /// them as an array under `target`.
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        target: String,
    },
    /// Replace each record with the object stored under the field.
    /// Records where the field is not an object are dropped.
    ReplaceRoot(String),
}

/// Resolve a dotted path inside a record.
fn resolve<'a>(record: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Execute a pipeline. `sibling` resolves a named collection to a snapshot
/// of its records, for `Lookup` stages.
pub fn run(
    stages: &[Stage],
    input: Vec<Fields>,
    sibling: &dyn Fn(&str) -> Vec<Fields>,
) -> Vec<Fields> {
    let mut records = input;
    for stage in stages {
        records = apply(stage, records, sibling);
    }
    records
}

fn apply(
    stage: &Stage,
    records: Vec<Fields>,
    sibling: &dyn Fn(&str) -> Vec<Fields>,
) -> Vec<Fields> {
    match stage {
        Stage::Match(filter) => records.into_iter().filter(|r| filter.matches(r)).collect(),

        Stage::Unwind(field) => {
            let mut out = Vec::new();
            for record in records {
                match record.get(field) {
                    Some(Value::Array(elements)) => {
                        for element in elements.clone() {
                            let mut unwound = record.clone();
                            unwound.insert(field.clone(), element);
                            out.push(unwound);
                        }
                    }
                    Some(Value::Null) | None => {}
                    Some(_) => out.push(record),
                }
            }
            out
        }

        Stage::Project(bindings) => records
            .into_iter()
            .map(|record| {
                let mut projected = Fields::new();
                for (out_field, path) in bindings {
                    if let Some(value) = resolve(&record, path) {
                        projected.insert(out_field.clone(), value.clone());
                    }
                }
                projected
            })
            .collect(),

        Stage::Lookup { from, local_field, foreign_field, target } => {
            let foreign = sibling(from);
            records
                .into_iter()
                .map(|mut record| {
                    let matches: Vec<Value> = match resolve(&record, local_field) {
                        Some(local) => foreign
                            .iter()
                            .filter(|f| resolve(f, foreign_field) == Some(local))
                            .map(|f| Value::Object(f.clone()))
                            .collect(),
                        None => Vec::new(),
                    };
                    record.insert(target.clone(), Value::Array(matches));
                    record
                })
                .collect()
        }

        Stage::ReplaceRoot(field) => records
            .into_iter()
            .filter_map(|mut record| match record.remove(field) {
                Some(Value::Object(fields)) => Some(fields),
                _ => None,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    fn no_siblings(_: &str) -> Vec<Fields> {
        Vec::new()
    }

    #[test]
    fn test_filter_eq_dotted_path() {
        let r = record(json!({"a": {"b": "deep"}, "c": 1}));
        assert!(Filter::eq("a.b", "deep").matches(&r));
        assert!(Filter::eq("c", 1).matches(&r));
        assert!(!Filter::eq("a.b", "other").matches(&r));
        assert!(!Filter::eq("a.x", "deep").matches(&r));
    }

    #[test]
    fn test_filter_in_and() {
        let r = record(json!({"n": 2, "s": "x"}));
        assert!(Filter::within("n", vec![json!(1), json!(2)]).matches(&r));
        assert!(!Filter::within("n", vec![json!(3)]).matches(&r));
        assert!(Filter::and(vec![Filter::eq("n", 2), Filter::eq("s", "x")]).matches(&r));
        assert!(!Filter::and(vec![Filter::eq("n", 2), Filter::eq("s", "y")]).matches(&r));
    }

    #[test]
    fn test_match_stage() {
        let input = vec![record(json!({"k": 1})), record(json!({"k": 2}))];
        let out = run(&[Stage::Match(Filter::eq("k", 2))], input, &no_siblings);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["k"], 2);
    }

    #[test]
    fn test_unwind_expands_arrays() {
        let input = vec![
            record(json!({"id": 1, "xs": [10, 20]})),
            record(json!({"id": 2, "xs": []})),
            record(json!({"id": 3})),
        ];
        let out = run(&[Stage::Unwind("xs".into())], input, &no_siblings);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["xs"], 10);
        assert_eq!(out[1]["xs"], 20);
    }

    #[test]
    fn test_project_reshapes() {
        let input = vec![record(json!({"base": {"item": 4, "document": 9}, "junk": true}))];
        let out = run(
            &[Stage::Project(vec![
                ("item".into(), "base.item".into()),
                ("document".into(), "base.document".into()),
            ])],
            input,
            &no_siblings,
        );
        assert_eq!(out[0], record(json!({"item": 4, "document": 9})));
    }

    #[test]
    fn test_lookup_joins_by_field() {
        let input = vec![record(json!({"ref": 7}))];
        let others = vec![record(json!({"_id": 7, "name": "hit"})), record(json!({"_id": 8}))];
        let out = run(
            &[Stage::Lookup {
                from: "others".into(),
                local_field: "ref".into(),
                foreign_field: "_id".into(),
                target: "joined".into(),
            }],
            input,
            &|name| if name == "others" { others.clone() } else { Vec::new() },
        );
        assert_eq!(out[0]["joined"], json!([{"_id": 7, "name": "hit"}]));
    }

    #[test]
    fn test_replace_root() {
        let input = vec![
            record(json!({"doc": {"inner": true}})),
            record(json!({"doc": 42})),
        ];
        let out = run(&[Stage::ReplaceRoot("doc".into())], input, &no_siblings);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], record(json!({"inner": true})));
    }
}
