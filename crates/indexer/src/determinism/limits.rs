use crate::errors::{WarningKind, WarningLog};
use crate::index::ReverseIndex;
use serde_json::Value;

pub const EVIDENCE_KEY: &str = "evidence";
pub const EVIDENCE_TOTAL_KEY: &str = "evidence_total";

/// Truncate every `evidence` array in `value` to its first `cap` items and
/// annotate the owning object with `evidence_total`.
///
/// Returns the number of truncated lists.
pub fn cap_evidence(value: &mut Value, cap: usize) -> usize {
    match value {
        Value::Object(map) => {
            let mut truncated = 0;
            let mut total = None;
            if let Some(Value::Array(items)) = map.get_mut(EVIDENCE_KEY) {
                if items.len() > cap {
                    total = Some(items.len());
                    items.truncate(cap);
                }
            }
            if let Some(total) = total {
                map.insert(EVIDENCE_TOTAL_KEY.to_string(), Value::from(total));
                truncated += 1;
            }
            for child in map.values_mut() {
                truncated += cap_evidence(child, cap);
            }
            truncated
        }
        Value::Array(items) => items.iter_mut().map(|item| cap_evidence(item, cap)).sum(),
        _ => 0,
    }
}

/// Apply the evidence cap to one output document, warning once if anything
/// was cut.
pub fn cap_document_evidence(
    document: &str,
    value: &mut Value,
    cap: usize,
    warnings: &mut WarningLog,
) -> usize {
    let truncated = cap_evidence(value, cap);
    if truncated > 0 {
        warnings.push(
            WarningKind::ResourceLimitExceeded,
            document,
            format!("{truncated} evidence list(s) truncated to {cap} item(s)"),
        );
    }
    truncated
}

/// Keep the first `ceiling` references of every reverse-index entry.
///
/// Scores and totals keep describing the full entry. Returns the number of
/// truncated entries.
pub fn apply_reverse_ceiling(
    index: &mut ReverseIndex,
    ceiling: usize,
    warnings: &mut WarningLog,
) -> usize {
    let mut truncated = 0;
    for (section, entries) in index.sections_mut() {
        for (key, entry) in entries.iter_mut() {
            if entry.refs.len() <= ceiling {
                continue;
            }
            entry.refs.truncate(ceiling);
            entry.truncated = true;
            truncated += 1;
            warnings.push(
                WarningKind::ResourceLimitExceeded,
                format!("{section}[{key}]"),
                format!(
                    "{} references truncated to {ceiling}",
                    entry.total
                ),
            );
        }
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::FactKind;
    use crate::index::{FactRef, RefRole, ReverseEntry};
    use serde_json::json;

    #[test]
    fn test_cap_evidence_truncates_nested_lists() {
        let mut value = json!({
            "resolutions": [
                {"candidates": [{"evidence": ["a", "b", "c"]}, {"evidence": ["a"]}]}
            ]
        });
        let truncated = cap_evidence(&mut value, 2);

        assert_eq!(truncated, 1);
        let candidate = &value["resolutions"][0]["candidates"][0];
        assert_eq!(candidate["evidence"], json!(["a", "b"]));
        assert_eq!(candidate["evidence_total"], json!(3));
        assert!(value["resolutions"][0]["candidates"][1].get("evidence_total").is_none());
    }

    #[test]
    fn test_document_cap_warns_once() {
        let mut value = json!([{"evidence": [1, 2, 3]}, {"evidence": [1, 2, 3]}]);
        let mut warnings = WarningLog::new();
        cap_document_evidence("preferences.json", &mut value, 1, &mut warnings);
        assert_eq!(warnings.count(WarningKind::ResourceLimitExceeded), 1);
    }

    #[test]
    fn test_reverse_ceiling_keeps_first_refs() {
        let refs: Vec<FactRef> = (0..4)
            .map(|i| FactRef {
                kind: FactKind::Call,
                key: format!("call{i}"),
                role: RefRole::Caller,
            })
            .collect();
        let mut index = ReverseIndex::default();
        index.by_symbol.insert(
            "busy".to_string(),
            ReverseEntry {
                total: refs.len(),
                score: 2.0,
                truncated: false,
                refs,
            },
        );
        let mut warnings = WarningLog::new();

        assert_eq!(apply_reverse_ceiling(&mut index, 3, &mut warnings), 1);
        let entry = &index.by_symbol["busy"];
        assert_eq!(entry.refs.len(), 3);
        assert_eq!(entry.refs[2].key, "call2");
        assert_eq!(entry.total, 4);
        assert!(entry.truncated);
        assert_eq!(warnings.iter().next().unwrap().subject, "by_symbol[busy]");
    }
}
