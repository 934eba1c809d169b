//! Query evaluation against JSON documents.

use prov_core::{columns, BoolQuery, Document, FilterScript, Query, RangeOp, SortOrder, SortSpec};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// Edit distance accepted by fuzzy matching.
const MAX_EDITS: usize = 2;

/// Resolve a possibly dotted path. A literal key wins over traversal.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    if let Some(v) = doc.get(path) {
        return Some(v);
    }
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

pub fn matches(query: &Query, id: &str, doc: &Document) -> bool {
    match query {
        Query::MatchAll => true,
        Query::Term { field, value } => {
            any_value(doc, field, |v| values_equal(v, value, is_text_field(field)))
        }
        Query::Terms { field, values } => any_value(doc, field, |v| {
            values
                .iter()
                .any(|wanted| values_equal(v, wanted, is_text_field(field)))
        }),
        Query::Range { field, op, value } => any_value(doc, field, |v| {
            match compare_values(v, value) {
                Some(ord) => match op {
                    RangeOp::Lt => ord == Ordering::Less,
                    RangeOp::Lte => ord != Ordering::Greater,
                    RangeOp::Gt => ord == Ordering::Greater,
                    RangeOp::Gte => ord != Ordering::Less,
                },
                None => false,
            }
        }),
        Query::Exists { field } => {
            matches!(lookup(doc, field), Some(v) if !v.is_null())
        }
        Query::Like { field, text } => any_value(doc, field, |v| like(&value_text(v), text)),
        Query::Ids(ids) => ids.iter().any(|i| i == id),
        Query::Script(script) => script_matches(*script, doc),
        Query::Bool(b) => bool_matches(b, id, doc),
    }
}

fn bool_matches(b: &BoolQuery, id: &str, doc: &Document) -> bool {
    b.must.iter().all(|q| matches(q, id, doc))
        && !b.must_not.iter().any(|q| matches(q, id, doc))
        && (b.should.is_empty() || b.should.iter().any(|q| matches(q, id, doc)))
}

fn script_matches(script: FilterScript, doc: &Document) -> bool {
    match script {
        FilterScript::MlAsset => matches!(
            lookup(doc, columns::ML_TYPE),
            Some(Value::String(t)) if !t.eq_ignore_ascii_case("NONE")
        ),
        FilterScript::HasXattrs => matches!(
            lookup(doc, columns::XATTR_PROV),
            Some(Value::Object(map)) if !map.is_empty()
        ),
    }
}

/// Extended attribute values are analyzed text and compare case-insensitively.
fn is_text_field(field: &str) -> bool {
    field.starts_with(columns::XATTR_PROV)
}

fn any_value(doc: &Document, field: &str, pred: impl Fn(&Value) -> bool) -> bool {
    match lookup(doc, field) {
        Some(Value::Array(items)) => items.iter().any(&pred),
        Some(v) => pred(v),
        None => false,
    }
}

fn values_equal(a: &Value, b: &Value, case_insensitive: bool) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), Value::String(y)) if case_insensitive => x.eq_ignore_ascii_case(y),
        (Value::String(x), Value::Number(y)) | (Value::Number(y), Value::String(x)) => {
            x.trim() == y.to_string()
        }
        _ => a == b,
    }
}

pub fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
    }
}

/// Order two scalar values; `None` for incomparable kinds.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::Number(y)) => x.trim().parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        (Value::Number(x), Value::String(y)) => x.as_f64()?.partial_cmp(&y.trim().parse::<f64>().ok()?),
        _ => None,
    }
}

/// Total order used for sorting and bucket keys: missing values last.
pub fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or_else(|| x.to_string().cmp(&y.to_string())),
    }
}

/// Compare two documents by a sort list; ties fall back to the id.
pub fn compare_docs(
    sort: &[SortSpec],
    (a_id, a): (&str, &Document),
    (b_id, b): (&str, &Document),
) -> Ordering {
    for spec in sort {
        let ord = sort_cmp(lookup(a, &spec.field), lookup(b, &spec.field));
        let ord = match spec.order {
            SortOrder::Asc => ord,
            // missing values stay last
            SortOrder::Desc => match (lookup(a, &spec.field), lookup(b, &spec.field)) {
                (Some(_), Some(_)) => ord.reverse(),
                _ => ord,
            },
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a_id.cmp(b_id)
}

// ============================================================================
// FULL TEXT
// ============================================================================

/// Lower-cased "like" match: phrase containment, token prefix, fuzzy token
/// match or `*` / `?` wildcards.
pub fn like(text: &str, pattern: &str) -> bool {
    let text = text.to_lowercase();
    let pattern = pattern.to_lowercase();
    if pattern.is_empty() {
        return true;
    }
    if pattern.contains(['*', '?']) {
        return wildcard(&pattern)
            .map(|re| re.is_match(&text) || tokens(&text).any(|t| re.is_match(t)))
            .unwrap_or(false);
    }
    if text.contains(&pattern) {
        return true;
    }
    let matched = tokens(&text).any(|token| {
        token.starts_with(pattern.as_str()) || levenshtein(token, &pattern) <= MAX_EDITS
    });
    matched
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty())
}

/// Anchored regex for a `*` / `?` wildcard pattern.
pub fn wildcard(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_lookup_dotted_path() {
        let d = doc(json!({"xattr_prov": {"owner": "Alice"}, "a.b": 1}));
        assert_eq!(lookup(&d, "xattr_prov.owner"), Some(&json!("Alice")));
        assert_eq!(lookup(&d, "a.b"), Some(&json!(1)));
        assert_eq!(lookup(&d, "xattr_prov.missing"), None);
    }

    #[test]
    fn test_term_and_range() {
        let d = doc(json!({"inode_id": 5, "timestamp": 100}));
        assert!(matches(&Query::term("inode_id", 5), "x", &d));
        assert!(!matches(&Query::term("inode_id", 6), "x", &d));
        assert!(matches(&Query::range("timestamp", RangeOp::Lte, 100), "x", &d));
        assert!(!matches(&Query::range("timestamp", RangeOp::Lt, 100), "x", &d));
    }

    #[test]
    fn test_xattr_terms_ignore_case() {
        let d = doc(json!({"xattr_prov": {"owner": "Alice"}, "inode_name": "Alice"}));
        assert!(matches(&Query::term("xattr_prov.owner", "alice"), "x", &d));
        assert!(!matches(&Query::term("inode_name", "alice"), "x", &d));
    }

    #[test]
    fn test_like_variants() {
        assert!(like("train_data.csv", "data"));
        assert!(like("train_data.csv", "trai"));
        assert!(like("train_data.csv", "trian"));
        assert!(like("train_data.csv", "*data*"));
        assert!(!like("train_data.csv", "model"));
    }

    #[test]
    fn test_like_fuzzy_token_only() {
        let name = format!("{}_{}.h5", "mnist", "model");
        assert!(like(&name, "mnsit"));
        assert!(like(&name, "MODL"));
        assert!(!like(&name, "resnet"));
    }

    #[test]
    fn test_scripts() {
        let asset = doc(json!({"ml_type": "MODEL"}));
        let plain = doc(json!({"ml_type": "NONE", "xattr_prov": {}}));
        assert!(matches(&Query::Script(FilterScript::MlAsset), "x", &asset));
        assert!(!matches(&Query::Script(FilterScript::MlAsset), "x", &plain));
        assert!(!matches(&Query::Script(FilterScript::HasXattrs), "x", &plain));
    }

    #[test]
    fn test_bool_should_requires_one() {
        let d = doc(json!({"inode_operation": "CREATE"}));
        let q = BoolQuery::new()
            .should(Query::term("inode_operation", "DELETE"))
            .should(Query::term("inode_operation", "CREATE"))
            .build();
        assert!(matches(&q, "x", &d));
        let q = BoolQuery::new()
            .should(Query::term("inode_operation", "DELETE"))
            .build();
        assert!(!matches(&q, "x", &d));
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }
}
