use crate::database::record::Record;
use crate::mapper::error::MapperError;

/// Parse an RFC 6902 patch document
pub fn parse_patch(document: &[u8]) -> Result<json_patch::Patch, MapperError> {
    serde_json::from_slice(document).map_err(|e| MapperError::PatchSyntax(e.to_string()))
}

/// Apply a patch document to `target` and return the resulting object.
///
/// Operations are applied in document order against the full representation
/// (`id`, timestamps and fields). The document may not change or drop the id;
/// server timestamps are carried over from `target` whatever the document did.
pub fn apply_patch(target: &Record, document: &[u8]) -> Result<Record, MapperError> {
    let patch = parse_patch(document)?;
    let mut doc = target.to_json();
    json_patch::patch(&mut doc, &patch.0).map_err(|e| MapperError::PatchSyntax(e.to_string()))?;

    let mut patched = Record::from_representation(doc).map_err(|e| MapperError::PatchSyntax(e.to_string()))?;
    match (target.id(), patched.id()) {
        (Some(expected), Some(found)) if expected != found => {
            return Err(MapperError::IdMismatch { expected, found });
        }
        (Some(_), None) => return Err(MapperError::IdEmpty),
        _ => {}
    }
    if let (Some(created_at), Some(updated_at)) = (target.created_at(), target.updated_at()) {
        patched.set_timestamps(created_at, updated_at);
    }
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn stored() -> Record {
        let mut record = Record::with_id(Uuid::new_v4());
        record.set_timestamps(Utc::now(), Utc::now());
        record.set("title", "draft").set("tags", json!(["a"]));
        record
    }

    #[test]
    fn applies_operations_in_order() {
        let target = stored();
        let doc = br#"[
            {"op": "replace", "path": "/title", "value": "final"},
            {"op": "add", "path": "/tags/-", "value": "b"},
            {"op": "copy", "from": "/title", "path": "/heading"}
        ]"#;
        let patched = apply_patch(&target, doc).unwrap();

        assert_eq!(patched.id(), target.id());
        assert_eq!(patched.created_at(), target.created_at());
        assert_eq!(patched.get("title"), Some(&json!("final")));
        assert_eq!(patched.get("tags"), Some(&json!(["a", "b"])));
        assert_eq!(patched.get("heading"), Some(&json!("final")));
        // the source object is untouched
        assert_eq!(target.get("title"), Some(&json!("draft")));
    }

    #[test]
    fn replace_is_idempotent_but_array_add_is_not() {
        let target = stored();
        let replace = br#"[{"op": "replace", "path": "/title", "value": "x"}]"#;
        let once = apply_patch(&target, replace).unwrap();
        assert_eq!(apply_patch(&once, replace).unwrap(), once);

        let add = br#"[{"op": "add", "path": "/tags/0", "value": "z"}]"#;
        let once = apply_patch(&target, add).unwrap();
        let twice = apply_patch(&once, add).unwrap();
        assert_eq!(twice.get("tags"), Some(&json!(["z", "z", "a"])));
    }

    #[test]
    fn malformed_documents_are_syntax_errors() {
        let target = stored();
        let docs: [&[u8]; 3] = [b"not json", br#"{"op": "add"}"#, br#"[{"op": "frobnicate", "path": "/x"}]"#];
        for doc in docs {
            assert!(matches!(apply_patch(&target, doc), Err(MapperError::PatchSyntax(_))));
        }
        // well formed but fails against this object
        let missing = br#"[{"op": "remove", "path": "/nope"}]"#;
        assert!(matches!(apply_patch(&target, missing), Err(MapperError::PatchSyntax(_))));
    }

    #[test]
    fn id_cannot_change() {
        let target = stored();
        let other = Uuid::new_v4();
        let doc = format!(r#"[{{"op": "replace", "path": "/id", "value": "{}"}}]"#, other);
        assert!(matches!(
            apply_patch(&target, doc.as_bytes()),
            Err(MapperError::IdMismatch { found, .. }) if found == other
        ));

        let doc = br#"[{"op": "remove", "path": "/id"}]"#;
        assert!(matches!(apply_patch(&target, doc), Err(MapperError::IdEmpty)));
    }
}
