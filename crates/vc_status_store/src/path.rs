use serde_json::Value;

/// Look up a dotted path (`"content.id"`, `"meta.blockAssignmentDocId"`) in a
/// document's JSON value. Mirrors the dotted-attribute indexes described in
/// `spec.md` §4.2.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
