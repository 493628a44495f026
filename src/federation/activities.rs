//! Activity wrappers
//!
//! JSON builders for the verbs that wrap serialized objects.

use serde_json::{Value, json};

/// ActivityStreams JSON-LD context
pub const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// Public addressing collection
pub const PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Build a Create activity
///
/// The activity id is derived from the object id, and the addressing is
/// copied from the object.
pub fn create(actor: &str, object: Value) -> Value {
    let object_id = object.get("id").and_then(Value::as_str).unwrap_or_default();
    let to = object.get("to").cloned().unwrap_or_else(|| json!([]));
    let cc = object.get("cc").cloned().unwrap_or_else(|| json!([]));
    let published = object
        .get("published")
        .cloned()
        .unwrap_or_else(|| json!(chrono::Utc::now().to_rfc3339()));

    json!({
        "@context": AS_CONTEXT,
        "id": format!("{}/activity", object_id),
        "type": "Create",
        "actor": actor,
        "object": strip_context(object),
        "to": to,
        "cc": cc,
        "published": published
    })
}

/// Build a Delete activity for a tombstoned object
pub fn delete(actor: &str, tombstone: Value) -> Value {
    let object_id = tombstone
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default();

    json!({
        "@context": AS_CONTEXT,
        "id": format!("{}/activity", object_id),
        "type": "Delete",
        "actor": actor,
        "object": strip_context(tombstone),
        "to": [PUBLIC],
        "cc": [format!("{}/followers", actor)]
    })
}

/// Build an Undo activity
///
/// # Arguments
/// * `actor` - Actor URI undoing the activity
/// * `object` - The original activity (Follow, Like, Announce)
pub fn undo(actor: &str, object: Value) -> Value {
    let object_id = object.get("id").and_then(Value::as_str).unwrap_or_default();

    json!({
        "@context": AS_CONTEXT,
        "id": format!("{}#undo", object_id),
        "type": "Undo",
        "actor": actor,
        "object": strip_context(object)
    })
}

/// Build a Follow activity
pub fn follow(id: &str, actor: &str, object: &str) -> Value {
    json!({
        "@context": AS_CONTEXT,
        "id": id,
        "type": "Follow",
        "actor": actor,
        "object": object
    })
}

/// Build an Accept activity for a Follow
pub fn accept(actor: &str, follow: Value) -> Value {
    let follow_id = follow.get("id").and_then(Value::as_str).unwrap_or_default();

    json!({
        "@context": AS_CONTEXT,
        "id": format!("{}#accepts", follow_id),
        "type": "Accept",
        "actor": actor,
        "object": strip_context(follow)
    })
}

/// Build a Reject activity for a Follow
pub fn reject(actor: &str, follow: Value) -> Value {
    let follow_id = follow.get("id").and_then(Value::as_str).unwrap_or_default();

    json!({
        "@context": AS_CONTEXT,
        "id": format!("{}#rejects", follow_id),
        "type": "Reject",
        "actor": actor,
        "object": strip_context(follow)
    })
}

/// Build a Block activity
pub fn block(id: &str, actor: &str, object: &str) -> Value {
    json!({
        "@context": AS_CONTEXT,
        "id": id,
        "type": "Block",
        "actor": actor,
        "object": object
    })
}

/// Nested objects don't carry their own `@context`
fn strip_context(mut value: Value) -> Value {
    if let Some(map) = value.as_object_mut() {
        map.remove("@context");
    }
    value
}

/// Activity type of a JSON activity, for logs and metrics
pub fn activity_type(activity: &Value) -> &str {
    activity
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_wraps_object_and_copies_audience() {
        let object = json!({
            "@context": AS_CONTEXT,
            "id": "https://local.com/user/mouse/status/1",
            "type": "Note",
            "to": [PUBLIC],
            "cc": ["https://local.com/user/mouse/followers"],
            "published": "2024-01-01T00:00:00+00:00"
        });
        let activity = create("https://local.com/user/mouse", object);

        assert_eq!(activity["type"], "Create");
        assert_eq!(
            activity["id"],
            "https://local.com/user/mouse/status/1/activity"
        );
        assert_eq!(activity["to"][0], PUBLIC);
        assert_eq!(activity["published"], "2024-01-01T00:00:00+00:00");
        assert!(activity["object"].get("@context").is_none());
    }

    #[test]
    fn undo_and_accept_nest_the_original() {
        let follow = follow(
            "https://remote.com/follows/1",
            "https://remote.com/user/rat",
            "https://local.com/user/mouse",
        );
        let accept = accept("https://local.com/user/mouse", follow.clone());
        assert_eq!(accept["object"]["type"], "Follow");
        assert_eq!(accept["id"], "https://remote.com/follows/1#accepts");

        let undo = undo("https://remote.com/user/rat", follow);
        assert_eq!(undo["type"], "Undo");
        assert_eq!(activity_type(&undo["object"]), "Follow");
    }
}
