//! Nested-document assembly from dotted attribute paths.

use rangemeld_shared::{Document, MeldError, Node, Result, TypedValue};

/// Build a nested [`Document`] from `dotted.path → value` pairs.
///
/// `{"a.b": X, "a.c": Y}` yields `a → {b, c}`. A path whose intermediate
/// segment holds a value, or whose leaf lands on a sub-document, fails with
/// [`MeldError::ConflictingShape`] whatever the insertion order.
pub fn assemble<I, K>(flat: I) -> Result<Document>
where
    I: IntoIterator<Item = (K, TypedValue)>,
    K: AsRef<str>,
{
    let mut doc = Document::new();
    for (path, value) in flat {
        insert_path(&mut doc, path.as_ref(), value)?;
    }
    Ok(doc)
}

/// Insert one value at a dotted path, creating sub-documents as needed.
pub fn insert_path(doc: &mut Document, path: &str, value: TypedValue) -> Result<()> {
    let conflict = || MeldError::ConflictingShape {
        path: path.to_string(),
    };

    let segments: Vec<&str> = path.split('.').collect();
    let Some((leaf, parents)) = segments.split_last() else {
        return Err(conflict());
    };

    let mut current = doc;
    for segment in parents {
        if !current.contains_key(segment) {
            current.insert(*segment, Node::Map(Document::new()));
        }
        match current.get_mut(segment) {
            Some(Node::Map(sub)) => current = sub,
            _ => return Err(conflict()),
        }
    }

    if let Some(Node::Map(_)) = current.get(leaf) {
        return Err(conflict());
    }
    current.insert(*leaf, Node::Value(value));
    Ok(())
}
