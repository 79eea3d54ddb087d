use serde_json::{Map, Value};

/// The workflow context: an untyped string-keyed bag shared across steps.
///
/// Steps read their input from it and their outputs are merged back into
/// it. Typed views over the bag belong to step handler code, not the core.
pub type Context = Map<String, Value>;

/// Merges `delta` into `context`, overwriting existing keys.
///
/// Merge is shallow: nested objects are replaced wholesale, which matches
/// how step outputs are produced (each step owns its own keys).
pub fn merge_context(context: &mut Context, delta: &Context) {
    for (key, value) in delta {
        context.insert(key.clone(), value.clone());
    }
}
