//! Node Values
//!
//! Every node produces a dynamic value. We use `serde_json::Value` so that
//! scalars, sequences and maps can flow through the same graph, and so that
//! `Null` can stand in for "no result" everywhere the engine needs a
//! placeholder:
//!
//! - the default transform drops `Null` entries,
//! - synchronous streams pad exhausted dependencies with `Null`,
//! - broadcast streams treat dependencies that have not produced yet as `Null`,
//! - a broadcast driver never publishes a `Null` output.

pub use serde_json::Value;

/// The default transform.
///
/// Drops `Null` entries from the resolved dependency results. If exactly one
/// entry survives it is returned unwrapped, otherwise the survivors are
/// returned as an array (possibly empty).
pub fn flatten(values: Vec<Value>) -> Value {
    let mut kept: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    if kept.len() == 1 {
        kept.swap_remove(0)
    } else {
        Value::Array(kept)
    }
}

/// Returns the single resolved value unchanged, or an array when there are
/// several. Unlike [`flatten`], `Null` is preserved.
pub(crate) fn passthrough(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.swap_remove(0)
    } else {
        Value::Array(values)
    }
}
