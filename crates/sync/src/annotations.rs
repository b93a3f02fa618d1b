//! Comma-separated annotation options recognized on target manifests.

use serde_json::Value;

use rudder_core::{obj, ANNOTATION_COMPARE_OPTIONS, ANNOTATION_SYNC_OPTIONS};

/// True when the annotation's comma-separated value list contains `want`.
pub fn has_annotation_option(o: &Value, key: &str, want: &str) -> bool {
    obj::annotation(o, key)
        .split(',')
        .any(|opt| opt.trim() == want)
}

/// Resource is recorded but excluded from the sync aggregate.
pub fn is_ignored(o: &Value) -> bool {
    has_annotation_option(o, ANNOTATION_SYNC_OPTIONS, "Ignore")
}

/// Prune candidates carrying this option do not downgrade the aggregate.
pub fn ignores_extraneous(o: &Value) -> bool {
    has_annotation_option(o, ANNOTATION_COMPARE_OPTIONS, "IgnoreExtraneous")
}
