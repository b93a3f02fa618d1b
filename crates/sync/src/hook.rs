//! Lifecycle-hook detection. Hooks are tracked through comparison but
//! never influence the aggregate sync status.

use serde_json::Value;

use rudder_core::{obj, ANNOTATION_HELM_HOOK, ANNOTATION_HOOK};

/// True when the manifest declares itself a lifecycle hook, either via
/// the native annotation or the Helm convention.
pub fn is_hook(o: &Value) -> bool {
    !obj::annotation(o, ANNOTATION_HOOK).is_empty()
        || !obj::annotation(o, ANNOTATION_HELM_HOOK).is_empty()
}
