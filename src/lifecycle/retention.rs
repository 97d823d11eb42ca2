//! Retention and legal-hold gate for the record-deletion path.

use tracing::{info, warn};

use crate::document::{Capability, ContentObject, Principal};
use crate::errors::{BlobError, BlobResult};

/// Refuse deletion of a retained attachment unless `principal` may delete
/// undeletable content.
///
/// Returns `Ok(true)` when the attachment was retained and the principal
/// overrode it, `Ok(false)` when nothing was retained.
pub fn check_deletable(
    principal: &Principal,
    doc: &dyn ContentObject,
    xpath: &str,
) -> BlobResult<bool> {
    if !doc.is_under_retention_or_legal_hold(xpath) {
        return Ok(false);
    }
    if principal.has_capability(Capability::DeleteUndeletable) {
        info!(
            "{} deleting retained attachment {} of {}",
            principal.name,
            xpath,
            doc.id()
        );
        return Ok(true);
    }
    warn!(
        "Refusing deletion of retained attachment {} of {} by {}",
        xpath,
        doc.id(),
        principal.name
    );
    Err(BlobError::RetentionDenied {
        object_id: doc.id().to_string(),
        xpath: xpath.to_string(),
    })
}
