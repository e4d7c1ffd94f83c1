//! Read authorization for attached documents.
//!
//! Checked before the vault is touched: a denied caller never causes a
//! decryption.

use fundguard_types::{Actor, UserId};

use crate::documents::DocumentError;

/// Administrators read everything, everyone else only their own records.
pub fn can_read_documents(actor: &Actor, owner: UserId) -> bool {
    actor.is_admin() || actor.id == owner
}

pub fn authorize_document_read(
    actor: Option<&Actor>,
    owner: UserId,
    blob_id: &str,
) -> Result<(), DocumentError> {
    let Some(actor) = actor else {
        return Err(DocumentError::Unauthenticated);
    };
    if can_read_documents(actor, owner) {
        return Ok(());
    }

    tracing::warn!(
        actor = %actor.id,
        role = actor.role.as_str(),
        owner = %owner,
        blob_id,
        "document read denied"
    );
    Err(DocumentError::AccessDenied {
        blob_id: blob_id.to_string(),
    })
}
