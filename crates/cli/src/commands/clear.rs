//! `clear`: remove the persisted envelope.

use qpersist_core::{Error, PersistOptions, Storage};

/// Remove the entry under the configured key.
///
/// Returns whether an entry was present before removal.
pub async fn clear_impl(storage: &dyn Storage, options: &PersistOptions) -> Result<bool, Error> {
    let existed = storage.get_item(&options.storage_key).await?.is_some();
    storage.remove_item(&options.storage_key).await?;

    tracing::info!(key = %options.storage_key, existed, "cleared persisted cache");
    Ok(existed)
}
