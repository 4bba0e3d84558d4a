//! Connection identity resolution.
//!
//! Clients keep a stable client id across page reloads while the transport
//! hands them a fresh connection id every time a socket opens. Rebinding
//! points the client's waiting entry at the newest connection so match
//! notifications reach a socket that is actually alive.

use crate::error::ApiError;
use studymatch_protocol::{ClientId, ConnectionId};
use studymatch_store::Store;

/// Rebind every waiting entry of `client_id` to `new_connection_id`.
///
/// Members already bound to a room keep the connection they were matched
/// with. Repeating the call with the same arguments changes nothing, and a
/// client with no waiting entry is a successful no-op. Returns how many
/// entries were updated.
pub async fn rebind<S: Store>(
    store: &S,
    client_id: &ClientId,
    new_connection_id: &ConnectionId,
) -> Result<u64, ApiError> {
    if client_id.0.is_empty() || new_connection_id.0.is_empty() {
        return Err(ApiError::Validation(
            "clientId and newConnectionId are required".to_string(),
        ));
    }

    let rebound = store.rebind_connection(client_id, new_connection_id).await?;
    tracing::debug!(%client_id, %new_connection_id, rebound, "rebound waiting entries");
    Ok(rebound)
}
