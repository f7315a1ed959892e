//! Demo producer: publishes a JSON file to the ingestion channel.

use std::path::Path;

use bus::MessageBus;

use crate::error::StartupError;

/// Publishes the contents of `path` once to `channel`, returning its sequence.
///
/// The payload is sent as-is; validation happens on the consuming side.
pub async fn publish_file<B>(bus: &B, channel: &str, path: &Path) -> Result<u64, StartupError>
where
    B: MessageBus + ?Sized,
{
    let payload = tokio::fs::read(path)
        .await
        .map_err(|source| StartupError::ReadPayload {
            path: path.to_path_buf(),
            source,
        })?;
    let sequence = bus.publish(channel, payload).await?;
    tracing::info!(path = %path.display(), channel, sequence, "Published order payload");
    Ok(sequence)
}
