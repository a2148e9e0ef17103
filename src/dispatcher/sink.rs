use async_trait::async_trait;
use thiserror::Error;

use crate::types::DecodedEvent;

/// A failed render or delivery attempt, opaque to the watcher.
///
/// Renderer and delivery-channel failures are treated identically: logged, recorded in
/// the cycle report, and isolated from subsequent events.
#[derive(Error, Debug)]
#[error("notification delivery failed: {0}")]
pub struct SinkError(pub String);

/// The notification layer boundary.
///
/// The watcher never inspects handler implementations; it only routes decoded events
/// to handler names. Rendering display text and posting it to the chat platform live
/// behind this trait.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Whether `handler` names a known notification handler.
    ///
    /// Checked for every configured handler at startup, so an unknown name is a fatal
    /// configuration error instead of a surprise at the first matching event.
    fn supports(&self, handler: &str) -> bool;

    /// Renders and delivers one event to its handler.
    async fn deliver(&self, handler: &str, event: &DecodedEvent) -> Result<(), SinkError>;
}
