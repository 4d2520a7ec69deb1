//! The BLE operations the controller needs from a radio stack

use tokio::sync::mpsc;

use crate::core::error::DeskResult;

/// Link to one desk
///
/// Implementations own the platform handles; the connection manager is the
/// only caller.
#[async_trait::async_trait]
pub trait DeskAdapter: Send + Sync {
    /// Finds the desk by address, connects and resolves its characteristics
    async fn connect(&self, address: &str) -> DeskResult<()>;

    async fn is_connected(&self) -> bool;

    /// Raw value of the height characteristic
    async fn read_height(&self) -> DeskResult<Vec<u8>>;

    /// Writes to the command characteristic
    async fn write_command(&self, data: &[u8]) -> DeskResult<()>;

    /// Starts height notifications. The channel closes when the stream ends.
    async fn subscribe_height(&self) -> DeskResult<mpsc::Receiver<Vec<u8>>>;

    /// Resolves once the adapter reports that the current link dropped
    async fn wait_for_disconnect(&self);

    async fn disconnect(&self) -> DeskResult<()>;
}
