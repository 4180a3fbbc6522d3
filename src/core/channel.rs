use crate::core::error::StageError;
use crate::core::item::PipelineItem;
use tokio_util::sync::CancellationToken;

/// Sending half of an item stream. Dropping the last sender closes the
/// stream; the receiver observes closure as end-of-stream.
pub type ItemSender = flume::Sender<PipelineItem>;

/// Receiving half of an item stream.
pub type ItemReceiver = flume::Receiver<PipelineItem>;

/// Create a stream between two stages.
///
/// Streams are rendezvous channels: a send suspends until the receiver
/// is ready, so a slow consumer back-pressures everything upstream of
/// it. FIFO ordering within a stream follows from the channel itself.
pub fn item_stream() -> (ItemSender, ItemReceiver) {
    flume::bounded(0)
}

/// Send an item, racing the send against the stage's cancellation
/// signal. Returns `Ok(false)` when cancellation won and the item was
/// discarded, `Err(StreamClosed)` when the receiving stage is gone.
pub async fn send_item(
    sender: &ItemSender,
    cancel: &CancellationToken,
    item: PipelineItem,
) -> Result<bool, StageError> {
    tokio::select! {
        sent = sender.send_async(item) => match sent {
            Ok(()) => Ok(true),
            Err(flume::SendError(_)) => Err(StageError::StreamClosed),
        },
        _ = cancel.cancelled() => Ok(false),
    }
}
