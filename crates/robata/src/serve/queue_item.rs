use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::context::GenerationContext;
use crate::scheduler::RequestId;

/// One accepted prompt waiting for its first scheduler step.
///
/// Pairs the encoded generation context with the channel its decoded
/// fragments stream back through. The server assigns a fresh UUID as the
/// opaque request id the scheduler tracks.
pub(crate) struct QueueItem {
    id: Uuid,
    context: GenerationContext,
    sender: UnboundedSender<String>,
}

impl QueueItem {
    pub(crate) fn new(context: GenerationContext, sender: UnboundedSender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            context,
            sender,
        }
    }

    #[allow(dead_code)]
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn into_parts(self) -> (RequestId, GenerationContext, UnboundedSender<String>) {
        (self.id.to_string(), self.context, self.sender)
    }
}
