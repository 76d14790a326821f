use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

/// The stream of decoded fragments for one generation request.
///
/// Yields fragments as the scheduler produces them and ends when the
/// request terminates (end-of-sequence or length cap) or the server aborts
/// the step. Dropping the stream cancels the request: the worker notices
/// the closed channel and stops advancing it.
#[derive(Debug)]
pub struct TokenStream {
    receiver: mpsc::UnboundedReceiver<String>,
}

impl TokenStream {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<String>) -> Self {
        Self { receiver }
    }
}

impl Stream for TokenStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().receiver).poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn yields_until_sender_drops() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = TokenStream::new(rx);

        tx.send("a".to_string()).unwrap();
        tx.send("b".to_string()).unwrap();
        drop(tx);

        assert_eq!(stream.next().await.as_deref(), Some("a"));
        assert_eq!(stream.next().await.as_deref(), Some("b"));
        assert_eq!(stream.next().await, None);
    }
}
