use tokio::sync::watch;

/// Cancellation capability handed through the interceptor chain. A token
/// without a source never fires, so callers that do not care can pass
/// `Cancellation::none()`.
#[derive(Debug, Clone)]
pub struct Cancellation {
    receiver: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    pub fn none() -> Self {
        Self { receiver: None }
    }

    pub fn is_cancelled(&self) -> bool {
        match &self.receiver {
            Some(receiver) => *receiver.borrow(),
            None => false,
        }
    }

    /// Resolves once the source fires. Pending forever for `none()` tokens,
    /// and also when the source is dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(receiver) = &self.receiver else {
            return futures::future::pending().await;
        };
        let mut receiver = receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

#[derive(Debug)]
pub struct CancellationSource {
    sender: watch::Sender<bool>,
}

impl CancellationSource {
    pub fn new() -> (Self, Cancellation) {
        let (sender, receiver) = watch::channel(false);
        (
            Self { sender },
            Cancellation {
                receiver: Some(receiver),
            },
        )
    }

    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}
