use std::io;

use bytes::Bytes;
use futures::StreamExt;
use futures::future::join_all;
use futures::stream;
use tokio::sync::mpsc;

use crate::body::{Body, ChunkStream};

/// Fans `source` out into `count` independent body branches. Each chunk is
/// offered to every live branch before the next chunk is pulled, so the
/// slowest consumer paces the producer. Dropping a branch cancels only that
/// branch; once every branch is gone the source itself is abandoned.
pub(crate) fn tee(mut source: ChunkStream, count: usize) -> Vec<Body> {
    let mut senders: Vec<Option<mpsc::Sender<io::Result<Bytes>>>> = Vec::with_capacity(count);
    let mut branches = Vec::with_capacity(count);
    for _ in 0..count {
        // Capacity 1: a branch holds at most one chunk it has not consumed.
        let (sender, mut receiver) = mpsc::channel::<io::Result<Bytes>>(1);
        senders.push(Some(sender));
        branches.push(Body::from_stream(stream::poll_fn(move |cx| {
            receiver.poll_recv(cx)
        })));
    }

    tokio::spawn(async move {
        while let Some(item) = source.next().await {
            match item {
                Ok(chunk) => {
                    let deliveries = {
                        let offers = senders.iter().enumerate().filter_map(|(index, sender)| {
                            sender.as_ref().map(|sender| {
                                let chunk = chunk.clone();
                                async move { (index, sender.send(Ok(chunk)).await) }
                            })
                        });
                        join_all(offers).await
                    };
                    for (index, delivered) in deliveries {
                        if delivered.is_err() {
                            senders[index] = None;
                        }
                    }
                    if senders.iter().all(Option::is_none) {
                        return;
                    }
                }
                Err(err) => {
                    // io::Error is not Clone; every branch gets its own copy.
                    for sender in senders.iter().filter_map(Option::as_ref) {
                        let _ = sender.send(Err(clone_io_error(&err))).await;
                    }
                    return;
                }
            }
        }
        // EOF: dropping the senders completes every open branch.
    });

    branches
}

fn clone_io_error(err: &io::Error) -> io::Error {
    io::Error::new(err.kind(), err.to_string())
}
