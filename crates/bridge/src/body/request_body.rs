use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll, Waker};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http_body::{Body, Frame};
use tracing::trace;

use super::ByteStream;
use crate::connection::Connection;
use crate::engine::Socket;
use crate::protocol::RequestError;

/// Default number of queued chunks above which the engine is asked to pause delivery.
pub const DEFAULT_HIGH_WATER_MARK: usize = 32;

/// RequestBody exposes the pushed request chunks of one connection as a pull based,
/// single-pass byte sequence.
///
/// # Flow control
///
/// Chunks delivered by the engine are queued. The demand is `high_water_mark - queued`; when a
/// delivered chunk brings it to zero or below the engine is paused, and the pull that makes it
/// positive again resumes it. Each transition calls the engine exactly once.
///
/// # Abort
///
/// When the connection aborts the sequence is closed: a waiting pull is woken and every pull
/// yields [`RequestError::Aborted`] instead of blocking.
///
/// Clones share the same queue, reading through one consumes it for all.
#[derive(Clone)]
pub struct RequestBody {
    shared: Arc<Mutex<Shared>>,
    socket: Weak<dyn Socket>,
}

#[derive(Debug)]
struct Shared {
    queue: VecDeque<Bytes>,
    high_water_mark: usize,
    paused: bool,
    finished: bool,
    aborted: bool,
    used: bool,
    waker: Option<Waker>,
}

impl Shared {
    fn desired_size(&self) -> isize {
        self.high_water_mark.cast_signed() - self.queue.len().cast_signed()
    }

    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RequestBody {
    /// Installs the chunk callback on `connection` and returns the consumer side.
    pub(crate) fn bridge(connection: &Connection, high_water_mark: usize) -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            queue: VecDeque::new(),
            high_water_mark: high_water_mark.max(1),
            paused: false,
            finished: false,
            aborted: false,
            used: false,
            waker: None,
        }));
        let socket = Arc::downgrade(connection.socket());

        let on_abort = Arc::downgrade(&shared);
        connection.on_abort(Box::new(move || {
            if let Some(shared) = on_abort.upgrade() {
                let mut shared = lock(&shared);
                shared.aborted = true;
                shared.queue.clear();
                shared.wake();
            }
        }));

        let on_data = Arc::clone(&shared);
        let pause_socket = Weak::clone(&socket);
        connection.socket().on_data(Box::new(move |chunk, is_last| {
            if Self::enqueue(&on_data, chunk, is_last) {
                if let Some(socket) = pause_socket.upgrade() {
                    trace!(high_water_mark, "request body above high water mark, pausing");
                    socket.pause();
                }
            }
        }));

        Self { shared, socket }
    }

    /// Queues a chunk, returns true when the engine must be paused.
    fn enqueue(shared: &Mutex<Shared>, chunk: &[u8], is_last: bool) -> bool {
        let mut shared = lock(shared);
        if shared.finished || shared.aborted {
            return false;
        }

        if !chunk.is_empty() {
            shared.queue.push_back(Bytes::copy_from_slice(chunk));
        }

        let pause = if is_last {
            shared.finished = true;
            false
        } else if shared.desired_size() <= 0 && !shared.paused {
            shared.paused = true;
            true
        } else {
            false
        };

        shared.wake();
        pause
    }

    /// True once a pull happened or the whole body was taken.
    pub fn is_used(&self) -> bool {
        lock(&self.shared).used
    }

    /// Reads the whole body, fails with [`RequestError::BodyUsed`] when anything was read before.
    pub async fn collect_bytes(&self) -> Result<Bytes, RequestError> {
        {
            let mut shared = lock(&self.shared);
            if shared.used {
                return Err(RequestError::BodyUsed);
            }
            shared.used = true;
        }

        let mut body = self.clone();
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    pub fn into_byte_stream(self) -> ByteStream {
        ByteStream::new(self)
    }

    fn poll_chunk(&self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, RequestError>>> {
        let (chunk, resume) = {
            let mut shared = lock(&self.shared);
            shared.used = true;

            if shared.aborted {
                return Poll::Ready(Some(Err(RequestError::Aborted)));
            }

            match shared.queue.pop_front() {
                Some(chunk) => {
                    let resume = shared.paused && shared.desired_size() > 0;
                    if resume {
                        shared.paused = false;
                    }
                    (chunk, resume)
                }
                None if shared.finished => return Poll::Ready(None),
                None => {
                    shared.waker = Some(cx.waker().clone());
                    return Poll::Pending;
                }
            }
        };

        if resume && let Some(socket) = self.socket.upgrade() {
            trace!("request body drained below high water mark, resuming");
            socket.resume();
        }

        Poll::Ready(Some(Ok(chunk)))
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = lock(&self.shared);
        f.debug_struct("RequestBody")
            .field("queued", &shared.queue.len())
            .field("paused", &shared.paused)
            .field("finished", &shared.finished)
            .field("aborted", &shared.aborted)
            .finish()
    }
}

impl PartialEq for RequestBody {
    /// Handles are equal when they read from the same connection body.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Stream for RequestBody {
    type Item = Result<Bytes, RequestError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_chunk(cx)
    }
}

impl Body for RequestBody {
    type Data = Bytes;
    type Error = RequestError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.poll_chunk(cx).map(|item| item.map(|chunk| chunk.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        let shared = lock(&self.shared);
        shared.finished && shared.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{MockSocket, SocketEvent};
    use futures::FutureExt;
    use http_body_util::BodyExt;

    fn bridge(high_water_mark: usize) -> (Arc<MockSocket>, Arc<Connection>, RequestBody) {
        let socket = MockSocket::new();
        let connection = Connection::new(Arc::clone(&socket) as Arc<dyn Socket>);
        let body = RequestBody::bridge(&connection, high_water_mark);
        (socket, connection, body)
    }

    #[tokio::test]
    async fn chunks_arrive_in_order_then_end() {
        let (socket, _connection, mut body) = bridge(DEFAULT_HIGH_WATER_MARK);

        socket.push_data(b"hello ", false);
        socket.push_data(b"world", true);

        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"hello "));
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"world"));
        assert!(body.next().await.is_none());
        assert!(body.is_end_stream());
    }

    #[tokio::test]
    async fn chunks_sent_before_install_are_delivered() {
        let socket = MockSocket::new();
        socket.push_data(b"early", false);
        socket.push_data(b"", true);

        let connection = Connection::new(Arc::clone(&socket) as Arc<dyn Socket>);
        let body = RequestBody::bridge(&connection, DEFAULT_HIGH_WATER_MARK);

        assert_eq!(body.collect_bytes().await.unwrap(), Bytes::from_static(b"early"));
    }

    #[tokio::test]
    async fn pull_waits_for_data() {
        let (socket, _connection, mut body) = bridge(DEFAULT_HIGH_WATER_MARK);

        assert!(body.next().now_or_never().is_none());
        socket.push_data(b"late", true);
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"late"));
    }

    #[tokio::test]
    async fn pause_and_resume_once_per_transition() {
        let (socket, _connection, mut body) = bridge(2);

        socket.push_data(b"a", false);
        assert_eq!(socket.count(&SocketEvent::Pause), 0);

        socket.push_data(b"b", false);
        assert_eq!(socket.count(&SocketEvent::Pause), 1);

        // still over the mark, no second pause
        socket.push_data(b"c", false);
        assert_eq!(socket.count(&SocketEvent::Pause), 1);

        body.next().await.unwrap().unwrap();
        assert_eq!(socket.count(&SocketEvent::Resume), 0);

        body.next().await.unwrap().unwrap();
        assert_eq!(socket.count(&SocketEvent::Resume), 1);

        body.next().await.unwrap().unwrap();
        assert_eq!(socket.count(&SocketEvent::Resume), 1);

        // second round trip over the mark
        socket.push_data(b"d", false);
        socket.push_data(b"e", false);
        assert_eq!(socket.count(&SocketEvent::Pause), 2);
        body.next().await.unwrap().unwrap();
        assert_eq!(socket.count(&SocketEvent::Resume), 2);
    }

    #[tokio::test]
    async fn last_chunk_never_pauses() {
        let (socket, _connection, body) = bridge(1);
        socket.push_data(b"only", true);
        assert_eq!(socket.count(&SocketEvent::Pause), 0);
        assert_eq!(body.collect_bytes().await.unwrap(), Bytes::from_static(b"only"));
    }

    #[tokio::test]
    async fn abort_wakes_pending_pull() {
        let (socket, connection, body) = bridge(DEFAULT_HIGH_WATER_MARK);
        socket.push_data(b"partial", false);

        let reader = tokio::spawn(async move { body.collect_bytes().await });
        tokio::task::yield_now().await;

        connection.mark_aborted();
        assert!(matches!(reader.await.unwrap(), Err(RequestError::Aborted)));
    }

    #[tokio::test]
    async fn data_after_abort_is_ignored() {
        let (socket, connection, mut body) = bridge(DEFAULT_HIGH_WATER_MARK);
        connection.mark_aborted();

        socket.push_data(b"ignored", true);
        assert!(matches!(body.next().await, Some(Err(RequestError::Aborted))));
    }

    #[tokio::test]
    async fn body_is_consumed_once() {
        let (socket, _connection, body) = bridge(DEFAULT_HIGH_WATER_MARK);
        socket.push_data(b"once", true);

        assert_eq!(body.collect_bytes().await.unwrap(), Bytes::from_static(b"once"));
        assert!(matches!(body.clone().collect_bytes().await, Err(RequestError::BodyUsed)));
    }

    #[tokio::test]
    async fn works_as_http_body() {
        let (socket, _connection, body) = bridge(DEFAULT_HIGH_WATER_MARK);
        socket.push_data(b"as ", false);
        socket.push_data(b"body", true);

        let collected = BodyExt::collect(body).await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"as body"));
    }
}
