//! Loopback streams.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::clock::now_ns;
use super::session::SessionCore;
use crate::core::constants::{stream_state, stream_stats};
use crate::core::error::{QuicError, QuicResult};
use crate::core::traits::{EventSink, StreamHandle};
use crate::core::types::{SessionKey, StreamId};
use crate::event::NativeEvent;
use crate::stats::SharedBuffer;

struct StreamCoreInner {
    peer: Weak<StreamCore>,
    reader: Option<mpsc::UnboundedSender<Bytes>>,
    reader_attached: bool,
    pending: Vec<Bytes>,
    fin_sent: bool,
    fin_received: bool,
    closed: bool,
}

impl StreamCoreInner {
    fn is_done(&self, readable: bool, writable: bool) -> bool {
        let read_done = !readable || (self.fin_received && self.reader_attached);
        let write_done = !writable || self.fin_sent;
        !self.closed && read_done && write_done
    }
}

/// Engine-side state of one stream.
pub(crate) struct StreamCore {
    id: StreamId,
    session_key: SessionKey,
    session: Weak<SessionCore>,
    events: EventSink,
    readable: bool,
    writable: bool,
    stats: SharedBuffer,
    state: SharedBuffer,
    inner: Mutex<StreamCoreInner>,
}

impl StreamCore {
    pub(crate) fn new(
        session: &Arc<SessionCore>,
        id: StreamId,
        readable: bool,
        writable: bool,
        events: EventSink,
    ) -> Arc<Self> {
        let stats = SharedBuffer::new(stream_stats::COUNT);
        stats.set(stream_stats::CREATED_AT, now_ns());
        let state = SharedBuffer::new(stream_state::COUNT);
        state.set(stream_state::ID, id.0);
        state.set_flag(stream_state::READ_ENDED, !readable);
        state.set_flag(stream_state::WRITE_ENDED, !writable);
        Arc::new(Self {
            id,
            session_key: session.key(),
            session: Arc::downgrade(session),
            events,
            readable,
            writable,
            stats,
            state,
            inner: Mutex::new(StreamCoreInner {
                peer: Weak::new(),
                reader: None,
                reader_attached: false,
                pending: Vec::new(),
                fin_sent: false,
                fin_received: false,
                closed: false,
            }),
        })
    }

    pub(crate) fn link(a: &Arc<Self>, b: &Arc<Self>) {
        a.inner.lock().peer = Arc::downgrade(b);
        b.inner.lock().peer = Arc::downgrade(a);
    }

    fn attach_reader(&self, sink: mpsc::UnboundedSender<Bytes>) {
        {
            let mut inner = self.inner.lock();
            if inner.closed || !self.readable {
                return;
            }
            for chunk in inner.pending.drain(..) {
                let _ = sink.send(chunk);
            }
            inner.reader_attached = true;
            if !inner.fin_received {
                inner.reader = Some(sink);
            }
        }
        self.state.set_flag(stream_state::HAS_READER, true);
        self.maybe_finish();
    }

    fn write(&self, data: Bytes) -> QuicResult<()> {
        let peer = {
            let inner = self.inner.lock();
            if !self.writable || inner.fin_sent || inner.closed {
                return Err(QuicError::InvalidState("Stream is not writable"));
            }
            inner.peer.upgrade()
        };
        let len = data.len() as u64;
        self.stats.add(stream_stats::BYTES_SENT, len);
        self.stats.max(
            stream_stats::MAX_OFFSET,
            self.stats.get(stream_stats::BYTES_SENT),
        );
        let session = self.session.upgrade();
        if let Some(session) = &session {
            session.on_sent(len);
        }

        let delivered = peer.is_some_and(|peer| peer.receive(data));
        if delivered {
            self.stats.set(stream_stats::ACKED_AT, now_ns());
            self.stats.max(
                stream_stats::MAX_OFFSET_ACK,
                self.stats.get(stream_stats::BYTES_SENT),
            );
            if let Some(session) = &session {
                session.on_acked(len);
            }
        }
        Ok(())
    }

    fn receive(&self, data: Bytes) -> bool {
        let len = data.len() as u64;
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.closed || inner.fin_received {
                return false;
            }
            match &inner.reader {
                Some(reader) => {
                    let _ = reader.send(data);
                }
                None if !inner.reader_attached => inner.pending.push(data),
                // Reader went away; the bytes are dropped.
                None => {}
            }
        }
        self.stats.add(stream_stats::BYTES_RECEIVED, len);
        self.stats.max(
            stream_stats::MAX_OFFSET_RECV,
            self.stats.get(stream_stats::BYTES_RECEIVED),
        );
        self.stats.set(stream_stats::RECEIVED_AT, now_ns());
        if let Some(session) = self.session.upgrade() {
            session.on_received(len);
        }
        true
    }

    fn end_write(&self) {
        let peer = {
            let mut inner = self.inner.lock();
            if !self.writable || inner.fin_sent || inner.closed {
                return;
            }
            inner.fin_sent = true;
            inner.peer.upgrade()
        };
        self.state.set_flag(stream_state::FIN_SENT, true);
        self.state.set_flag(stream_state::WRITE_ENDED, true);
        if let Some(peer) = peer {
            peer.receive_fin();
        }
        self.maybe_finish();
    }

    fn receive_fin(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed || inner.fin_received {
                return;
            }
            inner.fin_received = true;
            // Dropping the sender ends the reader.
            inner.reader = None;
        }
        self.stats.set(
            stream_stats::FINAL_SIZE,
            self.stats.get(stream_stats::BYTES_RECEIVED),
        );
        self.state.set_flag(stream_state::FIN_RECEIVED, true);
        self.state.set_flag(stream_state::READ_ENDED, true);
        self.maybe_finish();
    }

    fn maybe_finish(&self) {
        let done = self.inner.lock().is_done(self.readable, self.writable);
        if done {
            self.finish(true);
        }
    }

    /// Close the stream and detach it from its session.
    fn finish(&self, announce: bool) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.reader = None;
        }
        let now = now_ns();
        self.stats.set(stream_stats::CLOSING_AT, now);
        self.stats.set(stream_stats::DESTROYED_AT, now);
        self.state.set_flag(stream_state::DESTROYED, true);
        if announce {
            trace!(session = %self.session_key, stream = %self.id, "stream finished");
            self.post(NativeEvent::StreamClose {
                session: self.session_key,
                stream: self.id,
            });
        }
        if let Some(session) = self.session.upgrade() {
            session.remove_stream(self.id);
        }
    }

    /// The peer abandoned the stream.
    fn reset(&self, code: u64) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.reader = None;
        }
        self.state.set_flag(stream_state::RESET, true);
        self.state.set_flag(stream_state::READ_ENDED, true);
        self.state.set_flag(stream_state::WRITE_ENDED, true);
        self.post(NativeEvent::StreamReset {
            session: self.session_key,
            stream: self.id,
            code,
        });
        self.finish(true);
    }

    fn destroy(&self) {
        let peer = self.inner.lock().peer.upgrade();
        self.finish(false);
        if let Some(peer) = peer {
            peer.reset(0);
        }
    }

    /// The owning session went away. Nothing is posted.
    pub(crate) fn abandon(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.reader = None;
        }
        self.stats.set(stream_stats::DESTROYED_AT, now_ns());
        self.state.set_flag(stream_state::DESTROYED, true);
    }

    fn post(&self, event: NativeEvent) {
        if self.events.send(event).is_err() {
            trace!(stream = %self.id, "stream event queue gone");
        }
    }
}

impl fmt::Debug for StreamCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StreamCore")
            .field("id", &self.id)
            .field("session", &self.session_key)
            .field("fin_sent", &inner.fin_sent)
            .field("fin_received", &inner.fin_received)
            .field("closed", &inner.closed)
            .finish()
    }
}

/// [`StreamHandle`] of the loopback engine.
#[derive(Debug)]
pub(crate) struct LoopbackStream {
    core: Arc<StreamCore>,
}

impl LoopbackStream {
    pub(crate) fn new(core: Arc<StreamCore>) -> Self {
        Self { core }
    }
}

impl StreamHandle for LoopbackStream {
    fn stats(&self) -> SharedBuffer {
        self.core.stats.clone()
    }

    fn state(&self) -> SharedBuffer {
        self.core.state.clone()
    }

    fn attach_reader(&self, sink: mpsc::UnboundedSender<Bytes>) {
        self.core.attach_reader(sink);
    }

    fn write(&self, data: Bytes) -> QuicResult<()> {
        self.core.write(data)
    }

    fn end_write(&self) {
        self.core.end_write();
    }

    fn destroy(&self) {
        self.core.destroy();
    }
}
