//! A communication channel used to send/receive messages to/from another party.
//!
//! The preprocessing engine only needs point-to-point byte transport between numbered parties.
//! Everything above that (framing, typed messages, scatter and broadcast) is implemented here on
//! top of the [`Channel`] trait so that a deployment only has to provide the transport.

use std::{fmt, future::Future, time::Duration};

use futures::future::try_join_all;
use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    sync::{
        Mutex,
        mpsc::{Receiver, Sender, channel, error::SendError},
    },
    time::timeout,
};
use tracing::trace;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug)]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    SendError(String),
    /// The message could not be serialized (before sending it out).
    SerdeError(String),
    /// The message is a Vec, but not of the expected length.
    InvalidLength {
        /// The expected number of elements.
        expected: usize,
        /// The number of elements that were received.
        actual: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            ErrorKind::RecvError(e) => write!(f, "could not receive {}: {e}", self.phase),
            ErrorKind::SendError(e) => write!(f, "could not send {}: {e}", self.phase),
            ErrorKind::SerdeError(e) => write!(f, "could not (de-)serialize {}: {e}", self.phase),
            ErrorKind::InvalidLength { expected, actual } => write!(
                f,
                "expected {expected} elements in {}, got {actual}",
                self.phase
            ),
        }
    }
}

impl std::error::Error for Error {}

/// A communication channel used to send/receive messages to/from another party.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the party with the given index (must be between `0..participants`).
    fn send_bytes_to(
        &self,
        party: usize,
        msg: Vec<u8>,
        phase: &str,
    ) -> impl Future<Output = Result<(), Self::SendError>> + Send;

    /// Awaits a response from the party with the given index (must be between `0..participants`).
    fn recv_bytes_from(
        &self,
        party: usize,
        phase: &str,
    ) -> impl Future<Output = Result<Vec<u8>, Self::RecvError>> + Send;
}

/// Serializes and sends an MPC message to the other party.
pub(crate) async fn send_to<T: Serialize>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
    msg: &[T],
) -> Result<(), Error> {
    let msg = bincode::serialize(msg).map_err(|e| Error {
        phase: format!("sending {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })?;
    trace!(party, phase, bytes = msg.len(), "send");
    channel
        .send_bytes_to(party, msg, phase)
        .await
        .map_err(|e| Error {
            phase: phase.to_string(),
            reason: ErrorKind::SendError(format!("{e:?}")),
        })
}

/// Receives and deserializes an MPC message from the other party.
pub(crate) async fn recv_from<T: DeserializeOwned>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
) -> Result<Vec<T>, Error> {
    let msg = channel
        .recv_bytes_from(party, phase)
        .await
        .map_err(|e| Error {
            phase: phase.to_string(),
            reason: ErrorKind::RecvError(format!("{e:?}")),
        })?;
    bincode::deserialize(&msg).map_err(|e| Error {
        phase: format!("receiving {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })
}

/// Receives and deserializes a Vec from the other party (while checking the length).
pub(crate) async fn recv_vec_from<T: DeserializeOwned>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
    len: usize,
) -> Result<Vec<T>, Error> {
    let v: Vec<T> = recv_from(channel, party, phase).await?;
    if v.len() == len {
        Ok(v)
    } else {
        Err(Error {
            phase: phase.to_string(),
            reason: ErrorKind::InvalidLength {
                expected: len,
                actual: v.len(),
            },
        })
    }
}

/// Sends `msgs[k]` to every party `k != i` and returns the messages received from every other
/// party (the entry at index `i` is empty).
///
/// All received messages must have the same length as the message sent to party `i`.
pub(crate) async fn scatter<T: Serialize + DeserializeOwned>(
    channel: &impl Channel,
    i: usize,
    phase: &str,
    msgs: &[Vec<T>],
) -> Result<Vec<Vec<T>>, Error> {
    let n = msgs.len();
    try_join_all(
        (0..n)
            .filter(|k| *k != i)
            .map(async |k| send_to(channel, k, phase, &msgs[k]).await),
    )
    .await?;
    let mut received = try_join_all((0..n).map(async |k| {
        if k == i {
            Ok(vec![])
        } else {
            recv_vec_from(channel, k, phase, msgs[i].len()).await
        }
    }))
    .await?;
    received[i] = vec![];
    Ok(received)
}

/// Sends the same message to all other parties and returns the messages received from them,
/// without verifying that every party received the same message.
pub(crate) async fn unverified_broadcast<T: Serialize + DeserializeOwned + Clone>(
    channel: &impl Channel,
    i: usize,
    n: usize,
    phase: &str,
    msg: &[T],
) -> Result<Vec<Vec<T>>, Error> {
    try_join_all(
        (0..n)
            .filter(|k| *k != i)
            .map(async |k| send_to(channel, k, phase, msg).await),
    )
    .await?;
    try_join_all((0..n).map(async |k| {
        if k == i {
            Ok(msg.to_vec())
        } else {
            recv_vec_from(channel, k, phase, msg.len()).await
        }
    }))
    .await
}

/// A simple asynchronous channel using [`Sender`] and [`Receiver`].
#[derive(Debug)]
pub struct SimpleChannel {
    s: Vec<Option<Sender<Vec<u8>>>>,
    r: Vec<Option<Mutex<Receiver<Vec<u8>>>>>,
}

impl SimpleChannel {
    /// Creates channels for N parties to communicate with each other.
    pub fn channels(parties: usize) -> Vec<Self> {
        let buffer_capacity = 1024;
        let mut channels = vec![];
        for _ in 0..parties {
            let mut s = vec![];
            let mut r = vec![];
            for _ in 0..parties {
                s.push(None);
                r.push(None);
            }
            channels.push(SimpleChannel { s, r });
        }
        for a in 0..parties {
            for b in 0..parties {
                if a >= b {
                    continue;
                }
                let (send_a_to_b, recv_a_to_b) = channel(buffer_capacity);
                let (send_b_to_a, recv_b_to_a) = channel(buffer_capacity);
                channels[a].s[b] = Some(send_a_to_b);
                channels[b].s[a] = Some(send_b_to_a);
                channels[a].r[b] = Some(Mutex::new(recv_b_to_a));
                channels[b].r[a] = Some(Mutex::new(recv_a_to_b));
            }
        }
        channels
    }
}

#[derive(Debug)]
/// The error raised by `recv` calls of a [`SimpleChannel`].
pub enum AsyncRecvError {
    /// There is no channel to the given party.
    NoSuchParty(usize),
    /// The channel has been closed.
    Closed,
    /// No message was received before the timeout.
    TimeoutElapsed,
    /// A chunk was shorter than its header.
    MalformedChunk,
}

#[derive(Debug)]
/// The error raised by `send` calls of a [`SimpleChannel`].
pub enum AsyncSendError {
    /// There is no channel to the given party.
    NoSuchParty(usize),
    /// The receiving end has been dropped.
    Closed(SendError<Vec<u8>>),
}

impl Channel for SimpleChannel {
    type SendError = AsyncSendError;
    type RecvError = AsyncRecvError;

    async fn send_bytes_to(
        &self,
        p: usize,
        msg: Vec<u8>,
        phase: &str,
    ) -> Result<(), AsyncSendError> {
        let sender = self
            .s
            .get(p)
            .and_then(Option::as_ref)
            .ok_or(AsyncSendError::NoSuchParty(p))?;
        let chunk_size = 100 * 1024 * 1024;
        let mut chunks: Vec<_> = msg.chunks(chunk_size).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let length = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            if length > 1 {
                trace!("Sending chunk {}/{} of {phase} to party {}", i + 1, length, p);
            }
            let mut msg = Vec::with_capacity(2 * 4 + chunk.len());
            msg.extend((i as u32).to_be_bytes());
            msg.extend((length as u32).to_be_bytes());
            msg.extend(chunk);
            sender.send(msg).await.map_err(AsyncSendError::Closed)?;
        }
        Ok(())
    }

    async fn recv_bytes_from(&self, p: usize, _phase: &str) -> Result<Vec<u8>, AsyncRecvError> {
        let mut receiver = self
            .r
            .get(p)
            .and_then(Option::as_ref)
            .ok_or(AsyncRecvError::NoSuchParty(p))?
            .lock()
            .await;
        let mut msg: Vec<u8> = vec![];
        loop {
            let chunk = match timeout(Duration::from_secs(10 * 60), receiver.recv()).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => return Err(AsyncRecvError::Closed),
                Err(_) => return Err(AsyncRecvError::TimeoutElapsed),
            };
            if chunk.len() < 8 {
                return Err(AsyncRecvError::MalformedChunk);
            }
            let i = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let length = u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            msg.extend(&chunk[8..]);
            if i + 1 >= length {
                break Ok(msg);
            }
        }
    }
}
