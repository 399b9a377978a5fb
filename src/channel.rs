//! Framed, bincode-encoded message channels over TCP.
//!
//! A [Channel] carries one message type in both directions, length-delimited
//! on the wire. Splitting yields an owned [Sender] and [Receiver] so the two
//! halves can live on different tasks.

use std::marker::PhantomData;
use std::net::SocketAddr;

use futures::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_serde::formats::*;
use tokio_serde::Framed;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Upper bound on a single frame, guarding against hostile length prefixes.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug)]
pub enum Error {
    IO(std::io::Error),
    ReadError(std::io::Error),
    WriteError(std::io::Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub type Reader<M> = Framed<FramedRead<OwnedReadHalf, LengthDelimitedCodec>, M, M, Bincode<M, M>>;

pub type Writer<M> = Framed<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>, M, M, Bincode<M, M>>;

fn length_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().max_frame_length(MAX_FRAME_BYTES).new_codec()
}

pub struct Receiver<M> {
    reader: Reader<M>,
}

impl<M> Receiver<M>
where
    M: for<'de> Deserialize<'de> + Serialize + Unpin,
{
    /// Reads the next frame. `None` means the remote closed the stream
    /// cleanly; a decode failure of a malformed frame surfaces as
    /// [Error::ReadError].
    pub async fn recv(&mut self) -> Result<Option<M>> {
        self.reader.try_next().await.map_err(Error::ReadError)
    }
}

pub struct Sender<M> {
    writer: Writer<M>,
}

impl<M> Sender<M>
where
    M: for<'de> Deserialize<'de> + Serialize + Unpin,
{
    pub async fn send(&mut self, item: M) -> Result<()> {
        self.writer.send(item).await.map_err(Error::WriteError)
    }
}

pub struct Channel<M> {
    socket: TcpStream,
    ghost: PhantomData<M>,
}

impl<M> Channel<M>
where
    M: for<'de> Deserialize<'de> + Serialize + Unpin,
{
    pub async fn connect(address: &SocketAddr) -> Result<Channel<M>> {
        let socket = TcpStream::connect(address).await.map_err(Error::IO)?;
        Ok(Channel { socket, ghost: PhantomData })
    }

    /// Accepts the next inbound connection, returning the channel together
    /// with the dialer's address.
    pub async fn accept(listener: &TcpListener) -> Result<(Channel<M>, SocketAddr)> {
        let (socket, address) = listener.accept().await.map_err(Error::IO)?;
        Ok((Channel { socket, ghost: PhantomData }, address))
    }

    pub fn split(self) -> (Sender<M>, Receiver<M>) {
        let (read_half, write_half) = self.socket.into_split();

        let reader = FramedRead::new(read_half, length_codec());
        let reader = Framed::new(reader, Bincode::default());

        let writer = FramedWrite::new(write_half, length_codec());
        let writer = Framed::new(writer, Bincode::default());

        (Sender { writer }, Receiver { reader })
    }
}
