#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate actix_derive;
extern crate colored;

pub mod block;
pub mod channel;
pub mod cid;
pub mod client;
pub mod engine;
pub mod integration_test;
pub mod ledger;
pub mod message;
pub mod peer_id;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;
pub mod testnet;
pub mod wantlist;

#[derive(Debug)]
pub enum Error {
    IO(std::io::Error),
    Sled(sled::Error),
    Actix(actix::MailboxError),

    // channel errors
    ChannelError(String),
    JoinError,

    // component errors
    Engine(engine::Error),
    Session(session::Error),
    Store(store::Error),

    /// The peer could not be reached or refused the connection
    Unreachable(std::net::SocketAddr),
    /// A dialed peer violated the handshake (first frame was not `Hello`)
    InvalidHandshake,

    /// Error caused by converting from a `String` to an id
    TryFromStringError,
    /// Error when parsing a peer description `ID@IP`
    PeerParseError,
}

impl std::error::Error for Error {}

impl std::convert::From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IO(error)
    }
}

impl std::convert::From<sled::Error> for Error {
    fn from(error: sled::Error) -> Self {
        Error::Sled(error)
    }
}

impl std::convert::From<actix::MailboxError> for Error {
    fn from(error: actix::MailboxError) -> Self {
        Error::Actix(error)
    }
}

impl std::convert::From<engine::Error> for Error {
    fn from(error: engine::Error) -> Self {
        Error::Engine(error)
    }
}

impl std::convert::From<session::Error> for Error {
    fn from(error: session::Error) -> Self {
        Error::Session(error)
    }
}

impl std::convert::From<store::Error> for Error {
    fn from(error: store::Error) -> Self {
        Error::Store(error)
    }
}

impl std::convert::From<channel::Error> for Error {
    fn from(error: channel::Error) -> Self {
        match error {
            channel::Error::IO(io_err) => Error::IO(io_err),
            channel::Error::ReadError(err) => {
                let s = format!("{:?}", err);
                Error::ChannelError(s)
            }
            channel::Error::WriteError(err) => {
                let s = format!("{:?}", err);
                Error::ChannelError(s)
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
