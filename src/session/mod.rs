mod manager;
mod rtt;
mod session;
mod want_index;

pub use manager::*;
pub use rtt::*;
pub use session::*;
pub use want_index::*;

/// Identifies one session within its manager.
pub type SessionId = u64;

#[derive(Debug)]
pub enum Error {
    Actix(actix::MailboxError),
    Store(crate::store::Error),
    UnknownSession(SessionId),
}

impl std::error::Error for Error {}

impl std::convert::From<actix::MailboxError> for Error {
    fn from(error: actix::MailboxError) -> Self {
        Error::Actix(error)
    }
}

impl std::convert::From<crate::store::Error> for Error {
    fn from(error: crate::store::Error) -> Self {
        Error::Store(error)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
