//! Service handles and the repository that memoizes them by name.
//!
//! Transports implement [`Handle`] and [`HandleFactory`]; everything above
//! the transport talks to services through these traits only.

pub mod cache;
pub mod error;
pub mod handle;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use {
    cache::{LOCATOR_SERVICE_NAME, ServiceCache},
    error::{Error, Result},
    handle::{Call, Channel, ChannelSender, Handle, HandleFactory},
};
