//! The seam between repositories and the transport: handles, their factory,
//! call arguments and response channels.

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde_json::{Map, Value},
    tokio::sync::mpsc,
    tollgate_config::Endpoint,
};

use crate::error::{Error, Result};

/// Arguments of a remote method call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Call {
    /// Positional arguments, in order.
    pub args: Vec<Value>,
    /// Named arguments. Adaptors add headers such as `authorization` here.
    pub kwargs: Map<String, Value>,
}

impl Call {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_args<I, V>(args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            kwargs: Map::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    #[must_use]
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn get_kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }
}

pub type ChannelSender = mpsc::UnboundedSender<Result<Value>>;

/// Receiving half of a call's response stream.
#[derive(Debug)]
pub struct Channel {
    rx: mpsc::UnboundedReceiver<Result<Value>>,
}

impl Channel {
    /// Create an empty channel; the transport pushes chunks through the sender.
    pub fn open() -> (ChannelSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// A channel that yields `value` once and then closes.
    pub fn ready(value: impl Into<Value>) -> Self {
        let (tx, channel) = Self::open();
        let _ = tx.send(Ok(value.into()));
        channel
    }

    /// A channel whose only chunk is `err`.
    pub fn failed(err: Error) -> Self {
        let (tx, channel) = Self::open();
        let _ = tx.send(Err(err));
        channel
    }

    /// Read the next chunk from the stream.
    pub async fn get(&mut self) -> Result<Value> {
        self.rx.recv().await.ok_or(Error::ChannelClosed)?
    }
}

/// A client-side proxy to one named remote service.
///
/// Construction must be cheap and lazy; connections are opened on
/// [`Handle::connect`] or on first use by the transport.
#[async_trait]
pub trait Handle: Send + Sync {
    /// Service name this handle talks to.
    fn name(&self) -> &str;

    /// Locator endpoints the handle resolves through, when known.
    fn endpoints(&self) -> Option<Vec<Endpoint>> {
        None
    }

    async fn connect(&self, trace_id: Option<u64>) -> Result<()>;

    fn disconnect(&self);

    /// Invoke `method` on the remote service.
    async fn invoke(&self, method: &str, call: Call) -> Result<Channel>;
}

/// Builds handles for a repository. Implemented by the transport layer.
pub trait HandleFactory: Send + Sync {
    /// Build the discovery resolver for `endpoints`.
    fn locator(&self, endpoints: &[Endpoint]) -> Arc<dyn Handle>;

    /// Build a handle for `name`, resolved through `locator`.
    fn service(&self, name: &str, locator: &Arc<dyn Handle>) -> Arc<dyn Handle>;
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn call_builder_keeps_order() {
        let call = Call::with_args(["a", "b"]).arg(3).kwarg("timeout", 5);
        assert_eq!(call.args, vec![json!("a"), json!("b"), json!(3)]);
        assert_eq!(call.get_kwarg("timeout"), Some(&json!(5)));
        assert!(call.get_kwarg("authorization").is_none());
    }

    #[tokio::test]
    async fn ready_channel_yields_once_then_closes() {
        let mut ch = Channel::ready("ticket");
        assert_eq!(ch.get().await.unwrap(), json!("ticket"));
        assert!(matches!(ch.get().await, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn failed_channel_yields_error() {
        let mut ch = Channel::failed(Error::UnexpectedValue("nope".into()));
        assert!(matches!(ch.get().await, Err(Error::UnexpectedValue(_))));
    }

    #[tokio::test]
    async fn open_channel_streams_chunks() {
        let (tx, mut ch) = Channel::open();
        tx.send(Ok(json!(1))).unwrap();
        tx.send(Ok(json!(2))).unwrap();
        drop(tx);
        assert_eq!(ch.get().await.unwrap(), json!(1));
        assert_eq!(ch.get().await.unwrap(), json!(2));
        assert!(ch.get().await.is_err());
    }
}
