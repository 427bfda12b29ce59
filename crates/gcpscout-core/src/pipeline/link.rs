use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use super::args::{Args, Param};
use super::cancel::CancelToken;
use super::message::{Accepts, Message};
use crate::provider::ClientFactory;

/// Returned by `Outlet::send` once the next stage has gone away.
#[derive(Debug, Error)]
#[error("downstream stage closed")]
pub struct OutputClosed;

/// Shared environment handed to every link: resolved arguments, cancellation and the
/// factory that produces provider clients.
#[derive(Clone)]
pub struct LinkContext {
    args: Args,
    cancel: CancelToken,
    clients: Arc<dyn ClientFactory>,
}

impl LinkContext {
    pub fn new(args: Args, clients: Arc<dyn ClientFactory>) -> Self {
        Self { args, cancel: CancelToken::new(), clients }
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn clients(&self) -> &Arc<dyn ClientFactory> {
        &self.clients
    }

    pub fn with_args(&self, args: Args) -> Self {
        Self { args, cancel: self.cancel.clone(), clients: self.clients.clone() }
    }

    pub fn with_cancel(&self, cancel: CancelToken) -> Self {
        Self { args: self.args.clone(), cancel, clients: self.clients.clone() }
    }
}

impl std::fmt::Debug for LinkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkContext")
            .field("args", &self.args)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Output handle of a link. Cloneable so intra-link workers can send concurrently; sends
/// are serialized by the channel.
#[derive(Debug, Clone)]
pub struct Outlet {
    tx: mpsc::Sender<Message>,
}

impl Outlet {
    pub(crate) fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, msg: impl Into<Message>) -> anyhow::Result<()> {
        self.tx.send(msg.into()).await.map_err(|_| anyhow::Error::new(OutputClosed))
    }
}

/// A pipeline stage.
#[async_trait]
pub trait Link: Send {
    fn name(&self) -> &'static str;

    /// Options this link understands; resolved before `initialize`.
    fn params(&self) -> Vec<Param> {
        Vec::new()
    }

    fn accepts(&self) -> Accepts {
        Accepts::Any
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> anyhow::Result<()>;

    async fn complete(&mut self, out: &Outlet) -> anyhow::Result<()> {
        let _ = out;
        Ok(())
    }
}

pub fn is_output_closed(err: &anyhow::Error) -> bool {
    err.downcast_ref::<OutputClosed>().is_some()
}
