use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::args::{resolve, Param};
use super::link::{is_output_closed, Link, LinkContext, Outlet};
use super::message::{FromMessage, Message};
use crate::errors::ReconError;

pub const DEFAULT_CAPACITY: usize = 64;

/// Ordered composition of links.
pub struct Chain {
    links: Vec<Box<dyn Link>>,
    capacity: usize,
}

impl Chain {
    pub fn new(links: Vec<Box<dyn Link>>) -> Self {
        Self { links, capacity: DEFAULT_CAPACITY }
    }

    pub fn of(link: impl Link + 'static) -> Self {
        Self::new(vec![Box::new(link)])
    }

    pub fn then(mut self, link: impl Link + 'static) -> Self {
        self.links.push(Box::new(link));
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Names of the links in order.
    pub fn link_names(&self) -> Vec<&'static str> {
        self.links.iter().map(|l| l.name()).collect()
    }

    /// Every parameter any link declares, first declaration wins.
    pub fn params(&self) -> Vec<Param> {
        let mut params: Vec<Param> = Vec::new();
        for param in self.links.iter().flat_map(|l| l.params()) {
            if !params.iter().any(|p| p.name == param.name) {
                params.push(param);
            }
        }
        params
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Spawn one worker per link and wire them with bounded channels.
    pub fn start(self, ctx: &LinkContext) -> RunningChain {
        let (input_tx, mut rx) = mpsc::channel::<Message>(self.capacity);
        let mut workers = Vec::with_capacity(self.links.len());

        for link in self.links {
            let (tx, next_rx) = mpsc::channel::<Message>(self.capacity);
            let name = link.name();
            let handle = tokio::spawn(drive(link, ctx.clone(), rx, Outlet::new(tx)));
            workers.push((name, handle));
            rx = next_rx;
        }

        RunningChain { input: Some(input_tx), output: rx, workers }
    }

    /// Feed `inputs`, close, and collect every output message.
    pub async fn run(
        self,
        ctx: &LinkContext,
        inputs: Vec<Message>,
    ) -> (Vec<Message>, anyhow::Result<()>) {
        let mut running = self.start(ctx);
        let feeder = running.take_input();
        // Feed from a separate task so a full pipeline never blocks collection.
        let feed = tokio::spawn(async move {
            if let Some(tx) = feeder {
                for msg in inputs {
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
            }
        });
        let mut out = Vec::new();
        while let Some(msg) = running.recv().await {
            out.push(msg);
        }
        let _ = feed.await;
        let result = running.finish().await;
        (out, result)
    }
}

async fn drive(
    mut link: Box<dyn Link>,
    ctx: LinkContext,
    mut rx: mpsc::Receiver<Message>,
    out: Outlet,
) -> anyhow::Result<()> {
    let name = link.name();
    let args = resolve(&link.params(), ctx.args())?;
    let ctx = ctx.with_args(args);
    let cancel = ctx.cancel().clone();

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ReconError::Cancelled.into()),
        r = link.initialize(&ctx) => r?,
    }

    let accepts = link.accepts();
    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReconError::Cancelled.into()),
            m = rx.recv() => m,
        };
        let Some(msg) = msg else { break };
        if !accepts.matches(&msg) {
            debug!(link = name, kind = msg.kind(), "skipping input the link does not accept");
            continue;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReconError::Cancelled.into()),
            r = link.process(msg, &out) => r?,
        }
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReconError::Cancelled.into()),
        r = link.complete(&out) => r,
    }
}

/// A started chain: send inputs, receive outputs, then `finish` for the outcome.
pub struct RunningChain {
    input: Option<mpsc::Sender<Message>>,
    output: mpsc::Receiver<Message>,
    workers: Vec<(&'static str, JoinHandle<anyhow::Result<()>>)>,
}

impl RunningChain {
    pub async fn send(&self, msg: impl Into<Message>) -> anyhow::Result<()> {
        match &self.input {
            Some(tx) => tx
                .send(msg.into())
                .await
                .map_err(|_| anyhow::anyhow!("chain input is closed")),
            None => anyhow::bail!("chain input is closed"),
        }
    }

    /// Signal that no more input will arrive.
    pub fn close(&mut self) {
        self.input.take();
    }

    pub(crate) fn take_input(&mut self) -> Option<mpsc::Sender<Message>> {
        self.input.take()
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.output.recv().await
    }

    /// Next output of type `T`; other messages are dropped.
    pub async fn recv_as<T: FromMessage>(&mut self) -> Option<T> {
        loop {
            let msg = self.output.recv().await?;
            if let Some(v) = T::from_message(msg) {
                return Some(v);
            }
        }
    }

    /// Close, drain what is left, and wait for every worker. The first real failure in
    /// stage order wins over "downstream closed" noise from upstream stages.
    pub async fn finish(mut self) -> anyhow::Result<()> {
        self.close();
        while self.output.recv().await.is_some() {}

        let mut first: Option<anyhow::Error> = None;
        let mut closed: Option<anyhow::Error> = None;
        for (name, handle) in self.workers {
            let result = match handle.await {
                Ok(r) => r,
                Err(e) => Err(anyhow::anyhow!("link {} panicked: {}", name, e)),
            };
            if let Err(e) = result {
                if is_output_closed(&e) {
                    closed.get_or_insert(e);
                } else if first.is_none() {
                    first = Some(e);
                }
            }
        }
        match (first, closed) {
            (Some(e), _) => Err(e),
            (None, Some(e)) => Err(e),
            (None, None) => Ok(()),
        }
    }
}
