use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use super::cancel::CancelToken;
use super::chain::{Chain, DEFAULT_CAPACITY};
use super::link::{is_output_closed, Link, LinkContext, Outlet};
use super::message::{FromMessage, Message};

/// How a multi treats sub-chain failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Abort on the first failure.
    Strict,
    /// Keep going and report every failure at the end.
    #[default]
    Lax,
}

/// Every sub-chain failure of a lax multi, one per line.
#[derive(Debug, Error)]
#[error("{}", .errors.join("\n"))]
pub struct AggregateError {
    pub errors: Vec<String>,
}

/// Parallel fan-out: each input is broadcast to every sub-chain, outputs are merged.
pub struct Multi {
    chains: Vec<Chain>,
    strictness: Strictness,
}

impl Multi {
    pub fn new(chains: Vec<Chain>) -> Self {
        Self { chains, strictness: Strictness::default() }
    }

    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn start(self, ctx: &LinkContext) -> RunningMulti {
        let cancel = ctx.cancel().child();
        let sub_ctx = ctx.with_cancel(cancel.clone());
        let (merged_tx, merged_rx) = mpsc::channel::<Message>(DEFAULT_CAPACITY);
        let failures: Arc<Mutex<Vec<anyhow::Error>>> = Arc::new(Mutex::new(Vec::new()));
        let mut inputs = Vec::with_capacity(self.chains.len());
        let mut forwarders = Vec::with_capacity(self.chains.len());

        for chain in self.chains {
            let mut running = chain.start(&sub_ctx);
            if let Some(tx) = running.take_input() {
                inputs.push(tx);
            }
            let merged = merged_tx.clone();
            let failures = failures.clone();
            let cancel = cancel.clone();
            let strictness = self.strictness;
            forwarders.push(tokio::spawn(async move {
                while let Some(msg) = running.recv().await {
                    if merged.send(msg).await.is_err() {
                        break;
                    }
                }
                if let Err(e) = running.finish().await {
                    if let Ok(mut list) = failures.lock() {
                        list.push(e);
                    }
                    if strictness == Strictness::Strict {
                        cancel.cancel();
                    }
                }
            }));
        }

        RunningMulti {
            inputs,
            output: merged_rx,
            forwarders,
            failures,
            strictness: self.strictness,
            cancel,
        }
    }
}

/// A started multi.
pub struct RunningMulti {
    inputs: Vec<mpsc::Sender<Message>>,
    output: mpsc::Receiver<Message>,
    forwarders: Vec<JoinHandle<()>>,
    failures: Arc<Mutex<Vec<anyhow::Error>>>,
    strictness: Strictness,
    cancel: CancelToken,
}

impl RunningMulti {
    /// Broadcast one input; sub-chains that already stopped are skipped.
    pub async fn send(&self, msg: impl Into<Message>) {
        let msg = msg.into();
        for tx in &self.inputs {
            let _ = tx.send(msg.clone()).await;
        }
    }

    pub fn close(&mut self) {
        self.inputs.clear();
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.output.recv().await
    }

    pub async fn recv_as<T: FromMessage>(&mut self) -> Option<T> {
        loop {
            let msg = self.output.recv().await?;
            if let Some(v) = T::from_message(msg) {
                return Some(v);
            }
        }
    }

    pub async fn finish(mut self) -> anyhow::Result<()> {
        self.close();
        while self.output.recv().await.is_some() {}
        for handle in self.forwarders {
            let _ = handle.await;
        }
        let mut failures = match self.failures.lock() {
            Ok(mut list) => std::mem::take(&mut *list),
            Err(_) => Vec::new(),
        };
        drop(self.cancel);

        if failures.is_empty() {
            return Ok(());
        }
        // Output-closed noise only matters when nothing else failed.
        if failures.iter().any(|e| !is_output_closed(e)) {
            failures.retain(|e| !is_output_closed(e));
        }
        match self.strictness {
            Strictness::Strict => Err(failures.remove(0)),
            Strictness::Lax => {
                let errors: Vec<String> = failures.iter().map(|e| format!("{:#}", e)).collect();
                warn!(failures = errors.len(), "lax multi finished with sub-chain failures");
                Err(AggregateError { errors }.into())
            }
        }
    }
}

/// Adapter that lets a multi sit inside a chain as a single stage.
pub struct MultiLink {
    name: &'static str,
    pending: Option<Multi>,
    running: Option<RunningMulti>,
    pump: Option<JoinHandle<()>>,
}

impl MultiLink {
    pub fn new(name: &'static str, multi: Multi) -> Self {
        Self { name, pending: Some(multi), running: None, pump: None }
    }

    fn start_pump(&mut self, out: &Outlet) {
        if self.pump.is_some() {
            return;
        }
        let Some(running) = self.running.as_mut() else { return };
        // Swap the receiver out so the pump can drain it while inputs keep flowing.
        let (_, empty_rx) = mpsc::channel::<Message>(1);
        let mut output = std::mem::replace(&mut running.output, empty_rx);
        let out = out.clone();
        self.pump = Some(tokio::spawn(async move {
            while let Some(msg) = output.recv().await {
                if out.send(msg).await.is_err() {
                    break;
                }
            }
        }));
    }
}

#[async_trait]
impl Link for MultiLink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> anyhow::Result<()> {
        if let Some(multi) = self.pending.take() {
            self.running = Some(multi.start(ctx));
        }
        Ok(())
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> anyhow::Result<()> {
        self.start_pump(out);
        if let Some(running) = &self.running {
            running.send(input).await;
        }
        Ok(())
    }

    async fn complete(&mut self, out: &Outlet) -> anyhow::Result<()> {
        self.start_pump(out);
        let Some(mut running) = self.running.take() else { return Ok(()) };
        running.close();
        // Forwarders finish once every sub-chain has drained, which closes the merged stream.
        for handle in std::mem::take(&mut running.forwarders) {
            let _ = handle.await;
        }
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
        running.finish().await
    }
}
