pub mod args;
pub mod cancel;
pub mod chain;
pub mod fanout;
pub mod link;
pub mod message;
pub mod multi;

pub use args::{resolve, ArgValue, Args, Param, ParamKind};
pub use cancel::CancelToken;
pub use chain::{Chain, RunningChain};
pub use fanout::{bounded_fan_out, DEFAULT_CONCURRENCY};
pub use link::{is_output_closed, Link, LinkContext, Outlet, OutputClosed};
pub use message::{Accepts, FromMessage, Message, HIERARCHY, PROJECTS};
pub use multi::{AggregateError, Multi, MultiLink, RunningMulti, Strictness};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::MemoryCloud;
    use async_trait::async_trait;
    use std::sync::Arc;

    fn ctx() -> LinkContext {
        LinkContext::new(Args::new(), Arc::new(MemoryCloud::default()))
    }

    struct Upper;

    #[async_trait]
    impl Link for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }
        fn accepts(&self) -> Accepts {
            Accepts::Text
        }
        async fn process(&mut self, input: Message, out: &Outlet) -> anyhow::Result<()> {
            if let Message::Text(s) = input {
                out.send(s.to_uppercase()).await?;
            }
            Ok(())
        }
    }

    /// Counts inputs and emits the count once upstream closes.
    struct Counter(usize);

    #[async_trait]
    impl Link for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }
        async fn process(&mut self, _input: Message, _out: &Outlet) -> anyhow::Result<()> {
            self.0 += 1;
            Ok(())
        }
        async fn complete(&mut self, out: &Outlet) -> anyhow::Result<()> {
            out.send(format!("count={}", self.0)).await
        }
    }

    struct Fail(&'static str);

    #[async_trait]
    impl Link for Fail {
        fn name(&self) -> &'static str {
            "fail"
        }
        async fn process(&mut self, _input: Message, _out: &Outlet) -> anyhow::Result<()> {
            anyhow::bail!("{}", self.0)
        }
    }

    struct NeedsVersion;

    #[async_trait]
    impl Link for NeedsVersion {
        fn name(&self) -> &'static str {
            "needs-version"
        }
        fn params(&self) -> Vec<Param> {
            vec![Param::string("version", "version id").required()]
        }
        async fn process(&mut self, _input: Message, _out: &Outlet) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn texts(msgs: &[Message]) -> Vec<String> {
        let mut out: Vec<String> = msgs
            .iter()
            .filter_map(|m| match m {
                Message::Text(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        out.sort();
        out
    }

    #[tokio::test]
    async fn test_chain_runs_links_in_order() {
        let chain = Chain::of(Upper).then(Counter(0));
        let (out, result) = chain.run(&ctx(), vec!["a".into(), "b".into()]).await;
        result.unwrap();
        assert_eq!(texts(&out), vec!["count=2"]);
    }

    #[tokio::test]
    async fn test_type_filter_skips_non_matching_inputs() {
        let project = crate::record::Resource::new(
            "alpha",
            "organizations/1",
            crate::record::ResourceType::Project,
            Default::default(),
        )
        .unwrap();
        let chain = Chain::of(Upper);
        let (out, result) = chain.run(&ctx(), vec![project.into(), "x".into()]).await;
        result.unwrap();
        assert_eq!(texts(&out), vec!["X"]);
    }

    #[tokio::test]
    async fn test_missing_required_param_fails_before_processing() {
        let (out, result) = Chain::of(NeedsVersion).run(&ctx(), vec!["x".into()]).await;
        assert!(out.is_empty());
        assert_eq!(result.unwrap_err().to_string(), "missing required parameter: version");
    }

    #[tokio::test]
    async fn test_lax_multi_aggregates_and_keeps_other_outputs() {
        let multi = Multi::new(vec![
            Chain::of(Upper),
            Chain::of(Fail("first failure")),
            Chain::of(Fail("second failure")),
        ])
        .with_strictness(Strictness::Lax);
        let mut running = multi.start(&ctx());
        running.send("hi").await;
        running.close();
        let mut got = Vec::new();
        while let Some(s) = running.recv_as::<String>().await {
            got.push(s);
        }
        let err = running.finish().await.unwrap_err();
        assert_eq!(got, vec!["HI"]);
        let text = err.to_string();
        let mut lines: Vec<&str> = text.lines().collect();
        lines.sort();
        assert_eq!(lines, vec!["first failure", "second failure"]);
    }

    #[tokio::test]
    async fn test_strict_multi_returns_first_failure() {
        let multi = Multi::new(vec![Chain::of(Fail("boom")), Chain::of(Upper)])
            .with_strictness(Strictness::Strict);
        let mut running = multi.start(&ctx());
        running.send("hi").await;
        running.close();
        while running.recv().await.is_some() {}
        let err = running.finish().await.unwrap_err();
        assert!(err.downcast_ref::<AggregateError>().is_none());
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_multi_link_inside_chain() {
        let fan = MultiLink::new(
            "fan",
            Multi::new(vec![Chain::of(Upper), Chain::of(Upper)]),
        );
        let chain = Chain::of(fan).then(Counter(0));
        let (out, result) = chain.run(&ctx(), vec!["a".into(), "b".into(), "c".into()]).await;
        result.unwrap();
        assert_eq!(texts(&out), vec!["count=6"]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_chain() {
        let ctx = ctx();
        ctx.cancel().cancel();
        let (_, result) = Chain::of(Upper).run(&ctx, vec!["a".into()]).await;
        assert!(result.unwrap_err().to_string().contains("cancelled"));
    }
}
