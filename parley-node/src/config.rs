//! Node configuration for the loopback demo.

use std::time::Duration;

use clap::Parser;
use parley_protocol::RequestOptions;

/// Run one request/response exchange between two in-process agents.
#[derive(Parser, Debug)]
#[command(name = "parley-node", version, about)]
pub struct NodeArgs {
    /// Agent that sends the request.
    #[arg(long, default_value = "buyer")]
    pub requester: String,

    /// Agent that answers it.
    #[arg(long, default_value = "seller")]
    pub responder: String,

    /// Per-attempt request deadline in milliseconds. Zero disables it.
    #[arg(long, default_value_t = 2000)]
    pub timeout_ms: u64,

    /// Extra attempts after a timeout or failure reply.
    #[arg(long, default_value_t = 2)]
    pub retries: u32,

    /// Pause before re-arming the deadline, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub retry_delay_ms: u64,

    /// Failure replies the responder sends before its inform.
    #[arg(long, default_value_t = 1)]
    pub failures: u32,

    /// Delay between the responder's replies, in milliseconds.
    #[arg(long, default_value_t = 50)]
    pub latency_ms: u64,

    /// Deadline for the whole conversation, in milliseconds.
    #[arg(long, default_value_t = 10_000, value_parser = clap::value_parser!(u64).range(1..))]
    pub conversation_timeout_ms: u64,

    /// Responder never answers.
    #[arg(long)]
    pub silent: bool,
}

/// Node configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Agent that sends the request.
    pub requester: String,
    /// Agent that answers it.
    pub responder: String,
    /// Correlation options for the request.
    pub request: RequestOptions,
    /// Deadline for the whole conversation.
    pub conversation_timeout: Duration,
    /// Failure replies the responder sends before its inform.
    pub failures: u32,
    /// Delay between the responder's replies.
    pub reply_latency: Duration,
    /// Responder never answers.
    pub silent: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            requester: "buyer".to_string(),
            responder: "seller".to_string(),
            request: RequestOptions::with_timeout(Duration::from_secs(2))
                .retries(2, Duration::from_millis(100)),
            conversation_timeout: Duration::from_secs(10),
            failures: 1,
            reply_latency: Duration::from_millis(50),
            silent: false,
        }
    }
}

impl From<NodeArgs> for NodeConfig {
    fn from(args: NodeArgs) -> Self {
        Self {
            requester: args.requester,
            responder: args.responder,
            request: RequestOptions::with_timeout(Duration::from_millis(args.timeout_ms))
                .retries(args.retries, Duration::from_millis(args.retry_delay_ms)),
            conversation_timeout: Duration::from_millis(args.conversation_timeout_ms),
            failures: args.failures,
            reply_latency: Duration::from_millis(args.latency_ms),
            silent: args.silent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(list: &[&str]) -> Result<NodeConfig, clap::Error> {
        NodeArgs::try_parse_from(std::iter::once("parley-node").chain(list.iter().copied()))
            .map(NodeConfig::from)
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        NodeArgs::command().debug_assert();
    }

    #[test]
    fn no_flags_gives_default_config() {
        assert_eq!(parse(&[]).unwrap(), NodeConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--timeout-ms",
            "50",
            "--retries",
            "0",
            "--failures",
            "3",
            "--requester",
            "alice",
            "--silent",
        ])
        .unwrap();

        assert_eq!(config.request.timeout, Duration::from_millis(50));
        assert_eq!(config.request.max_retries, 0);
        assert_eq!(config.failures, 3);
        assert_eq!(config.requester, "alice");
        assert!(config.silent);
    }

    #[test]
    fn bad_flags_are_rejected() {
        assert!(parse(&["--retries"]).is_err());
        assert!(parse(&["--retries", "many"]).is_err());
        assert!(parse(&["--retries", "99999999999"]).is_err());
        assert!(parse(&["--conversation-timeout-ms", "0"]).is_err());
        assert!(parse(&["--bogus", "1"]).is_err());
    }
}
