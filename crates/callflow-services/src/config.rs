use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::{fmt, time::Duration};

/// Interaction patterns the demo drives against the services.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Every scenario below, in order.
    All,
    /// `Sum` and `Greet`.
    Unary,
    /// `PrimeNumberDecomposition` and `GreetManyTimes`.
    ServerStream,
    /// `ComputeAverage` and `LongGreet`.
    ClientStream,
    /// `FindMaximum` and `GreetEveryone`.
    Bidi,
    /// `SquareRoot` with valid and negative input, and a cancelled stream.
    Errors,
    /// `GreetWithDeadline` with a generous and a short deadline.
    Deadline,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Unary => write!(f, "unary"),
            Self::ServerStream => write!(f, "server-stream"),
            Self::ClientStream => write!(f, "client-stream"),
            Self::Bidi => write!(f, "bidi"),
            Self::Errors => write!(f, "errors"),
            Self::Deadline => write!(f, "deadline"),
        }
    }
}

/// Runtime configuration for the `callflow-demo` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is honored), with defaults that reproduce the pacing of the
/// classic calculator and greet walkthrough.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "callflow-demo",
    version,
    about = "Serves the calculator and greet services in-process and drives every call shape against them"
)]
pub struct CliArgs {
    /// Frames buffered per call direction before a sender waits.
    ///
    /// Environment variable: `BUFFER_SIZE`
    #[arg(long, env = "BUFFER_SIZE", default_value_t = 16)]
    pub buffer_size: usize,

    /// Calls that may wait to be accepted by the server.
    ///
    /// Environment variable: `BACKLOG`
    #[arg(long, env = "BACKLOG", default_value_t = 128)]
    pub backlog: usize,

    /// Seconds the server waits for in-flight calls on shutdown before
    /// cancelling them.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,

    /// Pause between `GreetManyTimes` responses, in milliseconds.
    ///
    /// Environment variable: `GREET_INTERVAL_MS`
    #[arg(long, env = "GREET_INTERVAL_MS", default_value_t = 1000)]
    pub greet_interval_ms: u64,

    /// Duration of each of the three `GreetWithDeadline` work steps, in
    /// milliseconds.
    ///
    /// Environment variable: `DEADLINE_STEP_MS`
    #[arg(long, env = "DEADLINE_STEP_MS", default_value_t = 1000)]
    pub deadline_step_ms: u64,

    /// Pause between client messages in the streaming scenarios, in
    /// milliseconds.
    ///
    /// Environment variable: `SEND_INTERVAL_MS`
    #[arg(long, env = "SEND_INTERVAL_MS", default_value_t = 1000)]
    pub send_interval_ms: u64,

    /// Which scenario to run.
    ///
    /// Environment variable: `SCENARIO`
    #[arg(long, env = "SCENARIO", value_enum, default_value_t = Scenario::All)]
    pub scenario: Scenario,
}

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub buffer_size: usize,
    pub backlog: usize,
    pub shutdown_timeout: Duration,
    pub greet_interval: Duration,
    pub deadline_step: Duration,
    pub send_interval: Duration,
    pub scenario: Scenario,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            buffer_size: 16,
            backlog: 128,
            shutdown_timeout: Duration::from_secs(5),
            greet_interval: Duration::from_secs(1),
            deadline_step: Duration::from_secs(1),
            send_interval: Duration::from_secs(1),
            scenario: Scenario::All,
        }
    }
}

impl TryFrom<CliArgs> for DemoConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.buffer_size == 0 {
            bail!("BUFFER_SIZE must be greater than 0");
        }
        if args.backlog == 0 {
            bail!("BACKLOG must be greater than 0");
        }
        if args.greet_interval_ms == 0 {
            bail!("GREET_INTERVAL_MS must be greater than 0");
        }
        if args.deadline_step_ms == 0 {
            bail!("DEADLINE_STEP_MS must be greater than 0");
        }
        if args.send_interval_ms == 0 {
            bail!("SEND_INTERVAL_MS must be greater than 0");
        }

        Ok(Self {
            buffer_size: args.buffer_size,
            backlog: args.backlog,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            greet_interval: Duration::from_millis(args.greet_interval_ms),
            deadline_step: Duration::from_millis(args.deadline_step_ms),
            send_interval: Duration::from_millis(args.send_interval_ms),
            scenario: args.scenario,
        })
    }
}
