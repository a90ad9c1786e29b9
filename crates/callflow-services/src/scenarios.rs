//! Client walkthroughs of every interaction pattern.
//!
//! Each scenario drives the services the way a client application would and
//! prints what it observes. Scenarios that demonstrate failures check that the
//! failure carried the expected status code, and report an error otherwise.

use crate::{
    calculator::CalculatorClient,
    config::{DemoConfig, Scenario},
    greet::GreetClient,
    proto::{
        calculator::{
            ComputeAverageRequest, FindMaximumRequest, PrimeNumberDecompositionRequest,
            SquareRootRequest, SumRequest,
        },
        greet::{
            GreetEveryoneRequest, GreetManyTimesRequest, GreetRequest, GreetWithDeadlineRequest,
            Greeting, LongGreetRequest,
        },
    },
    runtime::InProcess,
};
use anyhow::{Context, bail};
use callflow::{CallOptions, Code, Received, Status, channel::memory::MemoryTransport};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const NAMES: [&str; 5] = ["Kim", "Papure", "Oat", "Amy", "Max"];

fn jirawat() -> Greeting {
    Greeting::new("Jirawat", "Harnsiriwatanakit")
}

/// Runs the configured scenarios against an in-process server.
#[derive(Debug)]
pub struct Demo {
    calculator: CalculatorClient<MemoryTransport>,
    greet: GreetClient<MemoryTransport>,
    config: DemoConfig,
}

impl Demo {
    pub fn new(server: &InProcess, config: DemoConfig) -> Self {
        Self {
            calculator: server.calculator(),
            greet: server.greet(),
            config,
        }
    }

    /// # Errors
    ///
    /// Returns the first call that failed unexpectedly, or that succeeded
    /// where a failure was expected.
    pub async fn run(&self) -> anyhow::Result<()> {
        #[cfg(feature = "tracing")]
        tracing::info!(scenario = %self.config.scenario, "Running scenarios");

        match self.config.scenario {
            Scenario::All => {
                self.unary().await?;
                self.server_stream().await?;
                self.client_stream().await?;
                self.bidi().await?;
                self.errors().await?;
                self.deadline().await
            }
            Scenario::Unary => self.unary().await,
            Scenario::ServerStream => self.server_stream().await,
            Scenario::ClientStream => self.client_stream().await,
            Scenario::Bidi => self.bidi().await,
            Scenario::Errors => self.errors().await,
            Scenario::Deadline => self.deadline().await,
        }
    }

    async fn unary(&self) -> anyhow::Result<()> {
        println!("== Unary ==");
        let sum = self
            .calculator
            .sum(
                SumRequest {
                    first_number: 5,
                    second_number: 40,
                },
                CallOptions::new(),
            )
            .await
            .context("Sum failed")?;
        println!("Sum of 5 and 40: {}", sum.sum_result);

        let greeting = self
            .greet
            .greet(GreetRequest::from(jirawat()), CallOptions::new())
            .await
            .context("Greet failed")?;
        println!("Greet: {}", greeting.result);
        Ok(())
    }

    async fn server_stream(&self) -> anyhow::Result<()> {
        println!("== Server streaming ==");
        let mut factors = self
            .calculator
            .prime_number_decomposition(
                PrimeNumberDecompositionRequest { number: 2100 },
                CallOptions::new(),
            )
            .await
            .context("PrimeNumberDecomposition failed")?;
        while let Some(factor) = factors
            .message()
            .await
            .context("PrimeNumberDecomposition stream failed")?
        {
            println!("Prime factor of 2100: {}", factor.prime_factor);
        }

        let mut greetings = self
            .greet
            .greet_many_times(GreetManyTimesRequest::from(jirawat()), CallOptions::new())
            .await
            .context("GreetManyTimes failed")?;
        while let Some(greeting) = greetings
            .message()
            .await
            .context("GreetManyTimes stream failed")?
        {
            println!("GreetManyTimes: {}", greeting.result);
        }
        Ok(())
    }

    async fn client_stream(&self) -> anyhow::Result<()> {
        println!("== Client streaming ==");
        let mut average = self
            .calculator
            .compute_average(CallOptions::new())
            .await
            .context("ComputeAverage failed")?;
        for number in [3, 5, 9, 27, 35] {
            println!("Sending number: {number}");
            average
                .send(ComputeAverageRequest { number })
                .await
                .context("ComputeAverage send failed")?;
        }
        let average = average
            .close_and_recv()
            .await
            .context("ComputeAverage failed")?;
        println!("The average is: {}", average.average);

        let mut long_greet = self
            .greet
            .long_greet(CallOptions::new())
            .await
            .context("LongGreet failed")?;
        for name in NAMES {
            println!("Sending greeting for {name}");
            long_greet
                .send(LongGreetRequest::from(Greeting::new(name, "")))
                .await
                .context("LongGreet send failed")?;
            sleep(self.config.send_interval).await;
        }
        let response = long_greet
            .close_and_recv()
            .await
            .context("LongGreet failed")?;
        println!("LongGreet: {}", response.result);
        Ok(())
    }

    async fn bidi(&self) -> anyhow::Result<()> {
        println!("== Bidirectional streaming ==");
        let (mut numbers, mut maxima) = self
            .calculator
            .find_maximum(CallOptions::new())
            .await
            .context("FindMaximum failed")?;
        let pacing = self.config.send_interval;
        let sender = tokio::spawn(async move {
            for number in [4, 7, 11, 9, 2, 6, 33] {
                println!("Sending number: {number}");
                numbers.send(FindMaximumRequest { number }).await?;
                sleep(pacing).await;
            }
            numbers.close_send().await
        });
        while let Some(maximum) = maxima.message().await.context("FindMaximum stream failed")? {
            println!("New maximum: {}", maximum.maximum_number);
        }
        sender
            .await
            .context("FindMaximum sender panicked")?
            .context("FindMaximum send failed")?;

        let (mut requests, mut greetings) = self
            .greet
            .greet_everyone(CallOptions::new())
            .await
            .context("GreetEveryone failed")?;
        let sender = tokio::spawn(async move {
            for name in NAMES {
                println!("Sending greeting for {name}");
                requests
                    .send(GreetEveryoneRequest::from(Greeting::new(name, "")))
                    .await?;
                sleep(pacing).await;
            }
            requests.close_send().await
        });
        while let Some(greeting) = greetings
            .message()
            .await
            .context("GreetEveryone stream failed")?
        {
            println!("GreetEveryone: {}", greeting.result);
        }
        sender
            .await
            .context("GreetEveryone sender panicked")?
            .context("GreetEveryone send failed")?;
        Ok(())
    }

    async fn errors(&self) -> anyhow::Result<()> {
        println!("== Errors ==");
        for number in [10, -2] {
            match self
                .calculator
                .square_root(SquareRootRequest { number }, CallOptions::new())
                .await
            {
                Ok(root) => println!("Square root of {number}: {}", root.number_root),
                Err(status) => {
                    expect_code(&status, Code::InvalidArgument)?;
                    println!("SquareRoot({number}) failed: {}", status.message());
                }
            }
        }

        // Cancel a server stream partway through; both sides observe it.
        let token = CancellationToken::new();
        let mut greetings = self
            .greet
            .greet_many_times(
                GreetManyTimesRequest::from(jirawat()),
                CallOptions::new().cancel_token(token.clone()),
            )
            .await
            .context("GreetManyTimes failed")?;
        let mut received = 0;
        loop {
            match greetings.recv().await {
                Received::Message(greeting) => {
                    println!("GreetManyTimes: {}", greeting.result);
                    received += 1;
                    if received == 3 {
                        println!("Cancelling GreetManyTimes");
                        token.cancel();
                    }
                }
                Received::EndOfStream => bail!("GreetManyTimes completed despite cancellation"),
                Received::Error(status) => {
                    expect_code(&status, Code::Cancelled)?;
                    println!("GreetManyTimes ended: {}", status.message());
                    break;
                }
            }
        }
        Ok(())
    }

    async fn deadline(&self) -> anyhow::Result<()> {
        println!("== Deadlines ==");
        let step = self.config.deadline_step;

        let response = self
            .greet
            .greet_with_deadline(
                GreetWithDeadlineRequest::from(jirawat()),
                CallOptions::new().timeout(step * 5),
            )
            .await
            .context("GreetWithDeadline failed within a generous deadline")?;
        println!("GreetWithDeadline: {}", response.result);

        match self
            .greet
            .greet_with_deadline(
                GreetWithDeadlineRequest::from(jirawat()),
                CallOptions::new().timeout(step),
            )
            .await
        {
            Ok(_) => bail!("GreetWithDeadline beat a deadline shorter than its work"),
            Err(status) => {
                expect_code(&status, Code::DeadlineExceeded)?;
                println!("Timeout was hit! Deadline was exceeded");
            }
        }
        Ok(())
    }
}

fn expect_code(status: &Status, code: Code) -> anyhow::Result<()> {
    if status.code() != code {
        bail!("expected {code:?}, call ended with {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::config;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_scenario_runs_clean() {
        let config = config();
        let server = InProcess::start(&config);

        Demo::new(&server, config).run().await.unwrap();

        server.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_scenarios_run_clean() {
        let server = InProcess::start(&config());

        for scenario in [Scenario::Errors, Scenario::Deadline] {
            let config = DemoConfig {
                scenario,
                ..config()
            };
            Demo::new(&server, config).run().await.unwrap();
        }

        server.shutdown().await;
    }
}
