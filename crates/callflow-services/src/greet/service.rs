use super::GreetService;
use crate::proto::greet::{
    GreetEveryoneRequest, GreetEveryoneResponse, GreetManyTimesRequest, GreetManyTimesResponse,
    GreetRequest, GreetResponse, GreetWithDeadlineRequest, GreetWithDeadlineResponse, Greeting,
    LongGreetRequest, LongGreetResponse,
};
use callflow::{Error, Request, ResponseStream, Status, Streaming};
use core::time::Duration;
use futures::{StreamExt, stream};
use tokio::time::{interval, sleep};
use tokio_stream::wrappers::IntervalStream;

/// Responses sent by `GreetManyTimes`.
const GREET_MANY_TIMES_COUNT: u32 = 10;
/// Work steps performed by `GreetWithDeadline` before answering.
const DEADLINE_STEPS: u32 = 3;
/// `tokio::time::interval` rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// The greet service.
#[derive(Clone, Copy, Debug)]
pub struct Greeter {
    interval: Duration,
    step: Duration,
}

impl Greeter {
    /// `interval` paces `GreetManyTimes`; `step` is the length of each
    /// `GreetWithDeadline` work step.
    pub const fn new(interval: Duration, step: Duration) -> Self {
        Self { interval, step }
    }
}

impl Default for Greeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(1))
    }
}

fn greeting(greeting: Option<Greeting>) -> Result<Greeting, Status> {
    greeting.ok_or_else(|| {
        Error::InvalidArgument {
            reason: "Request carries no greeting".to_string(),
        }
        .into()
    })
}

fn hello_exclaim(greeting: &Greeting) -> String {
    format!("Hello, {}! ", greeting.first_name)
}

#[tonic::async_trait]
impl GreetService for Greeter {
    async fn greet(&self, request: Request<GreetRequest>) -> Result<GreetResponse, Status> {
        let Greeting {
            first_name,
            last_name,
        } = greeting(request.into_inner().greeting)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%first_name, %last_name, "Greet");

        Ok(GreetResponse {
            result: format!("Hello, {first_name} {last_name}"),
        })
    }

    async fn greet_many_times(
        &self,
        request: Request<GreetManyTimesRequest>,
    ) -> Result<ResponseStream<GreetManyTimesResponse>, Status> {
        let first_name = greeting(request.into_inner().greeting)?.first_name;

        // The first tick completes immediately; each later one waits out the
        // interval.
        let responses = stream::iter(0..GREET_MANY_TIMES_COUNT)
            .zip(IntervalStream::new(interval(self.interval.max(MIN_INTERVAL))))
            .map(move |(i, _)| {
                Ok::<_, Status>(GreetManyTimesResponse {
                    result: format!("Hello, {first_name} number {i}"),
                })
            });
        Ok(Box::pin(responses))
    }

    async fn long_greet(
        &self,
        request: Request<Streaming<LongGreetRequest>>,
    ) -> Result<LongGreetResponse, Status> {
        let mut requests = request.into_inner();
        let mut result = String::new();
        while let Some(LongGreetRequest { greeting: g }) = requests.message().await? {
            result.push_str(&hello_exclaim(&greeting(g)?));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(%result, "LongGreet");

        Ok(LongGreetResponse { result })
    }

    async fn greet_everyone(
        &self,
        request: Request<Streaming<GreetEveryoneRequest>>,
    ) -> Result<ResponseStream<GreetEveryoneResponse>, Status> {
        let responses = request.into_inner().into_stream().map(
            |next| -> Result<GreetEveryoneResponse, Status> {
                let greeting = greeting(next?.greeting)?;
                Ok(GreetEveryoneResponse {
                    result: hello_exclaim(&greeting),
                })
            },
        );
        Ok(Box::pin(responses))
    }

    async fn greet_with_deadline(
        &self,
        request: Request<GreetWithDeadlineRequest>,
    ) -> Result<GreetWithDeadlineResponse, Status> {
        let (ctx, message) = request.into_parts();
        let Greeting {
            first_name,
            last_name,
        } = greeting(message.greeting)?;

        for _step in 0..DEADLINE_STEPS {
            tokio::select! {
                biased;
                status = ctx.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(
                        step = _step,
                        code = ?status.code(),
                        "GreetWithDeadline abandoned"
                    );
                    return Err(status);
                }
                () = sleep(self.step) => {}
            }
        }

        Ok(GreetWithDeadlineResponse {
            result: format!("Hello, {first_name} {last_name}"),
        })
    }
}
