use crate::{
    CallContext, CallOptions, Client, Code, Received, Request, ResponseStream, Server, ServerCall,
    Service, Status, Streaming,
    call::{HalfState, Phase},
    channel::memory::MemoryTransport,
    server::{client_streaming, reject, server_streaming, streaming, unary},
};
use core::time::Duration;
use futures::{
    StreamExt,
    future::{BoxFuture, FutureExt},
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

#[derive(Clone, PartialEq, prost::Message)]
struct Num {
    #[prost(int64, tag = "1")]
    value: i64,
}

const fn num(value: i64) -> Num {
    Num { value }
}

fn method(name: &str) -> String {
    format!("/test.Numbers/{name}")
}

/// Test service. Long-running handlers publish their server-side context so
/// tests can watch the server observe aborts.
struct Numbers {
    contexts: mpsc::Sender<CallContext>,
}

impl Service for Numbers {
    fn name(&self) -> &'static str {
        "test.Numbers"
    }

    fn call(&self, call: ServerCall) -> BoxFuture<'static, ()> {
        let contexts = self.contexts.clone();
        match call.method_name() {
            "Echo" => unary(call, |req: Request<Num>| async move {
                let value = req.into_inner().value;
                if value < 0 {
                    return Err(Status::invalid_argument(format!("negative value: {value}")));
                }
                Ok(num(value))
            })
            .boxed(),
            "Sleep" => unary(call, |req: Request<Num>| async move {
                let value = req.into_inner().value;
                sleep(Duration::from_millis(value.unsigned_abs())).await;
                Ok::<_, Status>(num(value))
            })
            .boxed(),
            "Count" => server_streaming(call, |req: Request<Num>| async move {
                let count = req.into_inner().value;
                let stream = futures::stream::iter((0..count).map(|v| Ok::<_, Status>(num(v))));
                Ok::<ResponseStream<Num>, Status>(Box::pin(stream))
            })
            .boxed(),
            "CountThenFail" => server_streaming(call, |req: Request<Num>| async move {
                let count = req.into_inner().value;
                let stream = futures::stream::iter((0..count).map(|v| Ok::<_, Status>(num(v))))
                    .chain(futures::stream::iter([Err(Status::aborted("stopped"))]));
                Ok::<ResponseStream<Num>, Status>(Box::pin(stream))
            })
            .boxed(),
            "Ticker" => server_streaming(call, move |req: Request<Num>| async move {
                let _ = contexts.try_send(req.context().clone());
                let (tx, rx) = mpsc::channel::<Result<Num, Status>>(1);
                tokio::spawn(async move {
                    let mut value = 0;
                    while tx.send(Ok(num(value))).await.is_ok() {
                        value += 1;
                        sleep(Duration::from_millis(10)).await;
                    }
                });
                Ok::<ResponseStream<Num>, Status>(Box::pin(ReceiverStream::new(rx)))
            })
            .boxed(),
            "Sum" => client_streaming(call, |req: Request<Streaming<Num>>| async move {
                let mut requests = req.into_inner();
                let mut total = 0;
                while let Some(item) = requests.message().await? {
                    if item.value < 0 {
                        return Err(Status::invalid_argument("negative value"));
                    }
                    total += item.value;
                }
                Ok(num(total))
            })
            .boxed(),
            "Panic" => unary(call, |req: Request<Num>| async move {
                if req.get_ref().value >= 0 {
                    panic!("handler bug");
                }
                Ok::<_, Status>(num(0))
            })
            .boxed(),
            "Answer" => client_streaming(call, move |req: Request<Streaming<Num>>| async move {
                let (ctx, mut requests) = req.into_parts();
                let _ = contexts.try_send(ctx);
                tokio::spawn(async move { while let Ok(Some(_)) = requests.message().await {} });
                Ok::<_, Status>(num(7))
            })
            .boxed(),
            "Ignore" => client_streaming(call, |req: Request<Streaming<Num>>| async move {
                drop(req);
                Ok::<_, Status>(num(7))
            })
            .boxed(),
            "Chat" => streaming(call, |req: Request<Streaming<Num>>| async move {
                let mut requests = req.into_inner();
                let (tx, rx) = mpsc::channel::<Result<Num, Status>>(4);
                tokio::spawn(async move {
                    loop {
                        match requests.recv().await {
                            Received::Message(item) => {
                                if tx.send(Ok(item)).await.is_err() {
                                    break;
                                }
                            }
                            Received::EndOfStream => break,
                            Received::Error(status) => {
                                let _ = tx.send(Err(status)).await;
                                break;
                            }
                        }
                    }
                });
                Ok::<ResponseStream<Num>, Status>(Box::pin(ReceiverStream::new(rx)))
            })
            .boxed(),
            "Stall" => streaming(call, move |req: Request<Streaming<Num>>| async move {
                let (ctx, requests) = req.into_parts();
                let _ = contexts.try_send(ctx.clone());
                let status = ctx.cancelled().await;
                drop(requests);
                Err::<ResponseStream<Num>, Status>(status)
            })
            .boxed(),
            _ => {
                let method = call.header().method.clone();
                reject(call, crate::Error::Unimplemented { method }.into()).boxed()
            }
        }
    }
}

struct Harness {
    client: Client<MemoryTransport>,
    contexts: mpsc::Receiver<CallContext>,
    stop: oneshot::Sender<()>,
    serving: JoinHandle<()>,
}

impl Harness {
    fn start(buffer_size: usize, shutdown_timeout: Duration) -> Self {
        let (transport, incoming) = MemoryTransport::new(buffer_size, 16);
        let (contexts_tx, contexts) = mpsc::channel(16);
        let server = Server::new(shutdown_timeout).add_service(Numbers {
            contexts: contexts_tx,
        });
        let (stop, stopped) = oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve_with_shutdown(incoming, async move {
            let _ = stopped.await;
        }));
        Self {
            client: Client::new(transport),
            contexts,
            stop,
            serving,
        }
    }

    async fn server_context(&mut self) -> CallContext {
        timeout(Duration::from_secs(2), self.contexts.recv())
            .await
            .expect("handler did not start")
            .expect("service dropped")
    }

    async fn shutdown(self) {
        let _ = self.stop.send(());
        timeout(Duration::from_secs(10), self.serving)
            .await
            .expect("server did not shut down")
            .unwrap();
    }
}

async fn next_error(responses: &mut Streaming<Num>) -> Status {
    loop {
        match timeout(Duration::from_secs(2), responses.recv())
            .await
            .expect("call did not end")
        {
            Received::Message(_) => continue,
            Received::EndOfStream => panic!("call completed successfully"),
            Received::Error(status) => return status,
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unary_round_trip() {
    let harness = Harness::start(4, Duration::from_secs(1));
    let reply: Num = harness
        .client
        .unary(&method("Echo"), num(42), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(reply, num(42));
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn validation_error_is_invalid_argument() {
    let harness = Harness::start(4, Duration::from_secs(1));
    let status = harness
        .client
        .unary::<_, Num>(&method("Echo"), num(-3), CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "negative value: -3");
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn server_stream_preserves_order_without_loss() {
    // A buffer of one forces the sender to wait on the receiver for every
    // message.
    let harness = Harness::start(1, Duration::from_secs(1));
    let mut responses: Streaming<Num> = harness
        .client
        .server_streaming(&method("Count"), num(500), CallOptions::new())
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(item) = responses.message().await.unwrap() {
        seen.push(item.value);
    }
    assert_eq!(seen, (0..500).collect::<Vec<_>>());

    // Reading past the end is reported but does not change the outcome.
    let Received::Error(status) = responses.recv().await else {
        panic!("expected a half-closed error");
    };
    assert_eq!(status.code(), Code::Internal);
    assert!(matches!(responses.context().state().outcome(), Some(Ok(()))));
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stream_failure_arrives_after_delivered_messages() {
    let harness = Harness::start(4, Duration::from_secs(1));
    let mut responses: Streaming<Num> = harness
        .client
        .server_streaming(&method("CountThenFail"), num(20), CallOptions::new())
        .await
        .unwrap();

    for expected in 0..20 {
        match responses.recv().await {
            Received::Message(item) => assert_eq!(item.value, expected),
            other => panic!("unexpected {other:?}"),
        }
    }
    let Received::Error(status) = responses.recv().await else {
        panic!("expected the handler's status");
    };
    assert_eq!(status.code(), Code::Aborted);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_stream_folds_every_request() {
    let harness = Harness::start(2, Duration::from_secs(1));
    let mut call = harness
        .client
        .client_streaming::<Num, Num>(&method("Sum"), CallOptions::new())
        .await
        .unwrap();
    for value in 1..=100 {
        call.send(num(value)).await.unwrap();
    }
    assert_eq!(call.close_and_recv().await.unwrap(), num(5050));
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_stream_reports_early_server_failure() {
    let harness = Harness::start(2, Duration::from_secs(1));
    let mut call = harness
        .client
        .client_streaming::<Num, Num>(&method("Sum"), CallOptions::new())
        .await
        .unwrap();
    let _ = call.send(num(-1)).await;
    for value in 0..10 {
        // The server may stop receiving at any point; the outcome below is
        // what matters.
        let _ = call.send(num(value)).await;
    }
    let status = call.close_and_recv().await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bidi_completes_only_after_both_directions() {
    let harness = Harness::start(2, Duration::from_secs(1));
    let (mut requests, mut responses) = harness
        .client
        .streaming::<Num, Num>(&method("Chat"), CallOptions::new())
        .await
        .unwrap();
    let ctx = requests.context();

    let (paused_tx, paused_rx) = oneshot::channel();
    let (resume_tx, resume_rx) = oneshot::channel::<()>();
    let sender = tokio::spawn(async move {
        for value in 0..5 {
            requests.send(num(value)).await.unwrap();
        }
        let _ = paused_tx.send(());
        let _ = resume_rx.await;
        for value in 5..10 {
            requests.send(num(value)).await.unwrap();
        }
        requests.close_send().await.unwrap();
    });

    let mut seen = Vec::new();
    for _ in 0..5 {
        seen.push(responses.message().await.unwrap().unwrap().value);
    }
    paused_rx.await.unwrap();

    // The request direction is still open, so the call cannot be over.
    sleep(Duration::from_millis(50)).await;
    assert!(ctx.is_active());
    assert_ne!(ctx.state().phase(), Phase::Terminal);

    resume_tx.send(()).unwrap();
    while let Some(item) = responses.message().await.unwrap() {
        seen.push(item.value);
    }
    sender.await.unwrap();

    assert_eq!(seen, (0..10).collect::<Vec<_>>());
    let state = ctx.state();
    assert_eq!(state.local(), HalfState::Closed);
    assert_eq!(state.remote(), HalfState::Closed);
    assert!(matches!(state.outcome(), Some(Ok(()))));
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_send_is_idempotent() {
    let harness = Harness::start(2, Duration::from_secs(1));
    let (mut requests, mut responses) = harness
        .client
        .streaming::<Num, Num>(&method("Chat"), CallOptions::new())
        .await
        .unwrap();

    requests.close_send().await.unwrap();
    let once = requests.context().state();
    requests.close_send().await.unwrap();
    let twice = requests.context().state();
    assert_eq!(once.local(), HalfState::Closed);
    assert_eq!(once.local(), twice.local());
    assert_eq!(once.sent(), twice.sent());

    assert!(matches!(responses.recv().await, Received::EndOfStream));
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn send_after_close_fails_the_call() {
    let harness = Harness::start(2, Duration::from_secs(1));
    let (mut requests, mut responses) = harness
        .client
        .streaming::<Num, Num>(&method("Chat"), CallOptions::new())
        .await
        .unwrap();

    requests.close_send().await.unwrap();
    let status = requests.send(num(1)).await.unwrap_err();
    assert_eq!(status.code(), Code::Internal);

    let Received::Error(status) = responses.recv().await else {
        panic!("expected the call to have failed");
    };
    assert_eq!(status.code(), Code::Internal);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unary_deadline_exceeded() {
    let harness = Harness::start(2, Duration::from_secs(1));
    let status = harness
        .client
        .unary::<_, Num>(
            &method("Sleep"),
            num(5_000),
            CallOptions::new().timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::DeadlineExceeded);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deadline_stops_delivery_on_both_sides() {
    let mut harness = Harness::start(2, Duration::from_secs(1));
    let mut responses: Streaming<Num> = harness
        .client
        .server_streaming(
            &method("Ticker"),
            num(0),
            CallOptions::new().timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap();
    let server_ctx = harness.server_context().await;

    let status = next_error(&mut responses).await;
    assert_eq!(status.code(), Code::DeadlineExceeded);

    // Nothing is delivered after expiry, even though the server kept ticking
    // until it noticed.
    sleep(Duration::from_millis(50)).await;
    let Received::Error(again) = responses.recv().await else {
        panic!("message delivered after the deadline");
    };
    assert_eq!(again.code(), Code::DeadlineExceeded);

    let server_status = timeout(Duration::from_secs(1), server_ctx.cancelled())
        .await
        .unwrap();
    assert_eq!(server_status.code(), Code::DeadlineExceeded);
    assert!(!server_ctx.is_active());
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_reaches_both_sides() {
    let mut harness = Harness::start(2, Duration::from_secs(1));
    let mut responses: Streaming<Num> = harness
        .client
        .server_streaming(&method("Ticker"), num(0), CallOptions::new())
        .await
        .unwrap();
    let server_ctx = harness.server_context().await;

    for _ in 0..3 {
        assert!(matches!(responses.recv().await, Received::Message(_)));
    }
    assert!(responses.context().cancel());

    let Received::Error(status) = responses.recv().await else {
        panic!("message delivered after cancellation");
    };
    assert_eq!(status.code(), Code::Cancelled);

    let server_status = timeout(Duration::from_secs(1), server_ctx.cancelled())
        .await
        .unwrap();
    assert_eq!(server_status.code(), Code::Cancelled);
    assert_eq!(server_ctx.state().local(), HalfState::Aborted);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_token_unblocks_both_halves() {
    let mut harness = Harness::start(2, Duration::from_secs(1));
    let token = CancellationToken::new();
    let (mut requests, mut responses) = harness
        .client
        .streaming::<Num, Num>(
            &method("Stall"),
            CallOptions::new().cancel_token(token.clone()),
        )
        .await
        .unwrap();
    let server_ctx = harness.server_context().await;

    let reader = tokio::spawn(async move { next_error(&mut responses).await });
    sleep(Duration::from_millis(20)).await;
    token.cancel();

    let status = reader.await.unwrap();
    assert_eq!(status.code(), Code::Cancelled);
    let status = requests.send(num(1)).await.unwrap_err();
    assert_eq!(status.code(), Code::Cancelled);

    let server_status = timeout(Duration::from_secs(1), server_ctx.cancelled())
        .await
        .unwrap();
    assert_eq!(server_status.code(), Code::Cancelled);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropping_the_response_stream_cancels_the_call() {
    let mut harness = Harness::start(2, Duration::from_secs(1));
    let responses: Streaming<Num> = harness
        .client
        .server_streaming(&method("Ticker"), num(0), CallOptions::new())
        .await
        .unwrap();
    let server_ctx = harness.server_context().await;

    drop(responses);

    let server_status = timeout(Duration::from_secs(1), server_ctx.cancelled())
        .await
        .unwrap();
    assert_eq!(server_status.code(), Code::Cancelled);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_buffer_applies_backpressure() {
    let mut harness = Harness::start(1, Duration::from_secs(1));
    let (mut requests, _responses) = harness
        .client
        .streaming::<Num, Num>(&method("Stall"), CallOptions::new())
        .await
        .unwrap();
    let server_ctx = harness.server_context().await;
    let ctx = requests.context();

    // One frame fits in the buffer; the server never reads, so the next send
    // waits.
    requests.send(num(1)).await.unwrap();
    assert!(
        timeout(Duration::from_millis(100), requests.send(num(2)))
            .await
            .is_err()
    );

    // Cancelling releases a sender blocked on the full buffer.
    let blocked = tokio::spawn(async move { requests.send(num(3)).await });
    sleep(Duration::from_millis(20)).await;
    assert!(ctx.cancel());
    let status = timeout(Duration::from_secs(1), blocked)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert_eq!(status.code(), Code::Cancelled);

    let server_status = timeout(Duration::from_secs(1), server_ctx.cancelled())
        .await
        .unwrap();
    assert_eq!(server_status.code(), Code::Cancelled);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_methods_are_unimplemented() {
    let harness = Harness::start(2, Duration::from_secs(1));

    let status = harness
        .client
        .unary::<_, Num>(&method("Missing"), num(1), CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);

    let status = harness
        .client
        .unary::<_, Num>("/nowhere.Service/Echo", num(1), CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shape_mismatch_is_rejected() {
    let harness = Harness::start(2, Duration::from_secs(1));
    let status = match harness
        .client
        .server_streaming::<_, Num>(&method("Echo"), num(1), CallOptions::new())
        .await
    {
        Err(status) => status,
        Ok(mut responses) => next_error(&mut responses).await,
    };
    assert_eq!(status.code(), Code::Internal);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_drains_in_flight_calls() {
    let harness = Harness::start(2, Duration::from_secs(5));
    let client = harness.client.clone();
    let in_flight = tokio::spawn(async move {
        client
            .unary::<_, Num>(&method("Sleep"), num(200), CallOptions::new())
            .await
    });
    sleep(Duration::from_millis(50)).await;

    let client = harness.client.clone();
    harness.shutdown().await;

    assert_eq!(in_flight.await.unwrap().unwrap(), num(200));
    let status = client
        .unary::<_, Num>(&method("Echo"), num(1), CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_cancels_calls_that_outlive_the_drain() {
    let mut harness = Harness::start(2, Duration::from_millis(100));
    let mut responses: Streaming<Num> = harness
        .client
        .server_streaming(&method("Ticker"), num(0), CallOptions::new())
        .await
        .unwrap();
    let _server_ctx = harness.server_context().await;
    assert!(matches!(responses.recv().await, Received::Message(_)));

    let reader = tokio::spawn(async move { next_error(&mut responses).await });
    harness.shutdown().await;

    let status = reader.await.unwrap();
    assert_eq!(status.code(), Code::Unavailable);
    assert_eq!(status.message(), "Service is shutting down");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_panic_is_internal() {
    let harness = Harness::start(4, Duration::from_secs(1));
    let status = harness
        .client
        .unary::<Num, Num>(&method("Panic"), num(1), CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("handler bug"));

    // The server keeps serving after a handler panic.
    let reply: Num = harness
        .client
        .unary(&method("Echo"), num(3), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(reply, num(3));
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_stream_response_waits_for_end_of_stream() {
    let mut harness = Harness::start(4, Duration::from_secs(1));
    let mut call = harness
        .client
        .client_streaming::<Num, Num>(&method("Answer"), CallOptions::new())
        .await
        .unwrap();
    let server = harness.server_context().await;
    for value in 0..3 {
        call.send(num(value)).await.unwrap();
    }

    // The handler has already returned its answer, but nothing is sent
    // until the client ends its request stream.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(server.state().sent(), 0);
    assert!(!server.state().is_terminal());
    let client = call.context();
    assert_eq!(client.state().received(), 0);
    assert_eq!(client.state().phase(), Phase::Active);

    let reply = timeout(Duration::from_secs(2), call.close_and_recv())
        .await
        .expect("call did not end")
        .unwrap();
    assert_eq!(reply, num(7));
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_dropping_its_requests_is_a_protocol_violation() {
    let harness = Harness::start(4, Duration::from_secs(1));
    let call = harness
        .client
        .client_streaming::<Num, Num>(&method("Ignore"), CallOptions::new())
        .await
        .unwrap();
    let status = timeout(Duration::from_secs(2), call.close_and_recv())
        .await
        .expect("call did not end")
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("before the request stream ended"));
    harness.shutdown().await;
}
