use super::{PrimeFactors, RunningAverage};
use crate::{
    proto::calculator::{
        ComputeAverageRequest, FindMaximumRequest, PrimeNumberDecompositionRequest,
        SquareRootRequest, SumRequest, SumResponse,
    },
    runtime::InProcess,
    test_util::{collect, config},
};
use callflow::{CallOptions, Code};

#[test]
fn prime_factors_ascend_with_multiplicity() {
    let factors: Vec<i64> = PrimeFactors::new(2100).unwrap().collect();
    assert_eq!(factors, [2, 2, 3, 5, 5, 7]);

    let factors: Vec<i64> = PrimeFactors::new(97).unwrap().collect();
    assert_eq!(factors, [97]);

    let factors: Vec<i64> = PrimeFactors::new(2_147_483_647).unwrap().collect();
    assert_eq!(factors, [2_147_483_647]);

    let factors: Vec<i64> = PrimeFactors::new(1 << 20).unwrap().collect();
    assert_eq!(factors, [2; 20]);
}

#[test]
fn prime_factors_of_edge_inputs() {
    assert_eq!(PrimeFactors::new(0).unwrap().count(), 0);
    assert_eq!(PrimeFactors::new(1).unwrap().count(), 0);
    assert!(PrimeFactors::new(-12).is_none());
}

#[test]
fn running_average_counts_past_u32() {
    let mut running = RunningAverage::default();
    assert_eq!(running.average(), None);

    running.push(3);
    running.push(4);
    assert_eq!(running.average(), Some(3.5));

    let mut running = RunningAverage {
        sum: i64::from(u32::MAX) * 2,
        count: u64::from(u32::MAX),
    };
    running.push(2);
    assert_eq!(running.count, u64::from(u32::MAX) + 1);
    assert_eq!(running.average(), Some(2.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sum_adds_and_rejects_overflow() {
    let server = InProcess::start(&config());
    let calculator = server.calculator();

    let response = calculator
        .sum(
            SumRequest {
                first_number: 5,
                second_number: 40,
            },
            CallOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(response.sum_result, 45);

    let status = calculator
        .sum(
            SumRequest {
                first_number: i32::MAX,
                second_number: 1,
            },
            CallOptions::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prime_number_decomposition_streams_factors() {
    let server = InProcess::start(&config());
    let calculator = server.calculator();

    let factors = collect(
        calculator
            .prime_number_decomposition(
                PrimeNumberDecompositionRequest { number: 2100 },
                CallOptions::new(),
            )
            .await,
    )
    .await
    .unwrap();
    let factors: Vec<i64> = factors.iter().map(|f| f.prime_factor).collect();
    assert_eq!(factors, [2, 2, 3, 5, 5, 7]);

    for number in [0, 1] {
        let factors = collect(
            calculator
                .prime_number_decomposition(
                    PrimeNumberDecompositionRequest { number },
                    CallOptions::new(),
                )
                .await,
        )
        .await
        .unwrap();
        assert!(factors.is_empty(), "{number} has no prime factors");
    }

    let status = collect(
        calculator
            .prime_number_decomposition(
                PrimeNumberDecompositionRequest { number: -8 },
                CallOptions::new(),
            )
            .await,
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn compute_average_folds_the_request_stream() {
    let server = InProcess::start(&config());
    let calculator = server.calculator();

    let mut call = calculator.compute_average(CallOptions::new()).await.unwrap();
    for number in [3, 5, 9, 27, 35] {
        call.send(ComputeAverageRequest { number }).await.unwrap();
    }
    let response = call.close_and_recv().await.unwrap();
    assert!((response.average - 15.8).abs() < f64::EPSILON);

    let call = calculator.compute_average(CallOptions::new()).await.unwrap();
    let status = call.close_and_recv().await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn find_maximum_emits_each_new_maximum() {
    let server = InProcess::start(&config());
    let calculator = server.calculator();

    for (numbers, expected) in [
        (vec![4, 7, 11, 9, 2, 6, 33], vec![4, 7, 11, 33]),
        (vec![-5, -9, -2, -2], vec![-5, -2]),
        (vec![], vec![]),
    ] {
        let (mut requests, responses) = calculator.find_maximum(CallOptions::new()).await.unwrap();
        let sender = tokio::spawn(async move {
            for number in numbers {
                requests.send(FindMaximumRequest { number }).await.unwrap();
            }
            requests.close_send().await.unwrap();
        });

        let maxima = collect(Ok(responses)).await.unwrap();
        let maxima: Vec<i32> = maxima.iter().map(|m| m.maximum_number).collect();
        assert_eq!(maxima, expected);
        sender.await.unwrap();
    }

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn square_root_rejects_negative_input() {
    let server = InProcess::start(&config());
    let calculator = server.calculator();

    let response = calculator
        .square_root(SquareRootRequest { number: 10 }, CallOptions::new())
        .await
        .unwrap();
    assert!((response.number_root - 10_f64.sqrt()).abs() < f64::EPSILON);

    let status = calculator
        .square_root(SquareRootRequest { number: -2 }, CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "Received a negative number: -2");

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_method_is_unimplemented() {
    let server = InProcess::start(&config());

    let status = server
        .client()
        .unary::<SumRequest, SumResponse>(
            "/calculator.CalculatorService/Divide",
            SumRequest::default(),
            CallOptions::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);

    server.shutdown().await;
}
