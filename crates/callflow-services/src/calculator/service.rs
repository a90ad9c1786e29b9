use super::CalculatorService;
use crate::proto::calculator::{
    ComputeAverageRequest, ComputeAverageResponse, FindMaximumRequest, FindMaximumResponse,
    PrimeNumberDecompositionRequest, PrimeNumberDecompositionResponse, SquareRootRequest,
    SquareRootResponse, SumRequest, SumResponse,
};
use callflow::{Error, Request, ResponseStream, Status, Streaming};
use futures::{StreamExt, stream};

/// The calculator. Stateless; every call is computed from its own input.
#[derive(Clone, Copy, Debug, Default)]
pub struct Calculator;

#[tonic::async_trait]
impl CalculatorService for Calculator {
    async fn sum(&self, request: Request<SumRequest>) -> Result<SumResponse, Status> {
        let SumRequest {
            first_number,
            second_number,
        } = request.into_inner();

        #[cfg(feature = "tracing")]
        tracing::debug!(first_number, second_number, "Sum");

        let sum_result = first_number.checked_add(second_number).ok_or_else(|| {
            Status::from(Error::InvalidArgument {
                reason: format!("{first_number} + {second_number} overflows a 32-bit sum"),
            })
        })?;
        Ok(SumResponse { sum_result })
    }

    async fn prime_number_decomposition(
        &self,
        request: Request<PrimeNumberDecompositionRequest>,
    ) -> Result<ResponseStream<PrimeNumberDecompositionResponse>, Status> {
        let number = request.get_ref().number;

        #[cfg(feature = "tracing")]
        tracing::debug!(number, "PrimeNumberDecomposition");

        let factors = PrimeFactors::new(number).ok_or_else(|| {
            Status::from(Error::InvalidArgument {
                reason: format!("Received a negative number: {number}"),
            })
        })?;
        let responses = stream::iter(factors).map(|prime_factor| {
            Ok::<_, Status>(PrimeNumberDecompositionResponse { prime_factor })
        });
        Ok(Box::pin(responses))
    }

    async fn compute_average(
        &self,
        request: Request<Streaming<ComputeAverageRequest>>,
    ) -> Result<ComputeAverageResponse, Status> {
        let mut numbers = request.into_inner();
        let mut running = RunningAverage::default();
        while let Some(ComputeAverageRequest { number }) = numbers.message().await? {
            running.push(number);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(sum = running.sum, count = running.count, "ComputeAverage");

        let average = running.average().ok_or_else(|| {
            Status::from(Error::InvalidArgument {
                reason: "No numbers to average".to_string(),
            })
        })?;
        Ok(ComputeAverageResponse { average })
    }

    async fn find_maximum(
        &self,
        request: Request<Streaming<FindMaximumRequest>>,
    ) -> Result<ResponseStream<FindMaximumResponse>, Status> {
        let numbers = request.into_inner().into_stream();
        let maxima = numbers
            .scan(None::<i32>, |maximum, next| {
                let item = match next {
                    Ok(FindMaximumRequest { number }) => {
                        if maximum.is_some_and(|max| number <= max) {
                            None
                        } else {
                            *maximum = Some(number);
                            Some(Ok(FindMaximumResponse {
                                maximum_number: number,
                            }))
                        }
                    }
                    Err(status) => Some(Err(status)),
                };
                futures::future::ready(Some(item))
            })
            .filter_map(futures::future::ready);
        Ok(Box::pin(maxima))
    }

    async fn square_root(
        &self,
        request: Request<SquareRootRequest>,
    ) -> Result<SquareRootResponse, Status> {
        let number = request.get_ref().number;
        if number < 0 {
            return Err(Error::InvalidArgument {
                reason: format!("Received a negative number: {number}"),
            }
            .into());
        }
        Ok(SquareRootResponse {
            number_root: f64::from(number).sqrt(),
        })
    }
}

/// Running sum and count of a stream of numbers.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunningAverage {
    pub(super) sum: i64,
    pub(super) count: u64,
}

impl RunningAverage {
    pub fn push(&mut self, number: i32) {
        self.sum = self.sum.saturating_add(i64::from(number));
        self.count += 1;
    }

    /// The mean of every number pushed so far, or `None` before the first.
    #[allow(clippy::cast_precision_loss)]
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }
}

/// Prime factors of a number in ascending order, with multiplicity, computed
/// one at a time by trial division.
#[derive(Clone, Copy, Debug)]
pub struct PrimeFactors {
    remaining: i64,
    divisor: i64,
}

impl PrimeFactors {
    /// Returns `None` for negative numbers. `0` and `1` have no factors.
    pub const fn new(number: i64) -> Option<Self> {
        if number < 0 {
            return None;
        }
        Some(Self {
            remaining: number,
            divisor: 2,
        })
    }
}

impl Iterator for PrimeFactors {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.remaining <= 1 {
            return None;
        }
        while self.divisor <= self.remaining / self.divisor {
            if self.remaining % self.divisor == 0 {
                self.remaining /= self.divisor;
                return Some(self.divisor);
            }
            self.divisor += 1;
        }
        // No divisor up to its square root: what remains is prime.
        let prime = self.remaining;
        self.remaining = 1;
        Some(prime)
    }
}
