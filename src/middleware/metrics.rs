//! Request metrics as a Tower layer
//!
//! Applied with `Router::route_layer`, so the matched route template is
//! available and the `path` label stays bounded (`/api/v1/users/{id}/admin`,
//! never the concrete id).

use crate::telemetry::metrics::{
    HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS,
};
use axum::{body::Body, extract::MatchedPath, http::Request, response::Response};
use metrics::{counter, gauge, histogram};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};
use tower::{Layer, Service};

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpMetricsLayer;

impl<S> Layer<S> for HttpMetricsLayer {
    type Service = HttpMetrics<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpMetrics { inner }
    }
}

#[derive(Debug, Clone)]
pub struct HttpMetrics<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for HttpMetrics<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let method = request.method().to_string();
        let path = request
            .extensions()
            .get::<MatchedPath>()
            .map(|matched| matched.as_str().to_string())
            .unwrap_or_else(|| "unmatched".to_string());

        // Keep the service that was polled ready; leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let in_flight = gauge!(HTTP_REQUESTS_IN_FLIGHT);
            in_flight.increment(1.0);
            let started = Instant::now();

            let result = inner.call(request).await;
            in_flight.decrement(1.0);

            if let Ok(response) = &result {
                let status = response.status().as_u16().to_string();
                counter!(
                    HTTP_REQUESTS_TOTAL,
                    "method" => method.clone(),
                    "path" => path.clone(),
                    "status" => status
                )
                .increment(1);
                histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path)
                    .record(started.elapsed().as_secs_f64());
            }

            result
        })
    }
}
