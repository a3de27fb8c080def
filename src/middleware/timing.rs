use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Adds `X-Response-Time-Us` and `Server-Timing` headers to every
/// response and traces one line per API call.
pub async fn timing_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();
    let us = elapsed.as_micros();

    if let Ok(val) = us.to_string().parse() {
        response.headers_mut().insert("X-Response-Time-Us", val);
    }

    let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    // Long-lived streams would only log their upgrade.
    if path.starts_with("/api/") && !path.ends_with("/stream") {
        tracing::debug!(
            status = response.status().as_u16(),
            %method,
            %path,
            us = us as u64,
            "request"
        );
    }

    response
}
