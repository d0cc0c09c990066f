use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use futures_util::stream::{unfold, Stream, StreamExt};
use keyrelay_common::{display_model, ErrorReason};
use tracing::info;

use crate::stats::StatsSink;

/// The internal-status token of the access-log line (§4.8).
#[derive(Debug, Clone, Copy)]
enum InternalStatus {
    Valid,
    Reason(ErrorReason),
}

impl InternalStatus {
    fn as_str(self) -> &'static str {
        match self {
            InternalStatus::Valid => "VALID",
            InternalStatus::Reason(reason) => reason.as_str(),
        }
    }

    fn from_wreq_error(err: &wreq::Error) -> Self {
        if err.is_timeout() {
            InternalStatus::Reason(ErrorReason::Timeout)
        } else {
            InternalStatus::Reason(ErrorReason::NetworkError)
        }
    }
}

/// The fixed fields of a `GATEWAY_ACCESS` line, known before the body starts
/// streaming.
pub struct AccessLogContext {
    pub ip: IpAddr,
    pub method: String,
    pub path: String,
    pub instance: String,
    pub model: String,
    pub upstream_status: u16,
    pub upstream_reason_phrase: String,
}

/// Emits exactly one access-log line and one stats record on drop, whether
/// the stream finished cleanly, errored mid-flight, or was dropped early by
/// a disconnecting client — any of which is "completion or exception" (§4.8).
struct StreamGuard {
    ctx: Option<AccessLogContext>,
    started: Instant,
    outcome: InternalStatus,
    stats: Arc<dyn StatsSink>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            emit_access_log(&ctx, self.outcome, self.started.elapsed());
            self.stats.record(&ctx.instance, display_model(&ctx.model), self.outcome.as_str());
        }
    }
}

/// Wraps an upstream byte stream so it is forwarded to the downstream caller
/// unchanged, while exactly one completion line is logged once the stream
/// (and, with it, the upstream connection) is dropped.
pub fn monitor_stream<S>(upstream: S, ctx: AccessLogContext, stats: Arc<dyn StatsSink>) -> Body
where
    S: Stream<Item = Result<Bytes, wreq::Error>> + Send + 'static,
{
    let guard = StreamGuard { ctx: Some(ctx), started: Instant::now(), outcome: InternalStatus::Valid, stats };
    let upstream = Box::pin(upstream);

    let stream = unfold((upstream, guard), |(mut upstream, mut guard)| async move {
        match upstream.next().await {
            Some(Ok(bytes)) => Some((Ok::<_, io::Error>(bytes), (upstream, guard))),
            Some(Err(err)) => {
                guard.outcome = InternalStatus::from_wreq_error(&err);
                Some((Err(io::Error::other(err.to_string())), (upstream, guard)))
            }
            None => None,
        }
    });
    Body::from_stream(stream)
}

fn emit_access_log(ctx: &AccessLogContext, outcome: InternalStatus, elapsed: Duration) {
    let model = display_model(&ctx.model);
    let line = format!(
        "GATEWAY_ACCESS | {} | {} {} | {}:{} | {} {} -> {} ({:.3}s)",
        ctx.ip,
        ctx.method,
        ctx.path,
        ctx.instance,
        model,
        ctx.upstream_status,
        ctx.upstream_reason_phrase,
        outcome.as_str(),
        elapsed.as_secs_f64()
    );
    info!(
        event = "gateway_access",
        ip = %ctx.ip,
        instance = %ctx.instance,
        model = %model,
        upstream_status = ctx.upstream_status,
        internal_status = outcome.as_str(),
        elapsed_ms = elapsed.as_millis() as u64,
        "{}",
        line
    );
}
