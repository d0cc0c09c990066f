/// Sink for the per-`(provider, model, status)` completion counters of
/// §4.15. The JSON-Lines flush itself lives at the binary boundary; this
/// crate only needs somewhere to record a completed stream-monitor event.
pub trait StatsSink: Send + Sync {
    fn record(&self, provider: &str, model: &str, status: &str);
}

pub struct NoopStatsSink;

impl StatsSink for NoopStatsSink {
    fn record(&self, _provider: &str, _model: &str, _status: &str) {}
}
