//! Gateway counters.
//!
//! Recorded through the `metrics` facade so any installed recorder (Prometheus,
//! statsd, test recorder) picks them up.

pub const RESTARTS_TOTAL: &str = "gateway_restarts_total";
pub const PROXY_REQUESTS_TOTAL: &str = "gateway_proxy_requests_total";
pub const ROUTE_REGISTRATIONS_TOTAL: &str = "gateway_route_registrations_total";

/// What caused a listener restart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartTrigger {
    SpecFile,
    Manual,
}

impl RestartTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartTrigger::SpecFile => "spec_file",
            RestartTrigger::Manual => "manual",
        }
    }
}

pub fn record_restart(trigger: RestartTrigger) {
    metrics::counter!(RESTARTS_TOTAL, "trigger" => trigger.as_str()).increment(1);
}

/// `target` is `backend` or `fallback`; `outcome` is `success` or an error type
pub fn record_proxy_request(target: &'static str, outcome: &'static str) {
    metrics::counter!(PROXY_REQUESTS_TOTAL, "target" => target, "outcome" => outcome).increment(1);
}

pub fn record_route_registrations(count: usize) {
    metrics::counter!(ROUTE_REGISTRATIONS_TOTAL).increment(count as u64);
}
