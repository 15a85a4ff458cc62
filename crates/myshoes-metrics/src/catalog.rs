//! Names, help text and types of every series the controller exports.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Counter,
    Gauge,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Counter => "counter",
            Kind::Gauge => "gauge",
        }
    }
}

/// Static description of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: Kind,
}

const fn counter(name: &'static str, help: &'static str) -> Descriptor {
    Descriptor {
        name,
        help,
        kind: Kind::Counter,
    }
}

const fn gauge(name: &'static str, help: &'static str) -> Descriptor {
    Descriptor {
        name,
        help,
        kind: Kind::Gauge,
    }
}

// ── Ingest ────────────────────────────────────────────────────────

pub const WEBHOOK_RECEIVED: Descriptor =
    counter("myshoes_webhook_received_total", "Webhook deliveries received.");
pub const WEBHOOK_REJECTED: Descriptor = counter(
    "myshoes_webhook_rejected_total",
    "Webhook deliveries acknowledged without enqueueing a job.",
);
pub const JOBS_ENQUEUED: Descriptor =
    counter("myshoes_jobs_enqueued_total", "Jobs written to the queue.");

// ── Starter ───────────────────────────────────────────────────────

pub const STARTER_RUNNING: Descriptor =
    gauge("myshoes_starter_running", "Workers currently provisioning.");
pub const STARTER_WAITING: Descriptor = gauge(
    "myshoes_starter_waiting",
    "Workers waiting for a provisioning slot.",
);
pub const RETRY: Descriptor = counter("myshoes_retry_total", "Provisioning retries per job.");
pub const ADD_INSTANCE: Descriptor =
    counter("myshoes_add_instance_total", "AddInstance calls by result.");

// ── Reaper ────────────────────────────────────────────────────────

pub const DELETE_INSTANCE: Descriptor =
    counter("myshoes_delete_instance_total", "DeleteInstance calls by result.");
pub const REAPER_DELETED: Descriptor =
    counter("myshoes_reaper_deleted_total", "Runners tombstoned by reason.");

// ── Hosting service ───────────────────────────────────────────────

pub const GITHUB_REQUESTS: Descriptor = counter(
    "myshoes_github_requests_total",
    "Hosting service API requests by endpoint and status.",
);
pub const GITHUB_DURATION_SUM: Descriptor = counter(
    "myshoes_github_request_duration_seconds_sum",
    "Total seconds spent in hosting service API requests.",
);
pub const GITHUB_DURATION_COUNT: Descriptor = counter(
    "myshoes_github_request_duration_seconds_count",
    "Number of timed hosting service API requests.",
);
pub const GITHUB_INFLIGHT: Descriptor = gauge(
    "myshoes_github_inflight",
    "Hosting service API requests in flight.",
);
pub const GITHUB_CACHE: Descriptor =
    counter("myshoes_github_cache_total", "Hosting client cache lookups.");
pub const GITHUB_ERRORS: Descriptor =
    counter("myshoes_github_errors_total", "Hosting service errors by class.");
pub const GITHUB_RATELIMIT_REMAINING: Descriptor = gauge(
    "myshoes_github_ratelimit_remaining",
    "Requests left in the current rate limit window.",
);
pub const GITHUB_RATELIMIT_LIMIT: Descriptor = gauge(
    "myshoes_github_ratelimit_limit",
    "Size of the current rate limit window.",
);
pub const TOKEN_REFRESH: Descriptor = counter(
    "myshoes_token_refresh_total",
    "Installation token refreshes by result.",
);
