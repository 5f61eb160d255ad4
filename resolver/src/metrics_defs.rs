//! Metrics definitions for the resolver.

use shared::metrics_defs::{MetricDef, MetricType};

pub const STAGE_CACHE_HIT: MetricDef = MetricDef {
    name: "stage_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of stage lookups served from cache, tagged by stage",
};

pub const STAGE_CACHE_MISS: MetricDef = MetricDef {
    name: "stage_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of stage lookups that required an upstream fetch, tagged by stage",
};

pub const NEGATIVE_CACHE_HIT: MetricDef = MetricDef {
    name: "negative_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of handle lookups that hit the negative cache",
};

pub const NEGATIVE_CACHE_MISS: MetricDef = MetricDef {
    name: "negative_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of handle lookups that missed the negative cache",
};

pub const UPSTREAM_REQUESTS: MetricDef = MetricDef {
    name: "upstream.requests",
    metric_type: MetricType::Counter,
    description: "Outbound requests, tagged by upstream and outcome",
};

pub const UPSTREAM_RATE_LIMITED: MetricDef = MetricDef {
    name: "upstream.rate_limited",
    metric_type: MetricType::Counter,
    description: "Number of 429 responses that started a cooldown, tagged by upstream",
};

pub const UPSTREAM_PACING_WAIT: MetricDef = MetricDef {
    name: "upstream.pacing_wait",
    metric_type: MetricType::Histogram,
    description: "Seconds an outbound call waited for its pacing slot",
};

pub const PIPELINE_DURATION: MetricDef = MetricDef {
    name: "pipeline.duration",
    metric_type: MetricType::Histogram,
    description: "Time to resolve one request in seconds",
};

pub const PIPELINE_CONTAINER_FAILURES: MetricDef = MetricDef {
    name: "pipeline.container_failures",
    metric_type: MetricType::Counter,
    description: "Containers dropped from a result because their items could not be fetched",
};

pub const ALL_METRICS: &[MetricDef] = &[
    STAGE_CACHE_HIT,
    STAGE_CACHE_MISS,
    NEGATIVE_CACHE_HIT,
    NEGATIVE_CACHE_MISS,
    UPSTREAM_REQUESTS,
    UPSTREAM_RATE_LIMITED,
    UPSTREAM_PACING_WAIT,
    PIPELINE_DURATION,
    PIPELINE_CONTAINER_FAILURES,
];
