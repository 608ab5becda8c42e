//! Observability for the ARCA bridge.
//!
//! Metric labels are bounded:
//! - `status`: a handful of values per metric
//! - `outcome`: `success` or a [`crate::errors::BridgeError::error_type`] value
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `arca_ticket_refresh_total` | Counter | `status` | WSAA ticket requests by result |
//! | `arca_queries_total` | Counter | `outcome` | Processed requests by outcome |
//! | `arca_query_duration_seconds` | Histogram | `outcome` | End-to-end request processing time |
//! | `arca_reply_publish_total` | Counter | `status` | Reply publishes by result |

pub mod metrics;

pub use metrics::{
    init_metrics_recorder, record_query, record_reply_publish, record_ticket_refresh,
};
