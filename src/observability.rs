//! Centralized observability infrastructure.
//!
//! Structured logging, lightweight metrics counters, and trace-id
//! propagation for every operation that crosses the HTTP boundary or
//! mutates an index.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

// Global atomic counters for metrics
static OPERATION_COUNTER: AtomicU64 = AtomicU64::new(0);
static ERROR_COUNTER: AtomicU64 = AtomicU64::new(0);
static QUERY_COUNTER: AtomicU64 = AtomicU64::new(0);
static INDEX_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize the logging and tracing infrastructure.
/// This should be called once at application startup.
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity.
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    let filter_level = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("corpusdb=debug,info")
    } else {
        // Default: warnings and errors for corpusdb, only errors for
        // dependencies. RUST_LOG overrides when set.
        EnvFilter::new("corpusdb=warn,error")
    };

    // Quiet flag takes precedence over the environment variable.
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_thread_ids(!quiet)
        .with_ansi(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if !quiet {
                info!("CorpusDB observability initialized");
            }
            Ok(())
        }
        Err(_) => {
            // Already initialized, which is fine in test environments
            Ok(())
        }
    }
}

/// Operations the service logs in a structured form.
#[derive(Debug, Clone)]
pub enum Operation {
    // Index operations
    IndexInsert {
        index_type: String,
        chunk_id: Uuid,
    },
    IndexRemove {
        index_type: String,
        chunk_id: Uuid,
    },
    IndexSearch {
        index_type: String,
        k: usize,
        result_count: usize,
    },
    IndexRebuild {
        index_type: String,
        vector_count: usize,
    },

    // Store operations
    ChunkWrite {
        chunk_id: Uuid,
        text_len: usize,
    },
    ChunkDelete {
        chunk_id: Uuid,
    },
    CascadeDelete {
        chunks: usize,
        documents: usize,
    },

    // System operations
    Startup {
        version: String,
    },
    Shutdown {
        reason: String,
    },
}

impl Operation {
    /// Validate the operation parameters.
    pub fn validate(&self) -> Result<()> {
        match self {
            Operation::ChunkWrite { text_len, .. } => {
                if *text_len == 0 {
                    anyhow::bail!("Chunk write with empty text");
                }
            }
            Operation::IndexSearch { k, .. } => {
                if *k == 0 {
                    anyhow::bail!("Index search with k = 0");
                }
            }
            _ => {
                // Other operations don't need validation
            }
        }
        Ok(())
    }
}

/// Metric types for performance monitoring.
#[derive(Debug, Clone)]
pub enum MetricType {
    Counter {
        name: &'static str,
        value: u64,
    },
    Gauge {
        name: &'static str,
        value: f64,
    },
    Timer {
        name: &'static str,
        duration: Duration,
    },
}

/// Operation context for tracing through the system.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    pub operation: String,
    pub start_time: Instant,
    pub attributes: Vec<(String, String)>,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            operation: operation.into(),
            start_time: Instant::now(),
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((key.into(), value.into()));
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Log an operation with full context.
#[instrument(skip(ctx))]
pub fn log_operation(ctx: &OperationContext, op: &Operation, result: &Result<()>) {
    let elapsed = ctx.elapsed();
    let attrs = ctx
        .attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");

    match result {
        Ok(()) => {
            info!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                operation = %ctx.operation,
                elapsed_ms = elapsed.as_millis(),
                attributes = %attrs,
                "Operation completed: {:?}", op
            );
            OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            error!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                operation = %ctx.operation,
                elapsed_ms = elapsed.as_millis(),
                attributes = %attrs,
                error = %e,
                "Operation failed: {:?}", op
            );
            ERROR_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
    }

    match op {
        Operation::IndexSearch { .. } => {
            QUERY_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        Operation::IndexInsert { .. }
        | Operation::IndexRemove { .. }
        | Operation::IndexRebuild { .. } => {
            INDEX_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        _ => {}
    }
}

/// Record a metric.
pub fn record_metric(metric: MetricType) {
    match metric {
        MetricType::Counter { name, value } => {
            debug!("metric.counter {} = {}", name, value);
        }
        MetricType::Gauge { name, value } => {
            debug!("metric.gauge {} = {}", name, value);
        }
        MetricType::Timer { name, duration } => {
            debug!("metric.timer {} = {}ms", name, duration.as_millis());
        }
    }
}

/// Snapshot of the global counters, exposed for tests and the stats
/// endpoint.
pub fn counter_snapshot() -> (u64, u64, u64, u64) {
    (
        OPERATION_COUNTER.load(Ordering::Relaxed),
        ERROR_COUNTER.load(Ordering::Relaxed),
        QUERY_COUNTER.load(Ordering::Relaxed),
        INDEX_COUNTER.load(Ordering::Relaxed),
    )
}

/// Run a fallible async operation under a fresh trace id, logging start,
/// completion, and duration. Works with any error type that can be
/// displayed, so typed service errors flow through unchanged.
pub async fn with_trace_id<F, T, E>(operation: &str, f: F) -> std::result::Result<T, E>
where
    F: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let ctx = OperationContext::new(operation);
    let trace_id = ctx.trace_id;
    let span_id = ctx.span_id;

    info!(
        trace_id = %trace_id,
        span_id = %span_id,
        "Starting operation: {}", operation
    );

    let start = Instant::now();
    let result = f.await;
    let elapsed = start.elapsed();

    match &result {
        Ok(_) => {
            info!(
                trace_id = %trace_id,
                span_id = %span_id,
                elapsed_ms = elapsed.as_millis(),
                "Operation completed successfully: {}", operation
            );
            record_metric(MetricType::Timer {
                name: "operation.duration",
                duration: elapsed,
            });
            OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            error!(
                trace_id = %trace_id,
                span_id = %span_id,
                elapsed_ms = elapsed.as_millis(),
                error = %e,
                "Operation failed: {}", operation
            );
            ERROR_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
    }

    result
}

/// Scoped timer that records its duration as a metric on drop.
pub struct PerfTimer {
    name: &'static str,
    start: Instant,
}

impl PerfTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        record_metric(MetricType::Timer {
            name: self.name,
            duration: self.start.elapsed(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_validation() {
        let ok = Operation::IndexSearch {
            index_type: "linear".to_string(),
            k: 5,
            result_count: 0,
        };
        assert!(ok.validate().is_ok());

        let bad = Operation::IndexSearch {
            index_type: "linear".to_string(),
            k: 0,
            result_count: 0,
        };
        assert!(bad.validate().is_err());

        let empty_write = Operation::ChunkWrite {
            chunk_id: Uuid::new_v4(),
            text_len: 0,
        };
        assert!(empty_write.validate().is_err());
    }

    #[tokio::test]
    async fn test_with_trace_id() {
        let (operations_before, _, _, _) = counter_snapshot();
        let result = with_trace_id("test_async_op", async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, anyhow::Error>(42)
        })
        .await;

        assert_eq!(result.expect("Test operation should succeed"), 42);
        let (operations_after, _, _, _) = counter_snapshot();
        assert!(operations_after > operations_before);
    }

    #[tokio::test]
    async fn test_with_trace_id_propagates_typed_errors() {
        let result: Result<(), crate::errors::CorpusDbError> =
            with_trace_id("test_failing_op", async {
                Err(crate::errors::CorpusDbError::validation("nope"))
            })
            .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_perf_timer() {
        {
            let _timer = PerfTimer::new("test_timer");
            std::thread::sleep(Duration::from_millis(5));
            // Timer will log on drop
        }
    }
}
