//! Operation timing, emitted as structured `tracing` events

use std::time::Instant;

/// Target for timing events, so they can be filtered independently
pub const PERF_TARGET: &str = "tagtrace::perf";

/// What an instrumented call was working on
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PerfFields<'a> {
    pub category: Option<&'a str>,
    pub identifier: Option<&'a str>,
    pub tag_id: Option<i64>,
    pub rows: Option<usize>,
}

impl<'a> PerfFields<'a> {
    pub fn tag(category: &'a str, identifier: &'a str) -> Self {
        Self {
            category: Some(category),
            identifier: Some(identifier),
            ..Self::default()
        }
    }

    pub fn id(tag_id: i64) -> Self {
        Self {
            tag_id: Some(tag_id),
            ..Self::default()
        }
    }

    pub fn rows(rows: usize) -> Self {
        Self {
            rows: Some(rows),
            ..Self::default()
        }
    }
}

/// Run `op`, then log its duration and outcome. The result is returned untouched.
pub(crate) fn timed<T>(
    operation: &'static str,
    fields: PerfFields<'_>,
    op: impl FnOnce() -> crate::Result<T>,
) -> crate::Result<T> {
    let started = Instant::now();
    let result = op();
    let duration_us = started.elapsed().as_micros() as u64;

    match &result {
        Ok(_) => tracing::debug!(
            target: PERF_TARGET,
            operation,
            category = fields.category,
            identifier = fields.identifier,
            tag_id = fields.tag_id,
            rows = fields.rows,
            duration_us,
            success = true,
            "tag operation"
        ),
        Err(err) => tracing::debug!(
            target: PERF_TARGET,
            operation,
            category = fields.category,
            identifier = fields.identifier,
            tag_id = fields.tag_id,
            rows = fields.rows,
            duration_us,
            success = false,
            error = %err,
            "tag operation"
        ),
    }
    result
}
