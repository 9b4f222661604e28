//! Binary trace hook.
//!
//! The kernel reports scheduler and time-event activity as small binary
//! records through an optional [`TraceHook`]. Record identifiers follow the
//! QS numbering so existing host tools can decode them.

use std::io;

use thiserror::Error;

use crate::sync::Arc;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("backend error: {0}")]
    Backend(#[from] io::Error),
}

pub type TraceResult = Result<(), TraceError>;

/// `(record_type, payload, with_timestamp)`
pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> TraceResult + Send + Sync>;

/// Canonical record identifiers.
pub mod records {
    /// Active object and event pool records.
    pub mod qf {
        /// Event posted FIFO (`QS_QF_ACTIVE_POST`).
        pub const ACTIVE_POST: u8 = 20;
        /// Event posted LIFO (`QS_QF_ACTIVE_POST_LIFO`).
        pub const ACTIVE_POST_LIFO: u8 = 21;
        /// Event taken from a queue that still holds events (`QS_QF_ACTIVE_GET`).
        pub const ACTIVE_GET: u8 = 22;
        /// Last event taken from a queue (`QS_QF_ACTIVE_GET_LAST`).
        pub const ACTIVE_GET_LAST: u8 = 23;
        /// Posting refused by the margin check (`QS_QF_ACTIVE_POST_ATTEMPT`).
        pub const ACTIVE_POST_ATTEMPT: u8 = 24;
    }

    pub mod time_evt {
        /// Time event armed record (`QS_QF_TIMEEVT_ARM`).
        pub const ARM: u8 = 32;
        /// Time event automatically disarmed (`QS_QF_TIMEEVT_AUTO_DISARM`).
        pub const AUTO_DISARM: u8 = 33;
        /// Failed attempt to disarm (`QS_QF_TIMEEVT_DISARM_ATTEMPT`).
        pub const DISARM_ATTEMPT: u8 = 34;
        /// Time event disarmed (`QS_QF_TIMEEVT_DISARM`).
        pub const DISARM: u8 = 35;
        /// Time event rearmed (`QS_QF_TIMEEVT_REARM`).
        pub const REARM: u8 = 36;
        /// Time event posted (`QS_QF_TIMEEVT_POST`).
        pub const POST: u8 = 37;
    }

    /// Scheduler related record identifiers.
    pub mod sched {
        /// Scheduler next record (`QS_SCHED_NEXT`).
        pub const NEXT: u8 = 52;
        /// Scheduler idle record (`QS_SCHED_IDLE`).
        pub const IDLE: u8 = 53;
    }
}

/// Emits a record if a hook is installed. Trace failures never disturb the
/// kernel; they are logged and dropped.
pub(crate) fn emit(hook: Option<&TraceHook>, record: u8, payload: &[u8], timestamp: bool) {
    if let Some(hook) = hook {
        if let Err(err) = hook(record, payload, timestamp) {
            log::warn!("trace record {record} dropped: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active::ActiveContext;
    use crate::kernel::Kernel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sink that rejects long payloads and whose backend is gone.
    fn broken_sink(calls: Arc<AtomicUsize>) -> TraceHook {
        Arc::new(move |_record: u8, payload: &[u8], _timestamp: bool| -> TraceResult {
            calls.fetch_add(1, Ordering::SeqCst);
            if payload.len() > 4 {
                return Err(TraceError::PayloadTooLarge(payload.len()));
            }
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "trace sink closed").into())
        })
    }

    #[test]
    fn failing_hook_never_disturbs_emit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hook = broken_sink(Arc::clone(&calls));

        emit(Some(&hook), records::qf::ACTIVE_POST, &[1, 2, 3], true);
        emit(Some(&hook), records::sched::IDLE, &[0; 8], false);
        emit(None, records::sched::IDLE, &[0], false);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn application_records_report_backend_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let kernel = Kernel::builder()
            .with_trace_hook(broken_sink(Arc::clone(&calls)))
            .build()
            .unwrap();
        let ctx = ActiveContext::new(1, kernel.handle(), kernel.trace_hook());

        assert!(matches!(ctx.emit_trace(100, &[7]), Err(TraceError::Backend(_))));
        assert!(matches!(
            ctx.emit_trace_with_timestamp(100, &[0; 6], false),
            Err(TraceError::PayloadTooLarge(6))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
