//! Script execution engine: workers, scheduler and run reporting on top of
//! the [`pgbatch_db`] connection pool.

pub mod config;
pub mod error;
pub mod logging;
pub mod reporter;
pub mod scheduler;
pub mod signal;
pub mod sink;
pub mod worker;

pub use config::RunnerConfig;
pub use error::RunnerError;
pub use reporter::{ReportError, RunReporter};
pub use scheduler::{Scheduler, SchedulerState};
pub use signal::{watch_interrupts, Interrupt};
pub use sink::{LogRecord, LogSink, MemorySink, TracingSink};
