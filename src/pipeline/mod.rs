// Pipeline observability
// Structured trace entries and the sinks that receive them

pub mod trace;

pub use trace::{
    read_trace_file, LogSink, MemorySink, NullSink, Stage, TraceBuilder, TraceEntry, TraceError,
    TraceLevel, TraceSink, TraceWriter,
};
