// Agogic - expressive interpretation of mechanically timed MIDI performances
// Module declarations

pub mod analysis;
pub mod conductor;
pub mod config;
pub mod curves;
pub mod interpreter;
pub mod midi;
pub mod model;
pub mod pipeline;
pub mod rules;

pub use config::{load_config, save_config, ConfigError, InterpreterConfig};
pub use curves::{CurveConfig, ExpressionCompiler, ExpressionCurve};
pub use interpreter::{run, InterpretError, Interpretation, InterpretationStats, Interpreter, InterpreterState};
pub use midi::{read_note_events, write_performance, MidiError, MidiReadResult};
pub use model::{Note, RawNoteEvent, Voice, VoiceKey, VoiceRole};
pub use pipeline::{LogSink, MemorySink, NullSink, TraceSink};
