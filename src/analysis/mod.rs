// Analysis - voice roles, phrases and metric positions
// Runs once per voice before any rule is applied

pub mod meter;
pub mod voice;

pub use meter::{Meter, MetricPosition, TimeSignature};
pub use voice::{AnalysisError, AnalyzerConfig, VoiceAnalyzer};
