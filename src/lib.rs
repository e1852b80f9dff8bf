// Tempo Consensus Core - streaming multi-algorithm BPM detection
// Four independent tempo estimators fused by a history-aware consensus engine

// Module declarations
pub mod analysis;
pub mod audio;
pub mod config;
pub mod consensus;
pub mod coordinator;
pub mod error;

// Re-exports for convenience
pub use analysis::{AlgorithmKind, AudioWindow, BpmReading, DetectionContext, TempoAlgorithm};
pub use audio::{AudioSource, SourceEvent};
pub use config::AppConfig;
pub use consensus::{ConsensusEngine, ConsensusResult, FusionMethod};
pub use coordinator::{DetectionState, DetectorCoordinator, StateEvent};
pub use error::{AudioError, ConfigError, ErrorCode};
