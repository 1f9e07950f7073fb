pub mod config;
pub mod generator;
pub mod logging;
pub mod params;
pub mod reconcile;
pub mod repo;
pub mod report;
pub mod synth;
pub mod template;

pub use config::{ConfigError, ConfigLoader, ConfigValidator, LoadedConfig};
pub use generator::{combine, GeneratorError, GeneratorSpec, MatrixOutput, MatrixSpec};
pub use logging::{init_logging, LogFormat};
pub use params::{MergeConflict, ParameterSet};
pub use reconcile::{
    ApplyEngine, ManifestDirApplyEngine, MemoryApplyEngine, PassReport, ReconcileError,
    ReconcileOptions, ReconcileState, Reconciler, SyncScheduler,
};
pub use repo::{
    FsSnapshotProvider, GitSnapshotProvider, MemorySnapshot, RepoSnapshot, SnapshotProvider,
};
pub use report::{ErrorKind, ErrorScope, ScopedError};
pub use synth::{synthesize, DeployableDescriptor, DescriptorTemplate, SyncPolicy, SynthesisError};
pub use template::TemplateError;
