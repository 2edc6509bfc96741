//! Narrated scene assembly.

pub mod events;
pub mod orchestrator;
pub mod repo;
pub mod sink;
pub mod stage;
pub mod workdir;

pub use events::{AssemblyEvent, ProgressChannel};
pub use orchestrator::{build_audio_timeline, validate_request, AssemblyOrchestrator};
pub use repo::AssemblyJobStore;
pub use sink::{ManifestProjectSink, ProjectVideo, ProjectVideoSink};
pub use stage::StageFailure;
pub use workdir::{WorkDir, WorkDirArena};
