pub mod settings;
pub mod sources;

pub use settings::{LogFormat, Settings};
pub use sources::{load_sources_from, SourceConfig, SourceKind, SourcesFile};
