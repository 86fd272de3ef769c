pub mod query;
pub mod resolver;
pub mod ytdlp;

pub use query::{Query, classify};
pub use resolver::{ResolvedSource, SourceResolver};
pub use ytdlp::{ProbeOutput, ProbeRunner, ProcessRunner};
