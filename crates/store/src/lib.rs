//! podcast-cmo filesystem adapters.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Implements the [`pipeline::TranscriptSource`] and
//! [`pipeline::PublishingSink`] ports over a local data directory, and
//! persists what must outlive a process: the usage journal that keeps budget
//! ceilings honest across restarts, and the archive of run reports.
//!
//! | Module | Contents |
//! |--------|----------|
//! | `layout` | [`DataDir`]: the directory tree |
//! | `transcripts` | [`FsTranscriptSource`] |
//! | `journal` | [`JournalSink`]: simulated publishing |
//! | `usage` | [`UsageJournal`] |
//! | `archive` | [`RunArchive`] |

mod archive;
mod error;
mod journal;
mod layout;
mod transcripts;
mod usage;

pub use archive::RunArchive;
pub use error::StoreError;
pub use journal::{JournalEntry, JournalSink};
pub use layout::DataDir;
pub use transcripts::FsTranscriptSource;
pub use usage::{UsageJournal, RETENTION_DAYS};
