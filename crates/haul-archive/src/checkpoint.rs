use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Resumable extraction state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// First member index that still has to be extracted.
    pub entry_index: i64,
    /// Overall byte fraction completed, in `[0, 1]`.
    pub progress: f64,
}

/// What the extractor should do after a checkpoint was saved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AfterSave {
    Continue,
    StopAfterSave,
}

/// Receives checkpoints while an extraction runs.
pub trait SaveConsumer {
    /// Called after each completed file with the bytes written for it.
    fn should_save(&mut self, bytes: u64) -> bool;

    fn save(&mut self, checkpoint: &Checkpoint) -> Result<AfterSave>;
}

/// Never saves.
#[derive(Clone, Copy, Debug, Default)]
pub struct NopSaveConsumer;

impl SaveConsumer for NopSaveConsumer {
    fn should_save(&mut self, _bytes: u64) -> bool {
        false
    }

    fn save(&mut self, _checkpoint: &Checkpoint) -> Result<AfterSave> {
        Ok(AfterSave::Continue)
    }
}

/// Granularity at which an extractor can pick up where it left off.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResumeSupport {
    #[default]
    None,
    /// Between members.
    Entry,
    /// Mid-member.
    Block,
}

impl fmt::Display for ResumeSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Entry => "entry",
            Self::Block => "block",
        })
    }
}

/// Capabilities an extractor reports.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Features {
    pub name: String,
    pub resume_support: ResumeSupport,
    pub preallocate: bool,
    pub random_access: bool,
}

impl Features {
    pub fn resumable(&self) -> bool {
        self.resume_support != ResumeSupport::None
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: resume={}", self.name, self.resume_support)?;
        if self.preallocate {
            f.write_str(" +preallocate")?;
        }
        if self.random_access {
            f.write_str(" +randomaccess")?;
        }
        Ok(())
    }
}
