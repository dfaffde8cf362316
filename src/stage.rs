//! Job stage machine.
//!
//! Stages: CREATED → UNPACKED → PATCHED → REPACKED → SIGNED → STORED → READY,
//! with FAILED absorbing from any non-terminal stage. Strictly sequential; no
//! stage is retried and nothing branches back.

use serde::{Deserialize, Serialize};

/// Pipeline stage for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStage {
    /// Job accepted; workspace allocated.
    Created,
    /// Source APK unpacked into the workspace.
    Unpacked,
    /// Configuration file replaced.
    Patched,
    /// Patched tree repacked into a fresh APK.
    Repacked,
    /// Repacked APK signed and relocated to the canonical path.
    Signed,
    /// Signed artifact persisted to the store.
    Stored,
    /// Terminal success; record returned to the caller.
    Ready,
    /// Terminal failure; classified error returned to the caller.
    Failed,
}

impl JobStage {
    /// True for the two absorbing stages.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Ready | JobStage::Failed)
    }

    /// Check whether moving to `target` is a legal transition.
    pub fn can_transition_to(&self, target: JobStage) -> bool {
        // Any non-terminal stage may fail.
        if target == JobStage::Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, target),
            (JobStage::Created, JobStage::Unpacked)
                | (JobStage::Unpacked, JobStage::Patched)
                | (JobStage::Patched, JobStage::Repacked)
                | (JobStage::Repacked, JobStage::Signed)
                | (JobStage::Signed, JobStage::Stored)
                | (JobStage::Stored, JobStage::Ready)
        )
    }
}

/// Invalid transition error.
#[derive(Debug, thiserror::Error)]
#[error("invalid stage transition from {from:?} to {to:?}")]
pub struct StageError {
    pub from: JobStage,
    pub to: JobStage,
}

/// Tracks one job's progress through the stage machine.
#[derive(Debug, Clone, Copy)]
pub struct JobProgress {
    stage: JobStage,
}

impl JobProgress {
    /// Start a new job at CREATED.
    pub fn new() -> Self {
        Self {
            stage: JobStage::Created,
        }
    }

    /// Current stage.
    pub fn stage(&self) -> JobStage {
        self.stage
    }

    /// Advance to the next stage, enforcing legality.
    pub fn advance(&mut self, to: JobStage) -> Result<(), StageError> {
        if !self.stage.can_transition_to(to) {
            return Err(StageError {
                from: self.stage,
                to,
            });
        }
        self.stage = to;
        Ok(())
    }
}

impl Default for JobProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_legal() {
        let mut progress = JobProgress::new();
        for stage in [
            JobStage::Unpacked,
            JobStage::Patched,
            JobStage::Repacked,
            JobStage::Signed,
            JobStage::Stored,
            JobStage::Ready,
        ] {
            assert!(progress.advance(stage).is_ok(), "advance to {:?}", stage);
        }
        assert!(progress.stage().is_terminal());
    }

    #[test]
    fn test_no_stage_skipping() {
        let mut progress = JobProgress::new();
        assert!(progress.advance(JobStage::Patched).is_err());
        assert!(progress.advance(JobStage::Ready).is_err());
        assert_eq!(progress.stage(), JobStage::Created);
    }

    #[test]
    fn test_failure_reachable_from_every_non_terminal_stage() {
        for stage in [
            JobStage::Created,
            JobStage::Unpacked,
            JobStage::Patched,
            JobStage::Repacked,
            JobStage::Signed,
            JobStage::Stored,
        ] {
            assert!(stage.can_transition_to(JobStage::Failed), "{:?}", stage);
        }
    }

    #[test]
    fn test_terminal_stages_are_absorbing() {
        assert!(!JobStage::Ready.can_transition_to(JobStage::Failed));
        assert!(!JobStage::Failed.can_transition_to(JobStage::Failed));
        assert!(!JobStage::Failed.can_transition_to(JobStage::Created));
        assert!(!JobStage::Ready.can_transition_to(JobStage::Stored));
    }

    #[test]
    fn test_no_branching_back() {
        assert!(!JobStage::Patched.can_transition_to(JobStage::Unpacked));
        assert!(!JobStage::Signed.can_transition_to(JobStage::Repacked));
    }

    #[test]
    fn test_stage_serializes_screaming_snake() {
        let json = serde_json::to_string(&JobStage::Repacked).unwrap();
        assert_eq!(json, "\"REPACKED\"");
    }
}
