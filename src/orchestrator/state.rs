//! Pipeline State Management and Stage Tracking
//!
//! - `PipelineStage`: discrete stages of one kernel build run
//! - `PipelineState`: current stage, visited stages, timing and failure reason
//!
//! The graph is acyclic: every run ends in `Completed` or `Failed`, and a
//! failed run is never resumed.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Stage enumeration, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    /// Device resolved, nothing fetched yet
    Start,

    /// Kernel source and toolchains being cloned
    Acquire,

    /// Optional root or container integration
    Patch,

    /// Build environment assembly
    Configure,

    /// `make defconfig` and full build
    Build,

    /// Flashable archive assembly
    Package,

    /// Archive upload
    Deliver,

    Completed,

    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Start => "start",
            PipelineStage::Acquire => "acquire",
            PipelineStage::Patch => "patch",
            PipelineStage::Configure => "configure",
            PipelineStage::Build => "build",
            PipelineStage::Package => "package",
            PipelineStage::Deliver => "deliver",
            PipelineStage::Completed => "completed",
            PipelineStage::Failed => "failed",
        }
    }

    /// Get all valid stage transitions FROM this stage.
    pub fn valid_next_stages(&self) -> &'static [PipelineStage] {
        use PipelineStage::*;
        match self {
            Start => &[Acquire, Failed],
            Acquire => &[Patch, Configure, Failed],
            Patch => &[Configure, Failed],
            Configure => &[Build, Failed],
            Build => &[Package, Failed],
            Package => &[Deliver, Failed],
            Deliver => &[Completed, Failed],
            Completed | Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: PipelineStage) -> bool {
        self.valid_next_stages().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Completed | PipelineStage::Failed)
    }
}

/// Progress of a single run.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub stage: PipelineStage,

    /// Every stage entered, in order, starting with `Start`
    pub history: Vec<PipelineStage>,

    pub started_at: Instant,

    /// Failure reason once the run has failed
    pub error: Option<String>,
}

impl PipelineState {
    pub fn new() -> Self {
        PipelineState {
            stage: PipelineStage::Start,
            history: vec![PipelineStage::Start],
            started_at: Instant::now(),
            error: None,
        }
    }

    /// Attempt to transition to the next stage.
    pub fn transition_to(&mut self, next: PipelineStage) -> Result<(), String> {
        if !self.stage.can_transition_to(next) {
            return Err(format!(
                "Invalid stage transition: {} -> {}",
                self.stage.as_str(),
                next.as_str()
            ));
        }
        self.stage = next;
        self.history.push(next);
        Ok(())
    }

    /// Record an error and mark the run as failed.
    pub fn record_error(&mut self, error: String) {
        self.error = Some(error);
        if !self.stage.is_terminal() {
            self.stage = PipelineStage::Failed;
            self.history.push(PipelineStage::Failed);
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut state = PipelineState::new();
        for stage in [
            PipelineStage::Acquire,
            PipelineStage::Patch,
            PipelineStage::Configure,
            PipelineStage::Build,
            PipelineStage::Package,
            PipelineStage::Deliver,
            PipelineStage::Completed,
        ] {
            state.transition_to(stage).unwrap();
        }
        assert_eq!(state.stage, PipelineStage::Completed);
        assert_eq!(state.history.len(), 8);
    }

    #[test]
    fn test_patch_is_optional() {
        assert!(PipelineStage::Acquire.can_transition_to(PipelineStage::Configure));
    }

    #[test]
    fn test_no_package_without_build() {
        let mut state = PipelineState::new();
        state.transition_to(PipelineStage::Acquire).unwrap();
        assert!(state.transition_to(PipelineStage::Package).is_err());
    }

    #[test]
    fn test_terminal_stages_have_no_exits() {
        assert!(PipelineStage::Completed.valid_next_stages().is_empty());
        assert!(PipelineStage::Failed.valid_next_stages().is_empty());
    }

    #[test]
    fn test_record_error_fails_once() {
        let mut state = PipelineState::new();
        state.transition_to(PipelineStage::Acquire).unwrap();
        state.record_error("clone failed".to_string());
        state.record_error("again".to_string());
        assert_eq!(state.stage, PipelineStage::Failed);
        assert_eq!(
            state.history,
            vec![PipelineStage::Start, PipelineStage::Acquire, PipelineStage::Failed]
        );
        assert_eq!(state.error.as_deref(), Some("again"));
    }
}
