//! Run phases: the orchestrator's state machine.
//!
//! `Pending → Extracting → Extracted → Importing → Imported → Archiving →
//! Archived`. `Failed` is reachable from any non-terminal phase and absorbs.

use std::fmt;

use tracing::{info, warn};

use crate::error::{DeployError, DeployResult};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RunPhase {
    Pending,
    Extracting,
    Extracted,
    Importing,
    Imported,
    Archiving,
    Archived,
    Failed { during: String, reason: String },
}

impl RunPhase {
    pub fn name(&self) -> &'static str {
        match self {
            RunPhase::Pending => "pending",
            RunPhase::Extracting => "extracting",
            RunPhase::Extracted => "extracted",
            RunPhase::Importing => "importing",
            RunPhase::Imported => "imported",
            RunPhase::Archiving => "archiving",
            RunPhase::Archived => "archived",
            RunPhase::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Archived | RunPhase::Failed { .. })
    }

    fn successor(&self) -> Option<RunPhase> {
        match self {
            RunPhase::Pending => Some(RunPhase::Extracting),
            RunPhase::Extracting => Some(RunPhase::Extracted),
            RunPhase::Extracted => Some(RunPhase::Importing),
            RunPhase::Importing => Some(RunPhase::Imported),
            RunPhase::Imported => Some(RunPhase::Archiving),
            RunPhase::Archiving => Some(RunPhase::Archived),
            RunPhase::Archived | RunPhase::Failed { .. } => None,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One pass of a deployment unit through the phases.
#[derive(Debug, Clone)]
pub struct DeploymentRun {
    pub run_id: String,
    pub phase: RunPhase,
    pub history: Vec<RunPhase>,
}

impl DeploymentRun {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self::resume(run_id, RunPhase::Pending)
    }

    /// Pick up a run at a phase reached by an earlier invocation.
    pub fn resume(run_id: impl Into<String>, phase: RunPhase) -> Self {
        Self {
            run_id: run_id.into(),
            history: vec![phase.clone()],
            phase,
        }
    }

    /// Move to the next phase. Anything but the direct successor is rejected.
    pub fn advance(&mut self, next: RunPhase) -> DeployResult<()> {
        if self.phase.successor().as_ref() != Some(&next) {
            return Err(DeployError::IllegalTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        info!(run = %self.run_id, from = %self.phase, to = %next, "phase transition");
        self.phase = next.clone();
        self.history.push(next);
        Ok(())
    }

    /// Mark the run failed. No-op once terminal.
    pub fn fail(&mut self, reason: impl fmt::Display) {
        if self.phase.is_terminal() {
            return;
        }
        let failed = RunPhase::Failed {
            during: self.phase.name().to_string(),
            reason: reason.to_string(),
        };
        warn!(run = %self.run_id, during = %self.phase, reason = %reason, "run failed");
        self.phase = failed.clone();
        self.history.push(failed);
    }

    pub fn phase_names(&self) -> Vec<&'static str> {
        self.history.iter().map(RunPhase::name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_sequence() {
        let mut run = DeploymentRun::new("p1");
        for next in [
            RunPhase::Extracting,
            RunPhase::Extracted,
            RunPhase::Importing,
            RunPhase::Imported,
            RunPhase::Archiving,
            RunPhase::Archived,
        ] {
            run.advance(next).unwrap();
        }
        assert!(run.phase.is_terminal());
        assert_eq!(
            run.phase_names(),
            vec!["pending", "extracting", "extracted", "importing", "imported", "archiving", "archived"]
        );
    }

    #[test]
    fn skipping_is_rejected() {
        let mut run = DeploymentRun::new("p1");
        let err = run.advance(RunPhase::Importing).unwrap_err();
        assert!(matches!(err, DeployError::IllegalTransition { .. }));
        assert_eq!(run.phase, RunPhase::Pending);
    }

    #[test]
    fn failed_absorbs() {
        let mut run = DeploymentRun::new("p1");
        run.advance(RunPhase::Extracting).unwrap();
        run.fail("extract of 9/WF failed");
        assert!(matches!(&run.phase, RunPhase::Failed { during, .. } if during == "extracting"));

        assert!(run.advance(RunPhase::Extracted).is_err());
        run.fail("again");
        assert_eq!(run.history.len(), 3);
    }

    #[test]
    fn resume_from_extracted() {
        let mut run = DeploymentRun::resume("p1", RunPhase::Extracted);
        run.advance(RunPhase::Importing).unwrap();
        run.advance(RunPhase::Imported).unwrap();
        assert_eq!(run.phase_names(), vec!["extracted", "importing", "imported"]);
    }
}
