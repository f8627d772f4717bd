//! Agent search plan tracking.
//!
//! In pro search the server first announces a plan (a list of step titles),
//! then reports queries and read results per step, interleaved with (and
//! usually ahead of) the answer text. Statuses only ever move forward:
//! `Default -> Current -> Done`.

use tracing::{debug, warn};

use perplexity_oss_core::types::{
    AgentResponse, AgentSearchStep, AgentSearchStepStatus, SearchResult,
};

use crate::StreamError;

/// Where the plan is relative to the answer text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlanPhase {
    /// No plan announced this turn.
    #[default]
    NoPlan,
    /// Steps are being worked through.
    Planning,
    /// Answer text has started; every step is `Done` and the plan is frozen.
    Answering,
}

/// Working copy of `steps_details` for one turn.
#[derive(Debug, Clone, Default)]
pub struct AgentPlanTracker {
    steps: Vec<AgentSearchStep>,
    phase: PlanPhase,
}

impl AgentPlanTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> PlanPhase {
        self.phase
    }

    pub fn is_announced(&self) -> bool {
        self.phase != PlanPhase::NoPlan
    }

    pub fn steps(&self) -> &[AgentSearchStep] {
        &self.steps
    }

    /// Replace the plan with fresh steps and make the first one current.
    pub fn announce(&mut self, titles: Vec<String>) {
        if self.is_announced() {
            warn!(previous = self.steps.len(), "Agent plan announced twice, replacing");
        }
        self.steps = titles
            .into_iter()
            .enumerate()
            .map(|(i, title)| AgentSearchStep::new(title, i))
            .collect();
        if let Some(first) = self.steps.first_mut() {
            first.status = AgentSearchStepStatus::Current;
        }
        self.phase = PlanPhase::Planning;
        debug!(steps = self.steps.len(), "Agent plan announced");
    }

    /// Attach search queries to a step, making it current and closing the one before it.
    pub fn record_queries(
        &mut self,
        step_number: usize,
        queries: Vec<String>,
    ) -> Result<(), StreamError> {
        self.check_step(step_number)?;
        let step = &mut self.steps[step_number];
        step.queries = queries;
        promote(step, AgentSearchStepStatus::Current);
        if step_number > 0 {
            promote(&mut self.steps[step_number - 1], AgentSearchStepStatus::Done);
        }
        Ok(())
    }

    /// Attach read results to a step. Status is unchanged.
    pub fn record_results(
        &mut self,
        step_number: usize,
        results: Vec<SearchResult>,
    ) -> Result<(), StreamError> {
        self.check_step(step_number)?;
        self.steps[step_number].results = results;
        Ok(())
    }

    /// Answer generation has begun: mark every step done and freeze the plan.
    ///
    /// A no-op without a plan or when already answering.
    pub fn begin_answer(&mut self) {
        if self.phase != PlanPhase::Planning {
            return;
        }
        for step in &mut self.steps {
            promote(step, AgentSearchStepStatus::Done);
        }
        self.phase = PlanPhase::Answering;
        debug!("Answer started, agent plan collapsed");
    }

    /// Fresh snapshot for publishing, `None` until a plan is announced.
    pub fn snapshot(&self) -> Option<AgentResponse> {
        self.is_announced()
            .then(|| AgentResponse::from_steps(self.steps.clone()))
    }

    fn check_step(&self, step_number: usize) -> Result<(), StreamError> {
        if step_number < self.steps.len() {
            Ok(())
        } else {
            Err(StreamError::StepOutOfRange {
                step_number,
                plan_len: self.steps.len(),
            })
        }
    }
}

fn promote(step: &mut AgentSearchStep, to: AgentSearchStepStatus) {
    if to > step.status {
        step.status = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AgentSearchStepStatus as Status;

    fn statuses(tracker: &AgentPlanTracker) -> Vec<AgentSearchStepStatus> {
        tracker.steps().iter().map(|s| s.status).collect()
    }

    fn plan(titles: &[&str]) -> AgentPlanTracker {
        let mut tracker = AgentPlanTracker::new();
        tracker.announce(titles.iter().map(|t| t.to_string()).collect());
        tracker
    }

    #[test]
    fn test_announce_marks_first_current() {
        let tracker = plan(&["A", "B", "C"]);
        assert_eq!(tracker.steps().len(), 3);
        assert_eq!(statuses(&tracker), vec![Status::Current, Status::Default, Status::Default]);
        assert_eq!(tracker.phase(), PlanPhase::Planning);
        let numbers: Vec<usize> = tracker.steps().iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_plan_has_no_current_step() {
        let tracker = plan(&[]);
        assert!(tracker.is_announced());
        let snapshot = tracker.snapshot().unwrap();
        assert!(snapshot.steps_details.is_empty());
        assert!(snapshot.current_step().is_none());
    }

    #[test]
    fn test_queries_advance_current_step() {
        let mut tracker = plan(&["A", "B", "C"]);
        tracker.record_queries(1, vec!["q1".into()]).unwrap();
        assert_eq!(statuses(&tracker), vec![Status::Done, Status::Current, Status::Default]);
        assert_eq!(tracker.steps()[1].queries, vec!["q1"]);
    }

    #[test]
    fn test_results_do_not_change_status() {
        let mut tracker = plan(&["A", "B"]);
        let results = vec![SearchResult {
            title: "t".into(),
            url: "https://x.com".into(),
            content: "c".into(),
        }];
        tracker.record_results(1, results.clone()).unwrap();
        assert_eq!(statuses(&tracker), vec![Status::Current, Status::Default]);
        assert_eq!(tracker.steps()[1].results, results);
    }

    #[test]
    fn test_begin_answer_completes_every_step() {
        let mut tracker = plan(&["A", "B", "C"]);
        tracker.begin_answer();
        assert_eq!(statuses(&tracker), vec![Status::Done, Status::Done, Status::Done]);
        assert_eq!(tracker.phase(), PlanPhase::Answering);
    }

    #[test]
    fn test_status_never_moves_backward() {
        let mut tracker = plan(&["A", "B"]);
        tracker.begin_answer();
        tracker.record_queries(1, vec!["late".into()]).unwrap();
        assert_eq!(statuses(&tracker), vec![Status::Done, Status::Done]);
        assert_eq!(tracker.steps()[1].queries, vec!["late"]);

        let mut tracker = plan(&["A", "B", "C"]);
        tracker.record_queries(1, vec![]).unwrap();
        tracker.record_queries(0, vec!["retry".into()]).unwrap();
        assert_eq!(
            statuses(&tracker),
            vec![Status::Done, Status::Current, Status::Default]
        );
    }

    #[test]
    fn test_out_of_range_step_is_an_error() {
        let mut tracker = plan(&["A"]);
        let err = tracker.record_queries(3, vec![]).unwrap_err();
        assert!(matches!(
            err,
            StreamError::StepOutOfRange {
                step_number: 3,
                plan_len: 1
            }
        ));

        let mut empty = AgentPlanTracker::new();
        assert!(empty.record_results(0, vec![]).is_err());
    }

    #[test]
    fn test_no_snapshot_without_plan() {
        let mut tracker = AgentPlanTracker::new();
        tracker.begin_answer();
        assert!(tracker.snapshot().is_none());
        assert_eq!(tracker.phase(), PlanPhase::NoPlan);
    }
}
