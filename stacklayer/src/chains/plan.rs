//! Chain plans.
//!
//! A [`ChainPlan`] is the eager, inspectable form of a chain: stages of
//! parallel branches of [`TaskSpec`] descriptors. It is built and validated
//! before anything is submitted, and only turned into executor stages when
//! the chain job starts.
//!
//! ```text
//! then(a) then(b) fan_out([[c1, p1], [c2, p2]]) then(d)
//!
//! stage 0: [a, b]
//! stage 1: [c1, p1] | [c2, p2]     (barrier)
//! stage 2: [d]
//! ```

use crate::executor::Stage;
use crate::tasks::{SharedEnv, TaskSpec};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainPlan {
    stages: Vec<Vec<Vec<TaskSpec>>>,
}

impl ChainPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step after everything planned so far.
    pub fn then(mut self, spec: TaskSpec) -> Self {
        match self.stages.last_mut() {
            Some(last) if last.len() == 1 => last[0].push(spec),
            _ => self.stages.push(vec![vec![spec]]),
        }
        self
    }

    /// Appends several sequential steps.
    pub fn then_all(self, specs: impl IntoIterator<Item = TaskSpec>) -> Self {
        specs.into_iter().fold(self, ChainPlan::then)
    }

    /// Appends parallel branches joined by a barrier. Empty branches are
    /// dropped; a fan-out with no branches adds nothing.
    pub fn fan_out(mut self, branches: Vec<Vec<TaskSpec>>) -> Self {
        let branches: Vec<Vec<TaskSpec>> = branches.into_iter().filter(|b| !b.is_empty()).collect();
        match branches.len() {
            0 => {}
            1 => {
                for spec in branches.into_iter().flatten() {
                    self = self.then(spec);
                }
            }
            _ => self.stages.push(branches),
        }
        self
    }

    /// Appends another plan after this one.
    pub fn append(mut self, other: ChainPlan) -> Self {
        for stage in other.stages {
            self = self.fan_out(stage);
        }
        self
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn task_count(&self) -> usize {
        self.stages.iter().flatten().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[Vec<Vec<TaskSpec>>] {
        &self.stages
    }

    /// Every step in plan order, branches of a stage one after another.
    pub fn specs(&self) -> impl Iterator<Item = &TaskSpec> {
        self.stages.iter().flatten().flatten()
    }

    /// Step names per stage and branch, for logs and tests.
    pub fn describe(&self) -> Vec<Vec<Vec<String>>> {
        self.stages
            .iter()
            .map(|stage| {
                stage
                    .iter()
                    .map(|branch| branch.iter().map(TaskSpec::name).collect())
                    .collect()
            })
            .collect()
    }

    /// Binds every step to `env` and builds the executor stages.
    pub fn to_stages(&self, env: &SharedEnv) -> Vec<Stage> {
        self.stages
            .iter()
            .map(|stage| {
                Stage::parallel(
                    stage
                        .iter()
                        .map(|branch| {
                            branch
                                .iter()
                                .cloned()
                                .map(|spec| spec.into_task(env))
                                .collect()
                        })
                        .collect(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceId, Transition};

    fn step(id: u64) -> TaskSpec {
        TaskSpec::transition(ResourceId(id), Transition::SetOk)
    }

    #[test]
    fn test_sequential_steps_share_a_stage() {
        let plan = ChainPlan::new().then(step(1)).then(step(2));
        assert_eq!(plan.stage_count(), 1);
        assert_eq!(plan.task_count(), 2);
    }

    #[test]
    fn test_fan_out_is_a_barrier() {
        let plan = ChainPlan::new()
            .then(step(1))
            .fan_out(vec![vec![step(2)], vec![step(3), step(4)]])
            .then(step(5));

        assert_eq!(
            plan.describe(),
            vec![
                vec![vec!["set_ok(1)".to_string()]],
                vec![
                    vec!["set_ok(2)".to_string()],
                    vec!["set_ok(3)".to_string(), "set_ok(4)".to_string()],
                ],
                vec![vec!["set_ok(5)".to_string()]],
            ]
        );
    }

    #[test]
    fn test_single_branch_fan_out_is_sequential() {
        let plan = ChainPlan::new()
            .then(step(1))
            .fan_out(vec![vec![step(2)], vec![]]);
        assert_eq!(plan.stage_count(), 1);
        assert_eq!(plan.task_count(), 2);
    }

    #[test]
    fn test_empty_fan_out_adds_nothing() {
        let plan = ChainPlan::new().fan_out(Vec::new());
        assert!(plan.is_empty());
    }
}
