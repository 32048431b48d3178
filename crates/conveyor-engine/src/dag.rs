//! Dependency graphs of a workflow's jobs and stages.

use conveyor_core::workflow::WorkflowDefinition;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagError {
    #[error("Cycle detected in {0} dependencies")]
    CycleDetected(&'static str),
    #[error("Job {job:?} needs unknown job {need:?}")]
    UnknownJob { job: String, need: String },
    #[error("Stage {stage:?} needs unknown stage {need:?}")]
    UnknownStageNeed { stage: String, need: String },
    #[error("Job {job:?} is in unknown stage {stage:?}")]
    UnknownStage { job: String, stage: String },
    #[error("Job {0:?} must declare a stage")]
    MissingStage(String),
    #[error("Job {0:?} declares a stage but the workflow has no stages")]
    UnexpectedStage(String),
    #[error("Job {job:?} needs {need:?} which is in another stage")]
    CrossStageNeed { job: String, need: String },
    #[error("Job {job:?} references unknown gate {gate:?}")]
    UnknownGate { job: String, gate: String },
}

impl From<DagError> for conveyor_core::Error {
    fn from(err: DagError) -> Self {
        conveyor_core::Error::InvalidWorkflow(err.to_string())
    }
}

/// Validated job and stage graphs. Edges point from a dependency to its dependent.
#[derive(Debug)]
pub struct WorkflowGraph {
    jobs: DiGraph<String, ()>,
    job_index: HashMap<String, NodeIndex>,
    stages: DiGraph<String, ()>,
    stage_index: HashMap<String, NodeIndex>,
    job_stage: HashMap<String, String>,
}

impl WorkflowGraph {
    /// Validate a workflow and build its graphs.
    pub fn build(workflow: &WorkflowDefinition) -> Result<Self, DagError> {
        let staged = workflow.uses_stages();

        let mut stages = DiGraph::new();
        let mut stage_index = HashMap::new();
        for name in workflow.stages.keys() {
            stage_index.insert(name.clone(), stages.add_node(name.clone()));
        }
        for (name, stage) in &workflow.stages {
            let idx = stage_index[name];
            for need in &stage.needs {
                let need_idx = stage_index.get(need).ok_or_else(|| DagError::UnknownStageNeed {
                    stage: name.clone(),
                    need: need.clone(),
                })?;
                if *need_idx == idx {
                    return Err(DagError::CycleDetected("stage"));
                }
                stages.add_edge(*need_idx, idx, ());
            }
        }

        let mut jobs = DiGraph::new();
        let mut job_index = HashMap::new();
        let mut job_stage = HashMap::new();
        for (name, job) in &workflow.jobs {
            job_index.insert(name.clone(), jobs.add_node(name.clone()));

            match (&job.stage, staged) {
                (Some(stage), true) => {
                    if !stage_index.contains_key(stage) {
                        return Err(DagError::UnknownStage {
                            job: name.clone(),
                            stage: stage.clone(),
                        });
                    }
                    job_stage.insert(name.clone(), stage.clone());
                }
                (None, true) => return Err(DagError::MissingStage(name.clone())),
                (Some(stage), false) if !stage.is_empty() => {
                    return Err(DagError::UnexpectedStage(name.clone()));
                }
                _ => {}
            }

            if let Some(gate) = &job.gate
                && !workflow.gates.contains_key(gate)
            {
                return Err(DagError::UnknownGate {
                    job: name.clone(),
                    gate: gate.clone(),
                });
            }
        }

        for (name, job) in &workflow.jobs {
            let idx = job_index[name];
            for need in &job.needs {
                let need_idx = job_index.get(need).ok_or_else(|| DagError::UnknownJob {
                    job: name.clone(),
                    need: need.clone(),
                })?;
                if *need_idx == idx {
                    return Err(DagError::CycleDetected("job"));
                }
                if staged && job_stage.get(need) != job_stage.get(name) {
                    return Err(DagError::CrossStageNeed {
                        job: name.clone(),
                        need: need.clone(),
                    });
                }
                jobs.add_edge(*need_idx, idx, ());
            }
        }

        toposort(&stages, None).map_err(|_| DagError::CycleDetected("stage"))?;
        toposort(&jobs, None).map_err(|_| DagError::CycleDetected("job"))?;

        Ok(Self {
            jobs,
            job_index,
            stages,
            stage_index,
            job_stage,
        })
    }

    /// Stage of a job, when the workflow uses stages.
    pub fn stage_of(&self, job: &str) -> Option<&str> {
        self.job_stage.get(job).map(String::as_str)
    }

    /// Stages directly needed by a stage.
    pub fn stage_needs(&self, stage: &str) -> BTreeSet<String> {
        self.stage_index
            .get(stage)
            .map(|&idx| {
                self.stages
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .filter_map(|n| self.stages.node_weight(n).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Jobs belonging to a stage.
    pub fn stage_jobs(&self, stage: &str) -> BTreeSet<String> {
        self.job_stage
            .iter()
            .filter(|(_, s)| s.as_str() == stage)
            .map(|(job, _)| job.clone())
            .collect()
    }

    /// Jobs of a stage that no other job of the same stage needs.
    pub fn stage_sinks(&self, stage: &str) -> BTreeSet<String> {
        self.stage_jobs(stage)
            .into_iter()
            .filter(|job| {
                self.job_index.get(job).is_some_and(|&idx| {
                    self.jobs
                        .neighbors_directed(idx, petgraph::Direction::Outgoing)
                        .next()
                        .is_none()
                })
            })
            .collect()
    }

    /// Every job a job transitively depends on: the closure of its needs,
    /// plus every job of every transitively needed stage.
    pub fn ancestors(&self, job: &str) -> BTreeSet<String> {
        let mut ancestors = transitive_predecessors(&self.jobs, self.job_index.get(job));

        if let Some(stage) = self.stage_of(job) {
            for needed in transitive_predecessors(&self.stages, self.stage_index.get(stage)) {
                ancestors.extend(self.stage_jobs(&needed));
            }
        }

        ancestors
    }

    /// Jobs exposed in the `needs` context: the direct needs, plus the sink
    /// jobs of the stages the job's stage directly needs.
    pub fn needs_context_jobs(&self, job: &str) -> BTreeSet<String> {
        let mut needs: BTreeSet<String> = self
            .job_index
            .get(job)
            .map(|&idx| {
                self.jobs
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .filter_map(|n| self.jobs.node_weight(n).cloned())
                    .collect()
            })
            .unwrap_or_default();

        if let Some(stage) = self.stage_of(job) {
            for needed in self.stage_needs(stage) {
                needs.extend(self.stage_sinks(&needed));
            }
        }

        needs
    }
}

fn transitive_predecessors(graph: &DiGraph<String, ()>, start: Option<&NodeIndex>) -> BTreeSet<String> {
    let Some(&start) = start else {
        return BTreeSet::new();
    };
    let reversed = Reversed(graph);
    let mut dfs = Dfs::new(reversed, start);
    let mut found = BTreeSet::new();
    while let Some(idx) = dfs.next(reversed) {
        if idx != start
            && let Some(name) = graph.node_weight(idx)
        {
            found.insert(name.clone());
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::workflow::{GateDefinition, JobDefinition, StageDefinition};
    use pretty_assertions::assert_eq;

    fn job(needs: &[&str], stage: Option<&str>) -> JobDefinition {
        JobDefinition {
            needs: needs.iter().map(|s| s.to_string()).collect(),
            stage: stage.map(str::to_string),
            ..Default::default()
        }
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn flat_workflow() -> WorkflowDefinition {
        let mut wf = WorkflowDefinition::default();
        wf.jobs.insert("job1".into(), job(&[], None));
        wf.jobs.insert("job2".into(), job(&[], None));
        wf.jobs.insert("job3".into(), job(&["job1"], None));
        wf.jobs.insert("job4".into(), job(&["job2"], None));
        wf.jobs.insert("job5".into(), job(&["job3"], None));
        wf.jobs.insert("job6".into(), job(&["job5"], None));
        wf
    }

    fn staged_workflow() -> WorkflowDefinition {
        let mut wf = WorkflowDefinition::default();
        wf.stages.insert("stage1".into(), StageDefinition::default());
        wf.stages.insert(
            "stage2".into(),
            StageDefinition {
                needs: vec!["stage1".into()],
            },
        );
        wf.stages.insert(
            "stage3".into(),
            StageDefinition {
                needs: vec!["stage2".into()],
            },
        );
        wf.jobs.insert("job1".into(), job(&[], Some("stage1")));
        wf.jobs.insert("job2".into(), job(&["job1"], Some("stage1")));
        wf.jobs.insert("job3".into(), job(&[], Some("stage1")));
        wf.jobs.insert("job4".into(), job(&["job3"], Some("stage1")));
        wf.jobs.insert("job5".into(), job(&[], Some("stage1")));
        wf.jobs.insert("job6".into(), job(&[], Some("stage2")));
        wf.jobs.insert("job7".into(), job(&[], Some("stage3")));
        wf
    }

    #[test]
    fn test_flat_ancestors() {
        let graph = WorkflowGraph::build(&flat_workflow()).unwrap();
        assert_eq!(graph.ancestors("job6"), set(&["job1", "job3", "job5"]));
        assert_eq!(graph.ancestors("job1"), set(&[]));
        assert_eq!(graph.needs_context_jobs("job6"), set(&["job5"]));
    }

    #[test]
    fn test_staged_ancestors() {
        let graph = WorkflowGraph::build(&staged_workflow()).unwrap();
        assert_eq!(
            graph.ancestors("job6"),
            set(&["job1", "job2", "job3", "job4", "job5"])
        );
        assert!(!graph.ancestors("job7").contains("job7"));
        assert!(graph.ancestors("job7").contains("job6"));
    }

    #[test]
    fn test_staged_needs_context_uses_stage_sinks() {
        let graph = WorkflowGraph::build(&staged_workflow()).unwrap();
        assert_eq!(graph.stage_sinks("stage1"), set(&["job2", "job4", "job5"]));
        assert_eq!(graph.needs_context_jobs("job6"), set(&["job2", "job4", "job5"]));
        assert_eq!(graph.needs_context_jobs("job7"), set(&["job6"]));
    }

    #[test]
    fn test_job_cycle_detected() {
        let mut wf = WorkflowDefinition::default();
        wf.jobs.insert("a".into(), job(&["b"], None));
        wf.jobs.insert("b".into(), job(&["a"], None));
        assert_eq!(
            WorkflowGraph::build(&wf).unwrap_err(),
            DagError::CycleDetected("job")
        );

        let mut wf = WorkflowDefinition::default();
        wf.jobs.insert("a".into(), job(&["a"], None));
        assert!(WorkflowGraph::build(&wf).is_err());
    }

    #[test]
    fn test_stage_cycle_detected() {
        let mut wf = WorkflowDefinition::default();
        wf.stages.insert("s1".into(), StageDefinition { needs: vec!["s2".into()] });
        wf.stages.insert("s2".into(), StageDefinition { needs: vec!["s1".into()] });
        wf.jobs.insert("a".into(), job(&[], Some("s1")));
        assert_eq!(
            WorkflowGraph::build(&wf).unwrap_err(),
            DagError::CycleDetected("stage")
        );
    }

    #[test]
    fn test_lint_errors() {
        let mut wf = WorkflowDefinition::default();
        wf.jobs.insert("a".into(), job(&["missing"], None));
        assert!(matches!(
            WorkflowGraph::build(&wf),
            Err(DagError::UnknownJob { .. })
        ));

        let mut wf = WorkflowDefinition::default();
        wf.jobs.insert("a".into(), job(&[], Some("stage1")));
        assert_eq!(
            WorkflowGraph::build(&wf).unwrap_err(),
            DagError::UnexpectedStage("a".into())
        );

        let mut wf = staged_workflow();
        wf.jobs.insert("orphan".into(), job(&[], None));
        assert_eq!(
            WorkflowGraph::build(&wf).unwrap_err(),
            DagError::MissingStage("orphan".into())
        );

        let mut wf = staged_workflow();
        wf.jobs.insert("cross".into(), job(&["job1"], Some("stage2")));
        assert!(matches!(
            WorkflowGraph::build(&wf),
            Err(DagError::CrossStageNeed { .. })
        ));

        let mut wf = flat_workflow();
        wf.jobs.get_mut("job1").unwrap().gate = Some("approval".into());
        assert!(matches!(
            WorkflowGraph::build(&wf),
            Err(DagError::UnknownGate { .. })
        ));
        wf.gates.insert("approval".into(), GateDefinition::default());
        assert!(WorkflowGraph::build(&wf).is_ok());
    }

    #[test]
    fn test_dag_error_maps_to_invalid_workflow() {
        let err: conveyor_core::Error = DagError::MissingStage("x".into()).into();
        assert!(matches!(err, conveyor_core::Error::InvalidWorkflow(_)));
    }
}
