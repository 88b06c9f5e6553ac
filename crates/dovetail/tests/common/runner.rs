//! Scripted step runner.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Mutex;

use dovetail::{JobContext, Step, StepOutcome, StepRunner};

/// Fake media backend. Successful steps write their artifact file so that
/// checkpoint verification sees it.
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<Step>>,
    failures: Mutex<HashMap<Step, usize>>,
    panics: Mutex<HashSet<Step>>,
    skip_artifact: Mutex<HashSet<Step>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `step` fail the next `times` invocations.
    pub fn fail_times(self, step: Step, times: usize) -> Self {
        self.failures.lock().unwrap().insert(step, times);
        self
    }

    pub fn panic_on(self, step: Step) -> Self {
        self.panics.lock().unwrap().insert(step);
        self
    }

    /// Reports success for `step` without writing its artifact.
    pub fn without_artifact(self, step: Step) -> Self {
        self.skip_artifact.lock().unwrap().insert(step);
        self
    }

    pub fn calls(&self) -> Vec<Step> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, step: Step) -> usize {
        self.calls().iter().filter(|s| **s == step).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl StepRunner for ScriptedRunner {
    fn run_step(&self, step: Step, ctx: &JobContext) -> StepOutcome {
        self.calls.lock().unwrap().push(step);

        if self.panics.lock().unwrap().contains(&step) {
            panic!("scripted panic in {}", step);
        }

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&step) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return StepOutcome::failed(format!("scripted failure in {}", step));
                }
            }
        }

        let artifact = ctx.artifact_path(step);
        if !self.skip_artifact.lock().unwrap().contains(&step) {
            if let Some(parent) = artifact.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&artifact, step.as_str()).unwrap();
        }
        StepOutcome::succeeded(artifact)
    }
}
