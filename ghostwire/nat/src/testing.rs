//! Test support: a recording executor double.
//!
//! Records every invocation and returns canned results for specific
//! argument tuples, so chain and rule management can be exercised without
//! touching kernel state.

use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use crate::executor::{CommandError, Executor, IpFamily};

#[derive(Debug, Default)]
pub struct RecordingExecutor {
    runs: Mutex<Vec<String>>,
    probes: Mutex<Vec<String>>,
    probe_results: Mutex<HashMap<String, Canned>>,
    failing_runs: Mutex<HashSet<String>>,
}

#[derive(Copy, Clone, Debug)]
enum Canned {
    Present(bool),
    Error,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cans a probe result for the exact argument tuple. Unset probes
    /// default to absent.
    pub fn probe_ok(&self, family: IpFamily, args: &str, present: bool) {
        self.probe_results
            .lock()
            .unwrap()
            .insert(key(family, args), Canned::Present(present));
    }

    /// Cans a probe failure (exit code other than 0 or 1).
    pub fn probe_fails(&self, family: IpFamily, args: &str) {
        self.probe_results
            .lock()
            .unwrap()
            .insert(key(family, args), Canned::Error);
    }

    /// Cans a run failure for the exact argument tuple.
    pub fn run_fails(&self, family: IpFamily, args: &str) {
        self.failing_runs.lock().unwrap().insert(key(family, args));
    }

    /// Every `run` invocation, in order, as `<binary> <args...>`. Failing
    /// invocations are recorded too.
    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }

    /// Every `probe` invocation, in order.
    pub fn probes(&self) -> Vec<String> {
        self.probes.lock().unwrap().clone()
    }
}

fn key(family: IpFamily, args: &str) -> String {
    format!("{} {}", family.binary(), args)
}

fn simulated_failure(family: IpFamily, args: &[&str], code: i32) -> CommandError {
    CommandError::Failed {
        binary: family.binary(),
        args: args.iter().map(|a| a.to_string()).collect(),
        code: Some(code),
        output: "simulated failure".to_string(),
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn run(&self, family: IpFamily, args: &[&str]) -> Result<(), CommandError> {
        let key = key(family, &args.join(" "));
        self.runs.lock().unwrap().push(key.clone());
        if self.failing_runs.lock().unwrap().contains(&key) {
            return Err(simulated_failure(family, args, 2));
        }
        Ok(())
    }

    async fn probe(&self, family: IpFamily, args: &[&str]) -> Result<bool, CommandError> {
        let key = key(family, &args.join(" "));
        self.probes.lock().unwrap().push(key.clone());
        match self.probe_results.lock().unwrap().get(&key) {
            Some(Canned::Present(present)) => Ok(*present),
            Some(Canned::Error) => Err(simulated_failure(family, args, 4)),
            None => Ok(false),
        }
    }
}
