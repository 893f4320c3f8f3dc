//! The scheduler tying the reactor and the interpreter together (§3, §5).
//!
//! Each job lives on exactly one of three queues, matching its
//! [`JobState`](crate::interpreter::JobState): `run` (driven every tick),
//! `blocked` (parked by an internal function, e.g. an empty channel read),
//! and `wait` (parked on a reactor-side event). The base design links these
//! as intrusive doubly-linked lists through the job struct itself; here they
//! are plain `VecDeque<u64>` indexing a `HashMap<u64, Job>`, which is the
//! idiomatic Rust rendition of the same three-queue discipline.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::ast::Node;
use crate::config::RuntimeConfig;
use crate::error::ReactorError;
use crate::interpreter::{driver, Job, JobState, StepOutcome};
use crate::reactor::backend::DefaultBackend;
use crate::reactor::Reactor;

pub struct Runtime {
    reactor: Reactor<DefaultBackend>,
    jobs: HashMap<u64, Job>,
    run_queue: VecDeque<u64>,
    blocked_queue: VecDeque<u64>,
    wait_queue: VecDeque<u64>,
    finished: Vec<u64>,
    next_job_id: u64,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Self, ReactorError> {
        Ok(Self {
            reactor: Reactor::init(true, &config)?,
            jobs: HashMap::new(),
            run_queue: VecDeque::new(),
            blocked_queue: VecDeque::new(),
            wait_queue: VecDeque::new(),
            finished: Vec::new(),
            next_job_id: 1,
            config,
        })
    }

    /// Admits a new job onto the run queue and returns its id.
    pub fn spawn(&mut self, filename: impl Into<String>, root: Rc<Node>) -> u64 {
        let id = self.next_job_id;
        self.next_job_id += 1;
        self.jobs.insert(id, Job::new(id, filename, root, &self.config));
        self.run_queue.push_back(id);
        id
    }

    pub fn job(&self, id: u64) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn reactor_mut(&mut self) -> &mut Reactor<DefaultBackend> {
        &mut self.reactor
    }

    pub fn is_idle(&self) -> bool {
        self.run_queue.is_empty() && self.blocked_queue.is_empty() && self.wait_queue.is_empty()
    }

    /// Moves a parked job back onto the run queue, e.g. after the host
    /// delivers a value on a channel it was blocked reading.
    pub fn wake(&mut self, id: u64) {
        self.blocked_queue.retain(|&j| j != id);
        self.wait_queue.retain(|&j| j != id);
        if let Some(job) = self.jobs.get_mut(&id) {
            if job.state != JobState::Destroyed {
                job.state = JobState::Run;
                if !self.run_queue.contains(&id) {
                    self.run_queue.push_back(id);
                }
            }
        }
    }

    /// Removes and returns every job that finished (successfully or with an
    /// error) since the last call.
    pub fn drain_finished(&mut self) -> Vec<Job> {
        self.finished.drain(..).filter_map(|id| self.jobs.remove(&id)).collect()
    }

    /// Runs one scheduling turn: services the reactor once, then drives
    /// every runnable job by its step budget, filing each back onto the
    /// queue matching its resulting state.
    pub fn tick(&mut self) -> Result<(), ReactorError> {
        self.reactor.dispatch_once()?;

        let runnable: Vec<u64> = self.run_queue.drain(..).collect();
        for id in runnable {
            let outcome = {
                let job = self.jobs.get_mut(&id).expect("run queue references a live job");
                driver::drive(job)
            };
            match outcome {
                StepOutcome::StillRunning => self.run_queue.push_back(id),
                StepOutcome::Blocked => self.blocked_queue.push_back(id),
                StepOutcome::Waiting => self.wait_queue.push_back(id),
                StepOutcome::Finished | StepOutcome::Errored => self.finished.push(id),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Literal, Operator};

    fn lit(l: Literal) -> Rc<Node> {
        Rc::new(Node::Factor(l))
    }

    #[test]
    fn spawned_job_runs_to_completion_across_ticks() {
        let root = Rc::new(Node::AddSub {
            op: Operator::Add,
            lhs: lit(Literal::Int(10)),
            rhs: lit(Literal::Int(32)),
        });
        let mut runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        let id = runtime.spawn("t", root);

        while !runtime.is_idle() {
            runtime.tick().unwrap();
        }
        let done = runtime.drain_finished();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, id);
        assert_eq!(done[0].result.as_ref().unwrap().to_int(), 42);
    }

    #[test]
    fn wake_requeues_a_blocked_job() {
        let root = lit(Literal::Int(1));
        let mut runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        let id = runtime.spawn("t", root);
        if let Some(job) = runtime.jobs.get_mut(&id) {
            job.state = JobState::Blocked;
        }
        runtime.blocked_queue.push_back(id);
        runtime.run_queue.clear();

        runtime.wake(id);
        assert!(runtime.run_queue.contains(&id));
        assert!(runtime.blocked_queue.is_empty());
    }
}
