//! Job context: everything one running script owns (§3 "Job context").

use std::collections::HashMap;
use std::rc::Rc;

use snafu::ensure;

use crate::ast::Node;
use crate::channel::MessageChannel;
use crate::config::RuntimeConfig;
use crate::error::{ScriptError, TooManyOpenFilesSnafu};
use crate::scope::ScopeChain;
use crate::stack::StackNode;
use crate::value::set::SetDetail;
use crate::value::{FuncDetail, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Run,
    Blocked,
    Wait,
    Destroyed,
}

/// One running (or suspended) script. Lives on exactly one of the runtime's
/// run/blocked/wait queues at a time, tracked by [`JobState`].
pub struct Job {
    pub id: u64,
    pub filename: String,
    pub stack: Vec<StackNode>,
    pub scopes: ScopeChain,
    pub step_budget: u32,
    open_files: usize,
    max_open_files: usize,
    pub channels: HashMap<Rc<str>, MessageChannel>,
    pub functions: HashMap<Rc<str>, Rc<FuncDetail>>,
    pub sets: HashMap<Rc<str>, Rc<SetDetail>>,
    pub result: Option<Value>,
    pub state: JobState,
    pub error: Option<ScriptError>,
}

impl Job {
    pub fn new(id: u64, filename: impl Into<String>, root: Rc<Node>, config: &RuntimeConfig) -> Self {
        let scopes = ScopeChain::new();
        let scope_depth = scopes.depth();
        Self {
            id,
            filename: filename.into(),
            stack: vec![StackNode::new(root, scope_depth)],
            scopes,
            step_budget: config.step,
            open_files: 0,
            max_open_files: config.max_open_files,
            channels: HashMap::new(),
            functions: HashMap::new(),
            sets: HashMap::new(),
            result: None,
            state: JobState::Run,
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn open_channel(&mut self, name: impl Into<Rc<str>>) {
        let name = name.into();
        self.channels.entry(name.clone()).or_insert_with(|| MessageChannel::new(name, None));
    }

    pub fn open_file(&mut self) -> Result<(), ScriptError> {
        ensure!(
            self.open_files < self.max_open_files,
            TooManyOpenFilesSnafu {
                limit: self.max_open_files
            }
        );
        self.open_files += 1;
        Ok(())
    }

    pub fn close_file(&mut self) {
        self.open_files = self.open_files.saturating_sub(1);
    }
}
