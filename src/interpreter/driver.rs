//! The budgeted pump: advances a job's evaluation stack by at most its
//! per-turn step budget, then yields back to the runtime (§4.1, §4.3).

use crate::ast::Node;
use crate::stack::{FrameMarker, StackNode};
use crate::value::Value;

use super::dispatch::{self, Action};
use super::job::{Job, JobState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The job still has work left; call `drive` again on a future turn.
    StillRunning,
    /// An internal function parked the job (e.g. on an empty channel read);
    /// the runtime should move it off the run queue until woken.
    Blocked,
    Waiting,
    Finished,
    Errored,
}

fn auto_marker(node: &Node) -> Option<FrameMarker> {
    match node {
        Node::While { .. } | Node::For { .. } => Some(FrameMarker::Loop),
        _ => None,
    }
}

fn teardown_scopes(job: &mut Job, target_depth: usize) {
    while job.scopes.depth() > target_depth {
        job.scopes.pop();
    }
}

/// Pops frames (tearing down whatever scopes they opened) until one tagged
/// `marker` is found.
///
/// `consume_marker = true` (`break`/`return`) discards the marker frame too
/// and bubbles `value` to its parent, as if it had just `Complete`d.
/// `consume_marker = false` (`continue`) leaves the marker frame on the
/// stack and feeds `value` into its `pending`, as if its body had just
/// completed normally.
fn unwind_to_marker(job: &mut Job, marker: FrameMarker, value: Value, consume_marker: bool) {
    loop {
        let Some(frame) = job.stack.pop() else {
            job.result = Some(value);
            return;
        };
        teardown_scopes(job, frame.scope_depth);
        if frame.marker == Some(marker) {
            if consume_marker {
                match job.stack.last_mut() {
                    Some(parent) => parent.pending.push(value),
                    None => job.result = Some(value),
                }
            } else {
                job.stack.push(frame);
                job.stack.last_mut().unwrap().pending.push(value);
            }
            return;
        }
    }
}

/// Advances `job` by up to `job.step_budget` units of work.
pub fn drive(job: &mut Job) -> StepOutcome {
    for _ in 0..job.step_budget {
        let Some(mut frame) = job.stack.pop() else {
            job.state = JobState::Destroyed;
            return StepOutcome::Finished;
        };

        let depth_before = job.scopes.depth();
        let action = dispatch::step(&mut frame, job);

        match action {
            Action::Push(node) => {
                let marker = auto_marker(&node);
                let mut child = StackNode::new(node, depth_before);
                if let Some(m) = marker {
                    child = child.with_marker(m);
                }
                job.stack.push(frame);
                job.stack.push(child);
            }
            Action::PushMarked(node, marker) => {
                job.stack.push(frame);
                job.stack.push(StackNode::new(node, depth_before).with_marker(marker));
            }
            Action::Complete(value) => {
                teardown_scopes(job, frame.scope_depth);
                match job.stack.last_mut() {
                    Some(parent) => parent.pending.push(value),
                    None => job.result = Some(value),
                }
            }
            Action::Error(e) => {
                teardown_scopes(job, frame.scope_depth);
                job.error = Some(e);
                job.stack.clear();
                job.state = JobState::Destroyed;
                return StepOutcome::Errored;
            }
            Action::Break => {
                teardown_scopes(job, frame.scope_depth);
                unwind_to_marker(job, FrameMarker::Loop, Value::Nil, true);
            }
            Action::Continue => {
                teardown_scopes(job, frame.scope_depth);
                unwind_to_marker(job, FrameMarker::Loop, Value::Nil, false);
            }
            Action::Return(value) => {
                teardown_scopes(job, frame.scope_depth);
                unwind_to_marker(job, FrameMarker::FunctionRoot, value, true);
            }
        }

        if job.stack.is_empty() {
            job.state = JobState::Destroyed;
            return StepOutcome::Finished;
        }
        match job.state {
            JobState::Blocked => return StepOutcome::Blocked,
            JobState::Wait => return StepOutcome::Waiting,
            JobState::Run | JobState::Destroyed => {}
        }
    }
    StepOutcome::StillRunning
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::ast::{Literal, Operator};
    use crate::config::RuntimeConfig;

    fn lit(l: Literal) -> Rc<Node> {
        Rc::new(Node::Factor(l))
    }

    #[test]
    fn arithmetic_expression_evaluates_to_a_single_result() {
        let root = Rc::new(Node::AddSub {
            op: Operator::Add,
            lhs: lit(Literal::Int(2)),
            rhs: lit(Literal::Int(3)),
        });
        let config = RuntimeConfig::default();
        let mut job = Job::new(1, "t", root, &config);
        assert_eq!(drive(&mut job), StepOutcome::Finished);
        assert_eq!(job.result.unwrap().to_int(), 5);
    }

    #[test]
    fn while_loop_counts_down_to_zero() {
        // x = 3; while (x) { x = x - 1 }
        let assign_init = Rc::new(Node::Assign {
            op: Operator::Assign,
            target: lit(Literal::Ident(Rc::from("x"))),
            value: lit(Literal::Int(3)),
        });
        let decrement = Rc::new(Node::Assign {
            op: Operator::Assign,
            target: lit(Literal::Ident(Rc::from("x"))),
            value: Rc::new(Node::AddSub {
                op: Operator::Sub,
                lhs: lit(Literal::Ident(Rc::from("x"))),
                rhs: lit(Literal::Int(1)),
            }),
        });
        let while_loop = Rc::new(Node::While {
            cond: lit(Literal::Ident(Rc::from("x"))),
            body: decrement,
        });
        let root = Rc::new(Node::Statement(vec![assign_init, while_loop]));
        let config = RuntimeConfig::default();
        let mut job = Job::new(1, "t", root, &config);
        loop {
            match drive(&mut job) {
                StepOutcome::StillRunning => continue,
                outcome => {
                    assert_eq!(outcome, StepOutcome::Finished);
                    break;
                }
            }
        }
        assert_eq!(job.scopes.lookup("x", false).unwrap().get().to_int(), 0);
    }

    #[test]
    fn function_call_binds_arguments_and_returns() {
        // def add(a, b) { return a + b } ; add(2, 3)
        let body = Rc::new(Node::Statement(vec![Rc::new(Node::Return(Some(Rc::new(
            Node::AddSub {
                op: Operator::Add,
                lhs: lit(Literal::Ident(Rc::from("a"))),
                rhs: lit(Literal::Ident(Rc::from("b"))),
            },
        ))))]));
        let def = Rc::new(Node::FunctionDef {
            name: Rc::from("add"),
            args: vec![
                crate::ast::ArgDef { name: Rc::from("a"), default: None },
                crate::ast::ArgDef { name: Rc::from("b"), default: None },
            ],
            body,
        });
        let call = Rc::new(Node::FunctionCall {
            callee: lit(Literal::Ident(Rc::from("add"))),
            args: vec![lit(Literal::Int(2)), lit(Literal::Int(3))],
        });
        let root = Rc::new(Node::Statement(vec![def, call]));
        let config = RuntimeConfig::default();
        let mut job = Job::new(1, "t", root, &config);
        loop {
            match drive(&mut job) {
                StepOutcome::StillRunning => continue,
                outcome => {
                    assert_eq!(outcome, StepOutcome::Finished);
                    break;
                }
            }
        }
        assert_eq!(job.result.unwrap().to_int(), 5);
        assert_eq!(job.scopes.depth(), 1);
    }

    #[test]
    fn break_exits_the_enclosing_loop_early() {
        // x = 0; while (1) { x = x + 1; if (x == 2) { break } }
        let init = Rc::new(Node::Assign {
            op: Operator::Assign,
            target: lit(Literal::Ident(Rc::from("x"))),
            value: lit(Literal::Int(0)),
        });
        let increment = Rc::new(Node::Assign {
            op: Operator::Assign,
            target: lit(Literal::Ident(Rc::from("x"))),
            value: Rc::new(Node::AddSub {
                op: Operator::Add,
                lhs: lit(Literal::Ident(Rc::from("x"))),
                rhs: lit(Literal::Int(1)),
            }),
        });
        let guard = Rc::new(Node::If {
            cond: Rc::new(Node::RelativeHigh {
                op: Operator::Eq,
                lhs: lit(Literal::Ident(Rc::from("x"))),
                rhs: lit(Literal::Int(2)),
            }),
            then_branch: Rc::new(Node::Break),
            else_branch: None,
        });
        let body = Rc::new(Node::Statement(vec![increment, guard]));
        let while_loop = Rc::new(Node::While {
            cond: lit(Literal::Int(1)),
            body,
        });
        let root = Rc::new(Node::Statement(vec![init, while_loop]));
        let config = RuntimeConfig::default();
        let mut job = Job::new(1, "t", root, &config);
        loop {
            match drive(&mut job) {
                StepOutcome::StillRunning => continue,
                outcome => {
                    assert_eq!(outcome, StepOutcome::Finished);
                    break;
                }
            }
        }
        assert_eq!(job.scopes.lookup("x", false).unwrap().get().to_int(), 2);
    }
}
