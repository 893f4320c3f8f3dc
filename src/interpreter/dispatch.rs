//! Per-node-form step handlers (§4.3).
//!
//! Each call advances exactly one [`StackNode`] by one unit of work and
//! reports what the driver should do next. `step`/`resume` carry whatever
//! progress state a form needs between calls; `pending` accumulates
//! already-evaluated children's values and is cleared by the handler once
//! it has consumed what it needed.

use std::rc::Rc;

use crate::ast::{FunctionSuffixKind, Literal, Node, Operator, SwitchArm};
use crate::error::ScriptError;
use crate::scope::{Scope, ScopeKind};
use crate::stack::{FrameMarker, StackNode};
use crate::value::array::ArrayDetail;
use crate::value::set::SetDetail;
use crate::value::variable::Variable;
use crate::value::{ops, ArgSpec, FuncBody, FuncDetail, Value};

use super::job::Job;

pub enum Action {
    Push(Rc<Node>),
    PushMarked(Rc<Node>, FrameMarker),
    Complete(Value),
    Error(ScriptError),
    Break,
    Continue,
    Return(Value),
}

fn literal_value(node: &Node) -> Option<Value> {
    match node {
        Node::Factor(Literal::Nil) => Some(Value::Nil),
        Node::Factor(Literal::Int(n)) => Some(Value::Int(*n)),
        Node::Factor(Literal::Real(r)) => Some(Value::Real(*r)),
        Node::Factor(Literal::Bool(b)) => Some(Value::Bool(*b)),
        Node::Factor(Literal::Str(s)) => Some(Value::Str(Rc::clone(s))),
        _ => None,
    }
}

/// Advances `frame` by one unit of work.
pub fn step(frame: &mut StackNode, job: &mut Job) -> Action {
    let node = Rc::clone(&frame.node);
    match node.as_ref() {
        Node::Statement(stmts) | Node::Block(stmts) => {
            let idx = frame.pending.len();
            if idx < stmts.len() {
                Action::Push(Rc::clone(&stmts[idx]))
            } else {
                Action::Complete(frame.pending.last().cloned().unwrap_or(Value::Nil))
            }
        }

        Node::FunctionDef { name, args, body } => {
            let arg_specs = args
                .iter()
                .map(|a| ArgSpec {
                    name: Rc::clone(&a.name),
                    default: a.default.as_deref().and_then(literal_value),
                })
                .collect();
            job.functions.insert(
                Rc::clone(name),
                Rc::new(FuncDetail {
                    name: Rc::clone(name),
                    args: arg_specs,
                    body: FuncBody::External(Rc::clone(body)),
                }),
            );
            Action::Complete(Value::Nil)
        }

        Node::SetDef { name, .. } => {
            job.sets.insert(Rc::clone(name), SetDetail::new(Rc::clone(name)));
            Action::Complete(Value::Nil)
        }

        Node::SetBodyStmt(inner) | Node::Expression(inner) | Node::Spec(inner) | Node::SwitchStm(inner) => {
            if frame.pending.is_empty() {
                Action::Push(Rc::clone(inner))
            } else {
                Action::Complete(frame.pending[0].clone())
            }
        }

        Node::If {
            cond,
            then_branch,
            else_branch,
        } => if_step(frame, cond, then_branch, else_branch),

        Node::While { cond, body } => while_step(frame, cond, body),

        Node::For { init, cond, update, body } => for_step(frame, init, cond, update, body),

        Node::Switch { expr, arms, default } => switch_step(frame, expr, arms, default),

        Node::Assign { op, target, value } => assign_step(frame, job, *op, target, value),

        Node::LogicLow { op, lhs, rhs }
        | Node::LogicHigh { op, lhs, rhs }
        | Node::RelativeLow { op, lhs, rhs }
        | Node::RelativeHigh { op, lhs, rhs }
        | Node::Move { op, lhs, rhs }
        | Node::AddSub { op, lhs, rhs }
        | Node::MulDiv { op, lhs, rhs } => binary_step(frame, *op, lhs, rhs),

        Node::Suffix { op, target } => suffix_step(job, *op, target),

        Node::Locate { op, target } => locate_step(frame, job, *op, target),

        Node::Factor(lit) => factor_step(job, lit),

        Node::ElementList(items) => element_list_step(frame, items),

        Node::FunctionSuffix { target, suffix } => function_suffix_step(frame, target, suffix),

        Node::FunctionCall { callee, args } => function_call_step(frame, job, callee, args),

        Node::Break => Action::Break,
        Node::Continue => Action::Continue,
        Node::Return(expr) => return_step(frame, expr),
    }
}

fn if_step(frame: &mut StackNode, cond: &Rc<Node>, then_branch: &Rc<Node>, else_branch: &Option<Rc<Node>>) -> Action {
    match frame.step {
        0 => {
            frame.step = 1;
            Action::Push(Rc::clone(cond))
        }
        1 => {
            let truthy = frame.pending.last().map(Value::truthy).unwrap_or(false);
            frame.pending.clear();
            frame.step = 2;
            if truthy {
                Action::Push(Rc::clone(then_branch))
            } else if let Some(eb) = else_branch {
                Action::Push(Rc::clone(eb))
            } else {
                Action::Complete(Value::Nil)
            }
        }
        _ => Action::Complete(frame.pending.last().cloned().unwrap_or(Value::Nil)),
    }
}

fn while_step(frame: &mut StackNode, cond: &Rc<Node>, body: &Rc<Node>) -> Action {
    match frame.step {
        0 => {
            frame.step = 1;
            Action::Push(Rc::clone(cond))
        }
        1 => {
            let truthy = frame.pending.last().map(Value::truthy).unwrap_or(false);
            frame.pending.clear();
            if truthy {
                frame.step = 2;
                Action::Push(Rc::clone(body))
            } else {
                Action::Complete(Value::Nil)
            }
        }
        _ => {
            frame.pending.clear();
            frame.step = 1;
            Action::Push(Rc::clone(cond))
        }
    }
}

fn for_step(
    frame: &mut StackNode,
    init: &Option<Rc<Node>>,
    cond: &Option<Rc<Node>>,
    update: &Option<Rc<Node>>,
    body: &Rc<Node>,
) -> Action {
    loop {
        match frame.step {
            0 => {
                frame.step = 1;
                if let Some(init) = init {
                    return Action::Push(Rc::clone(init));
                }
            }
            1 => {
                frame.pending.clear();
                frame.step = 2;
                if let Some(cond) = cond {
                    return Action::Push(Rc::clone(cond));
                }
            }
            2 => {
                let truthy = cond.is_none() || frame.pending.last().map(Value::truthy).unwrap_or(false);
                frame.pending.clear();
                if truthy {
                    frame.step = 3;
                    return Action::Push(Rc::clone(body));
                }
                return Action::Complete(Value::Nil);
            }
            3 => {
                frame.pending.clear();
                frame.step = 4;
                if let Some(update) = update {
                    return Action::Push(Rc::clone(update));
                }
            }
            4 => {
                frame.pending.clear();
                frame.step = 1;
            }
            _ => unreachable!("for-loop phase out of range"),
        }
    }
}

fn switch_step(frame: &mut StackNode, expr: &Rc<Node>, arms: &[SwitchArm], default: &Option<Rc<Node>>) -> Action {
    loop {
        match frame.step {
            0 => {
                frame.step = 1;
                return Action::Push(Rc::clone(expr));
            }
            1 => {
                let arm_idx = frame.resume as usize;
                if arm_idx < arms.len() {
                    frame.step = 2;
                    return Action::Push(Rc::clone(&arms[arm_idx].value));
                }
                frame.step = 4;
                return match default {
                    Some(d) => Action::Push(Rc::clone(d)),
                    None => Action::Complete(Value::Nil),
                };
            }
            2 => {
                let expr_val = frame.pending[0].clone();
                let arm_val = frame.pending.pop().unwrap();
                let matched = ops::apply_binary(Operator::Eq, &expr_val, &arm_val)
                    .map(|v| v.truthy())
                    .unwrap_or(false);
                if matched {
                    frame.step = 3;
                    return Action::Push(Rc::clone(&arms[frame.resume as usize].body));
                }
                frame.resume += 1;
                frame.step = 1;
            }
            3 | 4 => {
                return Action::Complete(frame.pending.last().cloned().unwrap_or(Value::Nil));
            }
            _ => unreachable!("switch phase out of range"),
        }
    }
}

fn assign_step(frame: &mut StackNode, job: &mut Job, op: Operator, target: &Rc<Node>, value: &Rc<Node>) -> Action {
    if frame.pending.is_empty() {
        return Action::Push(Rc::clone(value));
    }
    let rhs = frame.pending[0].clone();
    frame.pending.clear();

    let Node::Factor(Literal::Ident(name)) = target.as_ref() else {
        return Action::Error(ScriptError::NotCallable);
    };

    let final_value = if op == Operator::Assign {
        rhs
    } else {
        let current = match job.scopes.lookup(name, false) {
            Some(v) => v.get(),
            None => return Action::Error(ScriptError::UndefinedSymbol { name: name.to_string() }),
        };
        match ops::apply_binary(ops::base_op(op), &current, &rhs) {
            Ok(v) => v,
            Err(e) => return Action::Error(e),
        }
    };

    match job.scopes.lookup(name, false) {
        Some(existing) => existing.set(final_value.clone()),
        None => job.scopes.declare(Variable::normal(Rc::clone(name), final_value.clone())),
    }
    Action::Complete(final_value)
}

fn binary_step(frame: &mut StackNode, op: Operator, lhs: &Rc<Node>, rhs: &Rc<Node>) -> Action {
    match frame.step {
        0 => {
            frame.step = 1;
            Action::Push(Rc::clone(lhs))
        }
        1 => {
            frame.step = 2;
            Action::Push(Rc::clone(rhs))
        }
        _ => {
            let result = ops::apply_binary(op, &frame.pending[0], &frame.pending[1]);
            frame.pending.clear();
            match result {
                Ok(v) => Action::Complete(v),
                Err(e) => Action::Error(e),
            }
        }
    }
}

fn suffix_step(job: &mut Job, op: Operator, target: &Rc<Node>) -> Action {
    let Node::Factor(Literal::Ident(name)) = target.as_ref() else {
        return Action::Error(ScriptError::NotCallable);
    };
    let Some(var) = job.scopes.lookup(name, false) else {
        return Action::Error(ScriptError::UndefinedSymbol { name: name.to_string() });
    };
    let old = var.get();
    match ops::apply_unary(op, &old) {
        Ok(new_value) => {
            var.set(new_value);
            Action::Complete(old)
        }
        Err(e) => Action::Error(e),
    }
}

fn locate_step(frame: &mut StackNode, job: &mut Job, op: Operator, target: &Rc<Node>) -> Action {
    if matches!(op, Operator::PrefixInc | Operator::PrefixDec) {
        let Node::Factor(Literal::Ident(name)) = target.as_ref() else {
            return Action::Error(ScriptError::NotCallable);
        };
        let Some(var) = job.scopes.lookup(name, false) else {
            return Action::Error(ScriptError::UndefinedSymbol { name: name.to_string() });
        };
        return match ops::apply_unary(op, &var.get()) {
            Ok(new_value) => {
                var.set(new_value.clone());
                Action::Complete(new_value)
            }
            Err(e) => Action::Error(e),
        };
    }

    match frame.step {
        0 => {
            frame.step = 1;
            Action::Push(Rc::clone(target))
        }
        _ => {
            let result = ops::apply_unary(op, &frame.pending[0]);
            frame.pending.clear();
            match result {
                Ok(v) => Action::Complete(v),
                Err(e) => Action::Error(e),
            }
        }
    }
}

fn factor_step(job: &Job, lit: &Literal) -> Action {
    match lit {
        Literal::Nil => Action::Complete(Value::Nil),
        Literal::Int(n) => Action::Complete(Value::Int(*n)),
        Literal::Real(r) => Action::Complete(Value::Real(*r)),
        Literal::Bool(b) => Action::Complete(Value::Bool(*b)),
        Literal::Str(s) => Action::Complete(Value::Str(Rc::clone(s))),
        Literal::Ident(name) => match job.scopes.lookup(name, false) {
            Some(var) => Action::Complete(var.get()),
            None => Action::Error(ScriptError::UndefinedSymbol { name: name.to_string() }),
        },
    }
}

fn element_list_step(frame: &mut StackNode, items: &[Rc<Node>]) -> Action {
    let idx = frame.pending.len();
    if idx < items.len() {
        return Action::Push(Rc::clone(&items[idx]));
    }
    let array = ArrayDetail::new();
    for (i, value) in frame.pending.drain(..).enumerate() {
        array.insert(Value::Int(i as i64), value);
    }
    Action::Complete(Value::Array(array))
}

fn function_suffix_step(frame: &mut StackNode, target: &Rc<Node>, suffix: &FunctionSuffixKind) -> Action {
    match frame.step {
        0 => {
            frame.step = 1;
            Action::Push(Rc::clone(target))
        }
        1 => match suffix {
            FunctionSuffixKind::Property(name) => {
                let result = ops::apply_binary(Operator::Property, &frame.pending[0], &Value::Str(Rc::clone(name)));
                frame.pending.clear();
                match result {
                    Ok(v) => Action::Complete(v),
                    Err(e) => Action::Error(e),
                }
            }
            FunctionSuffixKind::Index(idx) => {
                frame.step = 2;
                Action::Push(Rc::clone(idx))
            }
        },
        _ => {
            let result = ops::apply_binary(Operator::Subscript, &frame.pending[0], &frame.pending[1]);
            frame.pending.clear();
            match result {
                Ok(v) => Action::Complete(v),
                Err(e) => Action::Error(e),
            }
        }
    }
}

fn function_call_step(frame: &mut StackNode, job: &mut Job, callee: &Rc<Node>, args: &[Rc<Node>]) -> Action {
    let Node::Factor(Literal::Ident(name)) = callee.as_ref() else {
        return Action::Error(ScriptError::NotCallable);
    };

    // step 1 means the external call already happened and we're back after
    // its body ran to completion (or unwound via `return`); whatever it left
    // in `pending` is the call's result, not another argument.
    if frame.step == 1 {
        let result = frame.pending.pop().unwrap_or(Value::Nil);
        frame.pending.clear();
        return Action::Complete(result);
    }

    let done = frame.pending.len();
    if done < args.len() {
        return Action::Push(Rc::clone(&args[done]));
    }

    let arg_vals: Vec<Value> = frame.pending.drain(..).collect();
    let Some(func) = job.functions.get(name).cloned() else {
        return Action::Error(ScriptError::UndefinedSymbol { name: name.to_string() });
    };

    match &func.body {
        FuncBody::Internal(host_fn) => match host_fn(job, &arg_vals) {
            Ok(v) => Action::Complete(v),
            Err(e) => Action::Error(e),
        },
        FuncBody::External(body) => {
            job.scopes.push(Scope::new(ScopeKind::Func, Some(Rc::clone(name))));
            for (i, spec) in func.args.iter().enumerate() {
                let value = arg_vals.get(i).cloned().or_else(|| spec.default.clone()).unwrap_or(Value::Nil);
                job.scopes.declare(Variable::normal(Rc::clone(&spec.name), value));
            }
            frame.step = 1;
            Action::PushMarked(Rc::clone(body), FrameMarker::FunctionRoot)
        }
    }
}

fn return_step(frame: &mut StackNode, expr: &Option<Rc<Node>>) -> Action {
    match expr {
        None => Action::Return(Value::Nil),
        Some(e) => {
            if frame.pending.is_empty() {
                frame.step = 1;
                Action::Push(Rc::clone(e))
            } else {
                Action::Return(frame.pending[0].clone())
            }
        }
    }
}
