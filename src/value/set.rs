//! Sets (class-like definitions) and objects (their instances).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::variable::Variable;

/// A class-like definition: a name and a member table of default bindings.
/// Instances (`Object`) start with their own copy of these bindings.
#[derive(Debug)]
pub struct SetDetail {
    pub name: Rc<str>,
    pub members: RefCell<HashMap<Rc<str>, Variable>>,
}

impl SetDetail {
    pub fn new(name: impl Into<Rc<str>>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            members: RefCell::new(HashMap::new()),
        })
    }
}

/// An instance of a set: its own member table plus a reference to the set
/// detail that defined it.
#[derive(Debug)]
pub struct Object {
    pub set: Rc<SetDetail>,
    pub members: RefCell<HashMap<Rc<str>, Variable>>,
}

impl Object {
    pub fn new(set: Rc<SetDetail>) -> Self {
        Self {
            set,
            members: RefCell::new(HashMap::new()),
        }
    }

    pub fn get_member(&self, name: &str) -> Option<super::Value> {
        self.members.borrow().get(name).map(|v| v.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn object_members_are_independent_of_the_set_detail() {
        let set = SetDetail::new("Point");
        let obj = Object::new(Rc::clone(&set));
        obj.members
            .borrow_mut()
            .insert(Rc::from("x"), Variable::normal("x", Value::Int(3)));
        assert_eq!(obj.get_member("x").unwrap().to_int(), 3);
        assert!(set.members.borrow().is_empty());
    }
}
