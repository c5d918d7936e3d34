//! Scope Module for the Block Compiler
//!
//! Rendering resolves identifiers against a chain of frames. The root frame
//! wraps the rendering context (never written to); every directive that
//! needs isolation pushes a child frame and drops it afterwards. Writes
//! always land in the innermost frame, lookups walk outwards.

use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::dom::Event;

/// Name under which a call body is exposed to the called template.
pub const ZERO: &str = "0";

/// Receiver of `t-on-*` handlers. Found by walking the scope chain.
pub trait EventOwner {
    fn handle_event(&self, method: &str, args: &[Value], event: &Event);
}

struct Frame {
    parent: Option<Scope>,
    context: Option<Value>,
    bindings: RefCell<HashMap<String, Value>>,
    owner: Option<Rc<dyn EventOwner>>,
}

#[derive(Clone)]
pub struct Scope(Rc<Frame>);

impl Scope {
    /// Root scope over a rendering context.
    pub fn new(context: Value) -> Self {
        Self(Rc::new(Frame {
            parent: None,
            context: Some(context),
            bindings: RefCell::new(HashMap::new()),
            owner: None,
        }))
    }

    /// Root scope whose `t-on-*` handlers are delivered to `owner`.
    pub fn with_owner(context: Value, owner: Rc<dyn EventOwner>) -> Self {
        Self(Rc::new(Frame {
            parent: None,
            context: Some(context),
            bindings: RefCell::new(HashMap::new()),
            owner: Some(owner),
        }))
    }

    /// A fresh frame whose lookups fall back to `self`.
    pub fn child(&self) -> Self {
        Self(Rc::new(Frame {
            parent: Some(self.clone()),
            context: None,
            bindings: RefCell::new(HashMap::new()),
            owner: None,
        }))
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut frame = Some(self);
        while let Some(scope) = frame {
            if let Some(value) = scope.0.bindings.borrow().get(name) {
                return Some(value.clone());
            }
            if let Some(value) = scope.0.context.as_ref().and_then(|c| c.get(name)) {
                return Some(value.clone());
            }
            frame = scope.0.parent.as_ref();
        }
        None
    }

    /// Bind `name` in the innermost frame.
    pub fn set(&self, name: &str, value: Value) {
        self.0.bindings.borrow_mut().insert(name.to_string(), value);
    }

    pub fn owner(&self) -> Option<Rc<dyn EventOwner>> {
        let mut frame = Some(self);
        while let Some(scope) = frame {
            if let Some(owner) = &scope.0.owner {
                return Some(owner.clone());
            }
            frame = scope.0.parent.as_ref();
        }
        None
    }

    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut frame = self.0.parent.as_ref();
        while let Some(scope) = frame {
            depth += 1;
            frame = scope.0.parent.as_ref();
        }
        depth
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("depth", &self.depth())
            .field("bindings", &self.0.bindings.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_walks_to_context() {
        let root = Scope::new(json!({"a": 1, "b": 2}));
        let child = root.child();
        child.set("a", json!(10));
        assert_eq!(child.lookup("a"), Some(json!(10)));
        assert_eq!(child.lookup("b"), Some(json!(2)));
        assert_eq!(root.lookup("a"), Some(json!(1)));
        assert_eq!(child.lookup("missing"), None);
    }

    #[test]
    fn test_writes_stay_in_innermost_frame() {
        let root = Scope::new(json!({}));
        let outer = root.child();
        outer.set("x", json!("outer"));
        {
            let inner = outer.child();
            inner.set("x", json!("inner"));
            assert_eq!(inner.lookup("x"), Some(json!("inner")));
            assert_eq!(inner.depth(), 2);
        }
        assert_eq!(outer.lookup("x"), Some(json!("outer")));
    }

    #[test]
    fn test_owner_is_inherited() {
        struct Nobody;
        impl EventOwner for Nobody {
            fn handle_event(&self, _: &str, _: &[Value], _: &Event) {}
        }
        let root = Scope::with_owner(json!({}), Rc::new(Nobody));
        assert!(root.child().child().owner().is_some());
        assert!(Scope::new(json!({})).child().owner().is_none());
    }
}
