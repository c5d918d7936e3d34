//! Render Module for the Block Compiler
//!
//! A compiled template is a [`RenderFunction`]: its static fragments plus a
//! tree of [`Op`]s. Rendering interprets the ops against a [`Scope`] and
//! returns a fresh, unmounted [`Block`] tree.

use serde_json::Value;
use std::rc::Rc;
use thiserror::Error;

use crate::block::{
    Block, CollectionBlock, CollectionItem, Handler, MultiBlock, RawFragmentBlock,
    StaticContentBlock, TextBlock,
};
use crate::codegen::StaticFragment;
use crate::dom::Event;
use crate::eval::{evaluate, get_values, is_truthy, to_display_string, with_default};
use crate::expression::Expr;
use crate::scope::Scope;
use crate::validate::CompilerError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("Missing template: \"{0}\"")]
    MissingTemplate(String),

    #[error("Invalid loop expression: {0}")]
    InvalidLoopExpression(String),

    #[error("{0}")]
    Expression(String),

    #[error(transparent)]
    Compile(#[from] CompilerError),

    #[error("Invalid render plan: {0}")]
    Plan(String),
}

/// Resolves `t-call` targets while rendering.
pub trait TemplateCaller {
    fn call(&self, name: &str, scope: &Scope) -> Result<Block, RenderError>;
}

/// Caller for templates rendered outside a template set.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTemplates;

impl TemplateCaller for NoTemplates {
    fn call(&self, name: &str, _scope: &Scope) -> Result<Block, RenderError> {
        Err(RenderError::MissingTemplate(name.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLAN
// ═══════════════════════════════════════════════════════════════════════════════

/// Where a built block goes in the enclosing block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The block returned by the render function (or a rendered body)
    Root,
    /// Child slot of the enclosing static or multi block
    Child(usize),
    /// The current collection item
    Item,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Build { slot: Slot, block: BlockPlan },
    SetData { index: usize, value: ValueExpr },
    SetHandler { index: usize, handler: HandlerPlan },
    If {
        branches: Vec<(Expr, Vec<Op>)>,
        otherwise: Option<Vec<Op>>,
    },
    Bind { name: String, value: BindValue },
    /// Run in a fresh child scope
    Scoped(Vec<Op>),
    /// Key the collection item built by `ops`
    Keyed { key: Expr, ops: Vec<Op> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockPlan {
    Static { fragment: usize, ops: Vec<Op> },
    Multi { size: usize, ops: Vec<Op> },
    Collection(LoopPlan),
    Text(ValueExpr),
    Raw(ValueExpr),
    Call { name: TemplateName },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopPlan {
    pub collection: Expr,
    pub item: String,
    pub body: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateName {
    Static(String),
    Dynamic(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandlerPlan {
    pub event: String,
    pub method: String,
    pub args: Vec<Expr>,
}

/// A value read at render time.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    Expr(Expr),
    /// Falls back to literal text on null or false
    WithDefault(Expr, String),
    /// Falls back to the markup rendered by the ops on null or false
    OrBody(Expr, Vec<Op>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindValue {
    pub expr: Option<Expr>,
    pub fallback: Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fallback {
    None,
    Text(String),
    Body(Vec<Op>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDER FUNCTION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct RenderFunction {
    name: String,
    fragments: Vec<Rc<StaticFragment>>,
    body: Vec<Op>,
    protect_scope: bool,
}

impl RenderFunction {
    pub fn new(
        name: &str,
        fragments: Vec<Rc<StaticFragment>>,
        body: Vec<Op>,
        protect_scope: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            fragments,
            body,
            protect_scope,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fragments(&self) -> &[Rc<StaticFragment>] {
        &self.fragments
    }

    pub fn body(&self) -> &[Op] {
        &self.body
    }

    /// Whether rendering runs in a child of the caller's scope, so that the
    /// template's `t-set` bindings do not leak out.
    pub fn protects_scope(&self) -> bool {
        self.protect_scope
    }

    pub fn render(&self, scope: &Scope, caller: &dyn TemplateCaller) -> Result<Block, RenderError> {
        log::trace!("render {}", self.name);
        let scope = if self.protect_scope {
            scope.child()
        } else {
            scope.clone()
        };
        let mut executor = Executor {
            function: self,
            caller,
            key: None,
        };
        let mut root = None;
        executor.run(&self.body, &scope, &mut Frame::Root(&mut root))?;
        Ok(root.unwrap_or_else(|| Block::Text(TextBlock::new(""))))
    }

    /// Render against a bare context, without any callable templates.
    pub fn call(&self, context: Value) -> Result<Block, RenderError> {
        self.render(&Scope::new(context), &NoTemplates)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXECUTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// The block currently receiving built children and slot values.
enum Frame<'b> {
    Root(&'b mut Option<Block>),
    Static(&'b mut StaticContentBlock),
    Multi(&'b mut MultiBlock),
    Item(&'b mut Option<CollectionItem>),
}

impl Frame<'_> {
    fn describe(&self) -> &'static str {
        match self {
            Frame::Root(_) => "root",
            Frame::Static(_) => "static block",
            Frame::Multi(_) => "multi block",
            Frame::Item(_) => "collection item",
        }
    }
}

struct Executor<'a> {
    function: &'a RenderFunction,
    caller: &'a dyn TemplateCaller,
    /// Serialized `t-key` of the collection item being built
    key: Option<String>,
}

impl Executor<'_> {
    fn run(&mut self, ops: &[Op], scope: &Scope, frame: &mut Frame<'_>) -> Result<(), RenderError> {
        for op in ops {
            self.step(op, scope, frame)?;
        }
        Ok(())
    }

    fn step(&mut self, op: &Op, scope: &Scope, frame: &mut Frame<'_>) -> Result<(), RenderError> {
        match op {
            Op::Build { slot, block } => {
                let built = self.build(block, scope)?;
                self.attach(frame, *slot, built)
            }
            Op::SetData { index, value } => {
                let value = self.value(value, scope)?;
                match frame {
                    Frame::Static(block) => {
                        block.set_data(*index, value);
                        Ok(())
                    }
                    other => Err(RenderError::Plan(format!(
                        "data slot {} set on a {}",
                        index,
                        other.describe()
                    ))),
                }
            }
            Op::SetHandler { index, handler } => {
                let args = handler
                    .args
                    .iter()
                    .map(|arg| evaluate(arg, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                let callback = make_handler(scope, &handler.method, args);
                match frame {
                    Frame::Static(block) => {
                        block.set_handler(*index, callback);
                        Ok(())
                    }
                    other => Err(RenderError::Plan(format!(
                        "handler slot {} set on a {}",
                        index,
                        other.describe()
                    ))),
                }
            }
            Op::If {
                branches,
                otherwise,
            } => {
                for (condition, ops) in branches {
                    if is_truthy(&evaluate(condition, scope)?) {
                        return self.run(ops, scope, frame);
                    }
                }
                match otherwise {
                    Some(ops) => self.run(ops, scope, frame),
                    None => Ok(()),
                }
            }
            Op::Bind { name, value } => {
                let value = self.bind_value(value, scope)?;
                scope.set(name, value);
                Ok(())
            }
            Op::Scoped(ops) => self.run(ops, &scope.child(), frame),
            Op::Keyed { key, ops } => {
                let key = evaluate(key, scope)?.to_string();
                let saved = self.key.replace(key);
                let result = self.run(ops, scope, frame);
                self.key = saved;
                result
            }
        }
    }

    fn attach(&self, frame: &mut Frame<'_>, slot: Slot, block: Block) -> Result<(), RenderError> {
        match (frame, slot) {
            (Frame::Root(root), Slot::Root) => {
                **root = Some(block);
                Ok(())
            }
            (Frame::Item(item), Slot::Item) => {
                **item = Some(CollectionItem::new(self.key.clone(), block));
                Ok(())
            }
            (Frame::Static(parent), Slot::Child(index)) => {
                fill_child(parent.child_slot_mut(index), index, block)
            }
            (Frame::Multi(parent), Slot::Child(index)) => {
                fill_child(parent.child_slot_mut(index), index, block)
            }
            (other, slot) => Err(RenderError::Plan(format!(
                "cannot attach to {:?} of a {}",
                slot,
                other.describe()
            ))),
        }
    }

    fn build(&mut self, plan: &BlockPlan, scope: &Scope) -> Result<Block, RenderError> {
        match plan {
            BlockPlan::Static { fragment, ops } => {
                let fragment = self.function.fragments.get(*fragment).cloned().ok_or_else(|| {
                    RenderError::Plan(format!(
                        "{} has no fragment {}",
                        self.function.name, fragment
                    ))
                })?;
                let mut block = StaticContentBlock::new(fragment);
                self.run(ops, scope, &mut Frame::Static(&mut block))?;
                Ok(Block::Static(block))
            }
            BlockPlan::Multi { size, ops } => {
                let mut block = MultiBlock::new(*size);
                self.run(ops, scope, &mut Frame::Multi(&mut block))?;
                Ok(Block::Multi(block))
            }
            BlockPlan::Collection(plan) => self.build_collection(plan, scope),
            BlockPlan::Text(value) => {
                let value = self.value(value, scope)?;
                Ok(Block::Text(TextBlock::new(&to_display_string(&value))))
            }
            BlockPlan::Raw(value) => {
                let value = self.value(value, scope)?;
                Ok(Block::Raw(RawFragmentBlock::new(&to_display_string(&value))))
            }
            BlockPlan::Call { name } => {
                let name = match name {
                    TemplateName::Static(name) => name.clone(),
                    TemplateName::Dynamic(expr) => to_display_string(&evaluate(expr, scope)?),
                };
                self.caller.call(&name, scope)
            }
        }
    }

    fn build_collection(&mut self, plan: &LoopPlan, scope: &Scope) -> Result<Block, RenderError> {
        let collection = evaluate(&plan.collection, scope)?;
        let (items, values) = get_values(&collection)?;
        let count = items.len();
        let name = &plan.item;

        let mut built = Vec::with_capacity(count);
        for (index, (item, value)) in items.into_iter().zip(values).enumerate() {
            let iteration = scope.child();
            iteration.set(name, item);
            iteration.set(&format!("{}_first", name), Value::Bool(index == 0));
            iteration.set(&format!("{}_last", name), Value::Bool(index + 1 == count));
            iteration.set(&format!("{}_index", name), Value::from(index));
            iteration.set(&format!("{}_value", name), value);

            let saved = self.key.take();
            let mut slot = None;
            let result = self.run(&plan.body, &iteration, &mut Frame::Item(&mut slot));
            self.key = saved;
            result?;

            built.push(
                slot.unwrap_or_else(|| CollectionItem::new(None, Block::Text(TextBlock::new("")))),
            );
        }
        Ok(Block::Collection(CollectionBlock::new(built)))
    }

    fn value(&mut self, value: &ValueExpr, scope: &Scope) -> Result<Value, RenderError> {
        match value {
            ValueExpr::Expr(expr) => evaluate(expr, scope),
            ValueExpr::WithDefault(expr, text) => {
                let value = evaluate(expr, scope)?;
                Ok(with_default(value, || Value::String(text.clone())))
            }
            ValueExpr::OrBody(expr, ops) => match evaluate(expr, scope)? {
                Value::Null | Value::Bool(false) => Ok(Value::String(self.markup(ops, scope)?)),
                value => Ok(value),
            },
        }
    }

    fn bind_value(&mut self, bind: &BindValue, scope: &Scope) -> Result<Value, RenderError> {
        let value = match &bind.expr {
            Some(expr) => evaluate(expr, scope)?,
            None => Value::Null,
        };
        match &bind.fallback {
            Fallback::None => Ok(value),
            Fallback::Text(text) => Ok(with_default(value, || Value::String(text.clone()))),
            Fallback::Body(ops) => match value {
                Value::Null | Value::Bool(false) => Ok(Value::String(self.markup(ops, scope)?)),
                value => Ok(value),
            },
        }
    }

    /// Render a body to markup, for values that are passed around as text.
    fn markup(&mut self, ops: &[Op], scope: &Scope) -> Result<String, RenderError> {
        let saved = self.key.take();
        let mut root = None;
        let result = self.run(ops, scope, &mut Frame::Root(&mut root));
        self.key = saved;
        result?;
        Ok(root.map(|block| block.to_string()).unwrap_or_default())
    }
}

fn fill_child(
    target: Option<&mut Option<Block>>,
    index: usize,
    block: Block,
) -> Result<(), RenderError> {
    match target {
        Some(child) => {
            *child = Some(block);
            Ok(())
        }
        None => Err(RenderError::Plan(format!("no child slot {}", index))),
    }
}

fn make_handler(scope: &Scope, method: &str, args: Vec<Value>) -> Handler {
    let owner = scope.owner();
    let method = method.to_string();
    Rc::new(move |event: &Event| match &owner {
        Some(owner) => owner.handle_event(&method, &args, event),
        None => log::warn!("{} event for {} has no owner to receive it", event.kind, method),
    })
}
