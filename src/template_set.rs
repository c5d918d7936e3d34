//! Template Set Module for the Block Compiler
//!
//! A registry of named templates. Templates are compiled on first use and
//! the compiled function is kept; `t-call` inside any of them resolves
//! against the same set.

use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::block::Block;
use crate::cache::CompiledCache;
use crate::compiler::compile_with_options;
use crate::config::CompileOptions;
use crate::render::{RenderError, RenderFunction, TemplateCaller};
use crate::scope::{EventOwner, Scope};

#[derive(Debug, Default)]
pub struct TemplateSet {
    templates: HashMap<String, String>,
    functions: RefCell<HashMap<String, Rc<RenderFunction>>>,
    cache: CompiledCache,
    options: CompileOptions,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: CompileOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Register `text` under `name`, replacing any previous template.
    pub fn add(&mut self, name: &str, text: &str) {
        if self.templates.insert(name.to_string(), text.to_string()).is_some() {
            log::debug!("template {} replaced", name);
        }
        self.functions.borrow_mut().remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Compiled function for `name`, compiling it on first request.
    pub fn get_function(&self, name: &str) -> Result<Rc<RenderFunction>, RenderError> {
        if let Some(function) = self.functions.borrow().get(name) {
            return Ok(function.clone());
        }
        let text = self
            .templates
            .get(name)
            .ok_or_else(|| RenderError::MissingTemplate(name.to_string()))?;
        let options = self.options.clone().named(name);
        let function = self
            .cache
            .get_or_compile(text, || compile_with_options(text, &options))?;
        self.functions
            .borrow_mut()
            .insert(name.to_string(), function.clone());
        Ok(function)
    }

    pub fn render(&self, name: &str, context: Value) -> Result<Block, RenderError> {
        self.get_function(name)?.render(&Scope::new(context), self)
    }

    /// Render with `owner` receiving the template's `t-on-*` events.
    pub fn render_with_owner(
        &self,
        name: &str,
        context: Value,
        owner: Rc<dyn EventOwner>,
    ) -> Result<Block, RenderError> {
        self.get_function(name)?
            .render(&Scope::with_owner(context, owner), self)
    }

    pub fn render_to_string(&self, name: &str, context: Value) -> Result<String, RenderError> {
        Ok(self.render(name, context)?.to_string())
    }
}

impl TemplateCaller for TemplateSet {
    fn call(&self, name: &str, scope: &Scope) -> Result<Block, RenderError> {
        self.get_function(name)?.render(scope, self)
    }
}
