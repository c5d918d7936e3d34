//! Config Module for the Block Compiler
//!
//! Options accepted by the parser, the compiler and directory discovery.

use serde::{Deserialize, Serialize};

use crate::validate::CompilerError;

pub const ERR_INVALID_OPTIONS: &str = "CONFIG_ERROR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    /// Keep text nodes exactly as written instead of collapsing whitespace
    pub preserve_whitespace: bool,
    /// Name used in error messages and fragment names
    pub template_name: Option<String>,
    /// File extensions picked up by directory discovery
    pub template_extensions: Vec<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            preserve_whitespace: false,
            template_name: None,
            template_extensions: vec!["xml".to_string(), "html".to_string()],
        }
    }
}

impl CompileOptions {
    pub fn from_json(text: &str) -> Result<Self, CompilerError> {
        serde_json::from_str(text).map_err(|e| {
            CompilerError::new(
                ERR_INVALID_OPTIONS,
                &format!("Invalid compile options: {}", e),
                "",
                e.line() as u32,
                e.column() as u32,
            )
        })
    }

    pub fn named(mut self, name: &str) -> Self {
        self.template_name = Some(name.to_string());
        self
    }

    pub fn name(&self) -> &str {
        self.template_name.as_deref().unwrap_or("anonymous")
    }

    /// Whether discovery should load a file with this extension.
    pub fn accepts_extension(&self, extension: &str) -> bool {
        self.template_extensions
            .iter()
            .any(|accepted| accepted.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }
}
