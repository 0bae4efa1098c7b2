//! Regex extraction over command output

use std::collections::HashMap;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ExecError, Result};

/// One capture rule: a regular expression paired with the output key
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExtractRule {
    /// Regular expression applied line by line; the first capture group
    /// (or the whole match when there is none) becomes the value
    pub reg_expr: String,

    /// Key the captured value is stored under
    pub key: String,
}

impl ExtractRule {
    /// Create a rule from a pattern and a key
    pub fn new(reg_expr: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            reg_expr: reg_expr.into(),
            key: key.into(),
        }
    }
}

/// An ordered list of extraction rules
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Extract(pub Vec<ExtractRule>);

impl Extract {
    /// True when there are no rules
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply every rule to every line; later matches overwrite earlier ones
    pub fn extract<'a>(
        &self,
        data: &mut HashMap<String, String>,
        lines: impl Iterator<Item = &'a str>,
    ) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let lines: Vec<&str> = lines.collect();
        for rule in &self.0 {
            let pattern = Regex::new(&rule.reg_expr).map_err(|e| {
                ExecError::Extract(format!("bad pattern {:?}: {}", rule.reg_expr, e))
            })?;
            for line in &lines {
                if let Some(captures) = pattern.captures(line) {
                    let matched = captures
                        .get(1)
                        .or_else(|| captures.get(0))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default();
                    data.insert(rule.key.clone(), matched);
                }
            }
        }
        Ok(())
    }
}

impl From<Vec<ExtractRule>> for Extract {
    fn from(rules: Vec<ExtractRule>) -> Self {
        Extract(rules)
    }
}
