//! Variable substitution for hook arguments and environment values.
//!
//! Templates reference a fixed set of variables with `{{.Name}}` actions
//! (whitespace inside the braces is allowed): `.NodeID`, `.Event` and
//! `.RaftAddr`. Anything else inside `{{ }}` is an error; text outside
//! actions is copied through unchanged.

use std::collections::BTreeMap;

use crate::errors::TemplateError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Values available to hook templates for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateData {
    pub node_id: String,
    pub event: String,
    pub raft_addr: String,
}

impl TemplateData {
    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "NodeID" => Some(&self.node_id),
            "Event" => Some(&self.event),
            "RaftAddr" => Some(&self.raft_addr),
            _ => None,
        }
    }
}

/// Render a single template string.
pub fn expand_template(template: &str, data: &TemplateData) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find(OPEN) {
        output.push_str(&rest[..start]);

        let action_start = start + OPEN.len();
        let Some(len) = rest[action_start..].find(CLOSE) else {
            return Err(TemplateError::Unclosed {
                offset: offset + start,
            });
        };

        let action = rest[action_start..action_start + len].trim();
        let name = action
            .strip_prefix('.')
            .filter(|name| !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
            .ok_or_else(|| TemplateError::Malformed {
                action: action.to_string(),
            })?;
        let value = data
            .lookup(name)
            .ok_or_else(|| TemplateError::UndefinedVariable {
                name: name.to_string(),
            })?;
        output.push_str(value);

        let consumed = action_start + len + CLOSE.len();
        offset += consumed;
        rest = &rest[consumed..];
    }

    output.push_str(rest);
    Ok(output)
}

/// Render every value of an environment template map.
///
/// The first failure aborts the whole expansion.
pub fn expand_environment(
    env: &BTreeMap<String, String>,
    data: &TemplateData,
) -> Result<BTreeMap<String, String>, TemplateError> {
    env.iter()
        .map(|(key, value)| Ok((key.clone(), expand_template(value, data)?)))
        .collect()
}

/// Render every element of an argument vector.
pub fn expand_args(args: &[String], data: &TemplateData) -> Result<Vec<String>, TemplateError> {
    args.iter().map(|arg| expand_template(arg, data)).collect()
}
