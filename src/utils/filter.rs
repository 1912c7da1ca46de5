//! Include/exclude name filter used to select which entities get collected.
//!
//! Patterns are shell-style globs (`*`, `?`, `[...]`, `{a,b}`). Both the patterns and
//! every candidate are lower-cased, so matching is case-insensitive.

use crate::utils::errors::ConfigError;
use glob::Pattern;

#[derive(Debug, Clone, Default)]
pub struct IdentityFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl IdentityFilter {
    /// Compile the include and exclude lists. An empty include list admits
    /// every name that is not excluded.
    pub fn build(include: &[String], exclude: &[String]) -> Result<Self, ConfigError> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Excludes win over includes.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(&name)) {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches(&name))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    let mut compiled = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let alternatives = expand_alternatives(&pattern.to_lowercase()).ok_or_else(|| {
            ConfigError::UnbalancedBraces {
                pattern: pattern.clone(),
            }
        })?;
        for alternative in alternatives {
            let glob = Pattern::new(&alternative).map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
            compiled.push(glob);
        }
    }
    Ok(compiled)
}

/// Expand `{a,b}` groups, nested or not, into plain glob patterns.
/// Returns `None` when braces do not pair up.
fn expand_alternatives(pattern: &str) -> Option<Vec<String>> {
    let Some(open) = pattern.find('{') else {
        return (!pattern.contains('}')).then(|| vec![pattern.to_string()]);
    };
    let prefix = &pattern[..open];
    if prefix.contains('}') {
        return None;
    }

    let mut depth = 0;
    let mut bounds = vec![open];
    for (offset, c) in pattern[open..].char_indices() {
        let index = open + offset;
        match c {
            '{' => depth += 1,
            ',' if depth == 1 => bounds.push(index),
            '}' => {
                depth -= 1;
                if depth == 0 {
                    bounds.push(index);
                    break;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }

    let close = *bounds.last()?;
    let suffix = &pattern[close + 1..];
    let mut expanded = Vec::new();
    for window in bounds.windows(2) {
        let alternative = &pattern[window[0] + 1..window[1]];
        expanded.extend(expand_alternatives(&format!("{prefix}{alternative}{suffix}"))?);
    }
    Some(expanded)
}
