//! Test doubles shared by unit tests

use crate::domain::ports::ProcessRunner;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

enum Reply {
    Output(String),
    Fail(i32),
}

struct Rule {
    pattern: String,
    reply: Reply,
    remaining: Option<usize>,
}

/// Process runner that records commands and answers from a script
///
/// Rules match on substrings and are tried in insertion order; a command no
/// rule matches succeeds with empty output.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer matching commands with `output`
    pub(crate) fn respond(&self, pattern: &str, output: &str) -> &Self {
        self.push(pattern, Reply::Output(output.to_string()), None)
    }

    /// Fail matching commands with exit `status`
    pub(crate) fn fail(&self, pattern: &str, status: i32) -> &Self {
        self.push(pattern, Reply::Fail(status), None)
    }

    /// Fail the next `times` matching commands with exit `status`
    pub(crate) fn fail_times(&self, pattern: &str, status: i32, times: usize) -> &Self {
        self.push(pattern, Reply::Fail(status), Some(times))
    }

    fn push(&self, pattern: &str, reply: Reply, remaining: Option<usize>) -> &Self {
        self.rules.lock().push(Rule {
            pattern: pattern.to_string(),
            reply,
            remaining,
        });
        self
    }

    /// Every command run so far
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of commands run that contain `pattern`
    pub(crate) fn count(&self, pattern: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.contains(pattern)).count()
    }

    /// Index of the first command containing `pattern`
    pub(crate) fn position(&self, pattern: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| c.contains(pattern))
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, command: &str) -> Result<String> {
        self.calls.lock().push(command.to_string());

        let mut rules = self.rules.lock();
        let rule = rules.iter_mut().find(|rule| {
            command.contains(&rule.pattern) && rule.remaining.map_or(true, |n| n > 0)
        });

        match rule {
            Some(rule) => {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                match &rule.reply {
                    Reply::Output(out) => Ok(out.clone()),
                    Reply::Fail(status) => Err(Error::Command {
                        command: command.to_string(),
                        status: Some(*status),
                        stderr: "scripted failure".to_string(),
                    }),
                }
            }
            None => Ok(String::new()),
        }
    }
}
