//! Scripted fakes for the command boundary.

use crate::error::{Result, ToolError};
use crate::process::{CommandRunner, Invocation};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

type Rule = (String, Vec<String>, Result<String>);

/// Records every invocation and answers from rules, then from a FIFO queue.
///
/// A rule matches by program and argument prefix and is consumed on first use.
/// When nothing matches, the runner replies with empty stdout.
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<Invocation>>,
    rules: Mutex<Vec<Rule>>,
    queue: Mutex<VecDeque<Result<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, stdout: impl Into<String>) -> &Self {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(stdout.into()));
        self
    }

    pub fn push_err(&self, message: impl Into<String>) -> &Self {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(ToolError::ExecutionFailed(message.into())));
        self
    }

    pub fn on_ok(&self, program: &str, args: &[&str], stdout: impl Into<String>) -> &Self {
        self.push_rule(program, args, Ok(stdout.into()))
    }

    pub fn on_err(&self, program: &str, args: &[&str], message: impl Into<String>) -> &Self {
        self.push_rule(
            program,
            args,
            Err(ToolError::ExecutionFailed(message.into())),
        )
    }

    fn push_rule(&self, program: &str, args: &[&str], reply: Result<String>) -> &Self {
        self.rules.lock().unwrap_or_else(|e| e.into_inner()).push((
            program.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
            reply,
        ));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_matching(&self, program: &str, args: &[&str]) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(program, args))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(invocation.clone());

        {
            let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            let hit = rules.iter().position(|(program, args, _)| {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                invocation.starts_with(program, &args)
            });
            if let Some(idx) = hit {
                let (_, _, reply) = rules.remove(idx);
                return reply;
            }
        }

        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}
