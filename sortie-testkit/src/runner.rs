use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sortie::{CommandOutput, CommandRunner, ShellCommand};

#[derive(Clone, Debug)]
enum Scripted {
    Output(CommandOutput),
    Error(String),
}

#[derive(Debug, Default)]
struct FakeState {
    queued: HashMap<String, VecDeque<Scripted>>,
    defaults: HashMap<String, CommandOutput>,
    calls: Vec<ShellCommand>,
}

/// Scripted stand-in for the scheduler CLI.
///
/// Responses are keyed by program name. Queued responses are used once, in
/// order; after that the program's default answers. A program with neither
/// fails as if it could not be run.
#[derive(Clone, Debug, Default)]
pub struct FakeCommandRunner {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next call to `program` with `output`.
    pub fn push_output(&self, program: &str, output: CommandOutput) -> &Self {
        self.push(program, Scripted::Output(output))
    }

    /// Fail the next call to `program` as if it could not be run.
    pub fn push_error(&self, program: &str, message: &str) -> &Self {
        self.push(program, Scripted::Error(message.to_string()))
    }

    /// Answer every unscripted call to `program` with `output`.
    pub fn set_default(&self, program: &str, output: CommandOutput) -> &Self {
        self.state
            .lock()
            .defaults
            .insert(program.to_string(), output);
        self
    }

    fn push(&self, program: &str, scripted: Scripted) -> &Self {
        self.state
            .lock()
            .queued
            .entry(program.to_string())
            .or_default()
            .push_back(scripted);
        self
    }

    pub fn calls(&self) -> Vec<ShellCommand> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, program: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.program == program)
            .count()
    }

    pub fn assert_call_count_eq(&self, program: &str, expected: usize) {
        let actual = self.call_count(program);
        assert_eq!(
            actual, expected,
            "Expected {expected} calls to {program}, got {actual}"
        );
    }
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn run(&self, command: &ShellCommand) -> anyhow::Result<CommandOutput> {
        let mut state = self.state.lock();
        state.calls.push(command.clone());
        let next = state
            .queued
            .get_mut(&command.program)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Error(message)) => Err(anyhow::anyhow!(message)),
            None => match state.defaults.get(&command.program) {
                Some(output) => Ok(output.clone()),
                None => Err(anyhow::anyhow!("no scripted response for `{command}`")),
            },
        }
    }
}
