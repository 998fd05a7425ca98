//! Mock stages and a scripted command runner.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::context::StageContext;
use crate::core::StageOutput;
use crate::errors::ReleaseflowError;
use crate::exec::{CommandInvocation, CommandOutput, CommandRunner};
use crate::stages::Stage;

/// A mock stage that records calls and returns a configurable output.
#[derive(Debug)]
pub struct MockStage {
    name: String,
    output: Mutex<StageOutput>,
    delay: Option<Duration>,
    call_count: Mutex<usize>,
    journal: Option<Arc<Mutex<Vec<String>>>>,
}

impl MockStage {
    /// Creates a new mock stage with a success output.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: Mutex::new(StageOutput::succeeded_empty()),
            delay: None,
            call_count: Mutex::new(0),
            journal: None,
        }
    }

    /// Creates a mock stage that fails with `error`.
    #[must_use]
    pub fn failing(name: impl Into<String>, error: impl Into<String>) -> Self {
        let stage = Self::new(name);
        stage.set_output(StageOutput::failed(error));
        stage
    }

    /// Makes the stage sleep before returning.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Appends `"<name>:start"` and `"<name>:end"` to a shared journal.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Sets the output to return.
    pub fn set_output(&self, output: StageOutput) {
        *self.output.lock() = output;
    }

    /// Returns the number of times the stage was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl Stage for MockStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        *self.call_count.lock() += 1;
        if let Some(journal) = &self.journal {
            journal.lock().push(format!("{}:start", self.name));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(journal) = &self.journal {
            journal.lock().push(format!("{}:end", self.name));
        }
        self.output.lock().clone()
    }
}

#[derive(Debug, Clone)]
struct Rule {
    program: String,
    needle: String,
    output: CommandOutput,
}

#[derive(Debug, Clone)]
struct CloneFile {
    url_fragment: String,
    file: String,
    content: String,
}

/// A command runner that answers from a script and records every call.
///
/// Unscripted commands succeed silently. Successful `docker save --output`
/// calls write a small archive, and successful `git clone` calls create the
/// target directory populated with any registered files, so stages that
/// read their tools' output work unchanged.
#[derive(Debug, Default)]
pub struct ScriptedCommandRunner {
    rules: Mutex<Vec<Rule>>,
    clone_files: Vec<CloneFile>,
    invocations: Mutex<Vec<CommandInvocation>>,
}

impl ScriptedCommandRunner {
    /// Creates a runner where everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates clones of repositories whose URL contains `url_fragment`.
    #[must_use]
    pub fn with_clone_file(
        mut self,
        url_fragment: impl Into<String>,
        file: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.clone_files.push(CloneFile {
            url_fragment: url_fragment.into(),
            file: file.into(),
            content: content.into(),
        });
        self
    }

    /// Answers calls of `program` with an argument containing `needle`.
    ///
    /// Later rules take precedence over earlier ones.
    pub fn respond(&self, program: &str, needle: &str, output: CommandOutput) {
        self.rules.lock().push(Rule {
            program: program.to_string(),
            needle: needle.to_string(),
            output,
        });
    }

    /// Makes matching calls exit with `exit_code` and `stderr`.
    pub fn fail(&self, program: &str, needle: &str, exit_code: i32, stderr: &str) {
        self.respond(program, needle, CommandOutput::failure(exit_code, stderr));
    }

    /// Removes all scripted answers.
    pub fn reset_rules(&self) {
        self.rules.lock().clear();
    }

    /// Returns every recorded invocation.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.lock().clone()
    }

    /// Counts calls of `program` with an argument containing `needle`.
    #[must_use]
    pub fn count(&self, program: &str, needle: &str) -> usize {
        self.invocations
            .lock()
            .iter()
            .filter(|inv| inv.program == program && inv.has_arg(needle))
            .count()
    }

    /// Returns the first call of `program` with an argument containing `needle`.
    #[must_use]
    pub fn find(&self, program: &str, needle: &str) -> Option<CommandInvocation> {
        self.invocations
            .lock()
            .iter()
            .find(|inv| inv.program == program && inv.has_arg(needle))
            .cloned()
    }

    fn scripted_output(&self, invocation: &CommandInvocation) -> CommandOutput {
        self.rules
            .lock()
            .iter()
            .rev()
            .find(|rule| rule.program == invocation.program && invocation.has_arg(&rule.needle))
            .map_or_else(CommandOutput::success, |rule| rule.output.clone())
    }

    async fn simulate_effects(&self, invocation: &CommandInvocation) -> std::io::Result<()> {
        let args = &invocation.args;
        match invocation.program.as_str() {
            "docker" if args.first().map(String::as_str) == Some("save") => {
                if let Some(archive) = invocation.arg_after("--output") {
                    let archive = Path::new(archive);
                    if let Some(parent) = archive.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    let image = args.last().map_or("", String::as_str);
                    tokio::fs::write(archive, format!("archive:{image}")).await?;
                }
            }
            "git" if args.iter().any(|a| a == "clone") && args.len() >= 2 => {
                let target = Path::new(&args[args.len() - 1]);
                let url = &args[args.len() - 2];
                tokio::fs::create_dir_all(target).await?;
                for clone_file in self.clone_files.iter().filter(|f| url.contains(&f.url_fragment)) {
                    let path = target.join(&clone_file.file);
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(path, &clone_file.content).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, ReleaseflowError> {
        self.invocations.lock().push(invocation.clone());

        let output = self.scripted_output(invocation);
        if output.is_success() {
            self.simulate_effects(invocation).await?;
        }
        Ok(output)
    }
}
