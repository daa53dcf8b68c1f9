use std::fs::{File, OpenOptions};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::process;
use std::sync::Arc;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::common::Error;
use crate::exec::{self, ChildTask, PipeChain, PipelineGroup, ProcessTable, StageIo};
use crate::log::{user_error, ShellLogger};

mod builtins;
mod history;
mod parse;
mod vars;

use builtins::Handler;
use history::History;
use vars::VarStore;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE_MSG: &str = "usage: oxsh [-h | -V]";

/// The orchestration context: every mutable table the interpreter owns.
pub(crate) struct Shell {
    pub(crate) vars: VarStore,
    pub(crate) history: History,
    pub(crate) table: Arc<ProcessTable>,
    pub(crate) group: Arc<PipelineGroup>,
    forked: usize,
}

pub fn main() {
    ShellLogger::new("oxsh: ").into_global_logger();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => {}
        Some("-V" | "--version") => {
            println_ignore_io_error!("oxsh {VERSION}");
            return;
        }
        Some("-h" | "--help") => {
            println_ignore_io_error!("{USAGE_MSG}");
            return;
        }
        Some(other) => {
            user_error!("unexpected argument: '{other}'");
            println_ignore_io_error!("{USAGE_MSG}");
            process::exit(1);
        }
    }

    if let Err(err) = run() {
        user_error!("{err}");
        process::exit(1);
    }
}

fn run() -> Result<(), Error> {
    let mut shell = Shell::new();
    exec::start_reaper(Arc::clone(&shell.table), Arc::clone(&shell.group))?;

    let mut editor = DefaultEditor::new().map_err(readline_error)?;

    loop {
        let prompt = format!("{}-oxsh> ", shell.forked);
        match editor.readline(&prompt) {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                shell.history.record(&line);
                shell.run_line(&line);
            }
            // Ctrl-C ends the session like an external interrupt
            Err(ReadlineError::Interrupted) => shell.shutdown(0),
            Err(ReadlineError::Eof) => process::exit(1),
            Err(err) => return Err(readline_error(err)),
        }
    }
}

fn readline_error(err: ReadlineError) -> Error {
    match err {
        ReadlineError::Io(err) => Error::Io(None, err),
        other => Error::Io(
            None,
            std::io::Error::new(std::io::ErrorKind::Other, other),
        ),
    }
}

impl Shell {
    fn new() -> Self {
        Self {
            vars: VarStore::from_process_env(),
            history: History::new(),
            table: Arc::new(ProcessTable::new()),
            group: Arc::new(PipelineGroup::new()),
            forked: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            vars: VarStore::empty(),
            history: History::new(),
            table: Arc::new(ProcessTable::new()),
            group: Arc::new(PipelineGroup::new()),
            forked: 0,
        }
    }

    /// Kill every tracked child and terminate the interpreter.
    pub(crate) fn shutdown(&self, code: i32) -> ! {
        self.table.kill_all();
        process::exit(code)
    }

    /// Execute one input line: each `;`-separated command in order, each one
    /// attempted independently of the others' failures.
    pub(crate) fn run_line(&mut self, line: &str) {
        let commands: Vec<String> = parse::split_commands(line).map(str::to_string).collect();
        for command in commands {
            let stages = parse::split_stages(&command);
            if stages.len() == 1 {
                self.run_single(stages[0]);
            } else {
                self.run_pipeline(&stages);
            }
        }
    }

    /// Execute a single non-piped command, with redirection and background
    /// markers honored.
    fn run_single(&mut self, stage: &str) {
        let spec = match parse::parse_stage(parse::tokenize(stage)) {
            Ok(spec) => spec,
            Err(err) => {
                user_error!("{err}");
                return;
            }
        };
        if spec.argv.is_empty() {
            return;
        }

        // both files are opened (and the output truncated) before anything
        // else happens; a file that cannot be opened means nothing runs
        let input = spec.input.as_deref().map(open_input);
        let output = spec.output.as_deref().map(open_output);
        if input.as_ref().is_some_and(Option::is_none)
            || output.as_ref().is_some_and(Option::is_none)
        {
            return;
        }
        let input = input.flatten();
        let output = output.flatten();

        if spec.argv[0].contains('=') {
            if let Err(err) = self.vars.assign(&spec.argv[0]) {
                user_error!("{err}");
            }
            return;
        }

        match builtins::lookup(&spec.argv[0]).map(|builtin| builtin.handler) {
            Some(Handler::InProcess(run)) => {
                if let Err(err) = run(self, &spec.argv) {
                    user_error!("{err}");
                }
            }
            routed => {
                let io = StageIo {
                    input: input.as_ref().map(|file| file.as_fd()),
                    output: output.as_ref().map(|file| file.as_fd()),
                };
                let spawned = match routed {
                    Some(Handler::InChild(run)) => {
                        let shell: &Shell = self;
                        let argv = &spec.argv;
                        let task = move || builtins::child_status(run, shell, argv);
                        exec::spawn(ChildTask::Builtin(&task), io, &shell.table, None)
                    }
                    _ => exec::spawn(ChildTask::Program(&spec.argv), io, &self.table, None),
                };

                match spawned {
                    Ok(pid) => {
                        self.forked += 1;
                        if !spec.background {
                            self.table.wait_clear(pid);
                        }
                    }
                    Err(err) => user_error!("{err}"),
                }
            }
        }
    }

    /// Launch a multi-stage pipeline left to right.
    ///
    /// Only the final stage is waited on; the pipes order everything else.
    /// A stage that cannot be started aborts the launch and takes the
    /// already-running siblings down.
    fn run_pipeline(&mut self, stages: &[&str]) {
        let stage_tokens: Vec<Vec<String>> = stages.iter().map(|stage| parse::tokenize(stage)).collect();
        if stage_tokens.iter().any(|argv| argv.is_empty()) {
            user_error!("{}", Error::EmptyStage);
            return;
        }

        if !self.table.has_capacity(stage_tokens.len()) {
            user_error!("{}", Error::InsufficientResources);
            return;
        }

        let mut chain = match PipeChain::open(stage_tokens.len()) {
            Ok(chain) => chain,
            Err(err) => {
                user_error!("cannot create pipe: {err}");
                return;
            }
        };

        self.group.begin();

        let last = stage_tokens.len() - 1;
        let mut foreground = None;

        for (index, argv) in stage_tokens.iter().enumerate() {
            if self.group.is_aborted() {
                break;
            }

            if argv[0].contains('=') {
                if let Err(err) = self.vars.assign(&argv[0]) {
                    user_error!("{err}");
                }
                continue;
            }

            if let Some(Handler::InProcess(run)) = builtins::lookup(&argv[0]).map(|b| b.handler) {
                // in-process built-ins are not wired into the pipe chain
                if let Err(err) = run(self, argv) {
                    user_error!("{err}");
                }
                continue;
            }

            let io = chain.stage_io(index, stage_tokens.len());
            let spawned = match builtins::lookup(&argv[0]).map(|b| b.handler) {
                Some(Handler::InChild(run)) => {
                    let shell: &Shell = self;
                    let task = move || builtins::child_status(run, shell, argv);
                    exec::spawn(ChildTask::Builtin(&task), io, &shell.table, Some(&shell.group))
                }
                _ => exec::spawn(ChildTask::Program(argv), io, &self.table, Some(&self.group)),
            };
            chain.close_upstream(index);

            match spawned {
                Ok(pid) => {
                    self.forked += 1;
                    if index == last {
                        foreground = Some(pid);
                    }
                }
                Err(err) => {
                    user_error!("{err}");
                    self.group.abort();
                    break;
                }
            }
        }

        // release every remaining pipe end before waiting so the last stage
        // can observe end-of-stream
        drop(chain);

        if let Some(pid) = foreground {
            self.table.wait_clear(pid);
        }
    }
}

fn open_input(path: &Path) -> Option<File> {
    match File::open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            user_error!("{}", Error::Io(Some(path.to_path_buf()), err));
            None
        }
    }
}

fn open_output(path: &Path) -> Option<File> {
    let opened = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path);
    match opened {
        Ok(file) => Some(file),
        Err(err) => {
            user_error!("{}", Error::Io(Some(path.to_path_buf()), err));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::{open_output, Shell};

    #[test]
    fn assignments_route_to_the_variable_store() {
        let mut shell = Shell::for_tests();
        shell.run_line("GREETING=hello");
        assert_eq!(shell.vars.lookup("GREETING"), Some("hello"));
    }

    #[test]
    fn each_command_in_a_batch_is_attempted() {
        let mut shell = Shell::for_tests();
        // the malformed assignment in the middle must not stop the batch
        shell.run_line("A=1; =broken; B=2");
        assert_eq!(shell.vars.lookup("A"), Some("1"));
        assert_eq!(shell.vars.lookup("B"), Some("2"));
    }

    #[test]
    fn redirected_output_file_is_created_and_truncated() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("oxsh_test_out_{}", std::process::id()));
        std::fs::write(&path, "stale content").unwrap();

        let file = open_output(&path).unwrap();
        drop(file);

        let mut contents = String::new();
        std::fs::File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn background_execution_returns_immediately() {
        let mut shell = Shell::for_tests();

        let started = std::time::Instant::now();
        shell.run_line("sleep 5 &");

        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert_eq!(shell.forked, 1);

        // no reaper thread is running here; take the child down by hand
        shell.table.kill_all();
    }
}
