use std::ffi::CString;
use std::io::{self, BufRead, Write};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use crate::common::Error;
use crate::log::user_error;
use crate::system::chdir;

use super::Shell;

/// How a built-in is routed.
///
/// Handlers that mutate interpreter state run in the interpreter's own
/// process; the rest behave like external commands and run in a forked child.
#[derive(Clone, Copy)]
pub(crate) enum Handler {
    InProcess(fn(&mut Shell, &[String]) -> Result<i32, Error>),
    InChild(fn(&Shell, &[String]) -> Result<i32, Error>),
}

pub(crate) struct Builtin {
    pub(crate) name: &'static str,
    pub(crate) handler: Handler,
}

// `export` must stay in-process even inside a pipeline: it mutates the live
// variable store. With no arguments it merely enumerates, like `env`.
const BUILTINS: &[Builtin] = &[
    Builtin { name: "cd", handler: Handler::InProcess(cd) },
    Builtin { name: "echo", handler: Handler::InChild(echo) },
    Builtin { name: "env", handler: Handler::InChild(env) },
    Builtin { name: "printenv", handler: Handler::InChild(env) },
    Builtin { name: "exec", handler: Handler::InProcess(exec) },
    Builtin { name: "exit", handler: Handler::InProcess(exit) },
    Builtin { name: "export", handler: Handler::InProcess(export) },
    Builtin { name: "history", handler: Handler::InChild(history) },
    Builtin { name: "logout", handler: Handler::InProcess(exit) },
    Builtin { name: "read", handler: Handler::InProcess(read) },
    Builtin { name: "unset", handler: Handler::InChild(unset) },
];

/// Find a built-in by exact name.
pub(crate) fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

/// Run an in-child handler and translate the result into an exit status.
pub(crate) fn child_status(
    handler: fn(&Shell, &[String]) -> Result<i32, Error>,
    shell: &Shell,
    argv: &[String],
) -> i32 {
    match handler(shell, argv) {
        Ok(status) => status,
        Err(err) => {
            user_error!("{err}");
            1
        }
    }
}

fn cd(_shell: &mut Shell, argv: &[String]) -> Result<i32, Error> {
    let path = argv.get(1).ok_or(Error::MissingArgument("cd"))?;
    let path_c = CString::new(path.as_bytes()).map_err(|_| {
        Error::Io(
            Some(PathBuf::from(path)),
            io::Error::new(io::ErrorKind::InvalidInput, "nul byte in path"),
        )
    })?;
    chdir(&path_c).map_err(|err| Error::Io(Some(PathBuf::from(path)), err))?;
    Ok(0)
}

fn echo(shell: &Shell, argv: &[String]) -> Result<i32, Error> {
    print_ignore_io_error!("{}", render_echo(shell, &argv[1..]));
    Ok(0)
}

/// Format the `echo` output: quote trimming on the outer arguments, `$NAME`
/// expansion unless the first argument opens with a single quote, one space
/// between printed items, one trailing newline.
///
/// An unresolved `$NAME` prints nothing and swallows its separator space.
fn render_echo(shell: &Shell, args: &[String]) -> String {
    let suppress_expansion = args.first().is_some_and(|arg| arg.starts_with('\''));

    let mut out = String::new();
    for (index, arg) in args.iter().enumerate() {
        let mut arg = arg.as_str();
        if index == 0 && (arg.starts_with('\'') || arg.starts_with('"')) {
            arg = &arg[1..];
        }
        if index + 1 == args.len() && (arg.ends_with('\'') || arg.ends_with('"')) {
            arg = &arg[..arg.len() - 1];
        }

        let expanded;
        let printed = match arg.strip_prefix('$').filter(|_| !suppress_expansion) {
            Some(name) => match shell.vars.expand(name) {
                Some(value) => {
                    expanded = value;
                    Some(expanded.as_str())
                }
                None => None,
            },
            None => Some(arg),
        };

        if let Some(text) = printed {
            out.push_str(text);
            if index + 1 < args.len() {
                out.push(' ');
            }
        }
    }
    out.push('\n');
    out
}

fn env(shell: &Shell, _argv: &[String]) -> Result<i32, Error> {
    for name in shell.vars.env_names() {
        if let Ok(value) = std::env::var(name) {
            println_ignore_io_error!("{name}={value}");
        }
    }
    Ok(0)
}

fn exec(_shell: &mut Shell, argv: &[String]) -> Result<i32, Error> {
    let program = argv.get(1).ok_or(Error::MissingArgument("exec"))?;
    // only returns on failure; the interpreter goes back to its prompt
    let err = Command::new(program).args(&argv[2..]).exec();
    Err(Error::Io(Some(PathBuf::from(program)), err))
}

fn exit(shell: &mut Shell, argv: &[String]) -> Result<i32, Error> {
    let code = argv.get(1).map(|arg| numeric_prefix(arg)).unwrap_or(0);
    shell.shutdown(code)
}

/// `atoi`-style parse: the leading numeric prefix of the input, or 0.
fn numeric_prefix(input: &str) -> i32 {
    let input = input.trim_start();
    let (sign, rest) = match input.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, input.strip_prefix('+').unwrap_or(input)),
    };
    let digits = rest
        .bytes()
        .take_while(|byte| byte.is_ascii_digit())
        .count();
    rest[..digits].parse::<i32>().map(|n| sign * n).unwrap_or(0)
}

fn export(shell: &mut Shell, argv: &[String]) -> Result<i32, Error> {
    let Some(arg) = argv.get(1) else {
        // with no arguments `export` behaves as `env`
        return env(shell, argv);
    };

    match arg.split_once('=') {
        Some((name, value)) => shell.vars.export(name, Some(value))?,
        None => shell.vars.export(arg, None)?,
    }
    Ok(0)
}

fn unset(shell: &Shell, argv: &[String]) -> Result<i32, Error> {
    let name = argv.get(1).ok_or(Error::MissingArgument("unset"))?;
    shell.vars.unset(name);
    Ok(0)
}

fn history(shell: &Shell, _argv: &[String]) -> Result<i32, Error> {
    for (index, line) in shell.history.iter().enumerate() {
        println_ignore_io_error!("{index}\t{line}");
    }
    Ok(0)
}

fn read(shell: &mut Shell, argv: &[String]) -> Result<i32, Error> {
    if argv.len() < 2 {
        return Err(Error::MissingArgument("read"));
    }

    let names_from = if argv[1] == "-p" {
        let (message, names_from) = parse_prompt(argv)?;
        print_ignore_io_error!("{message}");
        let _ = io::stdout().flush();
        names_from
    } else {
        1
    };

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|err| Error::Io(None, err))?;
    let tokens: Vec<&str> = line.split_whitespace().collect();

    assign_read_tokens(shell, &argv[names_from..], &tokens)
}

/// Parse the `-p` message, which may span several raw tokens when delimited
/// by a quote character. Returns the message and the index of the first
/// variable name.
fn parse_prompt(argv: &[String]) -> Result<(String, usize), Error> {
    let first = argv.get(2).ok_or(Error::MissingArgument("read"))?;

    let Some(quote) = first.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        return Ok((first.clone(), 3));
    };

    if first.ends_with(quote) {
        let message = if first.len() > 1 {
            first[1..first.len() - 1].to_string()
        } else {
            String::new()
        };
        return Ok((message, 3));
    }

    let end = argv[3..]
        .iter()
        .position(|arg| arg.ends_with(quote))
        .map(|offset| 3 + offset)
        .ok_or(Error::UnterminatedPrompt)?;

    let joined = argv[2..=end].join(" ");
    Ok((joined[1..joined.len() - 1].to_string(), end + 1))
}

/// Assign the read tokens to the listed names in order. Surplus names are
/// cleared; the last name absorbs every remaining token.
fn assign_read_tokens(shell: &mut Shell, names: &[String], tokens: &[&str]) -> Result<i32, Error> {
    for (index, name) in names.iter().enumerate() {
        let value = if index + 1 == names.len() {
            tokens
                .get(index..)
                .map(|rest| rest.join(" "))
                .unwrap_or_default()
        } else {
            tokens
                .get(index)
                .map(|token| token.to_string())
                .unwrap_or_default()
        };
        shell.vars.assign(&format!("{name}={value}"))?;
    }
    Ok(0)
}
