use std::{fmt, io, path::PathBuf};

#[derive(Debug)]
pub(crate) enum Error {
    InsufficientResources,
    BackgroundPlacement,
    RedirectPlacement(char),
    EmptyStage,
    Assignment(String),
    MissingArgument(&'static str),
    NotDefined(String),
    UnterminatedPrompt,
    Io(Option<PathBuf>, io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InsufficientResources => f.write_str("insufficient resources"),
            Error::BackgroundPlacement => f.write_str("'&' must be the last token of a command"),
            Error::RedirectPlacement(marker) => {
                write!(
                    f,
                    "'{marker}' must be preceded by a command and followed by a file name"
                )
            }
            Error::EmptyStage => f.write_str("empty command in pipeline"),
            Error::Assignment(expression) => write!(f, "invalid assignment: '{expression}'"),
            Error::MissingArgument(command) => write!(f, "{command}: missing argument"),
            Error::NotDefined(name) => write!(f, "export: '{name}' is not defined"),
            Error::UnterminatedPrompt => f.write_str("read: unterminated prompt message"),
            Error::Io(location, err) => {
                if let Some(path) = location {
                    write!(f, "'{}': {err}", path.display())
                } else {
                    write!(f, "IO error: {err}")
                }
            }
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(None, err)
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn diagnostics_name_the_failing_operation() {
        let cases = [
            (Error::InsufficientResources, "insufficient resources"),
            (
                Error::MissingArgument("cd"),
                "cd: missing argument",
            ),
            (
                Error::Assignment("=x".to_string()),
                "invalid assignment: '=x'",
            ),
            (
                Error::NotDefined("FOO".to_string()),
                "export: 'FOO' is not defined",
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.to_string(), expected);
        }
    }
}
