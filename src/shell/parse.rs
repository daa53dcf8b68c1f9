use std::path::PathBuf;

use crate::common::Error;

/// One parsed non-piped command: program arguments with the redirection and
/// background markers removed.
#[derive(Debug, PartialEq)]
pub(crate) struct StageSpec {
    pub(crate) argv: Vec<String>,
    pub(crate) input: Option<PathBuf>,
    pub(crate) output: Option<PathBuf>,
    pub(crate) background: bool,
}

/// Split an input line into its `;`-separated commands.
pub(crate) fn split_commands(line: &str) -> impl Iterator<Item = &str> {
    line.split(';')
        .map(str::trim)
        .filter(|command| !command.is_empty())
}

/// Split a command into its `|`-separated pipeline stages.
pub(crate) fn split_stages(command: &str) -> Vec<&str> {
    command.split('|').collect()
}

/// Split a stage into whitespace-delimited tokens.
pub(crate) fn tokenize(stage: &str) -> Vec<String> {
    stage.split_whitespace().map(str::to_string).collect()
}

/// Extract the `<`, `>` and `&` markers from a token list.
///
/// `&` must be the last token; `<` and `>` need a command before them and
/// consume exactly the token after them as a file name.
pub(crate) fn parse_stage(tokens: Vec<String>) -> Result<StageSpec, Error> {
    if tokens.is_empty() {
        return Ok(StageSpec {
            argv: Vec::new(),
            input: None,
            output: None,
            background: false,
        });
    }

    let position = |marker: &str| tokens.iter().position(|token| token == marker);
    let background_at = position("&");
    let input_at = position("<");
    let output_at = position(">");

    let last = tokens.len() - 1;

    if let Some(index) = background_at {
        if index != last {
            return Err(Error::BackgroundPlacement);
        }
    }

    let mut consumed = vec![false; tokens.len()];
    if let Some(index) = background_at {
        consumed[index] = true;
    }

    for (marker, found) in [('<', input_at), ('>', output_at)] {
        if let Some(index) = found {
            if index == 0 || index == last || consumed[index] || consumed[index + 1] {
                return Err(Error::RedirectPlacement(marker));
            }
            consumed[index] = true;
            consumed[index + 1] = true;
        }
    }

    let file_after = |index: Option<usize>| index.map(|found| PathBuf::from(&tokens[found + 1]));
    let input = file_after(input_at);
    let output = file_after(output_at);

    let argv = tokens
        .iter()
        .enumerate()
        .filter(|(index, _)| !consumed[*index])
        .map(|(_, token)| token.clone())
        .collect();

    Ok(StageSpec {
        argv,
        input,
        output,
        background: background_at.is_some(),
    })
}
