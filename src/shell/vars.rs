use std::env;

use crate::common::Error;
use crate::system::Hostname;

/// Local and exported variables known to this session.
///
/// Local variables live only in the interpreter. Exported names are mirrored
/// into the process environment and their values are always read back from
/// it, never cached. A name is in at most one of the two sets at a time.
pub(crate) struct VarStore {
    locals: Vec<LocalVar>,
    exported: Vec<String>,
}

struct LocalVar {
    name: String,
    value: String,
}

impl VarStore {
    /// Capture the inherited environment: every variable name is recorded in
    /// iteration order for later enumeration by `env`.
    pub(crate) fn from_process_env() -> Self {
        Self {
            locals: Vec::new(),
            exported: env::vars().map(|(name, _)| name).collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self {
            locals: Vec::new(),
            exported: Vec::new(),
        }
    }

    /// Handle a `name=value` expression.
    ///
    /// An empty value clears an existing variable in place; clearing an
    /// unknown name does nothing. A single layer of surrounding double
    /// quotes is stripped from the value.
    pub(crate) fn assign(&mut self, expression: &str) -> Result<(), Error> {
        let Some((name, value)) = expression.split_once('=') else {
            return Err(Error::Assignment(expression.to_string()));
        };
        if name.is_empty() {
            return Err(Error::Assignment(expression.to_string()));
        }

        if value.is_empty() {
            if let Some(var) = self.local_mut(name) {
                var.value.clear();
            }
            return Ok(());
        }

        let value = strip_quotes(value);
        match self.local_mut(name) {
            Some(var) => var.value = value.to_string(),
            None => self.locals.push(LocalVar {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
        Ok(())
    }

    /// The value of a local variable; `None` is distinct from "found, empty".
    pub(crate) fn lookup(&self, name: &str) -> Option<&str> {
        self.locals
            .iter()
            .find(|var| var.name == name)
            .map(|var| var.value.as_str())
    }

    fn local_mut(&mut self, name: &str) -> Option<&mut LocalVar> {
        self.locals.iter_mut().find(|var| var.name == name)
    }

    /// Set or promote an exported variable.
    ///
    /// With a value the environment variable is set; the name is recorded the
    /// first time it enters the environment. Without a value a known local is
    /// promoted into the environment; a name the session does not know cannot
    /// be exported.
    pub(crate) fn export(&mut self, name: &str, value: Option<&str>) -> Result<(), Error> {
        if name.is_empty() {
            return Err(Error::Assignment(name.to_string()));
        }

        match value {
            Some(value) => {
                self.set_env(name, value);
                Ok(())
            }
            None => {
                if let Some(index) = self.locals.iter().position(|var| var.name == name) {
                    let var = self.locals.remove(index);
                    self.set_env(&var.name, &var.value);
                    Ok(())
                } else if env::var_os(name).is_some() {
                    // inherited names were recorded at startup
                    Ok(())
                } else {
                    Err(Error::NotDefined(name.to_string()))
                }
            }
        }
    }

    fn set_env(&mut self, name: &str, value: &str) {
        let newly_present = env::var_os(name).is_none();
        env::set_var(name, value);
        // "first export wins": re-exports only update the value
        if newly_present && !self.exported.iter().any(|known| known == name) {
            self.exported.push(name.to_string());
        }
    }

    /// Remove a variable from the process environment.
    pub(crate) fn unset(&self, name: &str) {
        if !name.is_empty() && !name.contains('=') {
            env::remove_var(name);
        }
    }

    /// Exported names in the order they were first recorded.
    pub(crate) fn env_names(&self) -> &[String] {
        &self.exported
    }

    /// Resolve a `$NAME` reference: the `RANDOM` and `HOSTNAME`
    /// pseudo-variables win, then exported variables (read live from the
    /// environment), then locals.
    pub(crate) fn expand(&self, name: &str) -> Option<String> {
        match name {
            "RANDOM" => Some((rand::random::<u32>() % 32768).to_string()),
            "HOSTNAME" => Some(Hostname::resolve().to_string()),
            _ => {
                if self.exported.iter().any(|known| known == name) {
                    if let Ok(value) = env::var(name) {
                        return Some(value);
                    }
                }
                self.lookup(name).map(str::to_string)
            }
        }
    }
}

fn strip_quotes(value: &str) -> &str {
    match value.strip_prefix('"') {
        Some(inner) => inner.strip_suffix('"').unwrap_or(inner),
        None => value,
    }
}
