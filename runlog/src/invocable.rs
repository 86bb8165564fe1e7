//! Invocable units: the command or callable wrapped for one execution.
//!
//! An [`Invocable`] is either a process unit (an external program resolved on
//! the search path) or a function unit (a callable writing to a capture
//! sink). Both render to a human-readable run string; neither touches the
//! filesystem until the engine runs them.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::core::fault::{CommandNotFound, InvalidArgument};
use crate::core::types::ArgValue;
use crate::io::config::InstallerConfig;

/// Keyed arguments handed to a function unit's callable.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    args: Vec<(String, ArgValue)>,
}

impl CallArgs {
    pub(crate) fn new(args: Vec<(String, ArgValue)>) -> Self {
        Self { args }
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.args
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.args.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Signature of a function unit. Terminal output goes through the writer so
/// the engine can capture it like process output.
pub type CallableFn = dyn Fn(&CallArgs, &mut dyn Write) -> Result<Value> + Send + Sync;

enum UnitKind {
    Process { program: String },
    Function { callable: Arc<CallableFn> },
}

impl fmt::Debug for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Process { program } => {
                f.debug_struct("Process").field("program", program).finish()
            }
            UnitKind::Function { .. } => f.debug_struct("Function").finish_non_exhaustive(),
        }
    }
}

/// One executable or callable plus its declared arguments.
#[derive(Debug)]
pub struct Invocable {
    name: String,
    description: Option<String>,
    positional: Vec<ArgValue>,
    keyed: Vec<(String, Option<ArgValue>)>,
    expected_inputs: Vec<ArgValue>,
    expected_outputs: Vec<ArgValue>,
    ignore_exit_code: bool,
    /// Installer substitutions applied to the rendered run string.
    replacements: Vec<(String, String)>,
    kind: UnitKind,
}

impl Invocable {
    /// Wrap an external program. The program must resolve on the search path
    /// at construction time, otherwise [`CommandNotFound`] is raised.
    pub fn process(program: &str) -> Result<Self> {
        Self::process_with(program, &InstallerConfig::default())
    }

    /// Wrap an external program with installer rewrites. The display name
    /// stays unsuffixed; the suffixed name is what must resolve and run.
    pub fn process_with(program: &str, installer: &InstallerConfig) -> Result<Self> {
        let name = program.trim();
        let target = if installer.enabled {
            format!("{name}{}", installer.suffix)
        } else {
            name.to_string()
        };
        if name.is_empty() || which::which(&target).is_err() {
            return Err(anyhow::Error::new(CommandNotFound { name: target }));
        }
        Ok(Self {
            name: name.to_string(),
            description: None,
            positional: Vec::new(),
            keyed: Vec::new(),
            expected_inputs: Vec::new(),
            expected_outputs: Vec::new(),
            ignore_exit_code: false,
            replacements: if installer.enabled {
                installer.replacements.clone()
            } else {
                Vec::new()
            },
            kind: UnitKind::Process { program: target },
        })
    }

    /// Wrap a callable under the given display name.
    pub fn function<F>(name: &str, callable: F) -> Self
    where
        F: Fn(&CallArgs, &mut dyn Write) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            description: None,
            positional: Vec::new(),
            keyed: Vec::new(),
            expected_inputs: Vec::new(),
            expected_outputs: Vec::new(),
            ignore_exit_code: false,
            replacements: Vec::new(),
            kind: UnitKind::Function {
                callable: Arc::new(callable),
            },
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Ignore the process exit code instead of faulting on non-zero.
    pub fn ignore_exit_code(mut self, ignore: bool) -> Self {
        self.ignore_exit_code = ignore;
        self
    }

    /// Add a positional argument. Function units only accept keyed arguments,
    /// so this raises [`InvalidArgument`] for them.
    pub fn arg(mut self, arg: impl Into<ArgValue>) -> Result<Self> {
        let arg = arg.into();
        self.guard_positional(&arg)?;
        self.positional.push(arg);
        Ok(self)
    }

    /// Positional argument that is also a declared input artifact.
    pub fn input(mut self, arg: impl Into<ArgValue>) -> Result<Self> {
        let arg = arg.into();
        self.guard_positional(&arg)?;
        self.expected_inputs.push(arg.clone());
        self.positional.push(arg);
        Ok(self)
    }

    /// Positional argument that is also a declared output artifact.
    pub fn output(mut self, arg: impl Into<ArgValue>) -> Result<Self> {
        let arg = arg.into();
        self.guard_positional(&arg)?;
        self.expected_outputs.push(arg.clone());
        self.positional.push(arg);
        Ok(self)
    }

    pub fn keyed(mut self, key: &str, arg: impl Into<ArgValue>) -> Self {
        self.keyed.push((key.to_string(), Some(arg.into())));
        self
    }

    /// Keyed argument that is also a declared input artifact.
    pub fn keyed_input(mut self, key: &str, arg: impl Into<ArgValue>) -> Self {
        let arg = arg.into();
        self.expected_inputs.push(arg.clone());
        self.keyed.push((key.to_string(), Some(arg)));
        self
    }

    /// Keyed argument that is also a declared output artifact.
    pub fn keyed_output(mut self, key: &str, arg: impl Into<ArgValue>) -> Self {
        let arg = arg.into();
        self.expected_outputs.push(arg.clone());
        self.keyed.push((key.to_string(), Some(arg)));
        self
    }

    /// Value-less switch such as `--verbose`. Command-line syntax, so
    /// function units reject it.
    pub fn flag(mut self, key: &str) -> Result<Self> {
        if self.is_function() {
            return Err(anyhow::Error::new(InvalidArgument {
                reason: format!("function unit `{}` takes no flag `{key}`", self.name),
            }));
        }
        self.keyed.push((key.to_string(), None));
        Ok(self)
    }

    /// Remove a keyed argument before a later run, together with any
    /// artifact declarations tied to its value. Unknown keys raise
    /// [`InvalidArgument`].
    pub fn remove_keyed(&mut self, key: &str) -> Result<()> {
        let Some(position) = self.keyed.iter().position(|(name, _)| name == key) else {
            return Err(anyhow::Error::new(InvalidArgument {
                reason: format!("unit `{}` has no keyed argument `{key}`", self.name),
            }));
        };
        let (_, value) = self.keyed.remove(position);
        if let Some(value) = value {
            self.expected_inputs.retain(|declared| declared != &value);
            self.expected_outputs.retain(|declared| declared != &value);
        }
        Ok(())
    }

    fn guard_positional(&self, arg: &ArgValue) -> Result<()> {
        if self.is_function() {
            return Err(anyhow::Error::new(InvalidArgument {
                reason: format!(
                    "function unit `{}` only takes keyed arguments, got positional `{arg}`",
                    self.name
                ),
            }));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, UnitKind::Function { .. })
    }

    pub fn ignores_exit_code(&self) -> bool {
        self.ignore_exit_code
    }

    pub fn expected_inputs(&self) -> &[ArgValue] {
        &self.expected_inputs
    }

    pub fn expected_outputs(&self) -> &[ArgValue] {
        &self.expected_outputs
    }

    pub(crate) fn program(&self) -> Option<&str> {
        match &self.kind {
            UnitKind::Process { program } => Some(program),
            UnitKind::Function { .. } => None,
        }
    }

    pub(crate) fn callable(&self) -> Option<Arc<CallableFn>> {
        match &self.kind {
            UnitKind::Process { .. } => None,
            UnitKind::Function { callable } => Some(Arc::clone(callable)),
        }
    }

    /// Keyed arguments as passed to a function unit's callable.
    pub(crate) fn call_args(&self) -> CallArgs {
        CallArgs::new(
            self.keyed
                .iter()
                .filter_map(|(key, value)| value.clone().map(|value| (key.clone(), value)))
                .collect(),
        )
    }

    /// The human-readable invocation: shell command line for process units,
    /// `name(key=value, ...)` for function units.
    pub fn render(&self) -> String {
        match &self.kind {
            UnitKind::Process { program } => {
                let mut out = program.clone();
                for arg in &self.positional {
                    out.push(' ');
                    out.push_str(&arg.render());
                }
                for (key, value) in &self.keyed {
                    out.push(' ');
                    out.push_str(key);
                    if let Some(value) = value {
                        out.push(' ');
                        out.push_str(&value.render());
                    }
                }
                for (from, to) in &self.replacements {
                    out = out.replace(from, to);
                }
                out
            }
            UnitKind::Function { .. } => {
                let rendered: Vec<String> = self
                    .keyed
                    .iter()
                    .map(|(key, value)| match value {
                        Some(value) => format!("{key}={}", value.render()),
                        None => key.clone(),
                    })
                    .collect();
                format!("{}({})", self.name, rendered.join(", "))
            }
        }
    }

    /// Stringified arguments for the provenance record.
    pub(crate) fn positional_strings(&self) -> Vec<String> {
        self.positional.iter().map(ArgValue::render).collect()
    }

    /// Stringified keyed arguments for the provenance record; flags carry an
    /// empty value.
    pub(crate) fn keyed_strings(&self) -> Vec<(String, String)> {
        self.keyed
            .iter()
            .map(|(key, value)| {
                (
                    key.clone(),
                    value.as_ref().map(ArgValue::render).unwrap_or_default(),
                )
            })
            .collect()
    }
}
