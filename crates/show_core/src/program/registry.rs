//! Ordered pattern table used to dispatch script instructions.

use futures::future::{BoxFuture, FutureExt};
use regex::Regex;
use shared::error::{ShowError, ShowResult};

use super::Machine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Int,
    Float,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(usize),
    Float(f64),
    Text(String),
}

impl Arg {
    fn parse(kind: ArgKind, raw: &str) -> ShowResult<Self> {
        let invalid = || ShowError::InvalidArgument(raw.to_string());
        Ok(match kind {
            ArgKind::Int => Self::Int(raw.parse().map_err(|_| invalid())?),
            ArgKind::Float => Self::Float(raw.parse().map_err(|_| invalid())?),
            ArgKind::Text => Self::Text(raw.to_string()),
        })
    }
}

pub fn int_arg(args: &[Arg], index: usize) -> ShowResult<usize> {
    match args.get(index) {
        Some(Arg::Int(value)) => Ok(*value),
        other => Err(ShowError::InvalidArgument(format!("{other:?}"))),
    }
}

pub fn float_arg(args: &[Arg], index: usize) -> ShowResult<f64> {
    match args.get(index) {
        Some(Arg::Float(value)) => Ok(*value),
        other => Err(ShowError::InvalidArgument(format!("{other:?}"))),
    }
}

pub fn text_arg(args: &[Arg], index: usize) -> ShowResult<&str> {
    match args.get(index) {
        Some(Arg::Text(value)) => Ok(value),
        other => Err(ShowError::InvalidArgument(format!("{other:?}"))),
    }
}

/// What the dispatcher does after a handler returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Done,
    /// Evaluate these instructions in order, each with its own wait.
    Sequence(Vec<String>),
}

pub type Handler = fn(&mut Machine, &[Arg]) -> ShowResult<Flow>;

struct Entry {
    source: String,
    pattern: Regex,
    name: &'static str,
    handler: Handler,
    waits: bool,
    kinds: Vec<ArgKind>,
}

/// First registered pattern that matches the whole instruction wins.
#[derive(Default)]
pub struct CommandRegistry {
    entries: Vec<Entry>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler. `pattern` must have one capture group per entry of
    /// `kinds`. Registering an identical pattern again replaces the old
    /// entry in place.
    pub fn register(
        &mut self,
        name: &'static str,
        pattern: &str,
        handler: Handler,
        waits: bool,
        kinds: &[ArgKind],
    ) -> ShowResult<()> {
        let compiled =
            Regex::new(&format!("^(?:{pattern})$")).map_err(|err| ShowError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: err.to_string(),
            })?;
        let groups = compiled.captures_len() - 1;
        if groups != kinds.len() {
            return Err(ShowError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: format!("{groups} groups for {} argument types", kinds.len()),
            });
        }

        let entry = Entry {
            source: pattern.to_string(),
            pattern: compiled,
            name,
            handler,
            waits,
            kinds: kinds.to_vec(),
        };
        match self.entries.iter_mut().find(|e| e.source == pattern) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Name of the handler that `command` dispatches to.
    pub fn handler_name(&self, command: &str) -> Option<&'static str> {
        self.find(command).map(|entry| entry.name)
    }

    fn find(&self, command: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|entry| entry.pattern.is_match(command))
    }

    fn resolve(&self, command: &str) -> ShowResult<(&Entry, Vec<Arg>)> {
        for entry in &self.entries {
            let Some(captures) = entry.pattern.captures(command) else {
                continue;
            };
            let args = entry
                .kinds
                .iter()
                .zip(captures.iter().skip(1))
                .map(|(kind, group)| Arg::parse(*kind, group.map_or("", |m| m.as_str())))
                .collect::<ShowResult<Vec<_>>>()?;
            return Ok((entry, args));
        }
        Err(ShowError::UnrecognizedCommand(command.to_string()))
    }

    /// Runs `command` against `machine`, sleeping for the machine's delay
    /// afterwards when the matched entry waits.
    pub fn eval<'a>(
        &'a self,
        machine: &'a mut Machine,
        command: &'a str,
    ) -> BoxFuture<'a, ShowResult<()>> {
        async move {
            let (entry, args) = self.resolve(command)?;
            match (entry.handler)(machine, &args)? {
                Flow::Done => {}
                Flow::Sequence(commands) => {
                    for sub in &commands {
                        self.eval(machine, sub).await?;
                    }
                }
            }
            if entry.waits {
                tokio::time::sleep(machine.delay()).await;
            }
            Ok(())
        }
        .boxed()
    }
}
