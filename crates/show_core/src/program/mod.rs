//! Script interpreter driving the goal state over time.
//!
//! A script is a whitespace separated list of instructions. Each step
//! dispatches the instruction at the program counter through a
//! [`CommandRegistry`], then advances. Falling off the end stops the
//! program; `g`/`c` jumps and `x` are the only control flow.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::error::{ShowError, ShowResult};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::state::StateStore;

mod commands;
pub mod registry;

pub use registry::{Arg, ArgKind, CommandRegistry, Flow, Handler};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ProgramConfig {
    /// Lower bound for the per-step delay; also the initial delay.
    pub min_delay: Duration,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The last instruction ran without a jump.
    Finished,
    /// An `x` instruction.
    Exit,
    /// [`Program::stop`] was called.
    Requested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramEvent {
    Trace(String),
    Stopped(StopReason),
}

/// Splits script text into instructions. Blank text yields a single empty
/// instruction.
pub fn parse_script(text: &str) -> Vec<String> {
    let instructions: Vec<String> = text.split_whitespace().map(str::to_string).collect();
    if instructions.is_empty() {
        vec![String::new()]
    } else {
        instructions
    }
}

/// Registers and state that instruction handlers operate on.
pub struct Machine {
    instructions: Vec<String>,
    pc: i64,
    delay: Duration,
    min_delay: Duration,
    stopped: Option<StopReason>,
    store: Arc<StateStore>,
    events: broadcast::Sender<ProgramEvent>,
}

impl Machine {
    pub fn new(
        instructions: Vec<String>,
        store: Arc<StateStore>,
        config: &ProgramConfig,
        events: broadcast::Sender<ProgramEvent>,
    ) -> Self {
        Self {
            instructions,
            pc: 0,
            delay: config.min_delay,
            min_delay: config.min_delay,
            stopped: None,
            store,
            events,
        }
    }

    pub fn instructions(&self) -> &[String] {
        &self.instructions
    }

    pub fn pc(&self) -> i64 {
        self.pc
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stopped
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn set_delay(&mut self, seconds: f64) -> ShowResult<()> {
        let requested = Duration::try_from_secs_f64(seconds)
            .map_err(|_| ShowError::InvalidArgument(seconds.to_string()))?;
        self.delay = requested.max(self.min_delay);
        Ok(())
    }

    /// The step's own increment then lands on `target`.
    pub fn jump(&mut self, target: usize) {
        self.pc = i64::try_from(target).unwrap_or(i64::MAX) - 1;
    }

    pub fn halt(&mut self, reason: StopReason) {
        self.stopped.get_or_insert(reason);
    }

    pub fn trace(&self, text: &str) {
        info!(text, "program trace");
        let _ = self.events.send(ProgramEvent::Trace(text.to_string()));
    }

    fn reset(&mut self, instructions: Vec<String>) {
        self.instructions = instructions;
        self.pc = 0;
        self.delay = self.min_delay;
    }
}

pub struct Interpreter {
    machine: Machine,
    registry: Arc<CommandRegistry>,
}

impl Interpreter {
    pub fn new(machine: Machine, registry: Arc<CommandRegistry>) -> Self {
        Self { machine, registry }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub async fn eval(&mut self, command: &str) -> ShowResult<()> {
        self.registry.eval(&mut self.machine, command).await
    }

    /// Runs the instruction at the program counter. Failures are logged and
    /// the counter advances regardless.
    pub async fn one_step(&mut self) {
        let len = self.machine.instructions.len() as i64;
        if len == 0 {
            self.machine.halt(StopReason::Finished);
            return;
        }
        self.machine.pc = self.machine.pc.rem_euclid(len);
        let pc = self.machine.pc;
        let command = self.machine.instructions[pc as usize].clone();
        if let Err(err) = self.registry.eval(&mut self.machine, &command).await {
            warn!(pc, command = %command, code = ?err.code(), %err, "error in program");
        }
        self.machine.pc += 1;
        if self.machine.pc == len && self.machine.stopped.is_none() {
            info!(steps = len, "program reached its end");
            self.machine.halt(StopReason::Finished);
        }
    }

    pub fn reset_program_data(&mut self, instructions: Vec<String>) {
        self.machine.reset(instructions);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramSnapshot {
    pub pc: i64,
    pub delay: Duration,
    pub instructions: usize,
}

/// A running script, owning its background task.
pub struct Program {
    interpreter: Arc<Mutex<Interpreter>>,
    stop: Arc<AtomicBool>,
    events: broadcast::Sender<ProgramEvent>,
    task: Option<JoinHandle<StopReason>>,
}

impl Program {
    /// Spawns the step loop; must run inside a tokio runtime.
    pub fn start(
        instructions: Vec<String>,
        store: Arc<StateStore>,
        registry: Arc<CommandRegistry>,
        config: ProgramConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let machine = Machine::new(instructions, store, &config, events.clone());
        let interpreter = Arc::new(Mutex::new(Interpreter::new(machine, registry)));
        let stop = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_program(
            Arc::clone(&interpreter),
            Arc::clone(&stop),
            events.clone(),
        ));
        info!("program started");
        Self {
            interpreter,
            stop,
            events,
            task: Some(task),
        }
    }

    /// Takes effect before the next step.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgramEvent> {
        self.events.subscribe()
    }

    pub async fn reset_program_data(&self, instructions: Vec<String>) {
        self.interpreter
            .lock()
            .await
            .reset_program_data(instructions);
    }

    pub async fn snapshot(&self) -> ProgramSnapshot {
        let interpreter = self.interpreter.lock().await;
        let machine = interpreter.machine();
        ProgramSnapshot {
            pc: machine.pc(),
            delay: machine.delay(),
            instructions: machine.instructions().len(),
        }
    }

    /// Waits for the program to stop. `None` if its task was cancelled.
    pub async fn wait(mut self) -> Option<StopReason> {
        let task = self.task.take()?;
        task.await.ok()
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_program(
    interpreter: Arc<Mutex<Interpreter>>,
    stop: Arc<AtomicBool>,
    events: broadcast::Sender<ProgramEvent>,
) -> StopReason {
    let reason = loop {
        if stop.load(Ordering::SeqCst) {
            break StopReason::Requested;
        }
        {
            let mut interpreter = interpreter.lock().await;
            interpreter.one_step().await;
            if let Some(reason) = interpreter.machine().stop_reason() {
                break reason;
            }
        }
        tokio::task::yield_now().await;
    };
    info!(?reason, "program stopped");
    let _ = events.send(ProgramEvent::Stopped(reason));
    reason
}

#[cfg(test)]
#[path = "../tests/program_tests.rs"]
mod tests;
