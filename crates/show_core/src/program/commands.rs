use shared::error::ShowResult;
use tracing::info;

use super::{
    registry::{float_arg, int_arg, text_arg, Arg, ArgKind, CommandRegistry, Flow, Handler},
    Machine, StopReason,
};

impl CommandRegistry {
    /// The light show instruction set.
    pub fn standard() -> Self {
        let table: [(&'static str, &str, Handler, bool, &[ArgKind]); 10] = [
            ("toggle", r"(\d+)", toggle, true, &[ArgKind::Int]),
            ("enable", r"\+(\d+)", enable, true, &[ArgKind::Int]),
            ("disable", r"-(\d+)", disable, true, &[ArgKind::Int]),
            ("parallel", r"(\d+(?:,\d+)+)", parallel, false, &[ArgKind::Text]),
            (
                "delay",
                r"d(\d+(?:\.\d*)?|\.\d+)",
                set_delay,
                false,
                &[ArgKind::Float],
            ),
            ("jump", r"g(\d+)", jump, false, &[ArgKind::Int]),
            (
                "jump_if_off",
                r"c(\d+)-(\d+)",
                jump_if_off,
                false,
                &[ArgKind::Int, ArgKind::Int],
            ),
            ("trace", r"t(.*)", trace, true, &[ArgKind::Text]),
            ("exit", r"x", exit, false, &[]),
            ("empty", r"", empty, true, &[]),
        ];

        let mut registry = Self::new();
        for (name, pattern, handler, waits, kinds) in table {
            registry
                .register(name, pattern, handler, waits, kinds)
                .expect("valid builtin command pattern");
        }
        registry
    }
}

fn toggle(machine: &mut Machine, args: &[Arg]) -> ShowResult<Flow> {
    let channel = int_arg(args, 0)?;
    let current = machine.store().goal(channel)?;
    machine.store().set_goal(channel, u32::from(current == 0))?;
    Ok(Flow::Done)
}

fn enable(machine: &mut Machine, args: &[Arg]) -> ShowResult<Flow> {
    machine.store().set_goal(int_arg(args, 0)?, 1)?;
    Ok(Flow::Done)
}

fn disable(machine: &mut Machine, args: &[Arg]) -> ShowResult<Flow> {
    machine.store().set_goal(int_arg(args, 0)?, 0)?;
    Ok(Flow::Done)
}

fn parallel(_machine: &mut Machine, args: &[Arg]) -> ShowResult<Flow> {
    let commands = text_arg(args, 0)?
        .split(',')
        .map(str::to_string)
        .collect();
    Ok(Flow::Sequence(commands))
}

fn set_delay(machine: &mut Machine, args: &[Arg]) -> ShowResult<Flow> {
    machine.set_delay(float_arg(args, 0)?)?;
    Ok(Flow::Done)
}

fn jump(machine: &mut Machine, args: &[Arg]) -> ShowResult<Flow> {
    machine.jump(int_arg(args, 0)?);
    Ok(Flow::Done)
}

fn jump_if_off(machine: &mut Machine, args: &[Arg]) -> ShowResult<Flow> {
    let channel = int_arg(args, 0)?;
    let target = int_arg(args, 1)?;
    if machine.store().goal(channel)? == 0 {
        machine.jump(target);
    }
    Ok(Flow::Done)
}

fn trace(machine: &mut Machine, args: &[Arg]) -> ShowResult<Flow> {
    machine.trace(text_arg(args, 0)?);
    Ok(Flow::Done)
}

fn exit(machine: &mut Machine, _args: &[Arg]) -> ShowResult<Flow> {
    machine.halt(StopReason::Exit);
    Ok(Flow::Done)
}

fn empty(_machine: &mut Machine, _args: &[Arg]) -> ShowResult<Flow> {
    info!("empty program step is boring");
    Ok(Flow::Done)
}
