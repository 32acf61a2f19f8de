pub mod program;
pub mod router;
pub mod state;

pub use program::{
    parse_script, CommandRegistry, Program, ProgramConfig, ProgramEvent, ProgramSnapshot,
    StopReason,
};
pub use router::{Router, RouterConfig, RouterEvent};
pub use state::StateStore;
