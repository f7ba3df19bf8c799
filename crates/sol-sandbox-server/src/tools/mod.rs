//! Tool implementations behind the dispatcher:
//! - `inputs`: input structs shared with the HTTP API
//! - `handlers`: one method per tool on [`ToolDispatcher`](crate::state::ToolDispatcher)

pub(crate) mod handlers;
pub mod inputs;

pub use inputs::{CompileInput, InvokeBody, InvokeInput, LoadInput, ProgramIdInput};
