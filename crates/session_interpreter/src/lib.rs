//! A straightforward interpreter for calibration graphs.

mod builder;
mod dump;
mod elemwise;
mod loader;
mod matmul;
mod session;
mod softmax;

pub use builder::InterpreterSessionBuilder;
pub use loader::InterpreterSessionLoader;
pub use session::InterpreterSession;
