// eqsim — Equation simulator
//
// Library root. Front end (lexer, parser), unit checking and the function
// registry feed the resolver; code objects run on the interpreted or native
// backend under the network scheduler.

pub mod ast;
pub mod clock;
pub mod codegen;
pub mod codeobject;
pub mod config;
pub mod diag;
pub mod error;
pub mod id;
pub mod interp;
pub mod lexer;
pub mod monitor;
pub mod native;
pub mod network;
pub mod parser;
pub mod registry;
pub mod resolve;
pub mod units;

pub use codeobject::{Backend, CodeObject, Compiler, Outputs, Snapshot};
pub use error::{CompileError, ExecError};
pub use registry::{CodeFragment, FunctionBuilder, FunctionSpec, Registry};
pub use resolve::Constants;
pub use units::{Dimension, Quantity};
