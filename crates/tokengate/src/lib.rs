mod admission;
mod authority;
mod checker;
mod defaults;
mod error;
mod time;
mod validator;

pub use crate::admission::*;
pub use crate::authority::*;
pub use crate::checker::*;
pub use crate::defaults::*;
pub use crate::error::*;
pub use crate::time::*;
pub use crate::validator::*;
