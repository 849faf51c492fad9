mod block;
mod content;
mod error;
mod event;
mod proposal;
mod validator;

pub use block::*;
pub use content::*;
pub use error::*;
pub use event::*;
pub use proposal::*;
pub use validator::*;
