mod contracts;
mod event;
mod payload;
mod request;
pub use contracts::*;
pub use event::*;
pub use payload::*;
pub use request::*;
