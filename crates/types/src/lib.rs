//! Wire and payload types shared by the submitter, the worker and the HTTP layer.

pub mod error;
pub mod event;
pub mod frame;
pub mod job;
pub mod job_id;
pub mod response;

pub use error::*;
pub use event::*;
pub use frame::*;
pub use job::*;
pub use job_id::*;
pub use response::*;
