pub mod common;
pub mod device;
pub mod queue;
pub mod run;
pub mod status;
pub mod sync;
