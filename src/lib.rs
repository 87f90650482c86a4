#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
mod core;
mod error;
pub mod io;
pub mod protocol;
pub mod storage;
mod tracker;
mod utils;
mod value;

pub use crate::config::*;
pub use crate::core::{DataType, Direction, ObjectId};
pub use crate::error::*;
pub use crate::protocol::{
    Arguments, ResultMessage, TaskDefinition, TaskOutcome, TaskRequest, TaskStatus, TaskWorker,
    WireParameter,
};
pub use crate::tracker::{Identity, ObjectTracker, Snapshot, TableSizes};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
pub use crate::value::{Persistent, Value};
