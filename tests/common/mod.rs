#![allow(dead_code)] // Each test binary uses a different subset

pub mod builders;
pub mod faulty_storage;
pub mod scripted_worker;

pub use builders::*;
pub use faulty_storage::*;
pub use scripted_worker::*;
