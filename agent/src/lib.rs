//! AutoEnroll Agent Library
//!
//! Resumable zero-touch enrollment of a device during first-boot setup.

pub mod app;
pub mod authn;
pub mod deploy;
pub mod device;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod retry;
pub mod services;
pub mod storage;
#[cfg(any(test, feature = "test"))]
pub mod testing;
pub mod utils;
