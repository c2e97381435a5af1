//! Local device information

pub mod identity;

pub use identity::DeviceIdentity;
