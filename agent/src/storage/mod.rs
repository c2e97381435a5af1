//! Local storage: layout, settings and the checkpoint store

pub mod layout;
pub mod settings;
pub mod store;
