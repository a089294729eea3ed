// Public bus contracts for Conductor
// This crate defines channel names and the payload DTOs exchanged with
// worker services over the message bus.

pub mod capability;
pub mod channels;
pub mod service;
pub mod workflow;

pub use capability::*;
pub use channels::*;
pub use service::*;
pub use workflow::*;
