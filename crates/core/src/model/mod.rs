//! Typed records replacing the dynamic context maps of earlier prototypes.

pub mod alert;
pub mod analysis;
pub mod case;
pub mod chat;
pub mod evidence;
pub mod investigation;
pub mod target;
pub mod tool;
