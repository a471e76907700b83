//! Node identity commands.

pub mod keygen;
