mod contentlets;

pub use contentlets::*;
