pub mod core;
pub mod data;
pub mod points;
pub mod rules;
pub mod session;
pub mod students;
