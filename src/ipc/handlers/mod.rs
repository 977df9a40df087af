pub mod assignments;
pub mod backup;
pub mod classes;
pub mod cohorts;
pub mod core;
pub mod programs;
pub mod schedule;
pub mod students;
