pub mod analytics;
pub mod attendance;
pub mod classes;
pub mod core;
pub mod evaluations;
pub mod grading;
pub mod people;
pub mod periods;
