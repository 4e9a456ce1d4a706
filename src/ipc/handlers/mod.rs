pub mod backup;
pub mod classes;
pub mod core;
pub mod exams;
pub mod exchange;
pub mod marks;
pub mod reports;
pub mod session;
pub mod settings;
pub mod staff;
pub mod statistics;
pub mod students;
pub mod subjects;
