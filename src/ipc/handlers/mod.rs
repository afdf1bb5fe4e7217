pub mod bands;
pub mod core;
pub mod grades;
pub mod marks;
pub mod reports;
pub mod setup;
