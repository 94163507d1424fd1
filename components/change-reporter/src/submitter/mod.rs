pub mod models;
pub mod submitter;
