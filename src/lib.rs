pub mod activity;
pub mod app;
pub mod cancel;
pub mod cli;
pub mod extract;
pub mod gateway;
pub mod grader;
pub mod models;
pub mod processor;
pub mod review;
pub mod rubric;
pub mod similarity;
pub mod store;
pub mod text;
pub mod worker;
