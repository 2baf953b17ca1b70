pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod layout;
pub mod ledger;
pub mod output;
pub mod patient_map;
pub mod tabulate;
pub mod tagger;
pub mod xnat;
