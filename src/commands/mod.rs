pub mod bulk_discover;
pub mod discover;
pub mod execute;
pub mod export_cutoffs;
pub mod import_cutoffs;
pub mod stats;
pub mod validate;
