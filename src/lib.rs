pub mod allocator;
pub mod app;
pub mod batch;
pub mod config;
pub mod convert;
pub mod domain;
pub mod error;
pub mod input;
pub mod lookup;
pub mod note;
pub mod output;
pub mod processor;
pub mod reconciler;
pub mod record;
pub mod session;
pub mod store;
