//! Document store port
//!
//! This module provides:
//! - [`DocumentStore`] and [`UnitOfWork`] traits consumed by the repositories
//! - [`Filter`], [`Query`] and [`Patch`] typed query values
//! - [`InMemoryDocumentStore`] for testing
//! - [`PostgresDocumentStore`] for production

mod memory;
mod postgres;
mod query;
mod store;

pub use memory::{InMemoryDocumentStore, IndexMode};
pub use postgres::{PostgresDocumentStore, PostgresStoreConfig};
pub use query::{
    CompareOp, Document, Filter, IndexDefinition, Patch, Query, SortDirection, SortKey,
};
pub use store::{DocumentStore, StoreError, UnitOfWork};
