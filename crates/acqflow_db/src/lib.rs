//! Job store adapter for acqflow.
//!
//! The scheduler and the pipelines talk to the job table only through the
//! [`JobStore`] trait. Every method is its own commit boundary: when a call
//! returns `Ok`, the change is durable and visible to the next poll.
//!
//! # Usage
//!
//! ```rust,ignore
//! use acqflow_db::{JobStore, SqliteJobStore};
//!
//! let store = SqliteJobStore::open("sqlite:acqflow.sqlite3").await?;
//! if let Some(job) = store.next_eligible_job(None).await? {
//!     store.claim_job(job.id).await?;
//! }
//! ```

mod error;
mod schema;
mod sqlite;
mod store;
mod types;

pub use error::{DbError, Result};
pub use sqlite::SqliteJobStore;
pub use store::JobStore;
pub use types::{DataContainer, Dataset, Job, NewDataset};
