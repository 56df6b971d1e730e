//! Repository traits implemented for [`PgConnection`](crate::PgConnection).

mod batch_job;
mod transaction;

pub use batch_job::BatchJobRepository;
pub use transaction::TransactionRepository;
