pub mod repository;

pub use repository::{CrmRepository, CrmRepositoryError};
