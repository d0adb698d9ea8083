pub mod secure_delete;
pub mod phi_audit;

pub use secure_delete::*;
