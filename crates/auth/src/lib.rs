//! `cyclekit-auth`: pure authorization boundary.
//!
//! Knows who an actor is and which enterprises they act for; knows nothing
//! about HTTP, sessions or storage.

pub mod authorize;
pub mod principal;
pub mod roles;

pub use authorize::{authorize_manage, AuthzError};
pub use principal::{EnterpriseScope, Principal};
pub use roles::Role;
