//! Route handlers. Guards are attached in `api::router`, so handlers only see
//! requests that already passed admission.

pub mod health;
pub mod me;
