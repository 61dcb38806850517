//! HTTP surface: task submission, read-only views of the org, and the
//! manual revision hook. Everything else happens inside the role loops.

pub mod routes;

pub use routes::{router, AppState};
