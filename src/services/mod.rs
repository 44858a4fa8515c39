//! Collaborator interfaces
//!
//! The core talks to payments and pub/sub only through these traits. The
//! in-process implementations back the standalone binary and the tests.

pub mod payments;
pub mod pubsub;
