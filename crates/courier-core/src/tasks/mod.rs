//! Reference task variants.
//!
//! The actual payload logic (index access, mail delivery) stays behind ports;
//! these variants exist to exercise the registry, the progress snapshots, and
//! the two failure domains end to end.

pub mod quota;
pub mod reindexing;

pub use quota::{MailError, MailSender, QuotaNotificationTask};
pub use reindexing::{MessageReindexingTask, ReindexError, ReindexPerformer};
