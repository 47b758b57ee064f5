mod email;

pub use email::{BodyKind, EmailClient, Mailer};
#[cfg(test)]
pub(crate) use email::FAILURE_SUBJECT;
