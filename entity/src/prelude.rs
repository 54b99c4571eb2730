pub use super::attempt_status::AttemptStatus;
pub use super::mailing::Entity as Mailing;
pub use super::mailing_attempt::Entity as MailingAttempt;
pub use super::mailing_recipient::Entity as MailingRecipient;
pub use super::mailing_status::MailingStatus;
pub use super::message::Entity as Message;
pub use super::recipient::Entity as Recipient;
pub use super::user::Entity as User;
