pub mod attempt_status;
pub mod mailing;
pub mod mailing_attempt;
pub mod mailing_recipient;
pub mod mailing_status;
pub mod message;
pub mod prelude;
pub mod recipient;
pub mod user;
