pub mod dispatch;
pub mod mailer;
pub mod rate_limit;
pub mod scheduler;
