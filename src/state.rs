pub mod cancel_token;
pub mod catalog;
pub mod job_state;
pub mod session;
