//! Request middleware.

mod session;

pub use session::{CONVERSATION_HEADER, USER_HEADER, session_middleware};
