//! One module per subcommand.

pub mod auth;
pub mod calendars;
pub mod events;
pub mod link;
pub mod logout;
pub mod watch;
