pub mod handlers;
pub mod state;

pub use handlers::build_router;
pub use state::{split_shares, Coordinator};
