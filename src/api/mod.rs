pub mod auth;
pub mod handlers;
pub mod router;
pub mod ws_types;

pub use router::create_router;
