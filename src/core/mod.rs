pub mod authorization_request;
pub mod circuits;
pub mod identifier;
pub mod query;
pub mod response;
pub mod schema;
pub mod util;
