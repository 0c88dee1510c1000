// Configuration loading

pub mod connection;
pub mod secrets;
pub mod settings;

pub use connection::{resolve_connection, ConnectionOverrides, ResolvedConnection, ValueSource};
pub use secrets::{get_token, TokenLookup, TokenSource};
pub use settings::Settings;
