pub mod access;

pub use access::BotAccess;
