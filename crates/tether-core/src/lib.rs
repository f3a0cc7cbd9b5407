pub mod commands;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod presence;
pub mod provider;
pub mod security;
