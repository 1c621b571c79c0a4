mod auth;
mod client;

pub use auth::Credentials;
pub use client::{
    Address, Album, AlbumItem, ApiErrorClass, ClientOptions, Folder, ItemAdditional, Scope,
    SynoClient, SynoError,
};
