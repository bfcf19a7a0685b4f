//! Security checks that apply to any YAML dialect.

pub mod unencrypted_url;

pub use unencrypted_url::{find_unencrypted_urls, has_unencrypted_url, UnencryptedUrlCheck};
