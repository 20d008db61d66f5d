//! Process-wide HTTP client.
//!
//! One configured client serves every request in the process; it is built
//! on first use and reused for init, part, and complete calls alike.

use std::time::Duration;

use lazy_static::lazy_static;
use reqwest::Client;

use crate::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};

lazy_static! {
    static ref HTTP_CLIENT: Client = Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .read_timeout(Duration::from_secs(READ_TIMEOUT_SECS))
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .expect("static HTTP client configuration is valid");
}

pub fn http_client() -> &'static Client {
    &HTTP_CLIENT
}
