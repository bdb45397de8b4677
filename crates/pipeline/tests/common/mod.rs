pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{
    Harness, create_source_db, fast_retry, flaky_http_server, image_bytes, inline_upload,
    local_upload, options, remote_upload,
};
#[allow(unused_imports)]
pub use mocks::FlakyBackend;
