mod http_transport;
pub mod retry_policy;

pub use http_transport::HttpTransport;
pub(crate) use http_transport::classify_transport_error;
