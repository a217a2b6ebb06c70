pub mod http;

pub use http::HttpImageGenerator;
