mod cache;
mod http;

pub use cache::ResponseCache;
pub use http::HttpCalendar;
