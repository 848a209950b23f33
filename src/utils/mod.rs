pub mod time;
pub mod url;

pub use time::{Clock, FixedClock, Granularity, SystemClock};
pub use url::UrlUtils;
