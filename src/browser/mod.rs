pub mod types;
pub mod webdriver;

pub use types::{BrowserError, BrowserId, BrowserOptions, BrowserProvider, BrowserResult};
pub use webdriver::WebDriverProvider;
