pub mod crawl;
pub mod status;
