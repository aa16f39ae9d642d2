pub mod blob;
pub mod db;
pub mod import_llm;
pub mod shortener;
pub mod title_llm;

pub use blob::FsBlobStore;
pub use db::DbAdapter;
pub use import_llm::OpenAiImportAdapter;
pub use shortener::HttpShortener;
pub use title_llm::OpenAiTitleAdapter;
